//! Plain speaker-text transcript parser
//!
//! Lines of the form `Speaker Name (HH:MM:SS): text`, with indented lines
//! continuing the previous turn. End times are inferred from the next
//! turn's start; the final turn gets `end == start` since nothing bounds it.

use super::RawSegment;
use crate::bundle::vtt::parse_timestamp;
use crate::error::ParseError;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // e.g. "Alice Smith (01:02:03): hello" — timestamp is H:MM:SS or HH:MM:SS
    RE.get_or_init(|| {
        Regex::new(r"^(?P<speaker>[^(\n]+?)\s*\((?P<ts>\d{1,2}:\d{2}:\d{2})\):\s?(?P<text>.*)$")
            .expect("static header pattern")
    })
}

pub(crate) fn parse(text: &str, path: &Path) -> Result<Vec<RawSegment>, ParseError> {
    let re = header_re();
    let mut turns: Vec<(f64, String, String)> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = re.captures(line) {
            let ts = &caps["ts"];
            let start = parse_timestamp(&format!("{}.000", ts)).ok_or_else(|| {
                ParseError::Malformed {
                    format: "plain-text",
                    path: path.to_path_buf(),
                    reason: format!("line {}: bad timestamp '{}'", lineno + 1, ts),
                }
            })?;
            turns.push((
                start,
                caps["speaker"].trim().to_string(),
                caps["text"].trim().to_string(),
            ));
        } else if line.starts_with(' ') || line.starts_with('\t') {
            match turns.last_mut() {
                Some((_, _, body)) => {
                    if !body.is_empty() {
                        body.push(' ');
                    }
                    body.push_str(line.trim());
                }
                None => {
                    return Err(ParseError::Malformed {
                        format: "plain-text",
                        path: path.to_path_buf(),
                        reason: format!("line {}: continuation before any speaker header", lineno + 1),
                    })
                }
            }
        } else {
            return Err(ParseError::Malformed {
                format: "plain-text",
                path: path.to_path_buf(),
                reason: format!("line {}: expected 'Speaker (HH:MM:SS): text'", lineno + 1),
            });
        }
    }

    let mut segments = Vec::with_capacity(turns.len());
    for i in 0..turns.len() {
        let (start, speaker, text) = turns[i].clone();
        let end = turns.get(i + 1).map(|(s, _, _)| *s).unwrap_or(start);
        segments.push(RawSegment {
            start,
            end,
            speaker,
            words: vec![],
            text,
            meta: None,
        });
    }
    Ok(segments)
}

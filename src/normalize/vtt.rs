//! WebVTT transcript parsers
//!
//! Two speaker conventions appear in the wild: `<v Speaker>` voice tags and
//! plain `Speaker: text` cue bodies. Both share the cue scanner below; a cue
//! with no speaker marking inherits the previous cue's speaker.

use super::RawSegment;
use crate::bundle::vtt::parse_timestamp;
use crate::error::ParseError;
use std::path::Path;

struct Cue {
    start: f64,
    end: f64,
    body: String,
}

/// Scan cues out of a VTT document, ignoring header, NOTE blocks, and cue
/// identifiers.
fn scan_cues(text: &str, path: &Path) -> Result<Vec<Cue>, ParseError> {
    let mut cues = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((lhs, rhs)) = line.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (
            parse_timestamp(lhs),
            // settings like "align:start" may follow the end timestamp
            parse_timestamp(rhs.trim().split_whitespace().next().unwrap_or("")),
        ) else {
            return Err(ParseError::Malformed {
                format: "vtt",
                path: path.to_path_buf(),
                reason: format!("bad cue timing line: '{}'", line),
            });
        };

        let mut body_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() {
                break;
            }
            body_lines.push(lines.next().unwrap_or_default().trim().to_string());
        }
        cues.push(Cue {
            start,
            end,
            body: body_lines.join(" "),
        });
    }
    Ok(cues)
}

/// Strip `<v Speaker>` voice tags, returning the tagged speaker (if any)
/// and the cleaned text.
fn split_voice_tag(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<v ") {
        if let Some(close) = rest.find('>') {
            let speaker = rest[..close].trim().to_string();
            let text = rest[close + 1..].replace("</v>", "").trim().to_string();
            return (Some(speaker), text);
        }
    }
    (None, body.replace("</v>", "").trim().to_string())
}

pub(crate) fn parse_voice_tags(text: &str, path: &Path) -> Result<Vec<RawSegment>, ParseError> {
    let mut segments = Vec::new();
    let mut current_speaker = "speaker_0".to_string();

    for cue in scan_cues(text, path)? {
        let (speaker, body) = split_voice_tag(&cue.body);
        if let Some(s) = speaker {
            current_speaker = s;
        }
        if body.is_empty() {
            continue;
        }
        segments.push(RawSegment {
            start: cue.start,
            end: cue.end,
            speaker: current_speaker.clone(),
            words: vec![],
            text: body,
            meta: None,
        });
    }
    Ok(segments)
}

pub(crate) fn parse_speaker_colon(text: &str, path: &Path) -> Result<Vec<RawSegment>, ParseError> {
    let mut segments = Vec::new();
    let mut current_speaker = "speaker_0".to_string();

    for cue in scan_cues(text, path)? {
        let body = match cue.body.split_once(':') {
            Some((speaker, rest)) if !speaker.trim().is_empty() => {
                current_speaker = speaker.trim().to_string();
                rest.trim().to_string()
            }
            _ => cue.body.trim().to_string(),
        };
        if body.is_empty() {
            continue;
        }
        segments.push(RawSegment {
            start: cue.start,
            end: cue.end,
            speaker: current_speaker.clone(),
            words: vec![],
            text: body,
            meta: None,
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICE_SAMPLE: &str = "\
WEBVTT

1
00:00:01.000 --> 00:00:03.000
<v Alice>Hello there.</v>

2
00:00:03.000 --> 00:00:05.000
Still me talking.

3
00:00:05.000 --> 00:00:07.000
<v Bob>Hi Alice.
";

    const COLON_SAMPLE: &str = "\
WEBVTT

00:00:01.000 --> 00:00:03.000
Alice: Hello there.

00:00:03.000 --> 00:00:05.000
Bob: Hi. Note the time: 3 PM.
";

    #[test]
    fn test_voice_tags_with_inheritance() {
        let segs = parse_voice_tags(VOICE_SAMPLE, Path::new("t.vtt")).unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].speaker, "Alice");
        assert_eq!(segs[0].text, "Hello there.");
        // untagged cue inherits Alice
        assert_eq!(segs[1].speaker, "Alice");
        assert_eq!(segs[2].speaker, "Bob");
        assert_eq!(segs[2].text, "Hi Alice.");
    }

    #[test]
    fn test_speaker_colon_splits_on_first_colon() {
        let segs = parse_speaker_colon(COLON_SAMPLE, Path::new("t.vtt")).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].speaker, "Alice");
        assert_eq!(segs[1].speaker, "Bob");
        assert_eq!(segs[1].text, "Hi. Note the time: 3 PM.");
    }

    #[test]
    fn test_cue_timing() {
        let segs = parse_voice_tags(VOICE_SAMPLE, Path::new("t.vtt")).unwrap();
        assert_eq!(segs[0].start, 1.0);
        assert_eq!(segs[0].end, 3.0);
    }

    #[test]
    fn test_bad_timing_line() {
        let bad = "WEBVTT\n\nnot-a-time --> also-bad\nhello\n";
        assert!(matches!(
            parse_speaker_colon(bad, Path::new("t.vtt")),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_multiline_cue_body_joined() {
        let doc = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nAlice: first line\nsecond line\n";
        let segs = parse_speaker_colon(doc, Path::new("t.vtt")).unwrap();
        assert_eq!(segs[0].text, "first line second line");
    }
}

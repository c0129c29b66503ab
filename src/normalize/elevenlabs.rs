//! ElevenLabs scribe JSON parser
//!
//! Input carries a flat `words` array with per-word speaker ids and a `type`
//! discriminator. Spacing entries are dropped; audio events are kept as
//! bracketed text. Consecutive words group into one segment until the
//! speaker changes or the inter-word gap exceeds the configured threshold.

use super::RawSegment;
use crate::bundle::Word;
use crate::error::ParseError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ScribeDocument {
    words: Vec<ScribeWord>,
}

#[derive(Debug, Deserialize)]
struct ScribeWord {
    text: String,
    start: f64,
    end: f64,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    speaker_id: Option<String>,
}

pub(crate) fn parse(
    text: &str,
    word_gap_seconds: f64,
    path: &Path,
) -> Result<Vec<RawSegment>, ParseError> {
    let doc: ScribeDocument =
        serde_json::from_str(text).map_err(|e| ParseError::Malformed {
            format: "elevenlabs",
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut segments: Vec<RawSegment> = Vec::new();

    for w in doc.words {
        let kind = w.kind.as_deref().unwrap_or("word");
        if kind == "spacing" {
            continue;
        }
        let text = if kind == "audio_event" {
            format!("[{}]", w.text.trim())
        } else {
            w.text.trim().to_string()
        };
        if text.is_empty() {
            continue;
        }
        let speaker = w
            .speaker_id
            .unwrap_or_else(|| "speaker_0".to_string());
        let word = Word::new(w.start, w.end, text);

        let start_new = match segments.last() {
            Some(seg) => seg.speaker != speaker || w.start - seg.end > word_gap_seconds,
            None => true,
        };
        if start_new {
            segments.push(RawSegment {
                start: w.start,
                end: w.end,
                speaker,
                words: vec![word],
                text: String::new(),
                meta: None,
            });
        } else if let Some(seg) = segments.last_mut() {
            seg.end = seg.end.max(w.end);
            seg.words.push(word);
        }
    }

    Ok(segments)
}

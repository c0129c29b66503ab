//! Whisper verbose_json + diarization JSON parser
//!
//! Joins a whisper transcript's word timings against diarized speaker
//! intervals: each diarization interval collects every word whose time range
//! overlaps it, and non-empty intervals become segments.

use super::RawSegment;
use crate::bundle::Word;
use crate::error::ParseError;
use crate::transcribe::SttOutput;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct DiarSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

#[derive(Debug, Deserialize)]
struct DiarDocument {
    segments: Vec<DiarSegment>,
}

/// Diarization files appear either as `{"segments": [...]}` or as a bare
/// array of intervals.
pub(crate) fn parse_diarization(text: &str, path: &Path) -> Result<Vec<DiarSegment>, ParseError> {
    let parsed: Result<DiarDocument, _> = serde_json::from_str(text);
    let mut segments = match parsed {
        Ok(doc) => doc.segments,
        Err(_) => serde_json::from_str::<Vec<DiarSegment>>(text).map_err(|e| {
            ParseError::Malformed {
                format: "diarization",
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?,
    };
    segments.sort_by(|a, b| {
        (a.start, a.end)
            .partial_cmp(&(b.start, b.end))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(segments)
}

/// Flatten a whisper transcript to word timings, preferring the top-level
/// word list over per-segment words.
fn collect_words(transcript: &SttOutput) -> Vec<Word> {
    let source: Vec<_> = if transcript.words.is_empty() {
        transcript
            .segments
            .iter()
            .flat_map(|s| s.words.iter())
            .collect()
    } else {
        transcript.words.iter().collect()
    };
    source
        .into_iter()
        .filter(|w| !w.text.trim().is_empty())
        .map(|w| Word::new(w.start, w.end, w.text.trim()))
        .collect()
}

pub(crate) fn parse(
    whisper_text: &str,
    diar_text: &str,
    path: &Path,
) -> Result<Vec<RawSegment>, ParseError> {
    let transcript: SttOutput =
        serde_json::from_str(whisper_text).map_err(|e| ParseError::Malformed {
            format: "whisper-diar",
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let diar = parse_diarization(diar_text, path)?;

    let words = collect_words(&transcript);
    if words.is_empty() {
        return Err(ParseError::Malformed {
            format: "whisper-diar",
            path: path.to_path_buf(),
            reason: "transcript carries no word timings".into(),
        });
    }

    let mut segments = Vec::new();
    for interval in diar {
        let overlapping: Vec<Word> = words
            .iter()
            .filter(|w| w.start < interval.end && w.end > interval.start)
            .cloned()
            .collect();
        if overlapping.is_empty() {
            continue;
        }
        let start = overlapping
            .iter()
            .map(|w| w.start)
            .fold(f64::INFINITY, f64::min)
            .min(interval.start);
        let end = overlapping
            .iter()
            .map(|w| w.end)
            .fold(0.0, f64::max)
            .max(interval.end);
        segments.push(RawSegment {
            start,
            end,
            speaker: interval.speaker,
            words: overlapping,
            text: String::new(),
            meta: None,
        });
    }
    Ok(segments)
}

//! Chunk transcription
//!
//! A provider trait over OpenAI-compatible speech-to-text endpoints, plus the
//! worker pool that fans chunks out concurrently, rebases timestamps into the
//! source timeline, and merges per-chunk transcripts into one document.

pub mod pool;
pub mod remote;

use crate::config::SttConfig;
use crate::error::TranscribeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Transcript body format requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Vtt,
    VerboseJson,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Vtt => "vtt",
            ResponseFormat::VerboseJson => "verbose_json",
        }
    }

    /// File extension for per-chunk transcript files
    pub fn extension(&self) -> &'static str {
        match self {
            ResponseFormat::Vtt => "vtt",
            ResponseFormat::VerboseJson => "json",
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = TranscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vtt" => Ok(ResponseFormat::Vtt),
            "verbose_json" => Ok(ResponseFormat::VerboseJson),
            other => Err(TranscribeError::ConfigError(format!(
                "unknown response format '{}' (options: vtt, verbose_json)",
                other
            ))),
        }
    }
}

/// Word-level timing in a whisper-style transcript, times in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SttWord {
    pub start: f64,
    pub end: f64,
    #[serde(alias = "word")]
    pub text: String,
}

/// One segment of a whisper-style transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<SttWord>,
}

/// Whisper-style `verbose_json` transcript document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SttOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<SttSegment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<SttWord>,
}

impl SttOutput {
    /// Shift every timestamp by `offset` seconds, moving a chunk-relative
    /// transcript into the source timeline.
    pub fn rebase(&mut self, offset: f64) {
        for seg in &mut self.segments {
            seg.start += offset;
            seg.end += offset;
            for w in &mut seg.words {
                w.start += offset;
                w.end += offset;
            }
        }
        for w in &mut self.words {
            w.start += offset;
            w.end += offset;
        }
        if let Some(d) = self.duration.as_mut() {
            *d += offset;
        }
    }
}

/// Merge rebased per-chunk transcripts, in chunk order, into one document.
///
/// Segments and words are concatenated, sorted by (start, end), and deduped
/// on identical (start, end, text). Language and model come from the first
/// chunk that reports them; duration is the max end time seen.
pub fn merge_outputs(chunks: Vec<SttOutput>) -> SttOutput {
    let mut merged = SttOutput::default();
    let mut texts: Vec<String> = Vec::new();

    for chunk in chunks {
        if merged.language.is_none() {
            merged.language = chunk.language;
        }
        if merged.model.is_none() {
            merged.model = chunk.model;
        }
        let trimmed = chunk.text.trim();
        if !trimmed.is_empty() {
            texts.push(trimmed.to_string());
        }
        merged.segments.extend(chunk.segments);
        merged.words.extend(chunk.words);
    }

    merged
        .segments
        .sort_by(|a, b| (a.start, a.end).partial_cmp(&(b.start, b.end)).unwrap_or(std::cmp::Ordering::Equal));
    merged
        .segments
        .dedup_by(|a, b| a.start == b.start && a.end == b.end && a.text == b.text);
    merged
        .words
        .sort_by(|a, b| (a.start, a.end).partial_cmp(&(b.start, b.end)).unwrap_or(std::cmp::Ordering::Equal));
    merged
        .words
        .dedup_by(|a, b| a.start == b.start && a.end == b.end && a.text == b.text);

    let mut max_end: f64 = 0.0;
    for s in &merged.segments {
        max_end = max_end.max(s.end);
    }
    for w in &merged.words {
        max_end = max_end.max(w.end);
    }
    if max_end > 0.0 {
        merged.duration = Some(max_end);
    }
    merged.text = texts.join(" ");
    merged
}

/// A speech-to-text backend. Implementations submit one chunk file and
/// return the raw transcript body in the requested format.
pub trait SttProvider: Send + Sync {
    /// Transcribe a single audio file; returns the raw response body
    fn transcribe_file(
        &self,
        audio: &Path,
        format: ResponseFormat,
    ) -> Result<String, TranscribeError>;

    /// Model name submitted to the provider
    fn model(&self) -> &str;
}

/// Build the configured provider
pub fn create_provider(config: &SttConfig) -> Result<Arc<dyn SttProvider>, TranscribeError> {
    let provider = remote::RemoteProvider::new(config)?;
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_format_parse() {
        assert_eq!("vtt".parse::<ResponseFormat>().unwrap(), ResponseFormat::Vtt);
        assert_eq!(
            "verbose_json".parse::<ResponseFormat>().unwrap(),
            ResponseFormat::VerboseJson
        );
        assert!("srt".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn test_rebase_shifts_all_timestamps() {
        let mut out = SttOutput {
            text: "hi".into(),
            duration: Some(2.0),
            segments: vec![SttSegment {
                start: 0.5,
                end: 2.0,
                text: "hi".into(),
                words: vec![SttWord {
                    start: 0.5,
                    end: 2.0,
                    text: "hi".into(),
                }],
            }],
            words: vec![SttWord {
                start: 0.5,
                end: 2.0,
                text: "hi".into(),
            }],
            ..Default::default()
        };
        out.rebase(10.0);
        assert_eq!(out.segments[0].start, 10.5);
        assert_eq!(out.segments[0].words[0].end, 12.0);
        assert_eq!(out.words[0].start, 10.5);
        assert_eq!(out.duration, Some(12.0));
    }

    #[test]
    fn test_merge_sorts_and_dedups() {
        let a = SttOutput {
            text: "one".into(),
            language: Some("en".into()),
            segments: vec![SttSegment {
                start: 0.0,
                end: 1.0,
                text: "one".into(),
                words: vec![],
            }],
            ..Default::default()
        };
        let b = SttOutput {
            text: "one two".into(),
            segments: vec![
                // duplicate of the first chunk's boundary segment
                SttSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "one".into(),
                    words: vec![],
                },
                SttSegment {
                    start: 1.0,
                    end: 2.5,
                    text: "two".into(),
                    words: vec![],
                },
            ],
            ..Default::default()
        };
        let merged = merge_outputs(vec![a, b]);
        assert_eq!(merged.segments.len(), 2);
        assert_eq!(merged.language.as_deref(), Some("en"));
        assert_eq!(merged.duration, Some(2.5));
        assert_eq!(merged.text, "one one two");
    }

    #[test]
    fn test_merge_duration_from_words_only() {
        let a = SttOutput {
            words: vec![SttWord {
                start: 3.0,
                end: 4.5,
                text: "late".into(),
            }],
            ..Default::default()
        };
        let merged = merge_outputs(vec![a]);
        assert_eq!(merged.duration, Some(4.5));
    }

    #[test]
    fn test_deserialize_word_alias() {
        // some providers name the word field "word" instead of "text"
        let json = r#"{"start": 0.0, "end": 0.5, "word": "hey"}"#;
        let w: SttWord = serde_json::from_str(json).unwrap();
        assert_eq!(w.text, "hey");
    }
}

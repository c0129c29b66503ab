//! Canonical transcript bundle
//!
//! The normalized JSON document downstream consumers treat as ground truth:
//! segments sorted by start, words nested under segments, and a speaker
//! roster every `speaker_id` must resolve against. The writer validates all
//! invariants and never produces a malformed bundle.

pub mod vtt;

use crate::error::BundleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Current canonical schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Word timing slack: word windows may exceed their segment window by this
/// many seconds before the writer rejects the bundle.
pub const WORD_EPSILON: f64 = 0.25;

/// A single word with timing, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl Word {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker_id: None,
            source_id: None,
        }
    }
}

/// A contiguous span of transcribed speech attributed to one speaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub start: f64,
    pub end: f64,
    pub speaker_id: String,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Roster entry: opaque id plus a human-facing label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Audio source identity within the session timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub path: String,
    pub offset_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
}

/// Bundle provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMeta {
    pub input_format: String,
    pub input_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_details: Option<Value>,
}

/// Canonical transcript bundle, schema 1.0.0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalBundle {
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub source: SourceInfo,
    pub segments: Vec<Segment>,
    pub speakers: Vec<Speaker>,
    pub meta: BundleMeta,
}

impl CanonicalBundle {
    pub fn new(source: SourceInfo, meta: BundleMeta) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            session_id: None,
            source,
            segments: Vec::new(),
            speakers: Vec::new(),
            meta,
        }
    }

    /// Validate every invariant the schema promises. The writer calls this
    /// before serializing; readers may call it on untrusted input.
    pub fn validate(&self) -> Result<(), BundleError> {
        if !self.schema_version.starts_with("1.") {
            return Err(BundleError::SchemaVersion(self.schema_version.clone()));
        }

        let roster: HashSet<&str> = self.speakers.iter().map(|s| s.id.as_str()).collect();
        let mut ids: HashSet<&str> = HashSet::with_capacity(self.segments.len());

        for (i, seg) in self.segments.iter().enumerate() {
            if !ids.insert(seg.id.as_str()) {
                return Err(BundleError::DuplicateId(seg.id.clone()));
            }
            if seg.start > seg.end {
                return Err(BundleError::NegativeSpan {
                    id: seg.id.clone(),
                    start: seg.start,
                    end: seg.end,
                });
            }
            if seg.start < 0.0 {
                return Err(BundleError::NegativeSpan {
                    id: seg.id.clone(),
                    start: seg.start,
                    end: seg.end,
                });
            }
            if !roster.contains(seg.speaker_id.as_str()) {
                return Err(BundleError::UnknownSpeaker {
                    id: seg.id.clone(),
                    speaker_id: seg.speaker_id.clone(),
                });
            }
            if i > 0 && self.segments[i - 1].start > seg.start {
                return Err(BundleError::OutOfOrder {
                    prev: self.segments[i - 1].id.clone(),
                    next: seg.id.clone(),
                });
            }
            if !seg.words.is_empty() {
                let first = &seg.words[0];
                let last = &seg.words[seg.words.len() - 1];
                if first.start < seg.start - WORD_EPSILON || last.end > seg.end + WORD_EPSILON {
                    return Err(BundleError::WordsOutsideSegment { id: seg.id.clone() });
                }
                let joined = join_words(&seg.words);
                if joined != seg.text {
                    return Err(BundleError::TextMismatch { id: seg.id.clone() });
                }
            }
        }
        Ok(())
    }

    /// Session-relative duration: max end over all segments
    pub fn duration_seconds(&self) -> f64 {
        self.segments.iter().fold(0.0, |m, s| m.max(s.end))
    }
}

/// Canonical segment text: trimmed whitespace-join of the word texts
pub fn join_words(words: &[Word]) -> String {
    words
        .iter()
        .map(|w| w.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `seg_000000`-style id for position `n`
pub fn segment_id(n: usize) -> String {
    format!("seg_{:06}", n)
}

/// Read a bundle from disk. Validation runs after deserialization.
pub fn read_bundle(path: &Path) -> Result<CanonicalBundle, BundleError> {
    if !path.exists() {
        return Err(BundleError::InputMissing(path.to_path_buf()));
    }
    let data = std::fs::read_to_string(path)?;
    let bundle: CanonicalBundle = serde_json::from_str(&data)?;
    bundle.validate()?;
    Ok(bundle)
}

/// Write a bundle to disk as UTF-8 JSON. Fails (without touching the file)
/// when any invariant is violated.
pub fn write_bundle(bundle: &CanonicalBundle, path: &Path) -> Result<(), BundleError> {
    bundle.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(bundle)?;
    std::fs::write(path, json)?;
    debug!(
        "Wrote bundle with {} segments, {} speakers to {:?}",
        bundle.segments.len(),
        bundle.speakers.len(),
        path
    );
    Ok(())
}

//! Transcript normalization
//!
//! Parses heterogeneous transcript formats into the canonical bundle schema.
//! Each parser yields raw speaker-attributed spans; the shared finalize pass
//! sorts them, assigns ids, builds the speaker roster, and resolves the
//! source offset.

pub mod elevenlabs;
pub mod plain_text;
pub mod vtt;
pub mod whisper_diar;

use crate::bundle::{
    join_words, segment_id, BundleMeta, CanonicalBundle, Segment, SourceInfo, Speaker, Word,
};
use crate::error::ParseError;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Supported transcript input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// ElevenLabs scribe JSON with per-word speaker ids
    ElevenLabs,
    /// `Speaker (HH:MM:SS): text` lines with indented continuations
    PlainText,
    /// WebVTT with `<v Speaker>` voice tags
    VttVoice,
    /// WebVTT with `Speaker: text` cue bodies
    VttSpeaker,
    /// Whisper verbose_json plus a diarization JSON
    WhisperDiar,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::ElevenLabs => "elevenlabs",
            InputFormat::PlainText => "plain-text",
            InputFormat::VttVoice => "vtt-voice",
            InputFormat::VttSpeaker => "vtt-speaker",
            InputFormat::WhisperDiar => "whisper-diar",
        }
    }
}

impl FromStr for InputFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elevenlabs" => Ok(InputFormat::ElevenLabs),
            "plain-text" => Ok(InputFormat::PlainText),
            "vtt-voice" => Ok(InputFormat::VttVoice),
            "vtt-speaker" => Ok(InputFormat::VttSpeaker),
            "whisper-diar" => Ok(InputFormat::WhisperDiar),
            other => Err(ParseError::UnknownFormat(other.to_string())),
        }
    }
}

/// A speaker-attributed span before ids and roster assignment
#[derive(Debug, Clone)]
pub(crate) struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub words: Vec<Word>,
    /// Used when no word timings exist for the span
    pub text: String,
    pub meta: Option<Value>,
}

/// Normalization inputs beyond the transcript file itself
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Gap above which consecutive words split into separate segments
    pub word_gap_seconds: Option<f64>,
    /// Diarization JSON, required for whisper-diar input
    pub diarization: Option<PathBuf>,
    /// JSON map of audio path (or basename) to offset seconds
    pub offsets_file: Option<PathBuf>,
    /// Audio path used for offset lookup and recorded in the bundle
    pub audio_path: Option<PathBuf>,
    /// Explicit offset, used when no offsets file is given
    pub manual_offset: Option<f64>,
    /// Source identity; defaults to the input file stem
    pub source_id: Option<String>,
}

/// Resolve the source offset per the lookup policy: offsets file (absolute
/// path, then basename), else manual offset, else zero.
pub fn resolve_offset(opts: &NormalizeOptions) -> Result<f64, ParseError> {
    if let (Some(offsets_file), Some(audio)) = (&opts.offsets_file, &opts.audio_path) {
        let data = std::fs::read_to_string(offsets_file)?;
        let table: HashMap<String, f64> = serde_json::from_str(&data)?;

        let abs = audio.to_string_lossy().to_string();
        if let Some(offset) = table.get(&abs) {
            return Ok(*offset);
        }
        if let Some(name) = audio.file_name().and_then(|n| n.to_str()) {
            if let Some(offset) = table.get(name) {
                return Ok(*offset);
            }
        }
        return Err(ParseError::OffsetNotFound(abs));
    }
    Ok(opts.manual_offset.unwrap_or(0.0))
}

/// Parse a transcript file into a canonical bundle
pub fn normalize_file(
    input: &Path,
    format: InputFormat,
    opts: &NormalizeOptions,
) -> Result<CanonicalBundle, ParseError> {
    if !input.exists() {
        return Err(ParseError::InputMissing(input.to_path_buf()));
    }
    let text = std::fs::read_to_string(input)?;

    let raw = match format {
        InputFormat::ElevenLabs => {
            elevenlabs::parse(&text, opts.word_gap_seconds.unwrap_or(1.0), input)?
        }
        InputFormat::PlainText => plain_text::parse(&text, input)?,
        InputFormat::VttVoice => vtt::parse_voice_tags(&text, input)?,
        InputFormat::VttSpeaker => vtt::parse_speaker_colon(&text, input)?,
        InputFormat::WhisperDiar => {
            let diar_path = opts
                .diarization
                .as_ref()
                .ok_or(ParseError::DiarizationMissing)?;
            let diar_text = std::fs::read_to_string(diar_path)?;
            whisper_diar::parse(&text, &diar_text, input)?
        }
    };

    let offset = resolve_offset(opts)?;
    let source_id = opts.source_id.clone().unwrap_or_else(|| {
        input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "source".to_string())
    });

    debug!(
        "Normalized {} {} spans from {:?} (offset {:.3}s)",
        raw.len(),
        format.as_str(),
        input,
        offset
    );
    Ok(finalize(raw, format, input, source_id, offset, opts))
}

/// Sort spans, assign ids, build the roster, and wrap into a bundle
pub(crate) fn finalize(
    mut raw: Vec<RawSegment>,
    format: InputFormat,
    input: &Path,
    source_id: String,
    offset: f64,
    opts: &NormalizeOptions,
) -> CanonicalBundle {
    raw.sort_by(|a, b| {
        (a.start, a.end)
            .partial_cmp(&(b.start, b.end))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut roster: Vec<Speaker> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut segments = Vec::with_capacity(raw.len());

    for (i, span) in raw.into_iter().enumerate() {
        if seen.insert(span.speaker.clone()) {
            roster.push(Speaker {
                id: span.speaker.clone(),
                label: span.speaker.clone(),
                meta: None,
            });
        }
        let text = if span.words.is_empty() {
            span.text.trim().to_string()
        } else {
            join_words(&span.words)
        };
        segments.push(Segment {
            id: segment_id(i),
            start: span.start,
            end: span.end,
            speaker_id: span.speaker,
            text,
            words: span.words,
            meta: span.meta,
        });
    }

    let audio_path = opts
        .audio_path
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());

    CanonicalBundle {
        schema_version: crate::bundle::SCHEMA_VERSION.to_string(),
        session_id: None,
        source: SourceInfo {
            id: source_id,
            path: input.to_string_lossy().to_string(),
            offset_seconds: offset,
            duration_seconds: None,
            audio_path,
        },
        segments,
        speakers: roster,
        meta: BundleMeta {
            input_format: format.as_str().to_string(),
            input_path: input.to_string_lossy().to_string(),
            input_details: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(
            "elevenlabs".parse::<InputFormat>().unwrap(),
            InputFormat::ElevenLabs
        );
        assert_eq!(
            "whisper-diar".parse::<InputFormat>().unwrap(),
            InputFormat::WhisperDiar
        );
        assert!(matches!(
            "srt".parse::<InputFormat>(),
            Err(ParseError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_offset_lookup_absolute_then_basename() {
        let dir = tempfile::tempdir().unwrap();
        let offsets = dir.path().join("offsets.json");
        std::fs::write(&offsets, r#"{"/audio/a.wav": 12.5, "b.wav": 3.0}"#).unwrap();

        let abs = NormalizeOptions {
            offsets_file: Some(offsets.clone()),
            audio_path: Some(PathBuf::from("/audio/a.wav")),
            ..Default::default()
        };
        assert_eq!(resolve_offset(&abs).unwrap(), 12.5);

        let by_name = NormalizeOptions {
            offsets_file: Some(offsets.clone()),
            audio_path: Some(PathBuf::from("/elsewhere/b.wav")),
            ..Default::default()
        };
        assert_eq!(resolve_offset(&by_name).unwrap(), 3.0);

        let miss = NormalizeOptions {
            offsets_file: Some(offsets),
            audio_path: Some(PathBuf::from("/audio/c.wav")),
            ..Default::default()
        };
        assert!(matches!(
            resolve_offset(&miss),
            Err(ParseError::OffsetNotFound(_))
        ));
    }

    #[test]
    fn test_offset_manual_and_default() {
        let manual = NormalizeOptions {
            manual_offset: Some(7.25),
            ..Default::default()
        };
        assert_eq!(resolve_offset(&manual).unwrap(), 7.25);
        assert_eq!(resolve_offset(&NormalizeOptions::default()).unwrap(), 0.0);
    }

    #[test]
    fn test_finalize_sorts_and_ids() {
        let raw = vec![
            RawSegment {
                start: 5.0,
                end: 6.0,
                speaker: "bob".into(),
                words: vec![],
                text: "later".into(),
                meta: None,
            },
            RawSegment {
                start: 1.0,
                end: 2.0,
                speaker: "alice".into(),
                words: vec![],
                text: "earlier".into(),
                meta: None,
            },
        ];
        let bundle = finalize(
            raw,
            InputFormat::PlainText,
            Path::new("t.txt"),
            "src0".into(),
            0.0,
            &NormalizeOptions::default(),
        );
        assert_eq!(bundle.segments[0].id, "seg_000000");
        assert_eq!(bundle.segments[0].text, "earlier");
        assert_eq!(bundle.segments[1].id, "seg_000001");
        assert_eq!(bundle.speakers.len(), 2);
        bundle.validate().unwrap();
    }

    #[test]
    fn test_finalize_text_from_words() {
        let raw = vec![RawSegment {
            start: 0.0,
            end: 1.0,
            speaker: "alice".into(),
            words: vec![
                Word::new(0.0, 0.5, " hello"),
                Word::new(0.5, 1.0, "world "),
            ],
            text: "ignored".into(),
            meta: None,
        }];
        let bundle = finalize(
            raw,
            InputFormat::ElevenLabs,
            Path::new("t.json"),
            "src0".into(),
            0.0,
            &NormalizeOptions::default(),
        );
        assert_eq!(bundle.segments[0].text, "hello world");
        bundle.validate().unwrap();
    }
}

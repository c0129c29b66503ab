//! Multi-source synchronization
//!
//! Merges one or more normalized bundles onto a shared timeline. Segment
//! times become offset-absolute, then the whole timeline is re-based so the
//! earliest segment starts at zero. Speaker ids are namespaced per method
//! and source so speakers from different recordings never collide; the raw
//! speaker survives in segment metadata for later identity mapping.

use crate::bundle::{
    segment_id, vtt::render_vtt, BundleMeta, CanonicalBundle, Segment, SourceInfo, Speaker,
};
use crate::error::BundleError;
use crate::transcribe::{SttOutput, SttSegment, SttWord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Namespaced speaker id: `{method}__{source_id}__{raw_speaker}`
pub fn namespace_speaker(method: &str, source_id: &str, raw: &str) -> String {
    format!("{}__{}__{}", method, source_id, raw)
}

/// One interval of the merged diarization artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarInterval {
    pub id: String,
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// Result of synchronizing one method's sources
#[derive(Debug, Clone)]
pub struct SyncedMethod {
    pub bundle: CanonicalBundle,
    /// How far the combined timeline was shifted toward zero
    pub timeline_start: f64,
}

/// Merge normalized bundles for one transcription method onto a single
/// zero-based timeline.
pub fn synchronize(method: &str, sources: &[CanonicalBundle]) -> Result<SyncedMethod, BundleError> {
    if sources.is_empty() {
        return Err(BundleError::NoSources);
    }
    for bundle in sources {
        bundle.validate()?;
    }

    struct AbsSegment {
        start: f64,
        end: f64,
        speaker_id: String,
        raw_speaker: String,
        source_id: String,
        text: String,
        words: Vec<crate::bundle::Word>,
    }

    let mut abs: Vec<AbsSegment> = Vec::new();
    for bundle in sources {
        let offset = bundle.source.offset_seconds;
        let source_id = &bundle.source.id;
        for seg in &bundle.segments {
            let speaker_id = namespace_speaker(method, source_id, &seg.speaker_id);
            let words = seg
                .words
                .iter()
                .map(|w| {
                    let mut w = w.clone();
                    w.start += offset;
                    w.end += offset;
                    w.speaker_id = Some(speaker_id.clone());
                    w.source_id = Some(source_id.clone());
                    w
                })
                .collect();
            abs.push(AbsSegment {
                start: seg.start + offset,
                end: seg.end + offset,
                speaker_id,
                raw_speaker: seg.speaker_id.clone(),
                source_id: source_id.clone(),
                text: seg.text.clone(),
                words,
            });
        }
    }

    let min_start = abs.iter().map(|s| s.start).fold(f64::INFINITY, f64::min);
    let timeline_start = if min_start.is_finite() { min_start } else { 0.0 };

    abs.sort_by(|a, b| {
        (a.start, a.end)
            .partial_cmp(&(b.start, b.end))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut roster: Vec<Speaker> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut segments: Vec<Segment> = Vec::with_capacity(abs.len());

    for (i, mut seg) in abs.into_iter().enumerate() {
        seg.start -= timeline_start;
        seg.end -= timeline_start;
        for w in &mut seg.words {
            w.start -= timeline_start;
            w.end -= timeline_start;
        }
        if seen.insert(seg.speaker_id.clone()) {
            roster.push(Speaker {
                id: seg.speaker_id.clone(),
                label: seg.raw_speaker.clone(),
                meta: Some(json!({ "source_id": seg.source_id })),
            });
        }
        segments.push(Segment {
            id: segment_id(i),
            start: seg.start,
            end: seg.end,
            speaker_id: seg.speaker_id,
            text: seg.text,
            words: seg.words,
            meta: Some(json!({
                "raw_speaker": seg.raw_speaker,
                "source_id": seg.source_id,
            })),
        });
    }

    let source_entries: Vec<_> = sources
        .iter()
        .map(|b| {
            json!({
                "id": b.source.id,
                "path": b.source.path,
                "offset_seconds": b.source.offset_seconds,
            })
        })
        .collect();

    let bundle = CanonicalBundle {
        schema_version: crate::bundle::SCHEMA_VERSION.to_string(),
        session_id: sources.iter().find_map(|b| b.session_id.clone()),
        source: SourceInfo {
            id: method.to_string(),
            path: sources[0].source.path.clone(),
            offset_seconds: 0.0,
            duration_seconds: None,
            audio_path: sources[0].source.audio_path.clone(),
        },
        segments,
        speakers: roster,
        meta: BundleMeta {
            input_format: format!("sync:{}", method),
            input_path: sources[0].meta.input_path.clone(),
            input_details: Some(json!({
                "sources": source_entries,
                "timeline_start": timeline_start,
            })),
        },
    };
    bundle.validate()?;

    info!(
        "Synchronized {} source(s) into {} segments for method '{}'",
        sources.len(),
        bundle.segments.len(),
        method
    );
    Ok(SyncedMethod {
        bundle,
        timeline_start,
    })
}

/// Project a synced bundle into the whisper-shaped transcript artifact
pub fn to_whisper_output(bundle: &CanonicalBundle) -> SttOutput {
    let mut words: Vec<SttWord> = Vec::new();
    let mut segments: Vec<SttSegment> = Vec::with_capacity(bundle.segments.len());
    let mut texts: Vec<&str> = Vec::new();

    for seg in &bundle.segments {
        if !seg.text.is_empty() {
            texts.push(&seg.text);
        }
        for w in &seg.words {
            words.push(SttWord {
                start: w.start,
                end: w.end,
                text: w.text.clone(),
            });
        }
        segments.push(SttSegment {
            start: seg.start,
            end: seg.end,
            text: seg.text.clone(),
            words: seg
                .words
                .iter()
                .map(|w| SttWord {
                    start: w.start,
                    end: w.end,
                    text: w.text.clone(),
                })
                .collect(),
        });
    }

    let duration = bundle.duration_seconds();
    SttOutput {
        text: texts.join(" "),
        language: None,
        model: None,
        duration: (duration > 0.0).then_some(duration),
        segments,
        words,
    }
}

/// Project a synced bundle into merged diarization intervals
pub fn to_diarization(bundle: &CanonicalBundle) -> Vec<DiarInterval> {
    bundle
        .segments
        .iter()
        .map(|seg| DiarInterval {
            id: seg.id.clone(),
            start: seg.start,
            end: seg.end,
            speaker: seg.speaker_id.clone(),
        })
        .collect()
}

/// Write the three per-method artifacts: whisper-shaped JSON, diarization
/// JSON, and the WebVTT projection.
pub fn write_method_artifacts(
    synced: &SyncedMethod,
    dir: &Path,
    method: &str,
) -> Result<(), BundleError> {
    std::fs::create_dir_all(dir)?;

    let whisper = to_whisper_output(&synced.bundle);
    let whisper_json = serde_json::to_string_pretty(&whisper)?;
    std::fs::write(dir.join(format!("{}.whisper.json", method)), whisper_json)?;

    let diar = to_diarization(&synced.bundle);
    let diar_json = serde_json::to_string_pretty(&diar)?;
    std::fs::write(dir.join(format!("{}.diarization.json", method)), diar_json)?;

    std::fs::write(dir.join(format!("{}.vtt", method)), render_vtt(&synced.bundle))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Word;

    fn source_bundle(source_id: &str, offset: f64, start: f64, speaker: &str) -> CanonicalBundle {
        let mut bundle = CanonicalBundle::new(
            SourceInfo {
                id: source_id.to_string(),
                path: format!("/audio/{}.wav", source_id),
                offset_seconds: offset,
                duration_seconds: None,
                audio_path: None,
            },
            BundleMeta {
                input_format: "plain-text".into(),
                input_path: format!("/t/{}.txt", source_id),
                input_details: None,
            },
        );
        bundle.speakers.push(Speaker {
            id: speaker.to_string(),
            label: speaker.to_string(),
            meta: None,
        });
        bundle.segments.push(Segment {
            id: "seg_000000".into(),
            start,
            end: start + 2.0,
            speaker_id: speaker.to_string(),
            text: "hello".into(),
            words: vec![Word::new(start, start + 2.0, "hello")],
            meta: None,
        });
        bundle
    }

    #[test]
    fn test_speaker_namespacing_is_injective() {
        // same raw speaker name in two sources must yield distinct ids
        let a = source_bundle("mic", 0.0, 5.0, "SPEAKER_00");
        let b = source_bundle("zoom", 0.0, 6.0, "SPEAKER_00");
        let synced = synchronize("whisper", &[a, b]).unwrap();

        let ids: HashSet<&str> = synced.bundle.speakers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("whisper__mic__SPEAKER_00"));
        assert!(ids.contains("whisper__zoom__SPEAKER_00"));
    }

    #[test]
    fn test_timeline_rebased_to_zero() {
        // both sources start locally at 5s; offsets 0 and 60 put the
        // rebased starts at exactly 0 and 60
        let a = source_bundle("mic", 0.0, 5.0, "A");
        let b = source_bundle("zoom", 60.0, 5.0, "B");
        let synced = synchronize("whisper", &[a, b]).unwrap();

        assert_eq!(synced.timeline_start, 5.0);
        let starts: Vec<f64> = synced.bundle.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0.0, 60.0]);
        // words follow their segments
        assert_eq!(synced.bundle.segments[1].words[0].start, 60.0);
    }

    #[test]
    fn test_raw_speaker_preserved_in_meta() {
        let a = source_bundle("mic", 0.0, 5.0, "SPEAKER_00");
        let synced = synchronize("whisper", &[a]).unwrap();
        let meta = synced.bundle.segments[0].meta.as_ref().unwrap();
        assert_eq!(meta["raw_speaker"], "SPEAKER_00");
        assert_eq!(meta["source_id"], "mic");
    }

    #[test]
    fn test_fresh_ids_in_time_order() {
        let a = source_bundle("mic", 30.0, 0.0, "A");
        let b = source_bundle("zoom", 0.0, 0.0, "B");
        let synced = synchronize("whisper", &[a, b]).unwrap();
        assert_eq!(synced.bundle.segments[0].id, "seg_000000");
        assert_eq!(synced.bundle.segments[0].speaker_id, "whisper__zoom__B");
        assert_eq!(synced.bundle.segments[1].id, "seg_000001");
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            synchronize("whisper", &[]),
            Err(BundleError::NoSources)
        ));
    }

    #[test]
    fn test_whisper_projection() {
        let a = source_bundle("mic", 0.0, 5.0, "A");
        let synced = synchronize("whisper", &[a]).unwrap();
        let out = to_whisper_output(&synced.bundle);
        assert_eq!(out.text, "hello");
        assert_eq!(out.words.len(), 1);
        assert_eq!(out.duration, Some(2.0));
    }

    #[test]
    fn test_artifact_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let a = source_bundle("mic", 0.0, 5.0, "A");
        let synced = synchronize("whisper", &[a]).unwrap();
        write_method_artifacts(&synced, dir.path(), "whisper").unwrap();

        assert!(dir.path().join("whisper.whisper.json").exists());
        assert!(dir.path().join("whisper.diarization.json").exists());
        let vtt = std::fs::read_to_string(dir.path().join("whisper.vtt")).unwrap();
        assert!(vtt.starts_with("WEBVTT"));
    }
}

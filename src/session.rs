//! Session artifact layout
//!
//! Every pipeline run is scoped to a session directory:
//!
//! ```text
//! <out>/<session_id>/
//!   <method>/
//!     chunks/                       chunked audio
//!     chunk_manifest.json
//!     chunk_transcripts/            per-chunk raw STT output, rebased
//!     <method>.whisper.json         merged transcript
//!     <method>.diarization.json
//!     <method>.vtt
//!     <method>.speakers.blank.json  roster stub for manual naming
//!   <session_id>.normalized.json    canonical bundle
//! ```

use crate::bundle::CanonicalBundle;
use crate::error::SessionScribeError;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Path helper for one session's artifacts
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub session_id: String,
}

impl SessionPaths {
    pub fn new(out_dir: &Path, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            root: out_dir.join(&session_id),
            session_id,
        }
    }

    pub fn method_dir(&self, method: &str) -> PathBuf {
        self.root.join(method)
    }

    pub fn chunks_dir(&self, method: &str) -> PathBuf {
        self.method_dir(method).join("chunks")
    }

    pub fn chunk_manifest(&self, method: &str) -> PathBuf {
        self.method_dir(method).join(crate::chunker::MANIFEST_FILE)
    }

    pub fn chunk_transcripts_dir(&self, method: &str) -> PathBuf {
        self.method_dir(method).join("chunk_transcripts")
    }

    pub fn whisper_json(&self, method: &str) -> PathBuf {
        self.method_dir(method)
            .join(format!("{}.whisper.json", method))
    }

    pub fn diarization_json(&self, method: &str) -> PathBuf {
        self.method_dir(method)
            .join(format!("{}.diarization.json", method))
    }

    pub fn vtt(&self, method: &str) -> PathBuf {
        self.method_dir(method).join(format!("{}.vtt", method))
    }

    pub fn speakers_blank(&self, method: &str) -> PathBuf {
        self.method_dir(method)
            .join(format!("{}.speakers.blank.json", method))
    }

    pub fn normalized_bundle(&self) -> PathBuf {
        self.root.join(format!("{}.normalized.json", self.session_id))
    }
}

/// Write the roster stub: every speaker id mapped to an empty canonical
/// name, for a human (or the assigner) to fill in later.
pub fn write_speaker_stub(
    bundle: &CanonicalBundle,
    path: &Path,
) -> Result<(), SessionScribeError> {
    let stub: BTreeMap<&str, serde_json::Value> = bundle
        .speakers
        .iter()
        .map(|s| (s.id.as_str(), json!({ "label": s.label, "canonical_name": "" })))
        .collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&stub)
        .map_err(|e| SessionScribeError::Config(e.to_string()))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleMeta, SourceInfo, Speaker};

    #[test]
    fn test_layout_paths() {
        let paths = SessionPaths::new(Path::new("/out"), "standup-2026-08-14");
        assert_eq!(
            paths.chunks_dir("whisper"),
            PathBuf::from("/out/standup-2026-08-14/whisper/chunks")
        );
        assert_eq!(
            paths.whisper_json("whisper"),
            PathBuf::from("/out/standup-2026-08-14/whisper/whisper.whisper.json")
        );
        assert_eq!(
            paths.normalized_bundle(),
            PathBuf::from("/out/standup-2026-08-14/standup-2026-08-14.normalized.json")
        );
        assert_eq!(
            paths.chunk_manifest("whisper"),
            PathBuf::from("/out/standup-2026-08-14/whisper/chunk_manifest.json")
        );
    }

    #[test]
    fn test_speaker_stub() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = CanonicalBundle::new(
            SourceInfo {
                id: "mic".into(),
                path: "a.wav".into(),
                offset_seconds: 0.0,
                duration_seconds: None,
                audio_path: None,
            },
            BundleMeta {
                input_format: "plain-text".into(),
                input_path: "a.txt".into(),
                input_details: None,
            },
        );
        bundle.speakers.push(Speaker {
            id: "whisper__mic__SPEAKER_00".into(),
            label: "SPEAKER_00".into(),
            meta: None,
        });

        let path = dir.path().join("whisper.speakers.blank.json");
        write_speaker_stub(&bundle, &path).unwrap();
        let data: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data["whisper__mic__SPEAKER_00"]["canonical_name"], "");
        assert_eq!(data["whisper__mic__SPEAKER_00"]["label"], "SPEAKER_00");
    }
}

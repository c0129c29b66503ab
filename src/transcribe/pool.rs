//! Concurrent chunk transcription with retry and backoff
//!
//! Fans chunk files out to the STT provider under a semaphore bound, retries
//! transient failures with exponentially doubling delays, and persists one
//! transcript file per chunk plus a manifest of chunk state. Blocking HTTP
//! calls run on the blocking pool so the async workers stay responsive.

use super::{merge_outputs, ResponseFormat, SttOutput, SttProvider};
use crate::bundle::vtt::{format_timestamp, parse_timestamp};
use crate::chunker::ChunkRecord;
use crate::error::TranscribeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Manifest filename written next to per-chunk transcripts
pub const MANIFEST_FILE: &str = "transcription_manifest.json";

/// Hard ceiling on concurrent in-flight requests
const MAX_WORKERS: usize = 8;

/// Per-chunk transcription state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: usize,
    pub chunk_path: PathBuf,
    pub transcript_path: PathBuf,
    /// "pending", "done", "existing", or "failed"
    pub status: String,
    pub attempts: u32,
}

/// Record of one transcription run over a chunk set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionManifest {
    pub model: String,
    pub response_format: ResponseFormat,
    /// RFC 3339 timestamp of when the run started
    pub started_at: String,
    pub chunks: Vec<ChunkEntry>,
}

impl TranscriptionManifest {
    pub fn all_complete(&self) -> bool {
        self.chunks
            .iter()
            .all(|c| c.status == "done" || c.status == "existing")
    }
}

/// Pool tuning knobs
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Upper bound on concurrent requests; clamped to CPU count and 8
    pub max_workers: Option<usize>,
    /// Total attempts per chunk before the chunk fails
    pub max_retries: u32,
    /// First backoff delay; doubles after each transient failure
    pub backoff_base: Duration,
    pub response_format: ResponseFormat,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            response_format: ResponseFormat::VerboseJson,
        }
    }
}

fn worker_bound(opts: &PoolOptions, pending: usize) -> usize {
    opts.max_workers
        .unwrap_or(MAX_WORKERS)
        .min(MAX_WORKERS)
        .min(num_cpus::get())
        .min(pending.max(1))
        .max(1)
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn persist_manifest(
    manifest: &Arc<Mutex<TranscriptionManifest>>,
    dir: &Path,
) -> Result<(), TranscribeError> {
    let snapshot = {
        let guard = manifest
            .lock()
            .map_err(|_| TranscribeError::ConfigError("manifest mutex poisoned".into()))?;
        serde_json::to_vec_pretty(&*guard)
            .map_err(|e| TranscribeError::MalformedResponse(e.to_string()))?
    };
    write_atomic(&dir.join(MANIFEST_FILE), &snapshot)?;
    Ok(())
}

/// Shift every cue timestamp in a VTT body by `offset` seconds
fn rebase_vtt(body: &str, offset: f64) -> String {
    body.lines()
        .map(|line| {
            if let Some((lhs, rhs)) = line.split_once("-->") {
                if let (Some(a), Some(b)) = (parse_timestamp(lhs), parse_timestamp(rhs)) {
                    return format!(
                        "{} --> {}",
                        format_timestamp(a + offset),
                        format_timestamp(b + offset)
                    );
                }
            }
            line.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcribe one chunk with retry on transient failures, returning the
/// rebased transcript body ready to persist.
fn transcribe_with_retry(
    provider: &dyn SttProvider,
    chunk: &ChunkRecord,
    opts: &PoolOptions,
) -> Result<(String, u32), TranscribeError> {
    let offset = chunk.start_ms as f64 / 1000.0;
    let mut delay = opts.backoff_base;

    for attempt in 1..=opts.max_retries {
        let result = provider
            .transcribe_file(&chunk.path, opts.response_format)
            .and_then(|raw| match opts.response_format {
                ResponseFormat::VerboseJson => {
                    let mut parsed: SttOutput = serde_json::from_str(&raw)
                        .map_err(|e| TranscribeError::MalformedResponse(e.to_string()))?;
                    parsed.rebase(offset);
                    serde_json::to_string_pretty(&parsed)
                        .map_err(|e| TranscribeError::MalformedResponse(e.to_string()))
                }
                ResponseFormat::Vtt => Ok(rebase_vtt(&raw, offset)),
            });

        match result {
            Ok(body) => return Ok((body, attempt)),
            Err(e) if e.is_transient() && attempt < opts.max_retries => {
                warn!(
                    "Chunk {} attempt {}/{} failed ({}), retrying in {:?}",
                    chunk.index, attempt, opts.max_retries, e, delay
                );
                std::thread::sleep(delay);
                delay *= 2;
            }
            Err(e) if e.is_transient() => {
                return Err(TranscribeError::RetriesExhausted {
                    index: chunk.index,
                    attempts: opts.max_retries,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    // loop always returns; max_retries >= 1 is enforced by config validation
    Err(TranscribeError::ConfigError("max_retries must be >= 1".into()))
}

/// Transcribe all chunks into `out_dir`, one transcript file per chunk.
///
/// Chunks whose transcript file already exists are marked `"existing"` and
/// skipped. On a fatal per-chunk error, in-flight work completes but no new
/// chunk is scheduled; the first fatal error is returned after all workers
/// settle.
pub async fn transcribe_chunks(
    provider: Arc<dyn SttProvider>,
    chunks: &[ChunkRecord],
    out_dir: &Path,
    opts: &PoolOptions,
) -> Result<TranscriptionManifest, TranscribeError> {
    std::fs::create_dir_all(out_dir)?;

    let entries: Vec<ChunkEntry> = chunks
        .iter()
        .map(|c| {
            let transcript_path = out_dir.join(format!(
                "chunk_{:03}.{}",
                c.index,
                opts.response_format.extension()
            ));
            let status = if transcript_path.exists() {
                "existing"
            } else {
                "pending"
            };
            ChunkEntry {
                index: c.index,
                chunk_path: c.path.clone(),
                transcript_path,
                status: status.to_string(),
                attempts: 0,
            }
        })
        .collect();

    let pending: Vec<ChunkRecord> = chunks
        .iter()
        .zip(&entries)
        .filter(|(_, e)| e.status == "pending")
        .map(|(c, _)| c.clone())
        .collect();

    let manifest = Arc::new(Mutex::new(TranscriptionManifest {
        model: provider.model().to_string(),
        response_format: opts.response_format,
        started_at: chrono::Utc::now().to_rfc3339(),
        chunks: entries,
    }));
    persist_manifest(&manifest, out_dir)?;

    if pending.is_empty() {
        info!("All {} chunk transcripts already exist", chunks.len());
        let guard = manifest
            .lock()
            .map_err(|_| TranscribeError::ConfigError("manifest mutex poisoned".into()))?;
        return Ok(guard.clone());
    }

    let bound = worker_bound(opts, pending.len());
    info!(
        "Transcribing {} of {} chunks with {} workers",
        pending.len(),
        chunks.len(),
        bound
    );

    let semaphore = Arc::new(Semaphore::new(bound));
    let cancelled = Arc::new(AtomicBool::new(false));
    let out_dir = out_dir.to_path_buf();
    let mut handles = Vec::with_capacity(pending.len());

    for chunk in pending {
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let cancelled = Arc::clone(&cancelled);
        let manifest = Arc::clone(&manifest);
        let opts = opts.clone();
        let out_dir = out_dir.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| TranscribeError::ConfigError("worker pool closed".into()))?;
            if cancelled.load(Ordering::SeqCst) {
                return Ok(());
            }

            let worker_chunk = chunk.clone();
            let worker_opts = opts.clone();
            let worker_provider = Arc::clone(&provider);
            let result = tokio::task::spawn_blocking(move || {
                transcribe_with_retry(worker_provider.as_ref(), &worker_chunk, &worker_opts)
            })
            .await
            .map_err(|e| TranscribeError::ConfigError(format!("worker panicked: {}", e)))?;

            let transcript_path = out_dir.join(format!(
                "chunk_{:03}.{}",
                chunk.index,
                opts.response_format.extension()
            ));

            let (status, attempts, err) = match result {
                Ok((body, attempts)) => {
                    write_atomic(&transcript_path, body.as_bytes())?;
                    debug!("Chunk {} transcribed after {} attempt(s)", chunk.index, attempts);
                    ("done", attempts, None)
                }
                Err(e) => {
                    cancelled.store(true, Ordering::SeqCst);
                    ("failed", opts.max_retries, Some(e))
                }
            };

            {
                let mut guard = manifest
                    .lock()
                    .map_err(|_| TranscribeError::ConfigError("manifest mutex poisoned".into()))?;
                if let Some(entry) = guard.chunks.iter_mut().find(|c| c.index == chunk.index) {
                    entry.status = status.to_string();
                    entry.attempts = attempts;
                }
            }
            persist_manifest(&manifest, &out_dir)?;

            match err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }));
    }

    let mut first_error: Option<TranscribeError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error =
                        Some(TranscribeError::ConfigError(format!("worker panicked: {}", e)));
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let guard = manifest
        .lock()
        .map_err(|_| TranscribeError::ConfigError("manifest mutex poisoned".into()))?;
    Ok(guard.clone())
}

/// Merge per-chunk verbose_json transcripts into one document.
///
/// Chunks were rebased before persisting, so merging is concatenation in
/// chunk order followed by the sort/dedup pass.
pub fn merge_transcripts(
    manifest: &TranscriptionManifest,
) -> Result<SttOutput, TranscribeError> {
    if manifest.response_format != ResponseFormat::VerboseJson {
        return Err(TranscribeError::ConfigError(
            "merging requires response_format = verbose_json".into(),
        ));
    }

    let mut entries: Vec<&ChunkEntry> = manifest.chunks.iter().collect();
    entries.sort_by_key(|c| c.index);

    let mut parts = Vec::with_capacity(entries.len());
    for entry in entries {
        let raw = std::fs::read_to_string(&entry.transcript_path)?;
        let parsed: SttOutput = serde_json::from_str(&raw)
            .map_err(|e| TranscribeError::MalformedResponse(e.to_string()))?;
        parts.push(parsed);
    }

    let mut merged = merge_outputs(parts);
    if merged.model.is_none() {
        merged.model = Some(manifest.model.clone());
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl SttProvider for FlakyProvider {
        fn transcribe_file(
            &self,
            _audio: &Path,
            _format: ResponseFormat,
        ) -> Result<String, TranscribeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(TranscribeError::Network("connection reset".into()))
            } else {
                Ok(r#"{"text": "hi", "language": "en", "segments": [{"start": 0.5, "end": 1.0, "text": "hi"}]}"#.to_string())
            }
        }

        fn model(&self) -> &str {
            "whisper-1"
        }
    }

    struct AuthFailProvider;

    impl SttProvider for AuthFailProvider {
        fn transcribe_file(
            &self,
            _audio: &Path,
            _format: ResponseFormat,
        ) -> Result<String, TranscribeError> {
            Err(TranscribeError::Status {
                status: 401,
                body: "bad key".into(),
            })
        }

        fn model(&self) -> &str {
            "whisper-1"
        }
    }

    fn fake_chunks(dir: &Path, n: usize) -> Vec<ChunkRecord> {
        (0..n)
            .map(|i| {
                let path = dir.join(format!("chunk_{:03}.wav", i));
                std::fs::write(&path, b"RIFF").unwrap();
                ChunkRecord {
                    index: i,
                    start_ms: (i as u64) * 10_000,
                    end_ms: (i as u64 + 1) * 10_000,
                    path,
                    format: "wav".into(),
                    bitrate: None,
                    frame_rate: 16_000,
                    channels: 1,
                    sample_width: 2,
                }
            })
            .collect()
    }

    fn fast_opts() -> PoolOptions {
        PoolOptions {
            backoff_base: Duration::from_millis(1),
            ..PoolOptions::default()
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = fake_chunks(dir.path(), 1);
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });

        let out = dir.path().join("transcripts");
        let manifest = transcribe_chunks(Arc::clone(&provider) as Arc<dyn SttProvider>, &chunks, &out, &fast_opts())
            .await
            .unwrap();

        assert!(manifest.all_complete());
        assert_eq!(manifest.chunks[0].status, "done");
        assert_eq!(manifest.chunks[0].attempts, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_chunk_uses_exactly_max_retries_calls() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = fake_chunks(dir.path(), 1);
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        });

        let out = dir.path().join("transcripts");
        let err = transcribe_chunks(Arc::clone(&provider) as Arc<dyn SttProvider>, &chunks, &out, &fast_opts())
            .await
            .unwrap_err();

        assert!(matches!(err, TranscribeError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_does_not_retry() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = fake_chunks(dir.path(), 1);
        let provider: Arc<dyn SttProvider> = Arc::new(AuthFailProvider);

        let out = dir.path().join("transcripts");
        let err = transcribe_chunks(provider, &chunks, &out, &fast_opts())
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_existing_transcripts_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = fake_chunks(dir.path(), 2);
        let out = dir.path().join("transcripts");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(
            out.join("chunk_000.json"),
            r#"{"text": "cached", "segments": []}"#,
        )
        .unwrap();

        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        let manifest = transcribe_chunks(Arc::clone(&provider) as Arc<dyn SttProvider>, &chunks, &out, &fast_opts())
            .await
            .unwrap();

        assert_eq!(manifest.chunks[0].status, "existing");
        assert_eq!(manifest.chunks[1].status, "done");
        // only the second chunk hit the provider
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebase_and_merge() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = fake_chunks(dir.path(), 2);
        let provider: Arc<dyn SttProvider> = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });

        let out = dir.path().join("transcripts");
        let manifest = transcribe_chunks(provider, &chunks, &out, &fast_opts())
            .await
            .unwrap();

        let merged = merge_transcripts(&manifest).unwrap();
        assert_eq!(merged.segments.len(), 2);
        // second chunk starts at 10s, so its segment lands at 10.5..11.0
        assert_eq!(merged.segments[1].start, 10.5);
        assert_eq!(merged.duration, Some(11.0));
        assert_eq!(merged.language.as_deref(), Some("en"));
        assert_eq!(merged.model.as_deref(), Some("whisper-1"));
    }

    #[test]
    fn test_rebase_vtt_shifts_cues() {
        let body = "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nhello\n";
        let shifted = rebase_vtt(body, 60.0);
        assert!(shifted.contains("00:01:01.000 --> 00:01:02.000"));
        assert!(shifted.contains("hello"));
    }

    #[test]
    fn test_worker_bound_clamps() {
        let opts = PoolOptions::default();
        assert!(worker_bound(&opts, 100) <= 8);
        assert_eq!(worker_bound(&opts, 1), 1);
        let opts = PoolOptions {
            max_workers: Some(2),
            ..PoolOptions::default()
        };
        assert!(worker_bound(&opts, 100) <= 2);
    }
}

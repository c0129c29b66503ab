//! Silence-aware audio chunking
//!
//! Splits a long recording into roughly equal chunks at natural pauses so
//! each piece fits an STT provider's per-request limit. Boundary math runs
//! in the exported sample domain, which makes the coverage invariants exact:
//! chunks are contiguous, non-overlapping, start at 0, and end at the source
//! duration.
//!
//! Chunking is expensive, so results are cached: a manifest JSON plus a
//! parameter fingerprint sidecar. A matching fingerprint with all chunk
//! files present short-circuits the whole stage.

use crate::audio::silence::detect_silence;
use crate::audio::{frames_to_ms, load_wav, ms_to_frames, save_wav, AudioBuffer};
use crate::audio::preprocess::normalize_buffer;
use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest file name inside the chunk output directory
pub const MANIFEST_FILE: &str = "chunk_manifest.json";
/// Fingerprint sidecar; a stale fingerprint invalidates the cache
const FINGERPRINT_FILE: &str = "chunk_manifest.sha256";

/// Parameters for one chunking run. The set is fingerprinted together with
/// the source file, so changing any field regenerates the chunks.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkParams {
    /// Upper bound on chunk duration in milliseconds
    pub max_chunk_ms: u64,
    /// Minimum silence length considered a pause
    pub min_silence_ms: u64,
    /// Silence threshold in dBFS
    pub silence_threshold_dbfs: f32,
    /// Padding retained around each silence before taking the midpoint
    pub keep_silence_ms: u64,
    /// Rebalance the tail when it is shorter than this fraction of the
    /// previous chunk
    pub tail_rebalance_ratio: f64,
    /// RMS-normalize before silence detection
    pub normalize: bool,
    /// Exported frame rate
    pub frame_rate: u32,
    /// Exported channel count
    pub channels: u16,
    /// Exported sample width in bytes
    pub sample_width: u16,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_chunk_ms: 900_000,
            min_silence_ms: 500,
            silence_threshold_dbfs: -40.0,
            keep_silence_ms: 100,
            tail_rebalance_ratio: 0.75,
            normalize: false,
            frame_rate: 16000,
            channels: 1,
            sample_width: 2,
        }
    }
}

impl ChunkParams {
    pub(crate) fn validate(&self) -> Result<(), ChunkError> {
        if self.max_chunk_ms == 0 {
            return Err(ChunkError::InvalidParams("max_chunk_ms must be > 0".into()));
        }
        if self.frame_rate == 0 || self.channels == 0 {
            return Err(ChunkError::InvalidParams(
                "frame_rate and channels must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tail_rebalance_ratio) {
            return Err(ChunkError::InvalidParams(
                "tail_rebalance_ratio must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// One exported chunk, as persisted in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub path: PathBuf,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    pub frame_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
}

impl ChunkRecord {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Split `source` into chunks under `dest_dir`, reusing a cached manifest
/// when the parameter fingerprint matches and every chunk file exists.
pub fn chunk_audio(
    source: &Path,
    dest_dir: &Path,
    params: &ChunkParams,
) -> Result<Vec<ChunkRecord>, ChunkError> {
    params.validate()?;

    let fingerprint = fingerprint(source, params)?;
    if let Some(cached) = load_cached(dest_dir, &fingerprint)? {
        info!(
            "Chunk manifest up to date ({} chunks), skipping chunking",
            cached.len()
        );
        return Ok(cached);
    }

    let audio = load_wav(source)?;
    let mut prepared = audio.to_mono();
    if prepared.sample_rate != params.frame_rate {
        prepared = prepared.resample(params.frame_rate)?;
    }
    if params.normalize {
        normalize_buffer(&mut prepared, crate::audio::preprocess::DEFAULT_TARGET_DBFS);
    }

    let boundaries = plan_boundaries(&prepared, params);
    let segments = segment_frames(&boundaries, &prepared, params);

    std::fs::create_dir_all(dest_dir)?;
    let mut records = Vec::with_capacity(segments.len());
    for (index, &(start, end)) in segments.iter().enumerate() {
        let path = dest_dir.join(format!("chunk_{:03}.wav", index));
        let slice = AudioBuffer {
            samples: prepared.samples[start..end].to_vec(),
            sample_rate: params.frame_rate,
            channels: 1,
        };
        save_wav(&slice, &path, params.sample_width).map_err(|e| ChunkError::ExportFailed {
            index,
            reason: e.to_string(),
        })?;
        records.push(ChunkRecord {
            index,
            start_ms: frames_to_ms(start, params.frame_rate),
            end_ms: frames_to_ms(end, params.frame_rate),
            path,
            format: "wav".to_string(),
            bitrate: None,
            frame_rate: params.frame_rate,
            channels: params.channels,
            sample_width: params.sample_width,
        });
    }

    write_manifest(dest_dir, &records, &fingerprint)?;
    info!(
        "Chunked {:?} into {} chunks covering {} ms",
        source,
        records.len(),
        records.last().map(|r| r.end_ms).unwrap_or(0)
    );
    Ok(records)
}

/// Read the manifest JSON from a chunk directory
pub fn read_manifest(dir: &Path) -> Result<Vec<ChunkRecord>, ChunkError> {
    let path = dir.join(MANIFEST_FILE);
    let data = std::fs::read_to_string(&path).map_err(|e| ChunkError::ManifestUnreadable {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&data).map_err(|e| ChunkError::ManifestUnreadable {
        path,
        reason: e.to_string(),
    })
}

fn load_cached(
    dir: &Path,
    fingerprint: &str,
) -> Result<Option<Vec<ChunkRecord>>, ChunkError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let fp_path = dir.join(FINGERPRINT_FILE);
    if !manifest_path.exists() || !fp_path.exists() {
        return Ok(None);
    }
    let stored = std::fs::read_to_string(&fp_path)?;
    if stored.trim() != fingerprint {
        debug!("Chunk fingerprint changed, regenerating");
        return Ok(None);
    }
    let records = read_manifest(dir)?;
    if records.iter().all(|r| r.path.exists()) {
        Ok(Some(records))
    } else {
        debug!("Chunk files missing, regenerating");
        Ok(None)
    }
}

fn write_manifest(
    dir: &Path,
    records: &[ChunkRecord],
    fingerprint: &str,
) -> Result<(), ChunkError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let tmp = manifest_path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(records).map_err(|e| {
        ChunkError::ManifestUnreadable {
            path: manifest_path.clone(),
            reason: e.to_string(),
        }
    })?)?;
    std::fs::rename(&tmp, &manifest_path)?;
    std::fs::write(dir.join(FINGERPRINT_FILE), fingerprint)?;
    Ok(())
}

/// sha256 over the parameter set plus source identity (path + byte length),
/// the idempotence key for a chunk directory.
fn fingerprint(source: &Path, params: &ChunkParams) -> Result<String, ChunkError> {
    let meta = std::fs::metadata(source).map_err(|e| ChunkError::ManifestUnreadable {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(source.to_string_lossy().as_bytes());
    hasher.update(meta.len().to_le_bytes());
    hasher.update(serde_json::to_vec(params).unwrap_or_default());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Split boundaries in frames: silence midpoints (with keep_silence padding)
/// plus the audio edges, deduplicated and sorted.
fn plan_boundaries(audio: &AudioBuffer, params: &ChunkParams) -> Vec<usize> {
    let total = audio.samples.len();
    let total_ms = frames_to_ms(total, audio.sample_rate);
    let silences = detect_silence(audio, params.min_silence_ms, params.silence_threshold_dbfs);

    let mut boundaries: Vec<usize> = vec![0, total];
    for s in &silences {
        let padded_start = s.start_ms.saturating_sub(params.keep_silence_ms);
        let padded_end = (s.end_ms + params.keep_silence_ms).min(total_ms);
        let midpoint_ms = padded_start + (padded_end - padded_start) / 2;
        let frame = ms_to_frames(midpoint_ms, audio.sample_rate).min(total);
        boundaries.push(frame);
    }
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries
}

/// Build final chunk spans from boundaries: split oversized gaps, greedily
/// merge small ones up to the max, then rebalance the tail.
fn segment_frames(
    boundaries: &[usize],
    audio: &AudioBuffer,
    params: &ChunkParams,
) -> Vec<(usize, usize)> {
    let max_frames = ms_to_frames(params.max_chunk_ms, audio.sample_rate).max(1);

    // Initial spans; any span longer than the limit is forced into equal parts
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for w in boundaries.windows(2) {
        let (start, end) = (w[0], w[1]);
        let len = end - start;
        if len == 0 {
            continue;
        }
        if len <= max_frames {
            spans.push((start, end));
        } else {
            let pieces = len.div_ceil(max_frames);
            for i in 0..pieces {
                let a = start + (len * i) / pieces;
                let b = start + (len * (i + 1)) / pieces;
                spans.push((a, b));
            }
        }
    }

    // Greedy merge while staying under the limit
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for span in spans {
        match merged.last_mut() {
            Some(last) if (span.1 - last.0) <= max_frames => last.1 = span.1,
            _ => merged.push(span),
        }
    }

    // Tail rebalance: a runt tail gets pooled with its neighbor and the pair
    // is split at the midpoint of their combined audio
    if merged.len() >= 2 {
        let last = merged[merged.len() - 1];
        let prev = merged[merged.len() - 2];
        let last_len = last.1 - last.0;
        let prev_len = prev.1 - prev.0;
        if (last_len as f64) < params.tail_rebalance_ratio * prev_len as f64 {
            let combined_start = prev.0;
            let combined_end = last.1;
            let mid = combined_start + (combined_end - combined_start) / 2;
            let n = merged.len();
            merged[n - 2] = (combined_start, mid);
            merged[n - 1] = (mid, combined_end);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::save_wav;

    fn tone(duration_secs: f32, amplitude: f32) -> Vec<f32> {
        let n = (duration_secs * 16000.0) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / 16000.0;
                amplitude * (2.0 * std::f32::consts::PI * 330.0 * t).sin()
            })
            .collect()
    }

    fn speech_with_pauses(speech_secs: f32, pause_secs: f32, repeats: usize) -> Vec<f32> {
        let mut samples = Vec::new();
        for _ in 0..repeats {
            samples.extend(tone(speech_secs, 0.5));
            samples.extend(vec![0.0f32; (pause_secs * 16000.0) as usize]);
        }
        samples
    }

    fn write_source(dir: &Path, samples: Vec<f32>) -> PathBuf {
        let path = dir.join("source.wav");
        let buf = AudioBuffer::new(samples, 16000, 1).unwrap();
        save_wav(&buf, &path, 2).unwrap();
        path
    }

    fn assert_coverage(records: &[ChunkRecord], total_ms: u64) {
        assert!(!records.is_empty());
        assert_eq!(records[0].start_ms, 0);
        assert_eq!(records.last().unwrap().end_ms, total_ms);
        for w in records.windows(2) {
            assert_eq!(w[0].end_ms, w[1].start_ms, "chunks must be contiguous");
        }
    }

    #[test]
    fn test_single_chunk_when_audio_fits() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), tone(2.0, 0.5));
        let params = ChunkParams {
            max_chunk_ms: 10_000,
            ..Default::default()
        };
        let records = chunk_audio(&source, &dir.path().join("chunks"), &params).unwrap();
        assert_eq!(records.len(), 1);
        assert_coverage(&records, 2000);
    }

    #[test]
    fn test_no_silence_forces_equal_split() {
        // 9s continuous tone with a 1.5s cap: ceil(9 / 1.5) = 6 chunks
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), tone(9.0, 0.5));
        let params = ChunkParams {
            max_chunk_ms: 1_500,
            ..Default::default()
        };
        let records = chunk_audio(&source, &dir.path().join("chunks"), &params).unwrap();
        assert_eq!(records.len(), 6);
        assert_coverage(&records, 9000);
        for r in &records {
            assert!(r.duration_ms() <= 1_500);
        }
    }

    #[test]
    fn test_splits_at_pauses() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), speech_with_pauses(2.0, 1.0, 4));
        let params = ChunkParams {
            max_chunk_ms: 4_000,
            ..Default::default()
        };
        let records = chunk_audio(&source, &dir.path().join("chunks"), &params).unwrap();
        assert!(records.len() >= 2);
        let total_ms = 4 * 3000;
        assert_coverage(&records, total_ms);
        for r in &records {
            assert!(r.duration_ms() <= 4_000, "chunk too long: {}", r.duration_ms());
        }
    }

    #[test]
    fn test_exported_lengths_match_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), speech_with_pauses(1.5, 0.8, 3));
        let params = ChunkParams {
            max_chunk_ms: 3_000,
            ..Default::default()
        };
        let records = chunk_audio(&source, &dir.path().join("chunks"), &params).unwrap();
        for r in &records {
            let chunk = load_wav(&r.path).unwrap();
            assert_eq!(chunk.duration_ms(), r.duration_ms());
            assert_eq!(chunk.sample_rate, r.frame_rate);
        }
    }

    #[test]
    fn test_tail_rebalance_equalizes_last_two() {
        // Pauses place boundaries near 4.0s and 8.5s; with a 4.5s cap the
        // greedy pass yields ~4000/4500/1000ms and the 1000ms runt triggers
        // the rebalance of the last pair.
        let dir = tempfile::tempdir().unwrap();
        let mut samples = tone(3.5, 0.5);
        samples.extend(vec![0.0f32; 16000]);
        samples.extend(tone(3.5, 0.5));
        samples.extend(vec![0.0f32; 16000]);
        samples.extend(tone(0.5, 0.5));
        let source = write_source(dir.path(), samples);
        let params = ChunkParams {
            max_chunk_ms: 4_500,
            ..Default::default()
        };
        let records = chunk_audio(&source, &dir.path().join("chunks"), &params).unwrap();
        assert_coverage(&records, 9500);
        assert!(records.len() >= 2);
        let a = records[records.len() - 2].duration_ms() as i64;
        let b = records[records.len() - 1].duration_ms() as i64;
        assert!((a - b).abs() <= 1, "last two chunks unbalanced: {} vs {}", a, b);
        for r in &records {
            assert!(r.duration_ms() <= 4_500);
        }
    }

    #[test]
    fn test_manifest_cache_reused() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), tone(3.0, 0.5));
        let chunk_dir = dir.path().join("chunks");
        let params = ChunkParams {
            max_chunk_ms: 1_000,
            ..Default::default()
        };

        let first = chunk_audio(&source, &chunk_dir, &params).unwrap();
        let manifest_before = std::fs::read_to_string(chunk_dir.join(MANIFEST_FILE)).unwrap();
        let second = chunk_audio(&source, &chunk_dir, &params).unwrap();
        let manifest_after = std::fs::read_to_string(chunk_dir.join(MANIFEST_FILE)).unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(manifest_before, manifest_after);
    }

    #[test]
    fn test_parameter_change_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), tone(4.0, 0.5));
        let chunk_dir = dir.path().join("chunks");

        let coarse = ChunkParams {
            max_chunk_ms: 4_000,
            ..Default::default()
        };
        let fine = ChunkParams {
            max_chunk_ms: 1_000,
            ..Default::default()
        };
        let first = chunk_audio(&source, &chunk_dir, &coarse).unwrap();
        let second = chunk_audio(&source, &chunk_dir, &fine).unwrap();
        assert_ne!(first.len(), second.len());
    }

    #[test]
    fn test_missing_chunk_file_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), tone(3.0, 0.5));
        let chunk_dir = dir.path().join("chunks");
        let params = ChunkParams {
            max_chunk_ms: 1_000,
            ..Default::default()
        };

        let first = chunk_audio(&source, &chunk_dir, &params).unwrap();
        std::fs::remove_file(&first[0].path).unwrap();
        let second = chunk_audio(&source, &chunk_dir, &params).unwrap();
        assert!(second.iter().all(|r| r.path.exists()));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), tone(1.0, 0.5));
        let params = ChunkParams {
            max_chunk_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            chunk_audio(&source, &dir.path().join("chunks"), &params),
            Err(ChunkError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_index_dense_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), speech_with_pauses(1.0, 0.8, 5));
        let params = ChunkParams {
            max_chunk_ms: 2_000,
            ..Default::default()
        };
        let records = chunk_audio(&source, &dir.path().join("chunks"), &params).unwrap();
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.index, i);
        }
    }
}

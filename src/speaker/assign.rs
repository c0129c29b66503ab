//! Diarization-to-identity assignment
//!
//! Diarized intervals carry anonymous speaker ids. This stage aggregates
//! contiguous same-speaker intervals into blocks long enough to classify
//! reliably, extracts each block's audio from the preprocessed recording,
//! predicts a canonical name with the trained classifier, and writes the
//! prediction back onto every underlying interval.

use super::features::{create_extractor, FeatureExtractor};
use super::SpeakerModelBundle;
use crate::audio::{load_wav, AudioBuffer};
use crate::error::SpeakerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// One diarized interval, annotated in place after assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarizedSegment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DiarizedSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Deserialize)]
struct DiarDocument {
    segments: Vec<DiarizedSegment>,
}

/// Aggregation and filtering knobs
#[derive(Debug, Clone)]
pub struct AssignParams {
    /// Intervals shorter than this are dropped before aggregation
    pub min_segment_seconds: f64,
    /// Target block duration; lower-bounded by min_segment_seconds
    pub aggregation_seconds: f64,
}

impl Default for AssignParams {
    fn default() -> Self {
        Self {
            min_segment_seconds: 1.5,
            aggregation_seconds: 20.0,
        }
    }
}

impl AssignParams {
    fn aggregation_target(&self) -> f64 {
        self.aggregation_seconds.max(self.min_segment_seconds)
    }
}

/// A run of same-speaker intervals classified as one unit
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    /// Indices into the filtered segment list
    pub segment_indices: Vec<usize>,
    pub predicted_speaker: Option<String>,
    pub confidence: f64,
}

impl Block {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Per-diarized-speaker assignment summary
#[derive(Debug, Clone, Serialize)]
pub struct SpeakerSummary {
    pub blocks: usize,
    pub segments: usize,
    pub total_seconds: f64,
    /// Canonical name -> number of blocks assigned to it
    pub predictions: BTreeMap<String, usize>,
}

/// Full assignment output
#[derive(Debug, Clone, Serialize)]
pub struct AssignResult {
    pub segments: Vec<DiarizedSegment>,
    pub blocks: Vec<Block>,
    pub summary: BTreeMap<String, SpeakerSummary>,
}

/// Read a diarization file: `{"segments": [...]}` or a bare array
pub fn load_diarization(path: &Path) -> Result<Vec<DiarizedSegment>, SpeakerError> {
    if !path.exists() {
        return Err(SpeakerError::DiarizationMissing(path.to_path_buf()));
    }
    let data = std::fs::read_to_string(path)?;
    let segments = match serde_json::from_str::<DiarDocument>(&data) {
        Ok(doc) => doc.segments,
        Err(_) => serde_json::from_str::<Vec<DiarizedSegment>>(&data)?,
    };
    Ok(segments)
}

/// Sort by start, drop sub-threshold intervals, and fill in missing ids
pub fn prepare_segments(
    mut segments: Vec<DiarizedSegment>,
    params: &AssignParams,
) -> Vec<DiarizedSegment> {
    segments.sort_by(|a, b| {
        (a.start, a.end)
            .partial_cmp(&(b.start, b.end))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    segments.retain(|s| s.duration() >= params.min_segment_seconds);
    for (i, seg) in segments.iter_mut().enumerate() {
        if seg.id.is_none() {
            seg.id = Some(format!("diar_{:06}", i));
        }
    }
    segments
}

/// Aggregate contiguous same-speaker intervals into blocks. A block flushes
/// when the speaker changes or its accumulated duration reaches the target;
/// blocks shorter than the minimum are discarded.
pub fn aggregate_blocks(segments: &[DiarizedSegment], params: &AssignParams) -> Vec<Block> {
    let target = params.aggregation_target();
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    let mut accumulated = 0.0f64;

    for (i, seg) in segments.iter().enumerate() {
        let same_speaker = current
            .as_ref()
            .map(|b| b.speaker == seg.speaker)
            .unwrap_or(false);

        if !same_speaker || accumulated >= target {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Block {
                speaker: seg.speaker.clone(),
                start: seg.start,
                end: seg.end,
                segment_indices: vec![i],
                predicted_speaker: None,
                confidence: 0.0,
            });
            accumulated = seg.duration();
        } else if let Some(block) = current.as_mut() {
            block.end = block.end.max(seg.end);
            block.segment_indices.push(i);
            accumulated += seg.duration();
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    blocks.retain(|b| b.end - b.start >= params.min_segment_seconds);
    blocks
}

/// Classify blocks and propagate predictions, using an explicit extractor.
pub fn assign_with_extractor(
    mut segments: Vec<DiarizedSegment>,
    audio: &AudioBuffer,
    extractor: &dyn FeatureExtractor,
    model: &SpeakerModelBundle,
    params: &AssignParams,
) -> Result<AssignResult, SpeakerError> {
    let mut blocks = aggregate_blocks(&segments, params);
    let audio_end = audio.duration_ms();

    for block in &mut blocks {
        let start_ms = (block.start.max(0.0) * 1000.0) as u64;
        let end_ms = ((block.end * 1000.0) as u64).min(audio_end);
        if end_ms <= start_ms {
            warn!(
                "Block {:.2}-{:.2}s lies outside the audio, skipping",
                block.start, block.end
            );
            continue;
        }
        let clip = audio.slice_ms(start_ms, end_ms);

        match extractor.extract(&clip) {
            Ok(features) => {
                let (idx, confidence) = model.classifier.predict(&features)?;
                let label = model
                    .labels
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", idx));
                debug!(
                    "Block {:.1}-{:.1}s ({}) -> {} ({:.2})",
                    block.start, block.end, block.speaker, label, confidence
                );
                block.predicted_speaker = Some(label);
                block.confidence = confidence;
            }
            Err(e) => {
                warn!(
                    "Feature extraction failed for block {:.2}-{:.2}s: {}",
                    block.start, block.end, e
                );
            }
        }
    }

    // Propagate block predictions down to the underlying intervals
    for block in &blocks {
        for &i in &block.segment_indices {
            if let Some(seg) = segments.get_mut(i) {
                seg.predicted_speaker = block.predicted_speaker.clone();
                seg.confidence = Some(block.confidence);
            }
        }
    }

    let mut summary: BTreeMap<String, SpeakerSummary> = BTreeMap::new();
    for block in &blocks {
        let entry = summary
            .entry(block.speaker.clone())
            .or_insert_with(|| SpeakerSummary {
                blocks: 0,
                segments: 0,
                total_seconds: 0.0,
                predictions: BTreeMap::new(),
            });
        entry.blocks += 1;
        entry.segments += block.segment_indices.len();
        entry.total_seconds += block.end - block.start;
        if let Some(ref label) = block.predicted_speaker {
            *entry.predictions.entry(label.clone()).or_insert(0) += 1;
        }
    }

    info!(
        "Assigned {} blocks over {} diarized speakers",
        blocks.len(),
        summary.len()
    );
    Ok(AssignResult {
        segments,
        blocks,
        summary,
    })
}

/// Label a diarization file against preprocessed audio using a trained model
pub fn assign(
    diarization: &Path,
    audio_path: &Path,
    model: &SpeakerModelBundle,
    params: &AssignParams,
) -> Result<AssignResult, SpeakerError> {
    let segments = prepare_segments(load_diarization(diarization)?, params);
    let audio = load_wav(audio_path)?;
    let extractor = create_extractor(&model.feature_params)?;
    assign_with_extractor(segments, &audio, extractor.as_ref(), model, params)
}

/// Write the annotated diarization and the per-speaker summary
pub fn write_outputs(result: &AssignResult, dir: &Path, stem: &str) -> Result<(), SpeakerError> {
    std::fs::create_dir_all(dir)?;

    let annotated = serde_json::json!({ "segments": result.segments });
    std::fs::write(
        dir.join(format!("{}.assigned.json", stem)),
        serde_json::to_string_pretty(&annotated)?,
    )?;
    std::fs::write(
        dir.join(format!("{}.summary.json", stem)),
        serde_json::to_string_pretty(&result.summary)?,
    )?;
    Ok(())
}

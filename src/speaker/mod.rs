//! Speaker identification
//!
//! Feature extraction over audio clips, a session-disjoint classifier
//! trainer, and the assigner that labels diarized intervals with canonical
//! speaker names.

pub mod assign;
pub mod classifier;
pub mod dataset;
pub mod features;

use crate::error::SpeakerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Selectable embedding backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureType {
    /// MFCC mean/std statistics (6 x n_mfcc dims)
    MfccStats,
    /// Pretrained ONNX speaker-embedding model
    Neural,
}

impl FromStr for FeatureType {
    type Err = SpeakerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mfcc-stats" => Ok(FeatureType::MfccStats),
            "neural" => Ok(FeatureType::Neural),
            other => Err(SpeakerError::UnknownFeatureType(other.to_string())),
        }
    }
}

/// Extraction parameters persisted with a trained model so inference uses
/// the exact feature configuration the model was fitted on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureParams {
    pub feature_type: FeatureType,
    pub sample_rate: u32,
    pub n_mfcc: usize,
    /// Model path for the neural backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            feature_type: FeatureType::MfccStats,
            sample_rate: 16_000,
            n_mfcc: 40,
            model_path: None,
        }
    }
}

/// Training knobs recorded alongside the fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    pub seed: u64,
    pub test_size: f64,
    pub val_size: f64,
    pub min_clips_per_speaker: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_clips_per_speaker: Option<usize>,
    /// "session" (default) or "clip"
    pub split_mode: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            seed: 42,
            test_size: 0.2,
            val_size: 0.1,
            min_clips_per_speaker: 3,
            max_clips_per_speaker: None,
            split_mode: "session".to_string(),
            epochs: 300,
            learning_rate: 0.1,
            l2_penalty: 1e-3,
        }
    }
}

/// Persisted model: fitted weights, label order, the feature configuration
/// needed at inference time, and how training was run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerModelBundle {
    pub classifier: classifier::LogisticModel,
    /// Label order matching classifier rows
    pub labels: Vec<String>,
    pub feature_params: FeatureParams,
    pub training_params: TrainingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<classifier::EvalReport>,
    /// Session id to split-name mapping from training
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub session_splits: std::collections::HashMap<String, String>,
}

impl SpeakerModelBundle {
    pub fn save(&self, path: &Path) -> Result<(), SpeakerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SpeakerError> {
        let data = std::fs::read_to_string(path).map_err(|e| SpeakerError::ModelUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&data).map_err(|e| SpeakerError::ModelUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Train a speaker model from a clip manifest.
///
/// Loads and filters clips, splits them (session-disjoint by default),
/// extracts an embedding per clip, fits the classifier on the training
/// split, and evaluates every split. The returned bundle is ready to
/// persist with [`SpeakerModelBundle::save`].
pub fn train_model(
    manifest_path: &Path,
    feature_params: &FeatureParams,
    training_params: &TrainingParams,
) -> Result<SpeakerModelBundle, SpeakerError> {
    let clips = dataset::load_manifest(manifest_path)?;
    let clips = dataset::filter_clips(
        clips,
        training_params.min_clips_per_speaker,
        training_params.max_clips_per_speaker,
        training_params.seed,
    )?;

    let split = match training_params.split_mode.as_str() {
        "clip" => dataset::stratified_clip_split(
            &clips,
            training_params.test_size,
            training_params.val_size,
            training_params.seed,
        )?,
        _ => dataset::session_disjoint_split(
            &clips,
            training_params.test_size,
            training_params.val_size,
            training_params.seed,
        )?,
    };

    let labels: Vec<String> = {
        let mut names: Vec<String> = clips.iter().map(|c| c.speaker.clone()).collect();
        names.sort_unstable();
        names.dedup();
        names
    };
    let label_index: std::collections::HashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    let extractor = features::create_extractor(feature_params)?;
    let embed = |clips: &[dataset::ClipRecord]| -> Result<(Vec<Vec<f32>>, Vec<usize>), SpeakerError> {
        let mut x = Vec::with_capacity(clips.len());
        let mut y = Vec::with_capacity(clips.len());
        for clip in clips {
            let audio = crate::audio::load_wav(&clip.clip_path)?;
            x.push(extractor.extract(&audio)?);
            y.push(label_index[clip.speaker.as_str()]);
        }
        Ok((x, y))
    };

    let (train_x, train_y) = embed(&split.train)?;
    let (val_x, val_y) = embed(&split.val)?;
    let (test_x, test_y) = embed(&split.test)?;

    let model = classifier::train(
        &train_x,
        &train_y,
        labels.len(),
        training_params.epochs,
        training_params.learning_rate,
        training_params.l2_penalty,
    )?;

    let mut splits = std::collections::HashMap::new();
    splits.insert(
        "train".to_string(),
        classifier::SplitMetrics {
            accuracy: classifier::accuracy(&model, &train_x, &train_y)?,
            size: train_x.len(),
        },
    );
    if !val_x.is_empty() {
        splits.insert(
            "val".to_string(),
            classifier::SplitMetrics {
                accuracy: classifier::accuracy(&model, &val_x, &val_y)?,
                size: val_x.len(),
            },
        );
    }
    splits.insert(
        "test".to_string(),
        classifier::SplitMetrics {
            accuracy: classifier::accuracy(&model, &test_x, &test_y)?,
            size: test_x.len(),
        },
    );

    let (per_class, confusion) =
        classifier::classification_report(&model, &test_x, &test_y, &labels)?;

    Ok(SpeakerModelBundle {
        classifier: model,
        labels,
        feature_params: feature_params.clone(),
        training_params: training_params.clone(),
        metrics: Some(classifier::EvalReport {
            splits,
            per_class,
            confusion,
        }),
        session_splits: split.session_assignment,
    })
}

//! Configuration loading and types for sessionscribe
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/sessionscribe/config.toml)
//! 3. Environment variables (SESSIONSCRIBE_*)
//! 4. CLI arguments (highest priority)

use crate::chunker::ChunkParams;
use crate::error::SessionScribeError;
use crate::speaker::{FeatureParams, FeatureType, TrainingParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Sessionscribe Configuration
#
# Location: ~/.config/sessionscribe/config.toml
# All settings can be overridden via CLI flags

[audio]
# Preprocess profile applied before chunking and diarization
# Options: passthrough, normalize-only, zoom-audio, voice-memo
profile = "normalize-only"

# Output sample rate in Hz (STT providers expect 16000)
sample_rate = 16000

# Output channel count
channels = 1

# Output bit depth
bit_depth = 16

# Output container: "wav" or "flac"
output_format = "wav"

# RMS target for normalize-only, in dBFS
target_dbfs = -10.0

[chunker]
# Upper bound on chunk duration in milliseconds (15 minutes)
max_chunk_ms = 900000

# Minimum silence length treated as a pause, in milliseconds
min_silence_ms = 500

# Silence threshold in dBFS
silence_threshold_dbfs = -40.0

# Silence padding kept around each split point, in milliseconds
keep_silence_ms = 100

# Rebalance the final chunk when it is shorter than this fraction
# of the previous chunk
tail_rebalance_ratio = 0.75

[stt]
# OpenAI-compatible endpoint base URL
endpoint = "https://api.openai.com"

# Model name submitted with each request
model = "whisper-1"

# API key. Prefer the SESSIONSCRIBE_STT_API_KEY environment variable
# over storing a key here.
# api_key = ""

# Optional language hint ("en", "de", ...)
# language = "en"

# Per-request timeout in seconds; chunks are long, so is the timeout
timeout_secs = 300

# Request word-level timestamps (needed for diarization joins)
word_timestamps = true

# "verbose_json" (required for merging) or "vtt"
response_format = "verbose_json"

# Total attempts per chunk before the run fails
max_retries = 3

# Concurrent requests; clamped to min(8, cpu_count, pending chunks)
# max_workers = 4

[speaker]
# Embedding backend: "mfcc-stats" or "neural" (requires the
# neural-embedding build feature and a model_path)
feature_type = "mfcc-stats"

# Extractor sample rate
sample_rate = 16000

# MFCC coefficients; embedding dimension is 6x this
n_mfcc = 40

# ONNX model for the neural backend
# model_path = ""

# Random seed for shuffles and splits
seed = 42

# Split fractions
test_size = 0.2
val_size = 0.1

# Speakers with fewer clips than this are dropped
min_clips_per_speaker = 3

# Optional cap per speaker, applied after a seeded shuffle
# max_clips_per_speaker = 200

# "session" keeps whole sessions in one split; "clip" stratifies
# individual clips
split_mode = "session"

# Optimizer settings
epochs = 300
learning_rate = 0.1
l2_penalty = 0.001

[assign]
# Diarized intervals shorter than this are dropped, in seconds
min_segment_seconds = 1.5

# Target block duration for classification, in seconds
aggregation_seconds = 20.0
"#;

/// Audio preprocessing defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    pub profile: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub output_format: String,
    pub target_dbfs: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            profile: "normalize-only".to_string(),
            sample_rate: 16_000,
            channels: 1,
            bit_depth: 16,
            output_format: "wav".to_string(),
            target_dbfs: -10.0,
        }
    }
}

/// Silence-aware chunking settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkerConfig {
    pub max_chunk_ms: u64,
    pub min_silence_ms: u64,
    pub silence_threshold_dbfs: f32,
    pub keep_silence_ms: u64,
    pub tail_rebalance_ratio: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        let p = ChunkParams::default();
        Self {
            max_chunk_ms: p.max_chunk_ms,
            min_silence_ms: p.min_silence_ms,
            silence_threshold_dbfs: p.silence_threshold_dbfs,
            keep_silence_ms: p.keep_silence_ms,
            tail_rebalance_ratio: p.tail_rebalance_ratio,
        }
    }
}

impl ChunkerConfig {
    /// Chunk parameters for a given export format
    pub fn to_params(&self, audio: &AudioConfig) -> ChunkParams {
        ChunkParams {
            max_chunk_ms: self.max_chunk_ms,
            min_silence_ms: self.min_silence_ms,
            silence_threshold_dbfs: self.silence_threshold_dbfs,
            keep_silence_ms: self.keep_silence_ms,
            tail_rebalance_ratio: self.tail_rebalance_ratio,
            normalize: false,
            frame_rate: audio.sample_rate,
            channels: audio.channels,
            sample_width: audio.bit_depth / 8,
        }
    }
}

/// Remote STT provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SttConfig {
    pub endpoint: String,
    pub model: String,
    /// Prefer SESSIONSCRIBE_STT_API_KEY over this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub timeout_secs: u64,
    pub word_timestamps: bool,
    pub response_format: String,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
            language: None,
            timeout_secs: 300,
            word_timestamps: true,
            response_format: "verbose_json".to_string(),
            max_retries: 3,
            max_workers: None,
        }
    }
}

/// Speaker model settings: feature extraction plus training knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeakerConfig {
    pub feature_type: String,
    pub sample_rate: u32,
    pub n_mfcc: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    pub seed: u64,
    pub test_size: f64,
    pub val_size: f64,
    pub min_clips_per_speaker: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clips_per_speaker: Option<usize>,
    pub split_mode: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        let f = FeatureParams::default();
        let t = TrainingParams::default();
        Self {
            feature_type: "mfcc-stats".to_string(),
            sample_rate: f.sample_rate,
            n_mfcc: f.n_mfcc,
            model_path: None,
            seed: t.seed,
            test_size: t.test_size,
            val_size: t.val_size,
            min_clips_per_speaker: t.min_clips_per_speaker,
            max_clips_per_speaker: t.max_clips_per_speaker,
            split_mode: t.split_mode,
            epochs: t.epochs,
            learning_rate: t.learning_rate,
            l2_penalty: t.l2_penalty,
        }
    }
}

impl SpeakerConfig {
    pub fn feature_params(&self) -> Result<FeatureParams, SessionScribeError> {
        let feature_type: FeatureType = self
            .feature_type
            .parse()
            .map_err(|e: crate::error::SpeakerError| SessionScribeError::Config(e.to_string()))?;
        Ok(FeatureParams {
            feature_type,
            sample_rate: self.sample_rate,
            n_mfcc: self.n_mfcc,
            model_path: self.model_path.clone(),
        })
    }

    pub fn training_params(&self) -> TrainingParams {
        TrainingParams {
            seed: self.seed,
            test_size: self.test_size,
            val_size: self.val_size,
            min_clips_per_speaker: self.min_clips_per_speaker,
            max_clips_per_speaker: self.max_clips_per_speaker,
            split_mode: self.split_mode.clone(),
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            l2_penalty: self.l2_penalty,
        }
    }
}

/// Diarization assignment settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignConfig {
    pub min_segment_seconds: f64,
    pub aggregation_seconds: f64,
}

impl Default for AssignConfig {
    fn default() -> Self {
        Self {
            min_segment_seconds: 1.5,
            aggregation_seconds: 20.0,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub chunker: ChunkerConfig,
    pub stt: SttConfig,
    pub speaker: SpeakerConfig,
    pub assign: AssignConfig,
}

impl Config {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sessionscribe").join("config.toml"))
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, SessionScribeError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| SessionScribeError::Config(format!("Failed to read config: {}", e)))?;
            config = toml::from_str(&contents)
                .map_err(|e| SessionScribeError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    if let Ok(endpoint) = std::env::var("SESSIONSCRIBE_STT_ENDPOINT") {
        config.stt.endpoint = endpoint;
    }
    if let Ok(model) = std::env::var("SESSIONSCRIBE_STT_MODEL") {
        config.stt.model = model;
    }

    Ok(config)
}

/// Write the commented default config to `path`
pub fn write_default_config(path: &Path) -> Result<(), SessionScribeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.stt.model, "whisper-1");
        assert_eq!(config.chunker.max_chunk_ms, 900_000);
        assert_eq!(config.speaker.n_mfcc, 40);
        assert_eq!(config.assign.min_segment_seconds, 1.5);
    }

    #[test]
    fn test_default_config_matches_struct_defaults() {
        let from_toml: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        let built_in = Config::default();
        assert_eq!(from_toml.audio.sample_rate, built_in.audio.sample_rate);
        assert_eq!(from_toml.stt.timeout_secs, built_in.stt.timeout_secs);
        assert_eq!(from_toml.speaker.seed, built_in.speaker.seed);
        assert_eq!(
            from_toml.chunker.tail_rebalance_ratio,
            built_in.chunker.tail_rebalance_ratio
        );
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("[stt]\nendpoint = \"http://localhost:8080\"\nmodel = \"base.en\"\ntimeout_secs = 60\nword_timestamps = false\nresponse_format = \"verbose_json\"\nmax_retries = 2\n").unwrap();
        assert_eq!(config.stt.endpoint, "http://localhost:8080");
        // untouched sections keep defaults
        assert_eq!(config.chunker.min_silence_ms, 500);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.stt.model, "whisper-1");
    }

    #[test]
    fn test_write_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        write_default_config(&path).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.speaker.split_mode, "session");
    }

    #[test]
    fn test_chunker_params_conversion() {
        let config = Config::default();
        let params = config.chunker.to_params(&config.audio);
        assert_eq!(params.frame_rate, 16_000);
        assert_eq!(params.sample_width, 2);
        params.validate().unwrap();
    }
}

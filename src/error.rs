//! Error types for sessionscribe
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that carry the operation, the offending artifact path, and the inner
//! reason. Only fatal errors bubble up past the pipeline stages; transient
//! STT failures are retried inside the transcription pool.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the sessionscribe pipeline
#[derive(Error, Debug)]
pub enum SessionScribeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Transcription error: {0}")]
    Transcribe(#[from] TranscribeError),

    #[error("Transcript parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Speaker model error: {0}")]
    Speaker(#[from] SpeakerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from audio loading and preprocessing
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Input audio not found: {0}")]
    InputMissing(PathBuf),

    #[error("Output already exists: {0}\n  Pass --overwrite to replace it.")]
    OutputExists(PathBuf),

    #[error("Unknown preprocess profile: '{0}'. Options: passthrough, normalize-only, zoom-audio, voice-memo")]
    UnknownProfile(String),

    #[error("Unsupported output format: '{0}'. Options: wav, flac")]
    UnsupportedFormat(String),

    #[error("ffmpeg not found in PATH. Install FFmpeg to use filter profiles.")]
    FfmpegMissing,

    #[error("ffmpeg failed on {path}: {stderr}")]
    FfmpegFailed { path: PathBuf, stderr: String },

    #[error("WAV error for {path}: {reason}")]
    Wav { path: PathBuf, reason: String },

    #[error("Invalid audio parameters: {0}")]
    InvalidParams(String),

    #[error("Denoise model download failed: {0}")]
    ModelDownload(String),

    #[error("Audio buffer is empty")]
    EmptyBuffer,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the silence-aware chunker
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Chunk manifest unreadable at {path}: {reason}")]
    ManifestUnreadable { path: PathBuf, reason: String },

    #[error("Chunk export failed for chunk {index}: {reason}")]
    ExportFailed { index: usize, reason: String },

    #[error("Invalid chunk parameters: {0}")]
    InvalidParams(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the STT provider and the transcription pool
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("Chunk audio not found: {0}")]
    ChunkMissing(PathBuf),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse provider response: {0}")]
    MalformedResponse(String),

    #[error("Chunk {index} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscribeError {
    /// Whether this failure is worth retrying with backoff.
    ///
    /// Transient: connection trouble, rate limiting, 5xx responses, and
    /// malformed JSON (providers occasionally truncate bodies under load).
    /// Everything else (auth, 4xx, local IO) is fatal for the chunk.
    pub fn is_transient(&self) -> bool {
        match self {
            TranscribeError::Network(_) => true,
            TranscribeError::RateLimited(_) => true,
            TranscribeError::MalformedResponse(_) => true,
            TranscribeError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Errors from transcript normalization parsers
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Transcript file not found: {0}")]
    InputMissing(PathBuf),

    #[error("Unknown input format: '{0}'. Options: elevenlabs, plain-text, vtt-voice, vtt-speaker, whisper-diar")]
    UnknownFormat(String),

    #[error("Malformed {format} input at {path}: {reason}")]
    Malformed {
        format: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Offset lookup failed: no entry for '{0}' in offsets file (tried absolute path and basename)")]
    OffsetNotFound(String),

    #[error("Diarization file required for whisper-diar input")]
    DiarizationMissing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invariant violations caught at the canonical bundle boundary
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Bundle not found: {0}")]
    InputMissing(PathBuf),

    #[error("Unsupported schema version '{0}' (expected 1.x)")]
    SchemaVersion(String),

    #[error("Segment {id}: speaker '{speaker_id}' not present in speaker roster")]
    UnknownSpeaker { id: String, speaker_id: String },

    #[error("Segment {id}: start {start} > end {end}")]
    NegativeSpan { id: String, start: f64, end: f64 },

    #[error("Segments out of order: '{prev}' starts after '{next}'")]
    OutOfOrder { prev: String, next: String },

    #[error("Duplicate segment id '{0}'")]
    DuplicateId(String),

    #[error("Segment {id}: words extend outside the segment window")]
    WordsOutsideSegment { id: String },

    #[error("Segment {id}: text does not match the join of its word texts")]
    TextMismatch { id: String },

    #[error("No input bundles to synchronize")]
    NoSources,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from feature extraction, training, and speaker assignment
#[derive(Error, Debug)]
pub enum SpeakerError {
    #[error("Clip manifest not found: {0}")]
    ManifestMissing(PathBuf),

    #[error("Unknown feature type: '{0}'. Options: mfcc-stats, neural")]
    UnknownFeatureType(String),

    #[error("Feature extraction failed: {0}")]
    Feature(String),

    #[error("No speakers survive filtering (min_clips_per_speaker too high?)")]
    EmptyDataset,

    #[error("Split produced an empty {0} set; adjust test_size/val_size")]
    EmptySplit(&'static str),

    #[error("Model bundle unreadable at {path}: {reason}")]
    ModelUnreadable { path: PathBuf, reason: String },

    #[error("Diarization file not found: {0}")]
    DiarizationMissing(PathBuf),

    #[error("Feature dimension mismatch: model expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using SessionScribeError
pub type Result<T> = std::result::Result<T, SessionScribeError>;

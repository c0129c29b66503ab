// Command-line interface definitions for sessionscribe
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages. Keep it dependent on clap and
// std only.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sessionscribe")]
#[command(author, version, about = "Turn long recordings into speaker-labeled transcripts")]
#[command(long_about = "
Sessionscribe turns long multi-speaker recordings into canonical
speaker-labeled transcripts.

PIPELINE:
  1. preprocess   clean and resample the raw audio
  2. chunk        split at natural pauses into STT-sized pieces
  3. transcribe   fan chunks out to an OpenAI-compatible STT endpoint
  4. normalize    parse any supported transcript format into one schema
  5. sync         align multiple sources onto one timeline
  6. train        fit a speaker classifier from labeled clips
  7. assign       name diarized speakers with the trained model

Set SESSIONSCRIBE_STT_API_KEY for authenticated endpoints.
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clean and resample an audio file for transcription
    Preprocess {
        /// Input audio file
        input: std::path::PathBuf,

        /// Output audio file
        output: std::path::PathBuf,

        /// Filter profile: passthrough, normalize-only, zoom-audio, voice-memo
        #[arg(long, value_name = "PROFILE")]
        profile: Option<String>,

        /// Output sample rate in Hz
        #[arg(long, value_name = "HZ")]
        sample_rate: Option<u32>,

        /// Output channel count
        #[arg(long)]
        channels: Option<u16>,

        /// Output bit depth (16, 24, 32)
        #[arg(long)]
        bit_depth: Option<u16>,

        /// Output container: wav or flac
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,

        /// Custom ffmpeg filter chain, replacing the profile's
        #[arg(long, value_name = "FILTERS")]
        filters: Option<String>,
    },

    /// Split preprocessed audio into chunks at natural pauses
    Chunk {
        /// Preprocessed audio file (WAV)
        input: std::path::PathBuf,

        /// Directory for chunk files and the manifest
        #[arg(short, long, value_name = "DIR")]
        out_dir: std::path::PathBuf,

        /// Maximum chunk length in milliseconds
        #[arg(long, value_name = "MS")]
        max_chunk_ms: Option<u64>,

        /// Minimum silence treated as a pause, in milliseconds
        #[arg(long, value_name = "MS")]
        min_silence_ms: Option<u64>,

        /// Silence threshold in dBFS
        #[arg(long, value_name = "DBFS")]
        silence_threshold: Option<f32>,
    },

    /// Transcribe chunks concurrently and merge into one transcript
    Transcribe {
        /// Directory holding chunk_manifest.json (from `chunk`)
        #[arg(short = 'i', long, value_name = "DIR")]
        chunk_dir: std::path::PathBuf,

        /// Directory for per-chunk transcripts and the merged output
        #[arg(short, long, value_name = "DIR")]
        out_dir: std::path::PathBuf,

        /// Override the configured STT model
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        /// Response format: verbose_json or vtt
        #[arg(long, value_name = "FORMAT")]
        response_format: Option<String>,

        /// Concurrent requests (clamped to min(8, cpu count, chunks))
        #[arg(long, value_name = "N")]
        max_workers: Option<usize>,
    },

    /// Parse a transcript into the canonical bundle schema
    Normalize {
        /// Transcript file
        input: std::path::PathBuf,

        /// Output bundle path (.json)
        output: std::path::PathBuf,

        /// Input format: elevenlabs, plain-text, vtt-voice, vtt-speaker,
        /// whisper-diar
        #[arg(short, long, value_name = "FORMAT")]
        format: String,

        /// Diarization JSON (required for whisper-diar)
        #[arg(long, value_name = "FILE")]
        diarization: Option<std::path::PathBuf>,

        /// JSON map of audio path to offset seconds
        #[arg(long, value_name = "FILE")]
        offsets: Option<std::path::PathBuf>,

        /// Audio file for offset lookup
        #[arg(long, value_name = "FILE")]
        audio: Option<std::path::PathBuf>,

        /// Explicit source offset in seconds
        #[arg(long, value_name = "SECONDS")]
        offset: Option<f64>,

        /// Source id recorded in the bundle (defaults to the file stem)
        #[arg(long, value_name = "ID")]
        source_id: Option<String>,

        /// Split segments when consecutive words gap more than this
        #[arg(long, value_name = "SECONDS")]
        word_gap: Option<f64>,
    },

    /// Align normalized bundles onto one timeline and emit method artifacts
    Sync {
        /// Normalized bundle files (one or more)
        #[arg(required = true)]
        bundles: Vec<std::path::PathBuf>,

        /// Method name used for namespacing and artifact filenames
        #[arg(short, long, value_name = "NAME")]
        method: String,

        /// Session output root
        #[arg(short, long, value_name = "DIR")]
        out_dir: std::path::PathBuf,

        /// Session identifier (defaults to a generated UUID)
        #[arg(long, value_name = "ID")]
        session_id: Option<String>,
    },

    /// Train a speaker classifier from a labeled clip manifest
    Train {
        /// Clip manifest: JSON array of {speaker, session_id, clip_path}
        manifest: std::path::PathBuf,

        /// Output model bundle path (.json)
        output: std::path::PathBuf,

        /// Embedding backend: mfcc-stats or neural
        #[arg(long, value_name = "TYPE")]
        feature_type: Option<String>,

        /// Random seed for shuffles and splits
        #[arg(long)]
        seed: Option<u64>,

        /// Split clips instead of whole sessions
        #[arg(long)]
        clip_split: bool,
    },

    /// Label diarized speakers using a trained model
    Assign {
        /// Diarization JSON
        diarization: std::path::PathBuf,

        /// Preprocessed audio the diarization refers to (WAV)
        audio: std::path::PathBuf,

        /// Trained model bundle
        #[arg(short, long, value_name = "FILE")]
        model: std::path::PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        out_dir: std::path::PathBuf,

        /// Drop intervals shorter than this many seconds
        #[arg(long, value_name = "SECONDS")]
        min_segment: Option<f64>,

        /// Target block duration in seconds
        #[arg(long, value_name = "SECONDS")]
        aggregation: Option<f64>,
    },

    /// Render a canonical bundle as WebVTT
    ExportVtt {
        /// Canonical bundle (.json)
        bundle: std::path::PathBuf,

        /// Output .vtt path
        output: std::path::PathBuf,
    },

    /// Show the active configuration
    Config {
        /// Write the commented default config to the given path instead
        #[arg(long, value_name = "FILE")]
        write_default: Option<std::path::PathBuf>,
    },
}

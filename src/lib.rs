//! Sessionscribe - speaker-labeled transcripts for long multi-source recordings
//!
//! Sessionscribe turns raw session audio into a canonical, speaker-labeled
//! transcript bundle. The pipeline runs in stages that can each be driven
//! independently from the CLI:
//!
//! ```text
//! ┌────────────┐   ┌─────────┐   ┌────────────┐   ┌───────────┐
//! │ preprocess │──▶│  chunk  │──▶│ transcribe │──▶│ normalize │
//! │  (ffmpeg)  │   │ (pause  │   │ (remote    │   │ (format   │
//! │            │   │  aware) │   │  STT pool) │   │  parsers) │
//! └────────────┘   └─────────┘   └────────────┘   └─────┬─────┘
//!                                                       │
//!                  ┌─────────┐   ┌─────────┐   ┌────────▼─────┐
//!                  │ assign  │◀──│  train  │   │     sync     │
//!                  │ (label  │   │(speaker │   │ (multi-source│
//!                  │  diar)  │   │  model) │   │   timeline)  │
//!                  └─────────┘   └─────────┘   └──────────────┘
//! ```
//!
//! Every stage reads and writes files, so partial runs resume cleanly and
//! intermediate artifacts stay inspectable. The canonical bundle schema
//! ([`bundle::CanonicalBundle`]) is the contract between stages: normalize
//! produces it, sync merges it, and export renders it.

pub mod audio;
pub mod bundle;
pub mod chunker;
pub mod config;
pub mod error;
pub mod normalize;
pub mod session;
pub mod speaker;
pub mod sync;
pub mod transcribe;

pub use bundle::{CanonicalBundle, Segment, Speaker, Word};
pub use config::Config;
pub use error::SessionScribeError;

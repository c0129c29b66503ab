//! Silence detection over decoded audio
//!
//! Windowed RMS scan that reports contiguous silent intervals. The chunker
//! uses these intervals to place split boundaries at natural pauses.

use super::{ratio_to_db, rms, AudioBuffer};

/// Analysis window in milliseconds. Small enough that interval edges land
/// within ~10ms of the true silence boundary.
const WINDOW_MS: u64 = 10;

/// A contiguous silent interval `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceInterval {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SilenceInterval {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Midpoint used for chunk boundary placement
    pub fn midpoint_ms(&self) -> u64 {
        self.start_ms + self.duration_ms() / 2
    }
}

/// Detect silent intervals of at least `min_silence_ms` where the windowed
/// RMS stays below `threshold_dbfs`.
///
/// Returns intervals sorted by start. An empty result is not an error; it
/// just means the audio has no usable pauses.
pub fn detect_silence(
    audio: &AudioBuffer,
    min_silence_ms: u64,
    threshold_dbfs: f32,
) -> Vec<SilenceInterval> {
    let mono = audio.to_mono();
    let window = super::ms_to_frames(WINDOW_MS, mono.sample_rate).max(1);
    if mono.samples.is_empty() {
        return vec![];
    }

    let mut intervals = Vec::new();
    let mut run_start: Option<u64> = None;
    let mut windows_scanned = 0u64;

    for (i, chunk) in mono.samples.chunks(window).enumerate() {
        let level_db = ratio_to_db(rms(chunk));
        let at_ms = i as u64 * WINDOW_MS;
        windows_scanned += 1;

        if level_db < threshold_dbfs {
            if run_start.is_none() {
                run_start = Some(at_ms);
            }
        } else if let Some(start) = run_start.take() {
            if at_ms - start >= min_silence_ms {
                intervals.push(SilenceInterval {
                    start_ms: start,
                    end_ms: at_ms,
                });
            }
        }
    }

    // Run extending to the end of the audio
    if let Some(start) = run_start {
        let end = (windows_scanned * WINDOW_MS).min(mono.duration_ms()).max(start);
        if end - start >= min_silence_ms {
            intervals.push(SilenceInterval {
                start_ms: start,
                end_ms: end,
            });
        }
    }

    intervals
}

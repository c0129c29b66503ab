//! WebVTT rendering for canonical bundles

use super::CanonicalBundle;
use crate::error::BundleError;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

/// Format seconds as `HH:MM:SS.mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

/// Parse a WebVTT/SRT-style timestamp (`HH:MM:SS.mmm` or `MM:SS.mmm`,
/// comma accepted as the millisecond separator) into seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim().replace(',', ".");
    let parts: Vec<&str> = s.split(':').collect();
    let (h, m, rest) = match parts.as_slice() {
        [h, m, rest] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *rest),
        [m, rest] => (0, m.parse::<u64>().ok()?, *rest),
        _ => return None,
    };
    let secs = rest.parse::<f64>().ok()?;
    if secs < 0.0 {
        return None;
    }
    Some((h * 3600 + m * 60) as f64 + secs)
}

/// Render a bundle as a WebVTT document, one cue per segment, speaker label
/// prefixed to the cue text.
pub fn render_vtt(bundle: &CanonicalBundle) -> String {
    let labels: HashMap<&str, &str> = bundle
        .speakers
        .iter()
        .map(|s| (s.id.as_str(), s.label.as_str()))
        .collect();

    let mut out = String::from("WEBVTT\n\n");
    for (i, seg) in bundle.segments.iter().enumerate() {
        let label = labels
            .get(seg.speaker_id.as_str())
            .copied()
            .unwrap_or(seg.speaker_id.as_str());
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timestamp(seg.start),
            format_timestamp(seg.end)
        );
        let _ = writeln!(out, "{}: {}", label, seg.text);
        out.push('\n');
    }
    out
}

/// Write the WebVTT rendering of a bundle to disk
pub fn write_vtt(bundle: &CanonicalBundle, path: &Path) -> Result<(), BundleError> {
    bundle.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_vtt(bundle))?;
    Ok(())
}

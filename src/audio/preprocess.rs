//! Audio preprocessing
//!
//! Turns an arbitrary input recording into normalized PCM suitable for STT
//! and diarization. Filter profiles map to deterministic ffmpeg filter
//! graphs; `normalize-only` is computed on a decoded in-memory stream so the
//! RMS target and peak clamp are exact.

use super::{load_wav, save_wav, ratio_to_db, AudioBuffer};
use crate::error::AudioError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info};

/// Default RMS normalization target in dBFS
pub const DEFAULT_TARGET_DBFS: f32 = -10.0;

/// Peak headroom: after normalization no sample may exceed this level
const PEAK_HEADROOM_DBFS: f32 = -1.0;

/// RNNoise model used by the voice-memo profile, fetched on demand
const RNNOISE_MODEL_URL: &str =
    "https://raw.githubusercontent.com/GregorR/rnnoise-models/master/somnolent-hogwash-2018-09-01/sh.rnnn";
const RNNOISE_MODEL_FILE: &str = "somnolent-hogwash.rnnn";

/// Filter profile selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessProfile {
    /// Resample/channel-convert only
    Passthrough,
    /// In-memory RMS normalize to a target dBFS with peak clamp
    NormalizeOnly,
    /// Band-limit + FFT denoise + loudness + soft compression, tuned for
    /// conference-call recordings
    ZoomAudio,
    /// Band-limit + RNNoise + loudness + compression, tuned for phone
    /// voice memos
    VoiceMemo,
}

impl FromStr for PreprocessProfile {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, AudioError> {
        match s {
            "passthrough" => Ok(PreprocessProfile::Passthrough),
            "normalize-only" => Ok(PreprocessProfile::NormalizeOnly),
            "zoom-audio" => Ok(PreprocessProfile::ZoomAudio),
            "voice-memo" => Ok(PreprocessProfile::VoiceMemo),
            other => Err(AudioError::UnknownProfile(other.to_string())),
        }
    }
}

impl std::fmt::Display for PreprocessProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PreprocessProfile::Passthrough => "passthrough",
            PreprocessProfile::NormalizeOnly => "normalize-only",
            PreprocessProfile::ZoomAudio => "zoom-audio",
            PreprocessProfile::VoiceMemo => "voice-memo",
        };
        write!(f, "{}", name)
    }
}

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Wav,
    Flac,
}

impl FromStr for OutputFormat {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, AudioError> {
        match s {
            "wav" => Ok(OutputFormat::Wav),
            "flac" => Ok(OutputFormat::Flac),
            other => Err(AudioError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One preprocessing run
#[derive(Debug, Clone)]
pub struct PreprocessRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: PreprocessProfile,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub output_format: OutputFormat,
    pub overwrite: bool,
    /// Replaces the profile's filter chain verbatim when set
    pub filter_overrides: Option<String>,
    /// Normalization target for `normalize-only` (dBFS)
    pub target_dbfs: f32,
}

impl PreprocessRequest {
    pub fn new(input: PathBuf, output: PathBuf, profile: PreprocessProfile) -> Self {
        Self {
            input,
            output,
            profile,
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
            output_format: OutputFormat::Wav,
            overwrite: false,
            filter_overrides: None,
            target_dbfs: DEFAULT_TARGET_DBFS,
        }
    }
}

/// Run preprocessing and return the output path.
pub fn preprocess(req: &PreprocessRequest) -> Result<PathBuf, AudioError> {
    if !req.input.exists() {
        return Err(AudioError::InputMissing(req.input.clone()));
    }
    if req.output.exists() && !req.overwrite {
        return Err(AudioError::OutputExists(req.output.clone()));
    }
    if req.channels == 0 {
        return Err(AudioError::InvalidParams("channels must be > 0".into()));
    }
    if let Some(parent) = req.output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AudioError::Wav {
            path: req.output.clone(),
            reason: e.to_string(),
        })?;
    }

    info!(
        "Preprocessing {:?} -> {:?} (profile={}, rate={}, channels={})",
        req.input, req.output, req.profile, req.sample_rate, req.channels
    );

    match req.profile {
        PreprocessProfile::NormalizeOnly => normalize_in_memory(req),
        _ => run_ffmpeg_profile(req),
    }
}

/// Build the ffmpeg `-af` filter chain for a profile. `normalize-only` has no
/// ffmpeg chain; it is handled in memory.
pub fn filter_chain(
    profile: PreprocessProfile,
    rnnoise_model: Option<&Path>,
) -> Option<String> {
    match profile {
        PreprocessProfile::Passthrough | PreprocessProfile::NormalizeOnly => None,
        PreprocessProfile::ZoomAudio => Some(
            "highpass=f=100,lowpass=f=7500,afftdn,loudnorm,\
             acompressor=threshold=-18dB:ratio=2"
                .to_string(),
        ),
        PreprocessProfile::VoiceMemo => {
            let model = rnnoise_model
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            Some(format!(
                "highpass=f=80,lowpass=f=8000,arnndn=m={},loudnorm,\
                 acompressor=threshold=-21dB:ratio=3",
                model
            ))
        }
    }
}

fn run_ffmpeg_profile(req: &PreprocessRequest) -> Result<PathBuf, AudioError> {
    let ffmpeg = which::which("ffmpeg").map_err(|_| AudioError::FfmpegMissing)?;

    let rnnoise_model = if req.profile == PreprocessProfile::VoiceMemo {
        Some(ensure_rnnoise_model()?)
    } else {
        None
    };

    let chain = req
        .filter_overrides
        .clone()
        .or_else(|| filter_chain(req.profile, rnnoise_model.as_deref()));

    let codec: &str = match (req.output_format, req.bit_depth) {
        (OutputFormat::Wav, 16) => "pcm_s16le",
        (OutputFormat::Wav, 24) => "pcm_s24le",
        (OutputFormat::Wav, 32) => "pcm_s32le",
        (OutputFormat::Wav, other) => {
            return Err(AudioError::InvalidParams(format!(
                "unsupported wav bit depth: {}",
                other
            )))
        }
        (OutputFormat::Flac, _) => "flac",
    };

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-y", "-loglevel", "error", "-i"])
        .arg(&req.input);
    if let Some(chain) = &chain {
        cmd.args(["-af", chain]);
    }
    cmd.args(["-ar", &req.sample_rate.to_string()])
        .args(["-ac", &req.channels.to_string()])
        .args(["-c:a", codec])
        .arg(&req.output);

    debug!("ffmpeg args: {:?}", cmd.get_args().collect::<Vec<_>>());

    let output = cmd
        .output()
        .map_err(|e| AudioError::FfmpegFailed {
            path: req.input.clone(),
            stderr: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(AudioError::FfmpegFailed {
            path: req.input.clone(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(req.output.clone())
}

/// RMS-normalize to the target dBFS, then clamp peaks below the headroom
/// ceiling by applying additional negative gain.
pub fn normalize_buffer(audio: &mut AudioBuffer, target_dbfs: f32) {
    if audio.samples.is_empty() {
        return;
    }
    let gain = target_dbfs - audio.rms_dbfs();
    audio.apply_gain_db(gain);

    let peak_db = ratio_to_db(audio.peak());
    if peak_db > PEAK_HEADROOM_DBFS {
        audio.apply_gain_db(PEAK_HEADROOM_DBFS - peak_db);
    }
}

fn normalize_in_memory(req: &PreprocessRequest) -> Result<PathBuf, AudioError> {
    // Non-WAV inputs get decoded by ffmpeg into scratch space first.
    let is_wav = req
        .input
        .extension()
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    let scratch = tempfile::tempdir()?;
    let wav_input = if is_wav {
        req.input.clone()
    } else {
        let ffmpeg = which::which("ffmpeg").map_err(|_| AudioError::FfmpegMissing)?;
        let decoded = scratch.path().join("decoded.wav");
        let output = Command::new(ffmpeg)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(&req.input)
            .args(["-c:a", "pcm_s16le"])
            .arg(&decoded)
            .output()
            .map_err(|e| AudioError::FfmpegFailed {
                path: req.input.clone(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(AudioError::FfmpegFailed {
                path: req.input.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        decoded
    };

    let mut audio = load_wav(&wav_input)?;
    if req.channels == 1 && audio.channels > 1 {
        audio = audio.to_mono();
    }
    if audio.sample_rate != req.sample_rate {
        audio = audio.to_mono().resample(req.sample_rate)?;
    }
    normalize_buffer(&mut audio, req.target_dbfs);

    match req.output_format {
        OutputFormat::Wav => {
            save_wav(&audio, &req.output, req.bit_depth / 8)?;
        }
        OutputFormat::Flac => {
            // Encode via ffmpeg from a normalized scratch WAV
            let tmp_wav = scratch.path().join("normalized.wav");
            save_wav(&audio, &tmp_wav, req.bit_depth / 8)?;
            let ffmpeg = which::which("ffmpeg").map_err(|_| AudioError::FfmpegMissing)?;
            let output = Command::new(ffmpeg)
                .args(["-y", "-loglevel", "error", "-i"])
                .arg(&tmp_wav)
                .args(["-c:a", "flac"])
                .arg(&req.output)
                .output()
                .map_err(|e| AudioError::FfmpegFailed {
                    path: tmp_wav.clone(),
                    stderr: e.to_string(),
                })?;
            if !output.status.success() {
                return Err(AudioError::FfmpegFailed {
                    path: tmp_wav,
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
        }
    }
    Ok(req.output.clone())
}

/// Cache directory for on-demand denoise models
pub fn model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sessionscribe")
        .join("models")
}

/// Download the RNNoise model into the user cache dir if missing.
pub fn ensure_rnnoise_model() -> Result<PathBuf, AudioError> {
    let path = model_cache_dir().join(RNNOISE_MODEL_FILE);
    if path.exists() {
        return Ok(path);
    }
    std::fs::create_dir_all(path.parent().unwrap())?;

    info!("Downloading RNNoise model to {:?}", path);
    let response = ureq::get(RNNOISE_MODEL_URL)
        .call()
        .map_err(|e| AudioError::ModelDownload(e.to_string()))?;
    let mut data = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut data)
        .map_err(|e| AudioError::ModelDownload(e.to_string()))?;
    if data.is_empty() {
        return Err(AudioError::ModelDownload("empty model body".into()));
    }
    // Write-then-rename so a failed download never leaves a truncated model
    let tmp = path.with_extension("part");
    std::fs::write(&tmp, &data)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::save_wav;

    fn tone_buffer(amplitude: f32) -> AudioBuffer {
        let samples: Vec<f32> = (0..16000)
            .map(|i| {
                let t = i as f32 / 16000.0;
                amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect();
        AudioBuffer::new(samples, 16000, 1).unwrap()
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(
            "passthrough".parse::<PreprocessProfile>().unwrap(),
            PreprocessProfile::Passthrough
        );
        assert_eq!(
            "voice-memo".parse::<PreprocessProfile>().unwrap(),
            PreprocessProfile::VoiceMemo
        );
        assert!(matches!(
            "studio".parse::<PreprocessProfile>(),
            Err(AudioError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("wav".parse::<OutputFormat>().unwrap(), OutputFormat::Wav);
        assert_eq!("flac".parse::<OutputFormat>().unwrap(), OutputFormat::Flac);
        assert!(matches!(
            "mp3".parse::<OutputFormat>(),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_filter_chain_shapes() {
        assert!(filter_chain(PreprocessProfile::Passthrough, None).is_none());
        assert!(filter_chain(PreprocessProfile::NormalizeOnly, None).is_none());

        let zoom = filter_chain(PreprocessProfile::ZoomAudio, None).unwrap();
        assert!(zoom.contains("highpass=f=100"));
        assert!(zoom.contains("lowpass=f=7500"));
        assert!(zoom.contains("afftdn"));
        assert!(zoom.contains("acompressor=threshold=-18dB:ratio=2"));

        let memo =
            filter_chain(PreprocessProfile::VoiceMemo, Some(Path::new("/tmp/m.rnnn"))).unwrap();
        assert!(memo.contains("highpass=f=80"));
        assert!(memo.contains("lowpass=f=8000"));
        assert!(memo.contains("arnndn=m=/tmp/m.rnnn"));
        assert!(memo.contains("acompressor=threshold=-21dB:ratio=3"));
    }

    #[test]
    fn test_normalize_hits_target() {
        let mut audio = tone_buffer(0.05);
        normalize_buffer(&mut audio, -10.0);
        assert!((audio.rms_dbfs() - (-10.0)).abs() < 0.5);
    }

    #[test]
    fn test_normalize_clamps_peak() {
        // A square-ish loud signal would push peaks past -1 dBFS when
        // normalized to a hot RMS target; the clamp must pull it back.
        let samples: Vec<f32> = (0..16000)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect();
        let mut audio = AudioBuffer::new(samples, 16000, 1).unwrap();
        normalize_buffer(&mut audio, -0.5);
        let peak_db = ratio_to_db(audio.peak());
        assert!(peak_db <= -0.99, "peak_db={}", peak_db);
    }

    #[test]
    fn test_normalize_empty_noop() {
        let mut audio = AudioBuffer::new(vec![], 16000, 1).unwrap();
        normalize_buffer(&mut audio, -10.0);
        assert!(audio.samples.is_empty());
    }

    #[test]
    fn test_missing_input_rejected() {
        let req = PreprocessRequest::new(
            PathBuf::from("/nonexistent/in.wav"),
            PathBuf::from("/tmp/out.wav"),
            PreprocessProfile::Passthrough,
        );
        assert!(matches!(
            preprocess(&req),
            Err(AudioError::InputMissing(_))
        ));
    }

    #[test]
    fn test_existing_output_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        save_wav(&tone_buffer(0.5), &input, 2).unwrap();
        std::fs::write(&output, b"occupied").unwrap();

        let req = PreprocessRequest::new(input, output, PreprocessProfile::NormalizeOnly);
        assert!(matches!(
            preprocess(&req),
            Err(AudioError::OutputExists(_))
        ));
    }

    #[test]
    fn test_normalize_only_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        save_wav(&tone_buffer(0.05), &input, 2).unwrap();

        let req = PreprocessRequest::new(input, output.clone(), PreprocessProfile::NormalizeOnly);
        let result = preprocess(&req).unwrap();
        assert_eq!(result, output);

        let processed = load_wav(&output).unwrap();
        assert_eq!(processed.sample_rate, 16000);
        assert!((processed.rms_dbfs() - (-10.0)).abs() < 0.6);
    }
}

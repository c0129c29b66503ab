//! Audio loading and sample math
//!
//! All pipeline stages operate on `AudioBuffer`: interleaved f32 samples in
//! [-1.0, 1.0] plus rate/channel metadata. WAV IO goes through hound; other
//! container formats are decoded by ffmpeg in the preprocessor before they
//! reach this module.

pub mod preprocess;
pub mod silence;

use crate::error::AudioError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Decoded audio with sample metadata
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved samples, [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (samples are interleaved)
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::InvalidParams("sample rate must be > 0".into()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidParams("channel count must be > 0".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Number of frames (samples per channel)
    pub fn len_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.len_frames() as u64 * 1000) / self.sample_rate as u64
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len_frames() as f64 / self.sample_rate as f64
    }

    /// Downmix to a single channel by averaging
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels == 1 {
            return self.clone();
        }
        let ch = self.channels as usize;
        let mono: Vec<f32> = self
            .samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect();
        AudioBuffer {
            samples: mono,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    /// Linear resample to a target rate (mono only; callers downmix first)
    pub fn resample(&self, target_rate: u32) -> Result<AudioBuffer, AudioError> {
        if target_rate == 0 {
            return Err(AudioError::InvalidParams("target rate must be > 0".into()));
        }
        if self.channels != 1 {
            return Err(AudioError::InvalidParams(
                "resample expects mono input".into(),
            ));
        }
        if target_rate == self.sample_rate || self.samples.is_empty() {
            let mut out = self.clone();
            out.sample_rate = target_rate;
            return Ok(out);
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = (self.samples.len() as f64 / ratio).round() as usize;
        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = self.samples[idx.min(self.samples.len() - 1)];
            let b = self.samples[(idx + 1).min(self.samples.len() - 1)];
            out.push(a + (b - a) * frac);
        }
        Ok(AudioBuffer {
            samples: out,
            sample_rate: target_rate,
            channels: 1,
        })
    }

    /// Extract a frame range [start_ms, end_ms) as a new buffer
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> AudioBuffer {
        let ch = self.channels as usize;
        let start = (ms_to_frames(start_ms, self.sample_rate) * ch).min(self.samples.len());
        let end = (ms_to_frames(end_ms, self.sample_rate) * ch).min(self.samples.len());
        AudioBuffer {
            samples: self.samples[start..end.max(start)].to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// RMS level of the whole buffer
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    /// RMS level in dBFS (0 dBFS == full-scale 1.0)
    pub fn rms_dbfs(&self) -> f32 {
        ratio_to_db(self.rms())
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    /// Apply a flat gain in dB
    pub fn apply_gain_db(&mut self, gain_db: f32) {
        let factor = db_to_ratio(gain_db);
        for s in &mut self.samples {
            *s *= factor;
        }
    }
}

/// RMS of a sample slice
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Amplitude ratio to decibels; silence maps to a -120 dB floor
pub fn ratio_to_db(ratio: f32) -> f32 {
    if ratio <= 0.0 {
        return -120.0;
    }
    20.0 * ratio.log10()
}

/// Decibels to amplitude ratio
pub fn db_to_ratio(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert a millisecond position to a frame index
pub fn ms_to_frames(ms: u64, sample_rate: u32) -> usize {
    ((ms as u128 * sample_rate as u128) / 1000) as usize
}

/// Convert a frame index to milliseconds
pub fn frames_to_ms(frames: usize, sample_rate: u32) -> u64 {
    ((frames as u128 * 1000) / sample_rate as u128) as u64
}

/// Load a WAV file into an `AudioBuffer`, converting to f32
pub fn load_wav(path: &Path) -> Result<AudioBuffer, AudioError> {
    if !path.exists() {
        return Err(AudioError::InputMissing(path.to_path_buf()));
    }
    let reader = WavReader::open(path).map_err(|e| AudioError::Wav {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
        SampleFormat::Float => reader.into_samples::<f32>().filter_map(|s| s.ok()).collect(),
    };

    AudioBuffer::new(samples, spec.sample_rate, spec.channels)
}

/// Write an `AudioBuffer` to a WAV file with the given sample width in bytes
pub fn save_wav(buffer: &AudioBuffer, path: &Path, sample_width: u16) -> Result<(), AudioError> {
    let bits = match sample_width {
        2 => 16,
        3 => 24,
        4 => 32,
        other => {
            return Err(AudioError::InvalidParams(format!(
                "unsupported sample width: {} bytes",
                other
            )))
        }
    };
    let spec = WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: bits,
        sample_format: SampleFormat::Int,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AudioError::Wav {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    let file = File::create(path).map_err(|e| AudioError::Wav {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut writer = WavWriter::new(BufWriter::new(file), spec).map_err(|e| AudioError::Wav {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let max_val = ((1i64 << (bits - 1)) - 1) as f32;
    for &sample in &buffer.samples {
        let scaled = (sample.clamp(-1.0, 1.0) * max_val) as i32;
        writer.write_sample(scaled).map_err(|e| AudioError::Wav {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    writer.finalize().map_err(|e| AudioError::Wav {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(duration_secs: f32, freq: f32, amplitude: f32, rate: u32) -> Vec<f32> {
        let n = (duration_secs * rate as f32) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / rate as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_buffer_duration() {
        let buf = AudioBuffer::new(vec![0.0; 16000], 16000, 1).unwrap();
        assert_eq!(buf.duration_ms(), 1000);
        assert!((buf.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(AudioBuffer::new(vec![], 0, 1).is_err());
        assert!(AudioBuffer::new(vec![], 16000, 0).is_err());
    }

    #[test]
    fn test_to_mono_averages() {
        // Stereo frames: L=1.0, R=0.0 -> mono 0.5
        let buf = AudioBuffer::new(vec![1.0, 0.0, 1.0, 0.0], 16000, 2).unwrap();
        let mono = buf.to_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_halves_length() {
        let buf = AudioBuffer::new(sine(1.0, 440.0, 0.5, 32000), 32000, 1).unwrap();
        let down = buf.resample(16000).unwrap();
        assert_eq!(down.sample_rate, 16000);
        let expected = 16000;
        assert!((down.samples.len() as i64 - expected).abs() <= 1);
    }

    #[test]
    fn test_resample_identity() {
        let buf = AudioBuffer::new(vec![0.1, 0.2, 0.3], 16000, 1).unwrap();
        let same = buf.resample(16000).unwrap();
        assert_eq!(same.samples, buf.samples);
    }

    #[test]
    fn test_rms_dbfs() {
        let buf = AudioBuffer::new(vec![0.5, -0.5, 0.5, -0.5], 16000, 1).unwrap();
        assert!((buf.rms() - 0.5).abs() < 1e-6);
        assert!((buf.rms_dbfs() - (-6.02)).abs() < 0.1);
    }

    #[test]
    fn test_db_round_trip() {
        let ratio = db_to_ratio(-10.0);
        assert!((ratio_to_db(ratio) - (-10.0)).abs() < 1e-4);
    }

    #[test]
    fn test_silence_db_floor() {
        assert_eq!(ratio_to_db(0.0), -120.0);
    }

    #[test]
    fn test_slice_ms() {
        let buf = AudioBuffer::new((0..16000).map(|i| i as f32 / 16000.0).collect(), 16000, 1)
            .unwrap();
        let slice = buf.slice_ms(250, 750);
        assert_eq!(slice.samples.len(), 8000);
        assert!((slice.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_ms_frame_round_trip() {
        assert_eq!(ms_to_frames(1000, 16000), 16000);
        assert_eq!(frames_to_ms(16000, 16000), 1000);
        assert_eq!(frames_to_ms(ms_to_frames(5400000, 44100), 44100), 5400000);
    }

    #[test]
    fn test_gain_db() {
        let mut buf = AudioBuffer::new(vec![0.1; 100], 16000, 1).unwrap();
        buf.apply_gain_db(6.0206);
        assert!((buf.samples[0] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let buf = AudioBuffer::new(sine(0.5, 440.0, 0.5, 16000), 16000, 1).unwrap();
        save_wav(&buf, &path, 2).unwrap();

        let loaded = load_wav(&path).unwrap();
        assert_eq!(loaded.sample_rate, 16000);
        assert_eq!(loaded.channels, 1);
        assert_eq!(loaded.samples.len(), buf.samples.len());
        // 16-bit quantization error budget
        for (a, b) in loaded.samples.iter().zip(buf.samples.iter()) {
            assert!((a - b).abs() < 1.0 / 16384.0);
        }
    }

    #[test]
    fn test_load_missing_wav() {
        let err = load_wav(Path::new("/nonexistent/never.wav")).unwrap_err();
        assert!(matches!(err, AudioError::InputMissing(_)));
    }
}

//! Acoustic feature extraction
//!
//! MFCC statistics give a fixed-length speaker embedding without any model
//! download: log-mel filterbank (Hamming window, 0.97 pre-emphasis), DCT-II
//! to cepstral coefficients, first and second deltas, then per-coefficient
//! mean and standard deviation over time. Output dimension is 6 x n_mfcc.
//!
//! The neural backend runs a pretrained ONNX speaker-embedding model and is
//! gated behind the `neural-embedding` feature.

use super::{FeatureParams, FeatureType};
use crate::audio::AudioBuffer;
use crate::error::SpeakerError;
use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Frame length in samples (25ms at 16kHz)
const FRAME_LENGTH: usize = 400;

/// Frame shift in samples (10ms at 16kHz)
const FRAME_SHIFT: usize = 160;

/// FFT size for the power spectrum
const FFT_SIZE: usize = 512;

/// Mel channels feeding the DCT
const NUM_MELS: usize = 64;

/// Pre-emphasis coefficient
const PREEMPH_COEFF: f32 = 0.97;

/// Delta regression half-width in frames
const DELTA_WIDTH: usize = 2;

/// Fixed-length embedding over an audio window
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, audio: &AudioBuffer) -> Result<Vec<f32>, SpeakerError>;
    fn dim(&self) -> usize;
    fn params(&self) -> &FeatureParams;
}

/// Build the extractor configured by `params`
pub fn create_extractor(
    params: &FeatureParams,
) -> Result<Box<dyn FeatureExtractor>, SpeakerError> {
    match params.feature_type {
        FeatureType::MfccStats => Ok(Box::new(MfccStatsExtractor::new(params.clone()))),
        #[cfg(feature = "neural-embedding")]
        FeatureType::Neural => Ok(Box::new(neural::NeuralExtractor::new(params)?)),
        #[cfg(not(feature = "neural-embedding"))]
        FeatureType::Neural => Err(SpeakerError::Feature(
            "neural backend requires the 'neural-embedding' build feature".into(),
        )),
    }
}

/// MFCC mean/std statistics extractor
pub struct MfccStatsExtractor {
    params: FeatureParams,
    mel_filterbank: Vec<Vec<f32>>,
    dct: Vec<Vec<f32>>,
}

impl MfccStatsExtractor {
    pub fn new(params: FeatureParams) -> Self {
        let mel_filterbank =
            compute_mel_filterbank(NUM_MELS, FFT_SIZE, params.sample_rate as f32);
        let dct = compute_dct_matrix(params.n_mfcc, NUM_MELS);
        Self {
            params,
            mel_filterbank,
            dct,
        }
    }

    /// Log-mel filterbank features, shape (num_frames, NUM_MELS)
    fn log_mel(&self, samples: &[f32]) -> Array2<f32> {
        // Scale to int16 range (kaldi convention)
        let scaled: Vec<f32> = samples.iter().map(|&s| s * 32768.0).collect();

        let mut emphasized = Vec::with_capacity(scaled.len());
        emphasized.push(scaled[0]);
        for i in 1..scaled.len() {
            emphasized.push(scaled[i] - PREEMPH_COEFF * scaled[i - 1]);
        }

        let num_frames = if emphasized.len() >= FRAME_LENGTH {
            (emphasized.len() - FRAME_LENGTH) / FRAME_SHIFT + 1
        } else {
            0
        };
        if num_frames == 0 {
            return Array2::zeros((0, NUM_MELS));
        }

        let hamming: Vec<f32> = (0..FRAME_LENGTH)
            .map(|n| {
                0.54 - 0.46
                    * (2.0 * std::f32::consts::PI * n as f32 / (FRAME_LENGTH as f32 - 1.0)).cos()
            })
            .collect();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let mut mel = Array2::zeros((num_frames, NUM_MELS));
        let num_bins = FFT_SIZE / 2 + 1;

        for frame_idx in 0..num_frames {
            let start = frame_idx * FRAME_SHIFT;
            let mut fft_input: Vec<Complex<f32>> = Vec::with_capacity(FFT_SIZE);
            for i in 0..FRAME_LENGTH {
                fft_input.push(Complex::new(emphasized[start + i] * hamming[i], 0.0));
            }
            fft_input.resize(FFT_SIZE, Complex::new(0.0, 0.0));
            fft.process(&mut fft_input);

            let power: Vec<f32> = fft_input[..num_bins].iter().map(|c| c.norm_sqr()).collect();

            for mel_idx in 0..NUM_MELS {
                let energy: f32 = self.mel_filterbank[mel_idx]
                    .iter()
                    .zip(power.iter())
                    .map(|(&w, &p)| w * p)
                    .sum();
                mel[[frame_idx, mel_idx]] = energy.max(1e-10).ln();
            }
        }
        mel
    }

    /// Project log-mel frames to cepstral coefficients
    fn to_mfcc(&self, mel: &Array2<f32>) -> Array2<f32> {
        let n_mfcc = self.params.n_mfcc;
        let mut mfcc = Array2::zeros((mel.nrows(), n_mfcc));
        for (f, row) in mel.rows().into_iter().enumerate() {
            for (c, basis) in self.dct.iter().enumerate() {
                let mut acc = 0.0f32;
                for (m, &v) in row.iter().enumerate() {
                    acc += basis[m] * v;
                }
                mfcc[[f, c]] = acc;
            }
        }
        mfcc
    }
}

impl FeatureExtractor for MfccStatsExtractor {
    fn extract(&self, audio: &AudioBuffer) -> Result<Vec<f32>, SpeakerError> {
        if audio.samples.is_empty() {
            return Err(SpeakerError::Feature("empty waveform".into()));
        }
        let mono = audio.to_mono();
        let resampled = mono
            .resample(self.params.sample_rate)
            .map_err(|e| SpeakerError::Feature(e.to_string()))?;

        let mel = self.log_mel(&resampled.samples);
        if mel.nrows() == 0 {
            return Err(SpeakerError::Feature(format!(
                "waveform too short for one {}-sample frame",
                FRAME_LENGTH
            )));
        }

        let mfcc = self.to_mfcc(&mel);
        let d1 = deltas(&mfcc, DELTA_WIDTH);
        let d2 = deltas(&d1, DELTA_WIDTH);

        let mut out = Vec::with_capacity(self.dim());
        for m in [&mfcc, &d1, &d2] {
            let (mean, std) = column_stats(m);
            out.extend(mean);
            out.extend(std);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        6 * self.params.n_mfcc
    }

    fn params(&self) -> &FeatureParams {
        &self.params
    }
}

/// Regression-style deltas over a +-width frame window
fn deltas(features: &Array2<f32>, width: usize) -> Array2<f32> {
    let (rows, cols) = (features.nrows(), features.ncols());
    let mut out = Array2::zeros((rows, cols));
    let denom: f32 = 2.0 * (1..=width).map(|n| (n * n) as f32).sum::<f32>();

    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0f32;
            for n in 1..=width {
                let fwd = features[[(r + n).min(rows - 1), c]];
                let back = features[[r.saturating_sub(n), c]];
                acc += n as f32 * (fwd - back);
            }
            out[[r, c]] = acc / denom;
        }
    }
    out
}

/// Per-column mean and standard deviation
fn column_stats(features: &Array2<f32>) -> (Vec<f32>, Vec<f32>) {
    let rows = features.nrows() as f32;
    let cols = features.ncols();
    let mut mean = vec![0.0f32; cols];
    let mut std = vec![0.0f32; cols];

    for row in features.rows() {
        for (c, &v) in row.iter().enumerate() {
            mean[c] += v;
        }
    }
    for m in &mut mean {
        *m /= rows;
    }
    for row in features.rows() {
        for (c, &v) in row.iter().enumerate() {
            let d = v - mean[c];
            std[c] += d * d;
        }
    }
    for s in &mut std {
        *s = (*s / rows).sqrt();
    }
    (mean, std)
}

/// Triangular mel filterbank: mel = 1127 * ln(1 + f/700)
fn compute_mel_filterbank(num_mels: usize, fft_size: usize, sample_rate: f32) -> Vec<Vec<f32>> {
    let num_bins = fft_size / 2 + 1;
    let max_freq = sample_rate / 2.0;

    let hz_to_mel = |f: f32| -> f32 { 1127.0 * (1.0 + f / 700.0).ln() };
    let mel_to_hz = |m: f32| -> f32 { 700.0 * ((m / 1127.0).exp() - 1.0) };

    let mel_low = hz_to_mel(0.0);
    let mel_high = hz_to_mel(max_freq);

    let mel_points: Vec<f32> = (0..num_mels + 2)
        .map(|i| mel_low + (mel_high - mel_low) * i as f32 / (num_mels + 1) as f32)
        .collect();
    let bin_points: Vec<f32> = mel_points
        .iter()
        .map(|&m| mel_to_hz(m) * fft_size as f32 / sample_rate)
        .collect();

    let mut filterbank = Vec::with_capacity(num_mels);
    for i in 0..num_mels {
        let mut filter = vec![0.0f32; num_bins];
        let left = bin_points[i];
        let center = bin_points[i + 1];
        let right = bin_points[i + 2];

        for (j, val) in filter.iter_mut().enumerate() {
            let freq = j as f32;
            if freq >= left && freq < center && center > left {
                *val = (freq - left) / (center - left);
            } else if freq >= center && freq <= right && right > center {
                *val = (right - freq) / (right - center);
            }
        }
        filterbank.push(filter);
    }
    filterbank
}

/// Orthonormal DCT-II basis, n_mfcc rows over num_mels inputs
fn compute_dct_matrix(n_mfcc: usize, num_mels: usize) -> Vec<Vec<f32>> {
    let mut dct = Vec::with_capacity(n_mfcc);
    let norm0 = (1.0 / num_mels as f32).sqrt();
    let norm = (2.0 / num_mels as f32).sqrt();
    for k in 0..n_mfcc {
        let scale = if k == 0 { norm0 } else { norm };
        let row: Vec<f32> = (0..num_mels)
            .map(|m| {
                scale
                    * (std::f32::consts::PI * k as f32 * (2.0 * m as f32 + 1.0)
                        / (2.0 * num_mels as f32))
                        .cos()
            })
            .collect();
        dct.push(row);
    }
    dct
}

#[cfg(feature = "neural-embedding")]
mod neural {
    use super::*;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::sync::Mutex;

    /// ONNX speaker-embedding extractor. Expects a model taking a
    /// `[batch, samples]` f32 waveform and returning `[batch, dim]`
    /// embeddings (time-pooled if the model emits per-frame vectors).
    pub struct NeuralExtractor {
        params: FeatureParams,
        session: Mutex<Session>,
        dim: usize,
    }

    impl NeuralExtractor {
        pub fn new(params: &FeatureParams) -> Result<Self, SpeakerError> {
            let model_path = params.model_path.as_ref().ok_or_else(|| {
                SpeakerError::Feature("neural backend requires feature.model_path".into())
            })?;
            let session = Session::builder()
                .map_err(|e| SpeakerError::Feature(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| SpeakerError::Feature(e.to_string()))?;
            Ok(Self {
                params: params.clone(),
                session: Mutex::new(session),
                dim: 0,
            })
        }
    }

    impl FeatureExtractor for NeuralExtractor {
        fn extract(&self, audio: &AudioBuffer) -> Result<Vec<f32>, SpeakerError> {
            if audio.samples.is_empty() {
                return Err(SpeakerError::Feature("empty waveform".into()));
            }
            let mono = audio.to_mono();
            let resampled = mono
                .resample(self.params.sample_rate)
                .map_err(|e| SpeakerError::Feature(e.to_string()))?;

            let n = resampled.samples.len();
            let input = Tensor::<f32>::from_array(([1usize, n], resampled.samples))
                .map_err(|e| SpeakerError::Feature(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| SpeakerError::Feature("session mutex poisoned".into()))?;
            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| SpeakerError::Feature(e.to_string()))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| SpeakerError::Feature(e.to_string()))?;
            let dims: &[i64] = shape;
            match dims.len() {
                // [batch, dim]
                2 => Ok(data.to_vec()),
                // [batch, frames, dim]: mean-pool over time
                3 => {
                    let frames = dims[1] as usize;
                    let dim = dims[2] as usize;
                    let mut pooled = vec![0.0f32; dim];
                    for f in 0..frames {
                        for d in 0..dim {
                            pooled[d] += data[f * dim + d];
                        }
                    }
                    for v in &mut pooled {
                        *v /= frames as f32;
                    }
                    Ok(pooled)
                }
                _ => Err(SpeakerError::Feature(format!(
                    "unexpected embedding shape: {:?}",
                    dims
                ))),
            }
        }

        fn dim(&self) -> usize {
            self.dim
        }

        fn params(&self) -> &FeatureParams {
            &self.params
        }
    }
}

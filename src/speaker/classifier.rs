//! Multinomial logistic regression over L2-normalized embeddings
//!
//! Full-batch gradient descent with inverse-frequency class weighting, which
//! copes with the skewed clip counts real rosters have. Probabilities come
//! straight from the softmax, so assignment confidence needs no calibration
//! step.

use crate::error::SpeakerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Fitted multinomial logistic regression model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Shape (n_classes, dim)
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub dim: usize,
}

/// Scale a vector to unit L2 norm; zero vectors pass through unchanged
pub fn l2_normalize(v: &[f32]) -> Vec<f64> {
    let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return v.iter().map(|&x| x as f64).collect();
    }
    v.iter().map(|&x| x as f64 / norm).collect()
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

impl LogisticModel {
    /// Class probabilities for one embedding. The input is L2-normalized
    /// here, matching training.
    pub fn predict_proba(&self, features: &[f32]) -> Result<Vec<f64>, SpeakerError> {
        if features.len() != self.dim {
            return Err(SpeakerError::DimensionMismatch {
                expected: self.dim,
                got: features.len(),
            });
        }
        let x = l2_normalize(features);
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, &b)| w.iter().zip(&x).map(|(&wi, &xi)| wi * xi).sum::<f64>() + b)
            .collect();
        Ok(softmax(&logits))
    }

    /// Most likely class index and its probability
    pub fn predict(&self, features: &[f32]) -> Result<(usize, f64), SpeakerError> {
        let proba = self.predict_proba(features)?;
        let (idx, p) = proba
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((0, &0.0));
        Ok((idx, *p))
    }
}

/// Fit a model on (embedding, class index) pairs.
///
/// Gradient descent on weighted cross-entropy with an L2 penalty. Class
/// weight for class c is `total / (n_classes * count_c)`.
pub fn train(
    features: &[Vec<f32>],
    labels: &[usize],
    n_classes: usize,
    epochs: usize,
    learning_rate: f64,
    l2_penalty: f64,
) -> Result<LogisticModel, SpeakerError> {
    if features.is_empty() || features.len() != labels.len() {
        return Err(SpeakerError::EmptyDataset);
    }
    let dim = features[0].len();
    for f in features {
        if f.len() != dim {
            return Err(SpeakerError::DimensionMismatch {
                expected: dim,
                got: f.len(),
            });
        }
    }

    let x: Vec<Vec<f64>> = features.iter().map(|f| l2_normalize(f)).collect();
    let n = x.len() as f64;

    let mut counts = vec![0usize; n_classes];
    for &y in labels {
        counts[y] += 1;
    }
    let class_weights: Vec<f64> = counts
        .iter()
        .map(|&c| {
            if c == 0 {
                0.0
            } else {
                n / (n_classes as f64 * c as f64)
            }
        })
        .collect();

    let mut weights = vec![vec![0.0f64; dim]; n_classes];
    let mut bias = vec![0.0f64; n_classes];

    for epoch in 0..epochs {
        let mut grad_w = vec![vec![0.0f64; dim]; n_classes];
        let mut grad_b = vec![0.0f64; n_classes];
        let mut loss = 0.0f64;

        for (sample, &y) in x.iter().zip(labels) {
            let logits: Vec<f64> = weights
                .iter()
                .zip(&bias)
                .map(|(w, &b)| {
                    w.iter().zip(sample).map(|(&wi, &xi)| wi * xi).sum::<f64>() + b
                })
                .collect();
            let proba = softmax(&logits);
            let cw = class_weights[y];
            loss -= cw * proba[y].max(1e-12).ln();

            for c in 0..n_classes {
                let err = cw * (proba[c] - if c == y { 1.0 } else { 0.0 });
                grad_b[c] += err;
                for (g, &xi) in grad_w[c].iter_mut().zip(sample) {
                    *g += err * xi;
                }
            }
        }

        for c in 0..n_classes {
            bias[c] -= learning_rate * grad_b[c] / n;
            for (w, g) in weights[c].iter_mut().zip(&grad_w[c]) {
                *w -= learning_rate * (g / n + l2_penalty * *w);
            }
        }

        if epoch % 100 == 0 {
            debug!("epoch {}: loss {:.4}", epoch, loss / n);
        }
    }

    info!(
        "Trained classifier: {} classes, {} samples, dim {}",
        n_classes,
        x.len(),
        dim
    );
    Ok(LogisticModel { weights, bias, dim })
}

/// Accuracy and sample count for one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub accuracy: f64,
    pub size: usize,
}

/// Per-class precision/recall/F1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Evaluation output persisted with the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub splits: HashMap<String, SplitMetrics>,
    pub per_class: Vec<ClassMetrics>,
    /// confusion[actual][predicted]
    pub confusion: Vec<Vec<usize>>,
}

/// Fraction of samples predicted correctly
pub fn accuracy(
    model: &LogisticModel,
    features: &[Vec<f32>],
    labels: &[usize],
) -> Result<f64, SpeakerError> {
    if features.is_empty() {
        return Ok(0.0);
    }
    let mut correct = 0usize;
    for (f, &y) in features.iter().zip(labels) {
        let (pred, _) = model.predict(f)?;
        if pred == y {
            correct += 1;
        }
    }
    Ok(correct as f64 / features.len() as f64)
}

/// Per-class report and confusion matrix over the test split
pub fn classification_report(
    model: &LogisticModel,
    features: &[Vec<f32>],
    labels: &[usize],
    label_names: &[String],
) -> Result<(Vec<ClassMetrics>, Vec<Vec<usize>>), SpeakerError> {
    let k = label_names.len();
    let mut confusion = vec![vec![0usize; k]; k];
    for (f, &y) in features.iter().zip(labels) {
        let (pred, _) = model.predict(f)?;
        confusion[y][pred] += 1;
    }

    let mut per_class = Vec::with_capacity(k);
    for c in 0..k {
        let tp = confusion[c][c];
        let support: usize = confusion[c].iter().sum();
        let predicted: usize = confusion.iter().map(|row| row[c]).sum();
        let precision = if predicted > 0 {
            tp as f64 / predicted as f64
        } else {
            0.0
        };
        let recall = if support > 0 {
            tp as f64 / support as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        per_class.push(ClassMetrics {
            label: label_names[c].clone(),
            precision,
            recall,
            f1,
            support,
        });
    }
    Ok((per_class, confusion))
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default decision threshold on the mean squared reconstruction error
pub const DEFAULT_THRESHOLD: f64 = 0.004;

/// Outcome of comparing an anomaly score with a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Reconstruction error at or below the threshold
    Normal,
    /// Reconstruction error strictly above the threshold
    Anomaly,
}

impl Verdict {
    /// Classify a score; only scores strictly above `threshold` are anomalous
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score > threshold {
            Self::Anomaly
        } else {
            Self::Normal
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Anomaly => f.write_str("Anomaly"),
        }
    }
}

/// Printable summary of one scored image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySummary {
    /// Product category whose autoencoder was used
    pub category: String,
    /// Scored image
    pub image: String,
    /// Mean squared reconstruction error
    pub score: f64,
    /// Threshold the score was compared with
    pub threshold: f64,
    /// Classification
    pub status: Verdict,
}

impl AnomalySummary {
    /// Build a summary, deriving the verdict from `score` and `threshold`
    pub fn new(category: impl Into<String>, image: impl Into<String>, score: f64, threshold: f64) -> Self {
        Self {
            category: category.into(),
            image: image.into(),
            score,
            threshold,
            status: Verdict::from_score(score, threshold),
        }
    }
}

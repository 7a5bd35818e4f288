//! Visual re-identification features and the distances between them.

use crate::{Error, Result};

/// A re-identification feature vector.
pub type Feature = Vec<f32>;

/// Euclidian distance between two vectors
///
/// When the feature lengths don't match, the longer feature vector is
/// truncated to the shorter one when the distance is calculated
pub fn euclidean(f1: &Feature, f2: &Feature) -> f32 {
    let mut acc = 0.0;
    for i in 0..f1.len().min(f2.len()) {
        let d = f1[i] - f2[i];
        acc += d * d;
    }
    acc.sqrt()
}

/// Cosine similarity between two vectors
///
/// When the feature lengths don't match, the longer feature vector is
/// truncated to the shorter one when the similarity is calculated
pub fn cosine(f1: &Feature, f2: &Feature) -> f32 {
    let len = f1.len().min(f2.len());
    let mut divided = 0.0;
    for i in 0..len {
        divided += f1[i] * f2[i];
    }

    let f1_divisor = f1.iter().take(len).fold(0.0_f32, |acc, a| acc + a * a);
    let f2_divisor = f2.iter().take(len).fold(0.0_f32, |acc, a| acc + a * a);

    divided / (f1_divisor * f2_divisor).sqrt()
}

/// The visual metric kind with its acceptance threshold.
#[derive(Clone, Copy, Debug)]
pub enum VisualMetricType {
    /// Euclidean distance, accepted when `d <= max`.
    Euclidean(f32),
    /// Cosine similarity, accepted when `d >= min`.
    Cosine(f32),
}

impl Default for VisualMetricType {
    fn default() -> Self {
        VisualMetricType::Euclidean(f32::MAX)
    }
}

impl VisualMetricType {
    pub fn euclidean(max: f32) -> Result<Self> {
        if max > 0.0 {
            Ok(VisualMetricType::Euclidean(max))
        } else {
            Err(Error::InvalidConfig(
                "euclidean threshold must be a positive float".to_owned(),
            ))
        }
    }

    pub fn cosine(min: f32) -> Result<Self> {
        if (-1.0..=1.0).contains(&min) {
            Ok(VisualMetricType::Cosine(min))
        } else {
            Err(Error::InvalidConfig(
                "cosine threshold must lay within [-1.0:1.0]".to_owned(),
            ))
        }
    }

    /// Raw metric value between two features.
    pub fn distance(&self, f1: &Feature, f2: &Feature) -> f32 {
        match self {
            VisualMetricType::Euclidean(_) => euclidean(f1, f2),
            VisualMetricType::Cosine(_) => cosine(f1, f2),
        }
    }

    /// Whether the metric value passes the threshold.
    pub fn is_ok(&self, metric: f32) -> bool {
        match self {
            VisualMetricType::Euclidean(max) => metric <= *max,
            VisualMetricType::Cosine(min) => metric >= *min,
        }
    }

    /// Maps the metric value to a distance-like weight where smaller is
    /// better: euclidean passes through, cosine similarity is flipped.
    pub fn distance_to_weight(&self, metric: f32) -> f32 {
        match self {
            VisualMetricType::Euclidean(_) => metric,
            VisualMetricType::Cosine(_) => 1.0 - metric,
        }
    }

    /// The largest weight an accepted metric value can map to; used as
    /// the participation bound in feature voting.
    pub fn max_accepted_weight(&self) -> f32 {
        match self {
            VisualMetricType::Euclidean(max) => *max,
            VisualMetricType::Cosine(min) => 1.0 - min,
        }
    }
}

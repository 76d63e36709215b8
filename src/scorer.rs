//! Badness scoring
//!
//! This module maps raw posture metrics onto a single 0-1 badness score.
//! - Each metric normalized with a piecewise-linear ramp
//! - Normalized values combined with configurable weights
//! - Result clamped to 0-1

use crate::config::{Limit, MetricLimits, ScoreWeights};
use crate::types::PostureMetrics;

/// Per-metric normalized badness, each in 0-1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricBadness {
    pub back: f64,
    pub neck: f64,
    pub head_forward: f64,
    pub shoulder_tilt: f64,
}

/// Scorer turning posture metrics into a badness score
#[derive(Debug, Clone)]
pub struct BadnessScorer {
    weights: ScoreWeights,
    limits: MetricLimits,
}

impl BadnessScorer {
    pub fn new(weights: ScoreWeights, limits: MetricLimits) -> Self {
        Self { weights, limits }
    }

    /// Normalize each metric independently
    pub fn normalize(&self, metrics: &PostureMetrics) -> MetricBadness {
        MetricBadness {
            back: norm_limit(metrics.back_angle.abs(), self.limits.back),
            neck: norm_limit(metrics.neck_angle, self.limits.neck),
            head_forward: norm_limit(metrics.head_forward_cm.abs(), self.limits.head_forward),
            shoulder_tilt: norm_limit(metrics.shoulder_tilt_deg.abs(), self.limits.shoulder_tilt),
        }
    }

    /// Weighted badness score in 0-1
    pub fn score(&self, metrics: &PostureMetrics) -> f64 {
        let bad = self.normalize(metrics);
        let w = &self.weights;
        let score = w.back * bad.back
            + w.neck * bad.neck
            + w.head_forward * bad.head_forward
            + w.shoulder_tilt * bad.shoulder_tilt;
        score.clamp(0.0, 1.0)
    }
}

fn norm_limit(x: f64, limit: Limit) -> f64 {
    norm_bad(x, limit.good_max, limit.bad_max)
}

/// Piecewise-linear badness ramp.
///
/// 0 when `x <= good_max`, 1 when `x >= bad_max`, linear in between.
pub fn norm_bad(x: f64, good_max: f64, bad_max: f64) -> f64 {
    if x <= good_max {
        return 0.0;
    }
    if x >= bad_max {
        return 1.0;
    }
    (x - good_max) / (bad_max - good_max)
}

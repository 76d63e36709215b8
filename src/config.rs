//! Engine configuration
//!
//! All tunables live here so that malformed values are rejected once at startup
//! rather than surfacing as odd behaviour mid-session. Configuration is plain
//! TOML; every field has a default, so an empty file is a valid configuration.

use crate::error::ErgoError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Frame rates outside (0, MAX_FRAME_RATE] are treated as unknown
pub const MAX_FRAME_RATE: f64 = 120.0;

/// Frame rate assumed when the capture device does not report a usable one
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Trailing window used for the blink rate (seconds)
pub const BLINK_RATE_WINDOW_SECS: f64 = 60.0;

/// Longest accepted posture smoothing window (seconds)
pub const MAX_WINDOW_SECS: f64 = 600.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErgoConfig {
    pub posture: PostureConfig,
    pub blink: BlinkConfig,
    pub monitor: MonitorConfig,
}

/// Posture scoring, smoothing and alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    /// Length of the smoothing window (seconds)
    pub window_seconds: f64,
    /// Frame rate used to size the smoothing window when the source reports none
    pub assumed_frame_rate: f64,
    /// Mean badness above which posture is classified as bad
    pub bad_threshold: f64,
    /// How long bad posture must hold before a warning (seconds)
    pub prolonged_seconds: f64,
    pub weights: ScoreWeights,
    pub limits: MetricLimits,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            window_seconds: 3.0,
            assumed_frame_rate: DEFAULT_FRAME_RATE,
            bad_threshold: 0.5,
            prolonged_seconds: 60.0,
            weights: ScoreWeights::default(),
            limits: MetricLimits::default(),
        }
    }
}

/// Weights of the four normalized metrics in the badness score. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub back: f64,
    pub neck: f64,
    pub head_forward: f64,
    pub shoulder_tilt: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        // Neck angle only. The other metrics are computed and can be weighted in.
        Self {
            back: 0.0,
            neck: 1.0,
            head_forward: 0.0,
            shoulder_tilt: 0.0,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.back + self.neck + self.head_forward + self.shoulder_tilt
    }
}

/// Piecewise-linear range for one metric: 0 at or below `good_max`, 1 at or above `bad_max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub good_max: f64,
    pub bad_max: f64,
}

impl Limit {
    pub const fn new(good_max: f64, bad_max: f64) -> Self {
        Self { good_max, bad_max }
    }
}

/// Per-metric limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricLimits {
    pub back: Limit,
    pub neck: Limit,
    pub head_forward: Limit,
    pub shoulder_tilt: Limit,
}

impl Default for MetricLimits {
    fn default() -> Self {
        Self {
            back: Limit::new(8.0, 20.0),
            neck: Limit::new(50.0, 80.0),
            head_forward: Limit::new(2.0, 8.0),
            shoulder_tilt: Limit::new(5.0, 20.0),
        }
    }
}

/// Blink detection and low-blink-rate alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// EAR below this counts as a closed-eye frame
    pub ear_threshold: f64,
    /// Closed-eye frames required before a reopening counts as a blink
    pub consec_frames: u32,
    /// Blink rate (per minute) below which the rate is considered low
    pub low_rate_per_min: u32,
    /// How long a low rate must hold before a warning (seconds)
    pub prolonged_seconds: f64,
    /// Synthetic blinks seeded at the first evaluation so a fresh session
    /// does not start at a rate of zero
    pub warmup_blinks: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.23,
            consec_frames: 2,
            low_rate_per_min: 8,
            prolonged_seconds: 60.0,
            warmup_blinks: 0,
        }
    }
}

/// Analysis loop scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval while paused (milliseconds)
    pub gate_poll_ms: u64,
    /// Pause after a transient acquisition failure (milliseconds)
    pub retry_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            gate_poll_ms: 1000,
            retry_delay_ms: 10,
        }
    }
}

impl ErgoConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ErgoError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ErgoError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ErgoError> {
        let config: ErgoConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, ErgoError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject out-of-range values with a message naming the offending key
    pub fn validate(&self) -> Result<(), ErgoError> {
        let posture = &self.posture;
        require_positive("posture.window_seconds", posture.window_seconds)?;
        if posture.window_seconds > MAX_WINDOW_SECS {
            return Err(invalid(format!(
                "posture.window_seconds must be at most {}, got {}",
                MAX_WINDOW_SECS, posture.window_seconds
            )));
        }
        require_positive("posture.prolonged_seconds", posture.prolonged_seconds)?;
        if !is_usable_frame_rate(posture.assumed_frame_rate) {
            return Err(invalid(format!(
                "posture.assumed_frame_rate must be in (0, {}], got {}",
                MAX_FRAME_RATE, posture.assumed_frame_rate
            )));
        }
        if !(0.0..=1.0).contains(&posture.bad_threshold) {
            return Err(invalid(format!(
                "posture.bad_threshold must be in [0, 1], got {}",
                posture.bad_threshold
            )));
        }

        let weights = &posture.weights;
        for (key, value) in [
            ("posture.weights.back", weights.back),
            ("posture.weights.neck", weights.neck),
            ("posture.weights.head_forward", weights.head_forward),
            ("posture.weights.shoulder_tilt", weights.shoulder_tilt),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{key} must be a non-negative number, got {value}")));
            }
        }
        if (weights.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(invalid(format!(
                "posture.weights must sum to 1, got {}",
                weights.sum()
            )));
        }

        let limits = &posture.limits;
        for (key, limit) in [
            ("posture.limits.back", limits.back),
            ("posture.limits.neck", limits.neck),
            ("posture.limits.head_forward", limits.head_forward),
            ("posture.limits.shoulder_tilt", limits.shoulder_tilt),
        ] {
            if !limit.good_max.is_finite() || !limit.bad_max.is_finite() || limit.good_max >= limit.bad_max {
                return Err(invalid(format!(
                    "{key}: good_max ({}) must be below bad_max ({})",
                    limit.good_max, limit.bad_max
                )));
            }
        }

        let blink = &self.blink;
        require_positive("blink.ear_threshold", blink.ear_threshold)?;
        require_positive("blink.prolonged_seconds", blink.prolonged_seconds)?;
        if blink.consec_frames == 0 {
            return Err(invalid("blink.consec_frames must be at least 1".to_string()));
        }

        if self.monitor.gate_poll_ms == 0 {
            return Err(invalid("monitor.gate_poll_ms must be positive".to_string()));
        }

        Ok(())
    }
}

/// Whether a reported frame rate can be trusted to size buffers
pub fn is_usable_frame_rate(fps: f64) -> bool {
    fps.is_finite() && fps > 0.0 && fps <= MAX_FRAME_RATE
}

fn require_positive(key: &str, value: f64) -> Result<(), ErgoError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{key} must be positive, got {value}")))
    }
}

fn invalid(message: String) -> ErgoError {
    ErgoError::InvalidConfig(message)
}

//! Core types for the Synheart Ergo engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: landmark frames, posture metrics, smoothed classifications and blink events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of an external detector for one subsystem on one frame.
///
/// Pose and face detection are independent: either may be absent on a frame
/// where the other is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection<T> {
    Detected(T),
    NotDetected,
}

impl<T> Detection<T> {
    pub fn is_detected(&self) -> bool {
        matches!(self, Detection::Detected(_))
    }

    pub fn as_ref(&self) -> Detection<&T> {
        match self {
            Detection::Detected(value) => Detection::Detected(value),
            Detection::NotDetected => Detection::NotDetected,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Detection<U> {
        match self {
            Detection::Detected(value) => Detection::Detected(f(value)),
            Detection::NotDetected => Detection::NotDetected,
        }
    }

    pub fn detected(self) -> Option<T> {
        match self {
            Detection::Detected(value) => Some(value),
            Detection::NotDetected => None,
        }
    }
}

impl<T> From<Option<T>> for Detection<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Detection::Detected(value),
            None => Detection::NotDetected,
        }
    }
}

/// A point in pixel space. `z` is depth in pixel-equivalent units (scaled by frame width).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(&self, other: &Point3) -> Point3 {
        Point3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn dot(&self, other: &Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &Point3) -> f64 {
        self.sub(other).norm()
    }

    pub fn midpoint(&self, other: &Point3) -> Point3 {
        Point3::new(
            0.5 * (self.x + other.x),
            0.5 * (self.y + other.y),
            0.5 * (self.z + other.z),
        )
    }
}

/// A 2D point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Body pose landmarks used for posture metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseLandmarks {
    pub nose: Point3,
    pub left_shoulder: Point3,
    pub right_shoulder: Point3,
    pub left_hip: Point3,
    pub right_hip: Point3,
}

/// Six ordered eye-contour points.
///
/// Order: outer corner, upper-outer, upper-inner, inner corner, lower-inner, lower-outer.
/// Points 1/5 and 2/4 form the two vertical gaps; 0/3 the horizontal gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeContour(pub [Point2; 6]);

/// Face landmarks used for blink detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: EyeContour,
    pub right_eye: EyeContour,
}

/// Immutable per-frame snapshot produced by the landmark provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Capture time of the frame
    pub captured_at: DateTime<Utc>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Body pose, if a person was detected
    pub pose: Detection<PoseLandmarks>,
    /// Face/eye landmarks, if a face was detected
    pub face: Detection<FaceLandmarks>,
}

/// Scalar posture metrics derived from one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureMetrics {
    /// Mid-hip to mid-shoulder line vs vertical (degrees, 0 = upright)
    pub back_angle: f64,
    /// Nose to mid-shoulder line vs vertical (degrees)
    pub neck_angle: f64,
    /// Nose depth in front of the shoulders (one shoulder width = 30 units)
    pub head_forward_cm: f64,
    /// Shoulder line vs horizontal (signed degrees)
    pub shoulder_tilt_deg: f64,
}

/// Smoothed posture classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureState {
    Good,
    Bad,
    Unknown,
}

impl PostureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureState::Good => "good",
            PostureState::Bad => "bad",
            PostureState::Unknown => "unknown",
        }
    }
}

/// One completed blink (closed then reopened)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkEvent {
    pub at: DateTime<Utc>,
}

/// Which monitors are enabled for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSelection {
    #[serde(default = "enabled")]
    pub posture: bool,
    #[serde(default = "enabled", alias = "eyeStrain")]
    pub eye_strain: bool,
}

fn enabled() -> bool {
    true
}

impl Default for MonitorSelection {
    fn default() -> Self {
        Self {
            posture: true,
            eye_strain: true,
        }
    }
}

/// Seconds elapsed from `since` to `now`, negative if the clock went backwards
pub fn seconds_between(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = now - since;
    match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        // beyond ~292k years microseconds overflow
        None => elapsed.num_milliseconds() as f64 / 1000.0,
    }
}

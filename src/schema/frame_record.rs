//! ergo.landmark_frame.v1 schema definition
//!
//! Wire format for landmark frames produced by an external pose/face model.
//! - Coordinates are normalized: x by frame width, y by frame height
//! - Pose depth `z` is normalized by frame width (MediaPipe convention)
//! - `pose` / `face` are `null` when the model detected nothing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "ergo.landmark_frame.v1";

/// Number of contour points per eye
pub const EYE_CONTOUR_POINTS: usize = 6;

/// Capture device information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSourceInfo {
    /// Camera identifier (e.g., "webcam-0")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Landmark model that produced the frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Frame rate reported by the camera
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

/// Normalized body pose landmarks, each `[x, y, z]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub nose: [f64; 3],
    pub left_shoulder: [f64; 3],
    pub right_shoulder: [f64; 3],
    pub left_hip: [f64; 3],
    pub right_hip: [f64; 3],
}

impl PoseRecord {
    fn named_points(&self) -> [(&'static str, [f64; 3]); 5] {
        [
            ("nose", self.nose),
            ("left_shoulder", self.left_shoulder),
            ("right_shoulder", self.right_shoulder),
            ("left_hip", self.left_hip),
            ("right_hip", self.right_hip),
        ]
    }
}

/// Normalized eye contours, six `[x, y]` points per eye
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub left_eye: Vec<[f64; 2]>,
    pub right_eye: Vec<[f64; 2]>,
}

/// One landmark frame record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Schema version (always "ergo.landmark_frame.v1")
    pub schema_version: String,
    /// Unique frame identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<String>,
    /// Capture timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<FrameSourceInfo>,
    #[serde(default)]
    pub pose: Option<PoseRecord>,
    #[serde(default)]
    pub face: Option<FaceRecord>,
}

impl FrameRecord {
    /// Create a record with no detections
    pub fn new(timestamp: DateTime<Utc>, width: u32, height: u32) -> Self {
        FrameRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            frame_id: Some(uuid::Uuid::new_v4().to_string()),
            timestamp,
            width,
            height,
            source: None,
            pose: None,
            face: None,
        }
    }

    pub fn with_pose(mut self, pose: PoseRecord) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_face(mut self, face: FaceRecord) -> Self {
        self.face = Some(face);
        self
    }

    pub fn with_source(mut self, source: FrameSourceInfo) -> Self {
        self.source = Some(source);
        self
    }

    /// Validate the record schema
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        if let Some(pose) = &self.pose {
            for (name, point) in pose.named_points() {
                if point.iter().any(|c| !c.is_finite()) {
                    return Err(ValidationError::NonFiniteCoordinate {
                        landmark: name.to_string(),
                    });
                }
            }
        }

        if let Some(face) = &self.face {
            for (name, eye) in [("left_eye", &face.left_eye), ("right_eye", &face.right_eye)] {
                if eye.len() != EYE_CONTOUR_POINTS {
                    return Err(ValidationError::EyeContourLength {
                        eye: name.to_string(),
                        expected: EYE_CONTOUR_POINTS,
                        actual: eye.len(),
                    });
                }
                if eye.iter().flatten().any(|c| !c.is_finite()) {
                    return Err(ValidationError::NonFiniteCoordinate {
                        landmark: name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Validation errors for frame records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Eye contour {eye} has {actual} points, expected {expected}")]
    EyeContourLength {
        eye: String,
        expected: usize,
        actual: usize,
    },

    #[error("Non-finite coordinate in {landmark}")]
    NonFiniteCoordinate { landmark: String },
}

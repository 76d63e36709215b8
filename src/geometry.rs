//! Geometric metric extraction
//!
//! Pure functions from landmarks to posture metrics and eye aspect ratio.
//! No state is kept between frames.

use crate::types::{EyeContour, FaceLandmarks, Point3, PoseLandmarks, PostureMetrics};

/// Vectors shorter than this are treated as zero-length
const DEGENERATE_LENGTH: f64 = 1e-6;

/// Distance units assigned to one shoulder width
const SHOULDER_WIDTH_UNITS: f64 = 30.0;

/// Keeps EAR finite when the eye corners coincide
const EAR_EPSILON: f64 = 1e-6;

/// Image "up" direction (y grows downwards)
const VERTICAL: Point3 = Point3::new(0.0, -1.0, 0.0);

/// Extractor for posture and eye metrics
pub struct GeometryExtractor;

impl GeometryExtractor {
    /// Compute posture metrics from body landmarks
    pub fn posture_metrics(pose: &PoseLandmarks) -> PostureMetrics {
        let mid_shoulder = pose.left_shoulder.midpoint(&pose.right_shoulder);
        let mid_hip = pose.left_hip.midpoint(&pose.right_hip);

        PostureMetrics {
            back_angle: angle_with_vertical(&mid_shoulder, &mid_hip),
            neck_angle: angle_with_vertical(&pose.nose, &mid_shoulder),
            head_forward_cm: head_forward(pose, &mid_shoulder),
            shoulder_tilt_deg: shoulder_tilt(&pose.left_shoulder, &pose.right_shoulder),
        }
    }

    /// Mean eye aspect ratio of both eyes
    pub fn eye_aspect_ratio(face: &FaceLandmarks) -> f64 {
        (eye_aspect_ratio(&face.left_eye) + eye_aspect_ratio(&face.right_eye)) / 2.0
    }
}

/// Angle in degrees between the vector `from -> to` and image vertical.
///
/// 0° means `to` sits straight above `from`. A zero-length vector yields 0°.
pub fn angle_with_vertical(to: &Point3, from: &Point3) -> f64 {
    let v = to.sub(from);
    let length = v.norm();
    if length < DEGENERATE_LENGTH {
        return 0.0;
    }
    let cos = (v.dot(&VERTICAL) / length).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Nose depth relative to mid-shoulder depth, in shoulder-width-scaled units.
///
/// Formula: `(nose.z - mid_shoulder.z) / shoulder_width * 30`
/// Positive when the head is closer to the camera than the shoulders.
fn head_forward(pose: &PoseLandmarks, mid_shoulder: &Point3) -> f64 {
    let mut shoulder_width = pose.left_shoulder.distance(&pose.right_shoulder);
    if shoulder_width < DEGENERATE_LENGTH {
        shoulder_width = 1.0;
    }
    let raw = pose.nose.z - mid_shoulder.z;
    (raw / shoulder_width) * SHOULDER_WIDTH_UNITS
}

/// Signed angle of the left→right shoulder line from horizontal, in [-90°, 90°].
///
/// The line is undirected, so mirrored and unmirrored frames give the same tilt.
/// This folds the raw `atan2` of the left→right vector: directions past ±90°
/// are turned by 180°, which flips their sign relative to the raw angle
/// (a raw 170° reads as -10°).
fn shoulder_tilt(left: &Point3, right: &Point3) -> f64 {
    let dx = right.x - left.x;
    let dy = right.y - left.y;
    if dx.abs() < DEGENERATE_LENGTH && dy.abs() < DEGENERATE_LENGTH {
        return 0.0;
    }
    let mut angle = dy.atan2(dx).to_degrees();
    if angle > 90.0 {
        angle -= 180.0;
    } else if angle < -90.0 {
        angle += 180.0;
    }
    angle
}

/// Eye aspect ratio of one eye.
///
/// Formula: `(|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3| + ε)`
pub fn eye_aspect_ratio(eye: &EyeContour) -> f64 {
    let p = &eye.0;
    let vertical_1 = p[1].distance(&p[5]);
    let vertical_2 = p[2].distance(&p[4]);
    let horizontal = p[0].distance(&p[3]);
    (vertical_1 + vertical_2) / (2.0 * horizontal + EAR_EPSILON)
}

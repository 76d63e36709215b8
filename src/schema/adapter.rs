//! Adapter for converting ergo.landmark_frame.v1 records to LandmarkFrames
//!
//! This module parses record batches and streams, scales normalized
//! coordinates to pixels, and exposes record streams as a `FrameSource`.

use crate::error::{ErgoError, FrameError};
use crate::monitor::FrameSource;
use crate::schema::frame_record::*;
use crate::types::{
    Detection, EyeContour, FaceLandmarks, LandmarkFrame, Point2, Point3, PoseLandmarks,
};
use std::io::BufRead;
use tracing::warn;

/// Adapter for converting frame records to landmark frames
pub struct FrameRecordAdapter;

impl FrameRecordAdapter {
    /// Parse a JSON string containing an array of FrameRecords
    pub fn parse_array(json: &str) -> Result<Vec<FrameRecord>, ErgoError> {
        let records: Vec<FrameRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (newline-delimited JSON) containing FrameRecords
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<FrameRecord>, ErgoError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            if let Some(record) = Self::parse_line(line, line_num + 1)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Parse one NDJSON line; blank lines yield `None`
    pub fn parse_line(line: &str, line_num: usize) -> Result<Option<FrameRecord>, ErgoError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<FrameRecord>(trimmed)
            .map(Some)
            .map_err(|e| ErgoError::ParseError(format!("Failed to parse line {line_num}: {e}")))
    }

    /// Validate and convert one record to pixel-space landmarks
    pub fn to_landmark_frame(record: &FrameRecord) -> Result<LandmarkFrame, ErgoError> {
        record
            .validate()
            .map_err(|e| ErgoError::ParseError(format!("Invalid frame record: {e}")))?;

        let width = f64::from(record.width);
        let height = f64::from(record.height);
        let to_pixels = |p: [f64; 3]| Point3::new(p[0] * width, p[1] * height, p[2] * width);

        let pose = record.pose.map(|pose| PoseLandmarks {
            nose: to_pixels(pose.nose),
            left_shoulder: to_pixels(pose.left_shoulder),
            right_shoulder: to_pixels(pose.right_shoulder),
            left_hip: to_pixels(pose.left_hip),
            right_hip: to_pixels(pose.right_hip),
        });

        let face = match &record.face {
            Some(face) => Some(FaceLandmarks {
                left_eye: eye_contour(&face.left_eye, width, height)?,
                right_eye: eye_contour(&face.right_eye, width, height)?,
            }),
            None => None,
        };

        Ok(LandmarkFrame {
            captured_at: record.timestamp,
            width: record.width,
            height: record.height,
            pose: Detection::from(pose),
            face: Detection::from(face),
        })
    }

    /// Convert a batch of records, in order
    pub fn to_landmark_frames(records: &[FrameRecord]) -> Result<Vec<LandmarkFrame>, ErgoError> {
        records.iter().map(Self::to_landmark_frame).collect()
    }

    /// Validate a batch of records
    pub fn validate_records(records: &[FrameRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .map(|(idx, record)| ValidationResult {
                index: idx,
                frame_id: record.frame_id.clone(),
                result: record.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}

fn eye_contour(points: &[[f64; 2]], width: f64, height: f64) -> Result<EyeContour, ErgoError> {
    let points: [[f64; 2]; EYE_CONTOUR_POINTS] = points.try_into().map_err(|_| {
        ErgoError::ParseError(format!(
            "eye contour needs {EYE_CONTOUR_POINTS} points, got {}",
            points.len()
        ))
    })?;
    Ok(EyeContour(points.map(|p| Point2::new(p[0] * width, p[1] * height))))
}

/// Result of record validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub frame_id: Option<String>,
    pub result: Option<ValidationError>,
}

/// `FrameSource` over a stream of NDJSON frame records.
///
/// Malformed lines are skipped as transient failures. A read error on the
/// underlying stream disconnects the source.
pub struct NdjsonFrameSource<R> {
    reader: R,
    line_num: usize,
    fps: Option<f64>,
    buffer: String,
}

impl<R: BufRead + Send> NdjsonFrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_num: 0,
            fps: None,
            buffer: String::new(),
        }
    }

    /// Frame rate to report to the analyzer
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }
}

impl<R: BufRead + Send> FrameSource for NdjsonFrameSource<R> {
    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>, FrameError> {
        loop {
            self.buffer.clear();
            let read = self
                .reader
                .read_line(&mut self.buffer)
                .map_err(|e| FrameError::Disconnected(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_num += 1;

            let record = match FrameRecordAdapter::parse_line(&self.buffer, self.line_num) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(line = self.line_num, error = %e, "skipping malformed frame record");
                    return Err(FrameError::Transient(e.to_string()));
                }
            };
            return FrameRecordAdapter::to_landmark_frame(&record)
                .map(Some)
                .map_err(|e| FrameError::Transient(e.to_string()));
        }
    }
}

/// `FrameSource` over records already in memory
pub struct RecordFrameSource {
    records: std::vec::IntoIter<FrameRecord>,
    fps: Option<f64>,
}

impl RecordFrameSource {
    /// The frame rate is taken from the first record's source info, if present
    pub fn new(records: Vec<FrameRecord>) -> Self {
        let fps = records
            .first()
            .and_then(|r| r.source.as_ref())
            .and_then(|s| s.fps);
        Self {
            records: records.into_iter(),
            fps,
        }
    }
}

impl FrameSource for RecordFrameSource {
    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>, FrameError> {
        match self.records.next() {
            Some(record) => FrameRecordAdapter::to_landmark_frame(&record)
                .map(Some)
                .map_err(|e| FrameError::Transient(e.to_string())),
            None => Ok(None),
        }
    }
}

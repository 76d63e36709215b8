//! Blink detection
//!
//! Counts consecutive closed-eye frames and reports a blink when the eye
//! reopens after at least `consec_frames` of them. Single-frame dips are noise.

use crate::types::BlinkEvent;
use chrono::{DateTime, Utc};

/// Frame-to-frame blink detector over the eye aspect ratio
#[derive(Debug, Clone)]
pub struct BlinkDetector {
    ear_threshold: f64,
    consec_frames: u32,
    closed_frames: u32,
}

impl BlinkDetector {
    pub fn new(ear_threshold: f64, consec_frames: u32) -> Self {
        Self {
            ear_threshold,
            consec_frames,
            closed_frames: 0,
        }
    }

    /// Feed the EAR of one frame; returns a blink when one completes on this frame
    pub fn update(&mut self, ear: f64, now: DateTime<Utc>) -> Option<BlinkEvent> {
        if ear < self.ear_threshold {
            self.closed_frames = self.closed_frames.saturating_add(1);
            return None;
        }

        let blink = if self.closed_frames >= self.consec_frames {
            Some(BlinkEvent { at: now })
        } else {
            None
        };
        self.closed_frames = 0;
        blink
    }

    /// Closed-eye frames counted since the last reset
    pub fn closed_frames(&self) -> u32 {
        self.closed_frames
    }

    /// Forget a closure in progress
    pub fn reset(&mut self) {
        self.closed_frames = 0;
    }
}

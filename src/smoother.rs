//! Temporal smoothing
//!
//! This module turns noisy per-frame signals into stable readings:
//! - Posture: rolling mean of badness scores over a fixed-capacity window
//! - Blink rate: count of blinks within the trailing 60 seconds

use crate::config::{is_usable_frame_rate, BLINK_RATE_WINDOW_SECS};
use crate::types::{Detection, PostureState};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Window capacity for a frame rate and window length.
///
/// An unusable `measured_fps` falls back to `assumed_fps`. Never below 1.
pub fn window_capacity(measured_fps: Option<f64>, assumed_fps: f64, window_seconds: f64) -> usize {
    let fps = measured_fps
        .filter(|fps| is_usable_frame_rate(*fps))
        .unwrap_or(assumed_fps);
    ((fps * window_seconds).round() as usize).max(1)
}

/// Rolling-mean posture classifier
#[derive(Debug, Clone)]
pub struct PostureSmoother {
    scores: VecDeque<f64>,
    capacity: usize,
    threshold: f64,
}

impl PostureSmoother {
    /// Create a smoother holding at most `capacity` scores
    pub fn new(capacity: usize, threshold: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            scores: VecDeque::new(),
            capacity,
            threshold,
        }
    }

    /// Feed one frame.
    ///
    /// A detected score is pushed (evicting the oldest when full) and the window
    /// re-classified. A missing detection leaves the window untouched and reads `Unknown`.
    pub fn observe(&mut self, score: Detection<f64>) -> PostureState {
        match score {
            Detection::Detected(score) => self.push(score),
            Detection::NotDetected => PostureState::Unknown,
        }
    }

    /// Push a score and classify the window
    pub fn push(&mut self, score: f64) -> PostureState {
        self.scores.push_back(score);
        while self.scores.len() > self.capacity {
            self.scores.pop_front();
        }
        self.classify()
    }

    /// Classify the current window without modifying it
    pub fn classify(&self) -> PostureState {
        match self.mean() {
            Some(mean) if mean > self.threshold => PostureState::Bad,
            Some(_) => PostureState::Good,
            None => PostureState::Unknown,
        }
    }

    /// Mean of the window, if any score has been pushed
    pub fn mean(&self) -> Option<f64> {
        if self.scores.is_empty() {
            return None;
        }
        let sum: f64 = self.scores.iter().sum();
        Some(sum / self.scores.len() as f64)
    }

    /// Empty the window
    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Trailing-minute blink counter
#[derive(Debug, Clone)]
pub struct BlinkRateTracker {
    blinks: VecDeque<DateTime<Utc>>,
    warmup_blinks: u32,
    warmed_up: bool,
}

impl Default for BlinkRateTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BlinkRateTracker {
    /// Create a tracker that seeds `warmup_blinks` synthetic blinks on first use
    pub fn new(warmup_blinks: u32) -> Self {
        Self {
            blinks: VecDeque::new(),
            warmup_blinks,
            warmed_up: warmup_blinks == 0,
        }
    }

    /// Record a blink. Timestamps are expected in non-decreasing order.
    pub fn record(&mut self, at: DateTime<Utc>) {
        self.warm_up(at);
        self.blinks.push_back(at);
    }

    /// Drop blinks older than the window relative to `now`
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.warm_up(now);
        let window = Duration::seconds(BLINK_RATE_WINDOW_SECS as i64);
        while let Some(front) = self.blinks.front() {
            if now - *front > window {
                self.blinks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Blinks within the trailing window of `now` (pruning first)
    pub fn rate(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.blinks.len() as u32
    }

    /// Forget all blinks; the warm-up seed applies again on next use
    pub fn reset(&mut self) {
        self.blinks.clear();
        self.warmed_up = self.warmup_blinks == 0;
    }

    fn warm_up(&mut self, now: DateTime<Utc>) {
        if self.warmed_up {
            return;
        }
        self.warmed_up = true;
        for _ in 0..self.warmup_blinks {
            self.blinks.push_back(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: f64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
            + Duration::milliseconds((secs * 1000.0).round() as i64)
    }

    #[test]
    fn test_window_capacity_fallback() {
        assert_eq!(window_capacity(Some(25.0), 30.0, 3.0), 75);
        assert_eq!(window_capacity(None, 30.0, 3.0), 90);
        assert_eq!(window_capacity(Some(0.0), 30.0, 3.0), 90);
        assert_eq!(window_capacity(Some(240.0), 30.0, 3.0), 90);
        assert_eq!(window_capacity(Some(29.97), 30.0, 3.0), 90);
        assert_eq!(window_capacity(Some(1.0), 30.0, 0.1), 1);
    }

    #[test]
    fn test_smoother_classifies_by_mean() {
        let mut smoother = PostureSmoother::new(4, 0.5);
        assert_eq!(smoother.push(1.0), PostureState::Bad);
        assert_eq!(smoother.push(0.0), PostureState::Good); // mean exactly 0.5 is not bad
        assert_eq!(smoother.push(0.9), PostureState::Bad);
    }

    #[test]
    fn test_smoother_never_exceeds_capacity() {
        let mut smoother = PostureSmoother::new(3, 0.5);
        for i in 0..10 {
            smoother.push(i as f64 / 10.0);
            assert!(smoother.len() <= 3);
        }
        // Only 0.7, 0.8, 0.9 remain
        assert!((smoother.mean().unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_smoother_unknown_does_not_touch_window() {
        let mut smoother = PostureSmoother::new(3, 0.5);
        smoother.push(1.0);
        assert_eq!(smoother.observe(Detection::NotDetected), PostureState::Unknown);
        assert_eq!(smoother.len(), 1);
        assert_eq!(smoother.classify(), PostureState::Bad);
    }

    #[test]
    fn test_empty_smoother_is_unknown() {
        let smoother = PostureSmoother::new(3, 0.5);
        assert_eq!(smoother.classify(), PostureState::Unknown);
        assert!(smoother.is_empty());
    }

    #[test]
    fn test_blink_rate_empty() {
        let mut tracker = BlinkRateTracker::default();
        assert_eq!(tracker.rate(t(0.0)), 0);
    }

    #[test]
    fn test_blink_rate_counts_trailing_minute() {
        let mut tracker = BlinkRateTracker::default();
        for secs in [0.0, 10.0, 30.0, 59.0, 61.0] {
            tracker.record(t(secs));
        }
        // now = 70: 10, 30, 59, 61 are within 60s; 0 is 70s old
        assert_eq!(tracker.rate(t(70.0)), 4);
        // exactly 60s old is kept
        assert_eq!(tracker.rate(t(90.0)), 3);
        assert_eq!(tracker.rate(t(200.0)), 0);
    }

    #[test]
    fn test_blink_rate_matches_brute_force_count() {
        let stamps: Vec<f64> = (0..50).map(|i| i as f64 * 3.7).collect();
        let mut tracker = BlinkRateTracker::default();
        for (i, stamp) in stamps.iter().enumerate() {
            tracker.record(t(*stamp));
            let now = *stamp + 1.0;
            let expected = stamps[..=i]
                .iter()
                .filter(|s| now - **s <= BLINK_RATE_WINDOW_SECS)
                .count() as u32;
            assert_eq!(tracker.rate(t(now)), expected);
        }
    }

    #[test]
    fn test_blink_rate_boundary_below_millisecond() {
        let t0 = t(0.0);
        let mut tracker = BlinkRateTracker::default();
        tracker.record(t0);
        assert_eq!(tracker.rate(t0 + Duration::seconds(60)), 1);
        assert_eq!(tracker.rate(t0 + Duration::microseconds(60_000_900)), 0);

        let mut tracker = BlinkRateTracker::default();
        tracker.record(t0);
        assert_eq!(tracker.rate(t0 + Duration::nanoseconds(60_000_000_001)), 0);
    }

    #[test]
    fn test_smoother_does_not_preallocate_window() {
        let smoother = PostureSmoother::new(usize::MAX, 0.5);
        assert_eq!(smoother.capacity(), usize::MAX);
        assert!(smoother.is_empty());
    }

    #[test]
    fn test_blink_rate_reset_reseeds_warmup() {
        let mut tracker = BlinkRateTracker::new(5);
        tracker.record(t(1.0));
        assert_eq!(tracker.rate(t(2.0)), 6);
        tracker.reset();
        assert_eq!(tracker.rate(t(300.0)), 5);
    }

    #[test]
    fn test_warmup_blinks_seed_once() {
        let mut tracker = BlinkRateTracker::new(15);
        assert_eq!(tracker.rate(t(0.0)), 15);
        tracker.record(t(5.0));
        assert_eq!(tracker.rate(t(10.0)), 16);
        assert_eq!(tracker.rate(t(61.0)), 1);
    }
}

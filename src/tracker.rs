//! Prolonged-condition tracking
//!
//! A two-state hysteresis machine shared by every monitored condition. The
//! condition must hold continuously for `threshold_seconds` before the tracker
//! goes `Active`; any frame where it does not hold (or cannot be observed)
//! returns it to `Normal`. Each activation yields exactly one warning and each
//! deactivation exactly one resolution.

use crate::types::seconds_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-frame observation of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionSignal {
    Holds,
    Clear,
    Unknown,
}

impl From<Option<bool>> for ConditionSignal {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => ConditionSignal::Holds,
            Some(false) => ConditionSignal::Clear,
            None => ConditionSignal::Unknown,
        }
    }
}

/// Tracker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Normal,
    Active,
}

/// Why an active condition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReason {
    /// The condition stopped holding
    Cleared,
    /// The signal could not be observed on this frame
    SignalUnavailable,
}

/// A state change worth reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Condition became prolonged after holding for `elapsed_seconds`
    Warning { elapsed_seconds: f64 },
    /// Condition is no longer active
    Resolved { reason: ResolveReason },
}

/// Hysteresis tracker for one condition
#[derive(Debug, Clone)]
pub struct ConditionTracker {
    threshold_seconds: f64,
    state: TrackerState,
    onset: Option<DateTime<Utc>>,
}

impl ConditionTracker {
    pub fn new(threshold_seconds: f64) -> Self {
        Self {
            threshold_seconds,
            state: TrackerState::Normal,
            onset: None,
        }
    }

    /// Feed one frame's signal
    pub fn update(&mut self, signal: ConditionSignal, now: DateTime<Utc>) -> Option<Transition> {
        match signal {
            ConditionSignal::Holds => self.hold(now),
            ConditionSignal::Clear => self.release(ResolveReason::Cleared),
            ConditionSignal::Unknown => self.release(ResolveReason::SignalUnavailable),
        }
    }

    fn hold(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let onset = *self.onset.get_or_insert(now);
        let elapsed_seconds = seconds_between(onset, now);

        if self.state == TrackerState::Normal && elapsed_seconds >= self.threshold_seconds {
            self.state = TrackerState::Active;
            return Some(Transition::Warning { elapsed_seconds });
        }
        None
    }

    fn release(&mut self, reason: ResolveReason) -> Option<Transition> {
        self.onset = None;
        if self.state == TrackerState::Active {
            self.state = TrackerState::Normal;
            return Some(Transition::Resolved { reason });
        }
        None
    }

    /// Drop the current streak, as when monitoring stops or a session restarts.
    ///
    /// Returns the resolution owed to subscribers if a warning was active.
    pub fn reset(&mut self) -> Option<Transition> {
        self.release(ResolveReason::Cleared)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackerState::Active
    }

    /// When the current streak began, if the condition is holding
    pub fn onset(&self) -> Option<DateTime<Utc>> {
        self.onset
    }

    pub fn threshold_seconds(&self) -> f64 {
        self.threshold_seconds
    }
}

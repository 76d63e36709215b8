//! Monitor context
//!
//! The single piece of state shared between the analysis loop and whatever
//! control surface drives it (CLI, network layer, host app).
//!
//! Access rules:
//! - `RecordingGate`: written by start/stop, read by the loop every iteration.
//!   Lock-free; the loop never blocks on a writer.
//! - `BroadcastSink`: subscribers added/removed by the network layer, iterated
//!   by the loop on every broadcast.
//! - Monitor selection and session counters: atomics, written by start and by the loop.
//! - Session identity: behind a mutex touched only by start/stop.
//! - Session generation: bumped by every start; the loop drops its temporal
//!   state when it sees a new one.

use crate::events::AlertEvent;
use crate::pipeline::FrameAnalysis;
use crate::sink::BroadcastSink;
use crate::types::{seconds_between, MonitorSelection, PostureState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

/// Pause/resume flag for the analysis loop. Last write wins.
#[derive(Debug, Default)]
pub struct RecordingGate {
    open: AtomicBool,
    notify: Notify,
}

impl RecordingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume analysis and wake a waiting loop
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Pause analysis; takes effect at the loop's next gate check
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait until the gate is open.
    ///
    /// Re-checks at least every `poll` even without a wake-up, so a missed
    /// notification costs at most one poll interval.
    pub async fn wait_open(&self, poll: Duration) {
        loop {
            let notified = self.notify.notified();
            if self.is_open() {
                return;
            }
            let _ = tokio::time::timeout(poll, notified).await;
        }
    }
}

/// Returned when a session starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub monitors: MonitorSelection,
}

/// Per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub frames_analyzed: u64,
    pub bad_posture_frames: u64,
    pub posture_warnings: u64,
    pub blink_warnings: u64,
}

/// Returned when a session stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStopped {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Session length in seconds
    pub duration: f64,
    pub summary: SessionSummary,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    id: Uuid,
    start_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionCounters {
    frames_analyzed: AtomicU64,
    bad_posture_frames: AtomicU64,
    posture_warnings: AtomicU64,
    blink_warnings: AtomicU64,
}

impl SessionCounters {
    fn reset(&self) {
        for counter in [
            &self.frames_analyzed,
            &self.bad_posture_frames,
            &self.posture_warnings,
            &self.blink_warnings,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> SessionSummary {
        SessionSummary {
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            bad_posture_frames: self.bad_posture_frames.load(Ordering::Relaxed),
            posture_warnings: self.posture_warnings.load(Ordering::Relaxed),
            blink_warnings: self.blink_warnings.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide monitoring context, shared behind an `Arc`
pub struct MonitorContext {
    gate: RecordingGate,
    sink: BroadcastSink,
    posture_enabled: AtomicBool,
    eye_strain_enabled: AtomicBool,
    session: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
    counters: SessionCounters,
}

impl Default for MonitorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorContext {
    /// Create a context with the gate closed and both monitors enabled
    pub fn new() -> Self {
        Self {
            gate: RecordingGate::new(),
            sink: BroadcastSink::new(),
            posture_enabled: AtomicBool::new(true),
            eye_strain_enabled: AtomicBool::new(true),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            counters: SessionCounters::default(),
        }
    }

    pub fn gate(&self) -> &RecordingGate {
        &self.gate
    }

    pub fn sink(&self) -> &BroadcastSink {
        &self.sink
    }

    /// Start a new session and open the gate.
    ///
    /// Starting while a session is active replaces it; its summary is discarded.
    pub fn start(&self, monitors: MonitorSelection) -> SessionStarted {
        self.posture_enabled.store(monitors.posture, Ordering::SeqCst);
        self.eye_strain_enabled
            .store(monitors.eye_strain, Ordering::SeqCst);
        self.counters.reset();
        self.generation.fetch_add(1, Ordering::SeqCst);

        let session = ActiveSession {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
        };
        if let Some(previous) = self.lock_session().replace(session) {
            info!(session_id = %previous.id, "session replaced by a new start");
        }
        self.gate.open();

        info!(
            session_id = %session.id,
            posture = monitors.posture,
            eye_strain = monitors.eye_strain,
            "session started"
        );
        SessionStarted {
            session_id: session.id,
            start_time: session.start_time,
            monitors,
        }
    }

    /// Close the gate and end the active session, if any
    pub fn stop(&self) -> Option<SessionStopped> {
        self.gate.close();
        let session = self.lock_session().take()?;

        let end_time = Utc::now();
        let stopped = SessionStopped {
            session_id: session.id,
            start_time: session.start_time,
            end_time,
            duration: seconds_between(session.start_time, end_time).max(0.0),
            summary: self.counters.snapshot(),
        };
        info!(
            session_id = %stopped.session_id,
            duration = stopped.duration,
            frames = stopped.summary.frames_analyzed,
            "session stopped"
        );
        Some(stopped)
    }

    /// Monitors the loop should run on its next frame
    pub fn selection(&self) -> MonitorSelection {
        MonitorSelection {
            posture: self.posture_enabled.load(Ordering::SeqCst),
            eye_strain: self.eye_strain_enabled.load(Ordering::SeqCst),
        }
    }

    /// Number of sessions started so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock_session().map(|s| s.id)
    }

    /// Fold one analysed frame into the session counters
    pub fn record(&self, analysis: &FrameAnalysis) {
        self.counters.frames_analyzed.fetch_add(1, Ordering::Relaxed);
        if analysis
            .posture
            .as_ref()
            .is_some_and(|p| p.state == PostureState::Bad)
        {
            self.counters
                .bad_posture_frames
                .fetch_add(1, Ordering::Relaxed);
        }
        for event in analysis.events() {
            match event {
                AlertEvent::PostureWarning { .. } => {
                    self.counters.posture_warnings.fetch_add(1, Ordering::Relaxed);
                }
                AlertEvent::BlinkWarning { .. } => {
                    self.counters.blink_warnings.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }

    /// Counters of the current session so far
    pub fn summary(&self) -> SessionSummary {
        self.counters.snapshot()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

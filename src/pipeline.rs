//! Frame analysis pipeline
//!
//! This module chains the per-frame stages into one synchronous step.
//! It does no I/O and never suspends; the analysis loop and the FFI both drive it.
//!
//! Pipeline stages:
//! 1. GeometryExtractor - Landmarks to posture metrics and eye aspect ratio
//! 2. BadnessScorer - Metrics to a 0-1 badness score
//! 3. PostureSmoother / BlinkDetector + BlinkRateTracker - Stable per-frame readings
//! 4. ConditionTracker - Prolonged-condition warnings and resolutions

use crate::blink::BlinkDetector;
use crate::config::ErgoConfig;
use crate::error::ErgoError;
use crate::events::{AlertEvent, StreamMessage};
use crate::geometry::GeometryExtractor;
use crate::scorer::BadnessScorer;
use crate::smoother::{window_capacity, BlinkRateTracker, PostureSmoother};
use crate::tracker::{ConditionSignal, ConditionTracker, Transition};
use crate::types::{
    BlinkEvent, Detection, LandmarkFrame, MonitorSelection, PostureMetrics, PostureState,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Posture result for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct PostureOutcome {
    /// Raw metrics, absent when no pose was detected
    pub metrics: Option<PostureMetrics>,
    /// Per-frame badness score, absent when no pose was detected
    pub badness: Option<f64>,
    /// Smoothed classification
    pub state: PostureState,
    pub event: Option<AlertEvent>,
}

/// Blink result for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct BlinkOutcome {
    /// Mean eye aspect ratio, absent when no face was detected
    pub ear: Option<f64>,
    /// Blink completed on this frame
    pub blink: Option<BlinkEvent>,
    /// Blinks in the trailing minute, absent when no face was detected
    pub rate: Option<u32>,
    pub event: Option<AlertEvent>,
}

/// Everything one frame produced. A disabled monitor leaves its half empty.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub captured_at: DateTime<Utc>,
    pub posture: Option<PostureOutcome>,
    pub blink: Option<BlinkOutcome>,
    /// Resolutions for monitors switched off since the previous frame
    pub closed: Vec<AlertEvent>,
}

impl FrameAnalysis {
    /// Messages in publication order: routine updates first, then events
    pub fn messages(&self) -> Vec<StreamMessage> {
        let mut messages = Vec::with_capacity(4);
        if let Some(posture) = &self.posture {
            messages.push(StreamMessage::posture(posture.state));
        }
        if let Some(blink) = &self.blink {
            messages.push(StreamMessage::blink(blink.rate));
        }
        messages.extend(self.events().map(StreamMessage::from));
        messages
    }

    /// Alert events raised on this frame
    pub fn events(&self) -> impl Iterator<Item = AlertEvent> + '_ {
        self.closed
            .iter()
            .copied()
            .chain(self.posture.iter().filter_map(|p| p.event))
            .chain(self.blink.iter().filter_map(|b| b.event))
    }
}

/// Stateful per-frame analyzer holding all smoothing and tracker state.
///
/// Use one instance per landmark stream.
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    scorer: BadnessScorer,
    smoother: PostureSmoother,
    blink_detector: BlinkDetector,
    blink_rate: BlinkRateTracker,
    posture_tracker: ConditionTracker,
    blink_tracker: ConditionTracker,
    low_rate_per_min: u32,
    selection: MonitorSelection,
}

impl Default for FrameAnalyzer {
    fn default() -> Self {
        Self::build(&ErgoConfig::default(), None)
    }
}

impl FrameAnalyzer {
    /// Create an analyzer from a validated configuration.
    ///
    /// `measured_fps` is the frame rate reported by the source, if any; it sizes
    /// the posture window when within (0, 120].
    pub fn new(config: &ErgoConfig, measured_fps: Option<f64>) -> Result<Self, ErgoError> {
        config.validate()?;
        Ok(Self::build(config, measured_fps))
    }

    fn build(config: &ErgoConfig, measured_fps: Option<f64>) -> Self {
        let posture = &config.posture;
        let blink = &config.blink;
        let capacity = window_capacity(
            measured_fps,
            posture.assumed_frame_rate,
            posture.window_seconds,
        );
        debug!(capacity, "posture smoothing window sized");

        Self {
            scorer: BadnessScorer::new(posture.weights, posture.limits),
            smoother: PostureSmoother::new(capacity, posture.bad_threshold),
            blink_detector: BlinkDetector::new(blink.ear_threshold, blink.consec_frames),
            blink_rate: BlinkRateTracker::new(blink.warmup_blinks),
            posture_tracker: ConditionTracker::new(posture.prolonged_seconds),
            blink_tracker: ConditionTracker::new(blink.prolonged_seconds),
            low_rate_per_min: blink.low_rate_per_min,
            selection: MonitorSelection::default(),
        }
    }

    /// Analyse one frame for the selected monitors
    pub fn analyze(&mut self, frame: &LandmarkFrame, selection: MonitorSelection) -> FrameAnalysis {
        let now = frame.captured_at;
        let closed = self.apply_selection(selection);
        FrameAnalysis {
            captured_at: now,
            posture: selection.posture.then(|| self.analyze_posture(frame, now)),
            blink: selection.eye_strain.then(|| self.analyze_blink(frame, now)),
            closed,
        }
    }

    /// Switch monitors on or off.
    ///
    /// A monitor switched off loses its temporal state; an active warning on it
    /// is resolved and the resolution returned.
    pub fn apply_selection(&mut self, selection: MonitorSelection) -> Vec<AlertEvent> {
        let mut closed = Vec::new();
        if self.selection.posture && !selection.posture {
            closed.extend(self.reset_posture());
        }
        if self.selection.eye_strain && !selection.eye_strain {
            closed.extend(self.reset_blink());
        }
        self.selection = selection;
        closed
    }

    /// Drop all temporal state, as at the start of a new session.
    ///
    /// Returns resolutions for warnings that were active.
    pub fn reset(&mut self) -> Vec<AlertEvent> {
        self.reset_posture()
            .into_iter()
            .chain(self.reset_blink())
            .collect()
    }

    fn reset_posture(&mut self) -> Option<AlertEvent> {
        self.smoother.clear();
        self.posture_tracker.reset().map(posture_event)
    }

    fn reset_blink(&mut self) -> Option<AlertEvent> {
        self.blink_detector.reset();
        self.blink_rate.reset();
        self.blink_tracker
            .reset()
            .map(|transition| blink_event(transition, None))
    }

    fn analyze_posture(&mut self, frame: &LandmarkFrame, now: DateTime<Utc>) -> PostureOutcome {
        let metrics = frame
            .pose
            .as_ref()
            .map(GeometryExtractor::posture_metrics);
        let badness = metrics.as_ref().map(|m| self.scorer.score(m));
        let state = self.smoother.observe(badness.clone());

        let signal = match state {
            PostureState::Bad => ConditionSignal::Holds,
            PostureState::Good => ConditionSignal::Clear,
            PostureState::Unknown => ConditionSignal::Unknown,
        };
        let event = self.posture_tracker.update(signal, now).map(posture_event);

        PostureOutcome {
            metrics: metrics.detected(),
            badness: badness.detected(),
            state,
            event,
        }
    }

    fn analyze_blink(&mut self, frame: &LandmarkFrame, now: DateTime<Utc>) -> BlinkOutcome {
        let (ear, blink, rate) = match &frame.face {
            Detection::Detected(face) => {
                let ear = GeometryExtractor::eye_aspect_ratio(face);
                let blink = self.blink_detector.update(ear, now);
                if let Some(blink) = blink {
                    self.blink_rate.record(blink.at);
                }
                (Some(ear), blink, Some(self.blink_rate.rate(now)))
            }
            Detection::NotDetected => {
                self.blink_rate.prune(now);
                (None, None, None)
            }
        };

        let low_rate_per_min = self.low_rate_per_min;
        let signal = ConditionSignal::from(rate.map(|r| r < low_rate_per_min));
        let event = self
            .blink_tracker
            .update(signal, now)
            .map(|transition| blink_event(transition, rate));

        BlinkOutcome {
            ear,
            blink,
            rate,
            event,
        }
    }

    /// Analyse a frame and return its messages in publication order
    pub fn process(&mut self, frame: &LandmarkFrame, selection: MonitorSelection) -> Vec<StreamMessage> {
        self.analyze(frame, selection).messages()
    }

    pub fn posture_tracker(&self) -> &ConditionTracker {
        &self.posture_tracker
    }

    pub fn blink_tracker(&self) -> &ConditionTracker {
        &self.blink_tracker
    }

    /// Number of scores currently held in the posture window
    pub fn posture_window_len(&self) -> usize {
        self.smoother.len()
    }

    pub fn posture_window_capacity(&self) -> usize {
        self.smoother.capacity()
    }
}

fn posture_event(transition: Transition) -> AlertEvent {
    match transition {
        Transition::Warning { elapsed_seconds } => {
            info!(elapsed_seconds, "prolonged bad posture");
            AlertEvent::posture_warning(elapsed_seconds)
        }
        Transition::Resolved { reason } => {
            info!(?reason, "bad posture resolved");
            AlertEvent::posture_resolved()
        }
    }
}

fn blink_event(transition: Transition, rate: Option<u32>) -> AlertEvent {
    match transition {
        Transition::Warning { elapsed_seconds } => {
            let rate = rate.unwrap_or_default();
            info!(rate, elapsed_seconds, "prolonged low blink rate");
            AlertEvent::blink_warning(rate, elapsed_seconds)
        }
        Transition::Resolved { reason } => {
            info!(?reason, "low blink rate resolved");
            AlertEvent::blink_resolved(reason, rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EyeContour, FaceLandmarks, Point2, Point3, PoseLandmarks};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(millis: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap() + Duration::milliseconds(millis)
    }

    /// Pose with the nose `neck_deg` degrees off vertical above mid-shoulder
    fn pose(neck_deg: f64) -> PoseLandmarks {
        let rad = neck_deg.to_radians();
        PoseLandmarks {
            nose: Point3::new(320.0 + 100.0 * rad.sin(), 200.0 - 100.0 * rad.cos(), 0.0),
            left_shoulder: Point3::new(370.0, 200.0, 0.0),
            right_shoulder: Point3::new(270.0, 200.0, 0.0),
            left_hip: Point3::new(360.0, 400.0, 0.0),
            right_hip: Point3::new(280.0, 400.0, 0.0),
        }
    }

    fn face(ear: f64) -> FaceLandmarks {
        let width = 30.0;
        let height = ear * width;
        let eye = EyeContour([
            Point2::new(0.0, 0.0),
            Point2::new(10.0, -height / 2.0),
            Point2::new(20.0, -height / 2.0),
            Point2::new(width, 0.0),
            Point2::new(20.0, height / 2.0),
            Point2::new(10.0, height / 2.0),
        ]);
        FaceLandmarks {
            left_eye: eye,
            right_eye: eye,
        }
    }

    fn frame(at: DateTime<Utc>, neck: Option<f64>, ear: Option<f64>) -> LandmarkFrame {
        LandmarkFrame {
            captured_at: at,
            width: 640,
            height: 480,
            pose: neck.map(pose).into(),
            face: ear.map(face).into(),
        }
    }

    fn config(prolonged: f64) -> ErgoConfig {
        let mut config = ErgoConfig::default();
        config.posture.prolonged_seconds = prolonged;
        config.blink.prolonged_seconds = prolonged;
        config
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ErgoConfig::default();
        config.posture.window_seconds = -1.0;
        assert!(FrameAnalyzer::new(&config, None).is_err());
    }

    #[test]
    fn test_window_sized_from_measured_fps() {
        let analyzer = FrameAnalyzer::new(&ErgoConfig::default(), Some(10.0)).unwrap();
        assert_eq!(analyzer.posture_window_capacity(), 30);
        let analyzer = FrameAnalyzer::new(&ErgoConfig::default(), Some(500.0)).unwrap();
        assert_eq!(analyzer.posture_window_capacity(), 90);
    }

    #[test]
    fn test_routine_messages_every_frame() {
        let mut analyzer = FrameAnalyzer::new(&config(60.0), None).unwrap();
        let messages = analyzer.process(&frame(t(0), Some(10.0), Some(0.3)), MonitorSelection::default());
        assert_eq!(
            messages,
            vec![
                StreamMessage::posture(PostureState::Good),
                StreamMessage::blink(Some(0)),
            ]
        );

        let messages = analyzer.process(&frame(t(33), None, None), MonitorSelection::default());
        assert_eq!(
            messages,
            vec![
                StreamMessage::posture(PostureState::Unknown),
                StreamMessage::blink(None),
            ]
        );
    }

    #[test]
    fn test_missing_pose_does_not_push_score() {
        let mut analyzer = FrameAnalyzer::new(&config(60.0), None).unwrap();
        analyzer.analyze(&frame(t(0), Some(70.0), None), MonitorSelection::default());
        let analysis = analyzer.analyze(&frame(t(33), None, None), MonitorSelection::default());
        let posture = analysis.posture.unwrap();
        assert_eq!(posture.state, PostureState::Unknown);
        assert_eq!(posture.metrics, None);
        assert_eq!(analyzer.posture_window_len(), 1);
    }

    #[test]
    fn test_posture_warning_then_resolution() {
        let mut analyzer = FrameAnalyzer::new(&config(2.0), Some(1.0)).unwrap();
        let selection = MonitorSelection {
            posture: true,
            eye_strain: false,
        };

        let mut events = Vec::new();
        for s in 0..=5 {
            let analysis = analyzer.analyze(&frame(t(s * 1000), Some(80.0), None), selection);
            assert!(analysis.blink.is_none());
            events.extend(analysis.events().map(|e| (s, e)));
        }
        assert_eq!(events, vec![(2, AlertEvent::posture_warning(2.0))]);

        // Window of 3 needs two good scores before its mean drops to 1/3
        let mut events = Vec::new();
        for s in 6..=9 {
            let analysis = analyzer.analyze(&frame(t(s * 1000), Some(0.0), None), selection);
            events.extend(analysis.events().map(|e| (s, e)));
        }
        assert_eq!(events, vec![(7, AlertEvent::posture_resolved())]);
    }

    #[test]
    fn test_lost_pose_resolves_posture_warning() {
        let mut analyzer = FrameAnalyzer::new(&config(1.0), Some(1.0)).unwrap();
        let selection = MonitorSelection::default();
        analyzer.analyze(&frame(t(0), Some(85.0), None), selection);
        let analysis = analyzer.analyze(&frame(t(1000), Some(85.0), None), selection);
        assert_eq!(analysis.posture.unwrap().event, Some(AlertEvent::posture_warning(1.0)));

        let analysis = analyzer.analyze(&frame(t(2000), None, None), selection);
        assert_eq!(
            analysis.posture.unwrap().event,
            Some(AlertEvent::posture_resolved())
        );
        assert_eq!(analyzer.posture_tracker().onset(), None);
    }

    #[test]
    fn test_low_blink_rate_warning_and_face_loss() {
        let mut analyzer = FrameAnalyzer::new(&config(2.0), None).unwrap();
        let selection = MonitorSelection::default();

        let mut events = Vec::new();
        for s in 0..=3 {
            let analysis = analyzer.analyze(&frame(t(s * 1000), None, Some(0.3)), selection);
            events.extend(analysis.events());
        }
        assert_eq!(events, vec![AlertEvent::blink_warning(0, 2.0)]);

        let analysis = analyzer.analyze(&frame(t(4000), None, None), selection);
        let blink = analysis.blink.unwrap();
        assert_eq!(blink.rate, None);
        assert_eq!(
            blink.event,
            Some(AlertEvent::blink_resolved(
                crate::tracker::ResolveReason::SignalUnavailable,
                None
            ))
        );
    }

    #[test]
    fn test_blinks_feed_rate() {
        let mut analyzer = FrameAnalyzer::new(&config(60.0), None).unwrap();
        let selection = MonitorSelection::default();
        let ears = [0.30, 0.10, 0.10, 0.30];
        let mut last = None;
        for (i, ear) in ears.iter().enumerate() {
            last = Some(analyzer.analyze(&frame(t(i as i64 * 33), None, Some(*ear)), selection));
        }
        let blink = last.unwrap().blink.unwrap();
        assert_eq!(blink.blink, Some(BlinkEvent { at: t(99) }));
        assert_eq!(blink.rate, Some(1));
    }

    #[test]
    fn test_disabled_monitor_is_skipped() {
        let mut analyzer = FrameAnalyzer::new(&config(1.0), Some(1.0)).unwrap();
        let posture_only = MonitorSelection {
            posture: true,
            eye_strain: false,
        };
        for s in 0..5 {
            let messages = analyzer.process(&frame(t(s * 1000), Some(0.0), Some(0.3)), posture_only);
            assert!(messages.iter().all(|m| !matches!(m, StreamMessage::Blink(_))));
        }
        assert!(!analyzer.blink_tracker().is_active());
        assert_eq!(analyzer.blink_tracker().onset(), None);
    }

    #[test]
    fn test_deselecting_active_monitor_resolves_it() {
        let mut analyzer = FrameAnalyzer::new(&config(1.0), Some(1.0)).unwrap();
        let both = MonitorSelection::default();
        analyzer.analyze(&frame(t(0), Some(85.0), None), both);
        analyzer.analyze(&frame(t(1000), Some(85.0), None), both);
        assert!(analyzer.posture_tracker().is_active());

        let blink_only = MonitorSelection {
            posture: false,
            eye_strain: true,
        };
        let analysis = analyzer.analyze(&frame(t(2000), Some(85.0), None), blink_only);
        assert_eq!(analysis.closed, vec![AlertEvent::posture_resolved()]);
        assert_eq!(
            analysis.messages(),
            vec![
                StreamMessage::blink(None),
                StreamMessage::from(AlertEvent::posture_resolved()),
            ]
        );
        assert!(!analyzer.posture_tracker().is_active());
        assert_eq!(analyzer.posture_window_len(), 0);

        let analysis = analyzer.analyze(&frame(t(3000), Some(85.0), None), blink_only);
        assert!(analysis.closed.is_empty());

        // Re-enabled monitor starts a fresh streak
        let analysis = analyzer.analyze(&frame(t(600_000), Some(85.0), None), both);
        assert_eq!(analysis.posture.unwrap().event, None);
    }

    #[test]
    fn test_reset_drops_streaks_and_windows() {
        let mut analyzer = FrameAnalyzer::new(&config(1.0), Some(1.0)).unwrap();
        let selection = MonitorSelection::default();
        analyzer.analyze(&frame(t(0), Some(85.0), Some(0.3)), selection);
        analyzer.analyze(&frame(t(1000), Some(85.0), Some(0.3)), selection);

        assert_eq!(
            analyzer.reset(),
            vec![
                AlertEvent::posture_resolved(),
                AlertEvent::blink_resolved(crate::tracker::ResolveReason::Cleared, None),
            ]
        );
        assert_eq!(analyzer.posture_window_len(), 0);
        assert!(analyzer.reset().is_empty());

        let analysis = analyzer.analyze(&frame(t(600_000), Some(85.0), Some(0.3)), selection);
        assert!(analysis.events().next().is_none());
    }
}

//! End-to-end scenarios through the public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use synheart_ergo::blink::BlinkDetector;
use synheart_ergo::config::ErgoConfig;
use synheart_ergo::error::DeliveryError;
use synheart_ergo::events::{AlertEvent, StreamMessage, Topic};
use synheart_ergo::schema::{FrameRecord, PoseRecord, RecordFrameSource};
use synheart_ergo::scorer::BadnessScorer;
use synheart_ergo::sink::{BroadcastSink, Subscriber};
use synheart_ergo::tracker::{ConditionSignal, ConditionTracker, Transition};
use synheart_ergo::types::{MonitorSelection, PostureMetrics, PostureState};
use synheart_ergo::{spawn_monitor_thread, MonitorContext};

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap() + Duration::seconds(seconds)
}

/// Normalized pose on a 640x480 frame with the neck `neck_deg` off vertical
fn pose_record(neck_deg: f64) -> PoseRecord {
    let rad = neck_deg.to_radians();
    let norm = |x: f64, y: f64| [x / 640.0, y / 480.0, 0.0];
    PoseRecord {
        nose: norm(320.0 + 100.0 * rad.sin(), 240.0 - 100.0 * rad.cos()),
        left_shoulder: norm(370.0, 240.0),
        right_shoulder: norm(270.0, 240.0),
        left_hip: norm(360.0, 440.0),
        right_hip: norm(280.0, 440.0),
    }
}

#[test]
fn test_neck_seventy_degrees_scores_two_thirds() {
    let config = ErgoConfig::default();
    let scorer = BadnessScorer::new(config.posture.weights, config.posture.limits);
    let metrics = PostureMetrics {
        back_angle: 0.0,
        neck_angle: 70.0,
        head_forward_cm: 0.0,
        shoulder_tilt_deg: 0.0,
    };
    assert!((scorer.score(&metrics) - 2.0 / 3.0).abs() < 1e-3);
}

#[test]
fn test_blink_emitted_on_reopen() {
    let mut detector = BlinkDetector::new(0.23, 2);
    let blinks: Vec<_> = [0.30, 0.10, 0.10, 0.30]
        .iter()
        .enumerate()
        .filter_map(|(i, ear)| detector.update(*ear, t(i as i64)))
        .collect();

    assert_eq!(blinks.len(), 1);
    assert_eq!(blinks[0].at, t(3));
}

#[test]
fn test_prolonged_bad_warns_once_at_threshold() {
    let mut tracker = ConditionTracker::new(2.0);
    let transitions: Vec<_> = (0..=5)
        .filter_map(|s| tracker.update(ConditionSignal::Holds, t(s)).map(|tr| (s, tr)))
        .collect();

    assert_eq!(
        transitions,
        vec![(2, Transition::Warning { elapsed_seconds: 2.0 })]
    );
}

#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<StreamMessage>>,
}

impl Subscriber for Recorder {
    fn deliver(&self, message: &StreamMessage) -> Result<(), DeliveryError> {
        self.received.lock().unwrap().push(*message);
        Ok(())
    }
}

#[derive(Default)]
struct FailsOnce {
    failed: AtomicBool,
}

impl Subscriber for FailsOnce {
    fn deliver(&self, _message: &StreamMessage) -> Result<(), DeliveryError> {
        if self.failed.swap(true, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeliveryError::Closed)
        }
    }
}

#[test]
fn test_failing_subscriber_dropped_others_keep_receiving() {
    let sink = BroadcastSink::new();
    let a = Arc::new(Recorder::default());
    sink.subscribe(&Topic::ALL, a.clone());
    let b = sink.subscribe(&Topic::ALL, Arc::new(FailsOnce::default()));

    let report = sink.broadcast(&StreamMessage::posture(PostureState::Good));
    assert_eq!(report.removed, vec![b]);
    assert!(!sink.contains(b));

    sink.broadcast(&StreamMessage::posture(PostureState::Bad));
    sink.broadcast(&StreamMessage::blink(Some(12)));
    assert_eq!(a.received.lock().unwrap().len(), 3);
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_recorded_session_emits_warning_and_resolution() {
    let mut config = ErgoConfig::default();
    config.posture.prolonged_seconds = 2.0;

    // Six seconds slouched, then upright
    let records: Vec<FrameRecord> = (0..10)
        .map(|s| {
            let neck = if s < 6 { 72.0 } else { 0.0 };
            FrameRecord::new(t(s), 640, 480).with_pose(pose_record(neck))
        })
        .collect();

    let ctx = Arc::new(MonitorContext::new());
    let (_, mut events) = ctx.sink().subscribe_channel(&[Topic::Events], 16);
    let (_, mut postures) = ctx.sink().subscribe_channel(&[Topic::Posture], 16);
    ctx.start(MonitorSelection {
        posture: true,
        eye_strain: false,
    });

    let handle =
        spawn_monitor_thread(ctx.clone(), RecordFrameSource::new(records), &config).unwrap();
    handle.join().unwrap().unwrap();

    let mut received = Vec::new();
    while let Ok(message) = events.try_recv() {
        received.push(message);
    }
    assert_eq!(
        received,
        vec![
            StreamMessage::from(AlertEvent::posture_warning(2.0)),
            StreamMessage::from(AlertEvent::posture_resolved()),
        ]
    );

    let mut posture_updates = 0;
    while postures.try_recv().is_ok() {
        posture_updates += 1;
    }
    assert_eq!(posture_updates, 10);

    let stopped = ctx.stop().unwrap();
    assert_eq!(stopped.summary.frames_analyzed, 10);
    assert_eq!(stopped.summary.bad_posture_frames, 8);
    assert_eq!(stopped.summary.posture_warnings, 1);
    assert_eq!(stopped.summary.blink_warnings, 0);
}

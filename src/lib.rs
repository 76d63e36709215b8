//! Synheart Ergo - On-device ergonomics engine for posture and eye strain
//!
//! Ergo turns per-frame body-pose and face landmarks into posture and
//! blink-rate signals through a deterministic pipeline: geometry extraction →
//! badness scoring → temporal smoothing → prolonged-condition tracking →
//! stream messages.
//!
//! ## Modules
//!
//! - **Frame analysis**: `FrameAnalyzer` scores one frame at a time and owns all temporal state
//! - **Monitoring**: `AnalysisLoop` drives a `FrameSource` behind a recording gate and
//!   broadcasts results to topic subscribers

pub mod blink;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod geometry;
pub mod monitor;
pub mod pipeline;
pub mod schema;
pub mod scorer;
pub mod sink;
pub mod smoother;
pub mod tracker;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::ErgoConfig;
pub use context::{MonitorContext, RecordingGate, SessionStarted, SessionStopped, SessionSummary};
pub use error::{DeliveryError, ErgoError, FrameError};
pub use events::{AlertEvent, StreamMessage, Topic};
pub use monitor::{spawn_monitor_thread, AnalysisLoop, FrameSource};
pub use pipeline::{FrameAnalysis, FrameAnalyzer};
pub use sink::{BroadcastSink, Subscriber, SubscriberId};
pub use types::{LandmarkFrame, MonitorSelection, PostureState};

// Schema exports
pub use schema::{FrameRecord, FrameRecordAdapter, NdjsonFrameSource, SCHEMA_VERSION};

/// Ergo version reported by the CLI and FFI
pub const ERGO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-ergo";

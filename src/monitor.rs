//! Analysis loop
//!
//! Drives frames from a `FrameSource` through the `FrameAnalyzer` and publishes
//! the results on the context's broadcast sink.
//!
//! The loop suspends only at three points: waiting on the recording gate,
//! waiting after a transient acquisition failure, and the yield at the end of
//! each iteration. Metric computation itself is synchronous.

use crate::config::ErgoConfig;
use crate::context::MonitorContext;
use crate::error::{ErgoError, FrameError};
use crate::events::StreamMessage;
use crate::pipeline::{FrameAnalysis, FrameAnalyzer};
use crate::types::LandmarkFrame;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Producer of landmark frames (camera plus landmark model, or a recording)
pub trait FrameSource: Send {
    /// Frame rate reported by the device, if known
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Check the device can deliver frames. Called once before the loop starts.
    fn ensure_ready(&mut self) -> Result<(), FrameError> {
        Ok(())
    }

    /// Acquire the next frame; `Ok(None)` when a finite source is exhausted
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>, FrameError>;
}

/// What one loop iteration did
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A frame was analysed and its messages published
    Analyzed(FrameAnalysis),
    /// Acquisition failed transiently; the frame was skipped
    Retried,
    /// The source has no more frames
    Exhausted,
}

/// Long-lived loop bound to one frame source
pub struct AnalysisLoop<S> {
    ctx: Arc<MonitorContext>,
    source: S,
    analyzer: FrameAnalyzer,
    generation: u64,
    gate_poll: Duration,
    retry_delay: Duration,
}

impl<S: FrameSource> AnalysisLoop<S> {
    /// Prepare the loop. Fails if the configuration is invalid or the source is not ready.
    pub fn new(ctx: Arc<MonitorContext>, mut source: S, config: &ErgoConfig) -> Result<Self, ErgoError> {
        config.validate()?;
        source
            .ensure_ready()
            .map_err(|e| ErgoError::CameraUnavailable(e.to_string()))?;

        let frame_rate = source.frame_rate();
        let analyzer = FrameAnalyzer::new(config, frame_rate)?;
        info!(?frame_rate, "analysis loop ready");

        Ok(Self {
            generation: ctx.generation(),
            ctx,
            source,
            analyzer,
            gate_poll: Duration::from_millis(config.monitor.gate_poll_ms),
            retry_delay: Duration::from_millis(config.monitor.retry_delay_ms),
        })
    }

    /// Run one iteration: gate wait, acquisition, analysis, publication, yield
    pub async fn step(&mut self) -> Result<Step, ErgoError> {
        let gate = self.ctx.gate();
        if !gate.is_open() {
            info!("analysis paused");
            gate.wait_open(self.gate_poll).await;
            info!("analysis resumed");
        }
        self.follow_session();

        let step = match self.source.next_frame() {
            Ok(Some(frame)) => Step::Analyzed(self.publish(&frame)),
            Ok(None) => {
                info!("frame source exhausted");
                return Ok(Step::Exhausted);
            }
            Err(FrameError::Transient(reason)) => {
                warn!(%reason, "frame acquisition failed, retrying");
                tokio::time::sleep(self.retry_delay).await;
                Step::Retried
            }
            Err(FrameError::Disconnected(reason)) => {
                return Err(ErgoError::CameraUnavailable(reason));
            }
        };

        tokio::task::yield_now().await;
        Ok(step)
    }

    /// Drop temporal state carried over from an earlier session
    fn follow_session(&mut self) {
        let generation = self.ctx.generation();
        if generation == self.generation {
            return;
        }
        self.generation = generation;

        let resolved: Vec<StreamMessage> = self
            .analyzer
            .reset()
            .into_iter()
            .map(StreamMessage::from)
            .collect();
        info!(generation, resolved = resolved.len(), "new session, analyzer state reset");
        if !resolved.is_empty() {
            self.ctx.sink().broadcast_all(&resolved);
        }
    }

    fn publish(&mut self, frame: &LandmarkFrame) -> FrameAnalysis {
        let analysis = self.analyzer.analyze(frame, self.ctx.selection());
        self.ctx.record(&analysis);

        let report = self.ctx.sink().broadcast_all(&analysis.messages());
        debug!(
            captured_at = %analysis.captured_at,
            delivered = report.delivered,
            "frame published"
        );
        analysis
    }

    /// Run until the source is exhausted or disconnects
    pub async fn run(mut self) -> Result<(), ErgoError> {
        loop {
            if self.step().await? == Step::Exhausted {
                return Ok(());
            }
        }
    }

    pub fn analyzer(&self) -> &FrameAnalyzer {
        &self.analyzer
    }
}

/// Start the loop on its own thread with a dedicated current-thread runtime.
///
/// Source readiness is checked on the calling thread, so an unavailable camera
/// is reported here rather than from the thread.
pub fn spawn_monitor_thread<S>(
    ctx: Arc<MonitorContext>,
    source: S,
    config: &ErgoConfig,
) -> Result<JoinHandle<Result<(), ErgoError>>, ErgoError>
where
    S: FrameSource + 'static,
{
    let analysis_loop = AnalysisLoop::new(ctx, source, config)?;
    thread::Builder::new()
        .name("ergo-monitor".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(|e| ErgoError::Runtime(e.to_string()))?;
            runtime.block_on(analysis_loop.run())
        })
        .map_err(|e| ErgoError::Runtime(e.to_string()))
}

mod ledger;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub use ledger::RetainedBuffers;

use crate::common::{Error, Result};
use crate::config::PipelineConfig;
use crate::frame::{Frame, FrameWindow};
use crate::motion::{DetectionResult, MotionEvaluator};
use crate::pool::{BufferId, PooledBuffer};
use crate::renderer::FilterRenderer;

/// Receives every filtered frame, in order, before the next one renders.
pub trait DisplaySink: Send + 'static {
    fn present(&self, buffer: &PooledBuffer);
}

impl<F> DisplaySink for F
where
    F: Fn(&PooledBuffer) + Send + 'static,
{
    fn present(&self, buffer: &PooledBuffer) {
        self(buffer)
    }
}

/// Receives detection results from the detection context.
pub trait MotionAlertSink: Send + Sync + 'static {
    fn on_detection(&self, buffer: BufferId, result: &DetectionResult);
}

impl<F> MotionAlertSink for F
where
    F: Fn(BufferId, &DetectionResult) + Send + Sync + 'static,
{
    fn on_detection(&self, buffer: BufferId, result: &DetectionResult) {
        self(buffer, result)
    }
}

#[derive(Debug)]
pub enum PipelineMessage {
    Frame(Frame),
    SetRenderingEnabled(bool),
    /// Tears the renderer down; the next frame starts a new warm-up.
    Reset,
    Exit,
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub warmup_frames: u64,
    pub frames_rendered: u64,
    pub dropped_disabled: u64,
    pub dropped_errors: u64,
    pub detections_completed: u64,
    pub motion_detections: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    frames_received: AtomicU64,
    warmup_frames: AtomicU64,
    frames_rendered: AtomicU64,
    dropped_disabled: AtomicU64,
    dropped_errors: AtomicU64,
    detections_completed: AtomicU64,
    motion_detections: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            warmup_frames: self.warmup_frames.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            dropped_disabled: self.dropped_disabled.load(Ordering::Relaxed),
            dropped_errors: self.dropped_errors.load(Ordering::Relaxed),
            detections_completed: self.detections_completed.load(Ordering::Relaxed),
            motion_detections: self.motion_detections.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable, non-blocking handle for delivering frames to the pipeline.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: UnboundedSender<PipelineMessage>,
}

impl FrameSender {
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(PipelineMessage::Frame(frame))
            .map_err(|_| Error::PipelineClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Runs the frame pipeline on a tokio task.
///
/// Frames are handled one at a time in arrival order: window shift, render,
/// display. Motion detection runs on the blocking pool so it never delays
/// the next frame.
#[derive(Debug)]
pub struct FramePipelineController {
    task_handle: Option<JoinHandle<()>>,
    tx: UnboundedSender<PipelineMessage>,
    stats: Arc<StatsCounters>,
    ledger: RetainedBuffers,
}

impl FramePipelineController {
    /// Spawns the pipeline task. Must be called within a tokio runtime.
    pub fn spawn<R, D, A>(renderer: R, display: D, alerts: A, config: &PipelineConfig) -> Self
    where
        R: FilterRenderer + 'static,
        D: DisplaySink,
        A: MotionAlertSink,
    {
        let (tx, rx) = unbounded_channel::<PipelineMessage>();
        let stats = Arc::new(StatsCounters::default());
        let ledger = RetainedBuffers::new();

        let worker = PipelineWorker {
            renderer: Box::new(renderer),
            display: Box::new(display),
            alerts: Arc::new(alerts),
            evaluator: MotionEvaluator::new(config.motion_threshold, config.sample_stride),
            retained_hint: config.retained_buffer_hint,
            window: FrameWindow::default(),
            rendering_enabled: true,
            detections: JoinSet::new(),
            ledger: ledger.clone(),
            stats: Arc::clone(&stats),
        };

        let task_handle = tokio::spawn(async move {
            worker.run(rx).await;
        });

        Self {
            task_handle: Some(task_handle),
            tx,
            stats,
            ledger,
        }
    }

    pub fn send(&self, msg: PipelineMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::PipelineClosed)
    }

    pub fn frame_sender(&self) -> FrameSender {
        FrameSender {
            tx: self.tx.clone(),
        }
    }

    pub fn submit_frame(&self, frame: Frame) -> Result<()> {
        self.send(PipelineMessage::Frame(frame))
    }

    /// Pausing drops frames before any GPU work; prepared resources are kept.
    pub fn set_rendering_enabled(&self, enabled: bool) -> Result<()> {
        self.send(PipelineMessage::SetRenderingEnabled(enabled))
    }

    pub fn reset(&self) -> Result<()> {
        self.send(PipelineMessage::Reset)
    }

    /// Stops the pipeline after the queued messages and waits for in-flight
    /// detections.
    pub async fn exit(&mut self) {
        // the task may already be gone; the handle tells us either way
        let _ = self.tx.send(PipelineMessage::Exit);

        if let Some(task_handle) = self.task_handle.take() {
            if let Err(err) = task_handle.await {
                error!("pipeline task failed: {}", err);
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Output buffers still waiting on their detection pass.
    pub fn in_flight(&self) -> usize {
        self.ledger.len()
    }
}

impl Drop for FramePipelineController {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            error!("pipeline controller dropped while its task is running; call exit() first");
        }
    }
}

struct PipelineWorker {
    renderer: Box<dyn FilterRenderer>,
    display: Box<dyn DisplaySink>,
    alerts: Arc<dyn MotionAlertSink>,
    evaluator: MotionEvaluator,
    retained_hint: usize,
    window: FrameWindow,
    rendering_enabled: bool,
    detections: JoinSet<()>,
    ledger: RetainedBuffers,
    stats: Arc<StatsCounters>,
}

impl PipelineWorker {
    async fn run(mut self, mut rx: UnboundedReceiver<PipelineMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                PipelineMessage::Exit => break,
                PipelineMessage::Frame(frame) => self.handle_frame(frame),
                PipelineMessage::SetRenderingEnabled(enabled) => {
                    debug!("rendering enabled: {}", enabled);
                    self.rendering_enabled = enabled;
                }
                PipelineMessage::Reset => {
                    self.window.clear();
                    self.renderer.reset();
                }
            }

            self.reap_detections();
        }

        while let Some(result) = self.detections.join_next().await {
            log_join_error(result);
        }
        self.renderer.reset();
    }

    fn handle_frame(&mut self, frame: Frame) {
        StatsCounters::bump(&self.stats.frames_received);

        if let Some(current) = self.window.current() {
            if current.format() != frame.format() {
                debug!(
                    "frame format changed from {} to {}, restarting",
                    current.format(),
                    frame.format()
                );
                self.window.clear();
                self.renderer.reset();
            }
        }

        let Some((previous, current)) = self.window.push(frame) else {
            StatsCounters::bump(&self.stats.warmup_frames);
            return;
        };

        if !self.rendering_enabled {
            StatsCounters::bump(&self.stats.dropped_disabled);
            return;
        }

        if self.renderer.input_format() != Some(current.format()) {
            if let Err(err) = self.renderer.prepare(current.format(), self.retained_hint) {
                warn!("unable to prepare {}: {}", self.renderer.description(), err);
                StatsCounters::bump(&self.stats.dropped_errors);
                return;
            }
        }

        let output = match self.renderer.render(&previous, &current) {
            Ok(output) => output,
            Err(err) => {
                warn!("unable to filter frame {:?}: {}", current.id(), err);
                StatsCounters::bump(&self.stats.dropped_errors);
                return;
            }
        };
        StatsCounters::bump(&self.stats.frames_rendered);

        self.spawn_detection(output.clone());
        self.display.present(&output);
    }

    fn spawn_detection(&mut self, buffer: PooledBuffer) {
        self.ledger.retain(&buffer);

        let evaluator = self.evaluator;
        let alerts = Arc::clone(&self.alerts);
        let ledger = self.ledger.clone();
        let stats = Arc::clone(&self.stats);

        self.detections.spawn_blocking(move || {
            let id = buffer.id();
            match evaluator.detect(&buffer) {
                Ok(result) => {
                    StatsCounters::bump(&stats.detections_completed);
                    if result.detected {
                        StatsCounters::bump(&stats.motion_detections);
                        info!("motion detected in buffer {}: {:?}", id, result.evidence);
                    }
                    alerts.on_detection(id, &result);
                }
                Err(err) => warn!("motion detection failed for buffer {}: {}", id, err),
            }

            drop(buffer);
            ledger.release(id);
        });
    }

    fn reap_detections(&mut self) {
        while let Some(result) = self.detections.try_join_next() {
            log_join_error(result);
        }
    }
}

fn log_join_error(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        error!("detection task failed: {}", err);
    }
}

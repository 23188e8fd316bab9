//! Capture session setup and frame delivery.
//!
//! A [`CaptureSource`] stands in for the camera. [`CaptureSession`] checks
//! access, opens the device and then pulls frames on a dedicated thread,
//! handing each one to the pipeline without waiting for it to be processed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::common::{Error, FormatDescriptor, Result};
use crate::controller::FrameSender;
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    NotDetermined,
    Denied,
}

/// Terminal outcome of session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupResult {
    Success,
    NotAuthorized,
    ConfigurationFailed,
}

pub trait CaptureSource: Send + 'static {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Prompts for access. Only called while the status is `NotDetermined`.
    fn request_access(&mut self) -> bool;

    /// Opens the default device and returns the format it will deliver.
    fn open(&mut self) -> Result<FormatDescriptor>;

    /// Blocks until the next frame. `None` ends delivery.
    fn next_frame(&mut self) -> Option<Frame>;
}

#[derive(Debug)]
struct Delivery<S> {
    running: Arc<AtomicBool>,
    thread: JoinHandle<S>,
}

#[derive(Debug)]
pub struct CaptureSession<S: CaptureSource> {
    source: Option<S>,
    setup_result: SetupResult,
    failure: Option<String>,
    format: Option<FormatDescriptor>,
    delivery: Option<Delivery<S>>,
}

impl<S: CaptureSource> CaptureSession<S> {
    /// Resolves access and opens the source. The result is final: a session
    /// that failed here never delivers frames.
    pub fn configure(mut source: S) -> Self {
        let authorized = match source.authorization_status() {
            AuthorizationStatus::Authorized => true,
            AuthorizationStatus::NotDetermined => source.request_access(),
            AuthorizationStatus::Denied => false,
        };

        if !authorized {
            tracing::error!("capture not authorized");
            return Self::failed(source, SetupResult::NotAuthorized, None);
        }

        match source.open() {
            Ok(format) => {
                tracing::info!("capture session configured for {}", format);
                Self {
                    source: Some(source),
                    setup_result: SetupResult::Success,
                    failure: None,
                    format: Some(format),
                    delivery: None,
                }
            }
            Err(err) => {
                tracing::error!("capture session configuration failed: {}", err);
                Self::failed(source, SetupResult::ConfigurationFailed, Some(err.to_string()))
            }
        }
    }

    fn failed(source: S, setup_result: SetupResult, failure: Option<String>) -> Self {
        Self {
            source: Some(source),
            setup_result,
            failure,
            format: None,
            delivery: None,
        }
    }

    pub fn setup_result(&self) -> SetupResult {
        self.setup_result
    }

    pub fn format(&self) -> Option<&FormatDescriptor> {
        self.format.as_ref()
    }

    /// Starts the capture-delivery thread feeding `sender`.
    pub fn run(&mut self, sender: FrameSender) -> Result<()> {
        match self.setup_result {
            SetupResult::Success => {}
            SetupResult::NotAuthorized => return Err(Error::NotAuthorized),
            SetupResult::ConfigurationFailed => {
                return Err(Error::CaptureInput(
                    self.failure
                        .clone()
                        .unwrap_or_else(|| "configuration failed".to_string()),
                ))
            }
        }

        if self.delivery.is_some() {
            return Ok(());
        }
        let Some(mut source) = self.source.take() else {
            return Err(Error::NoCaptureDevice);
        };

        let running = Arc::new(AtomicBool::new(true));
        let thread = std::thread::Builder::new()
            .name("capture-delivery".to_string())
            .spawn({
                let running = Arc::clone(&running);
                move || {
                    while running.load(Ordering::Acquire) {
                        let Some(frame) = source.next_frame() else {
                            tracing::debug!("capture source exhausted");
                            break;
                        };
                        if sender.send(frame).is_err() {
                            tracing::debug!("pipeline closed, stopping capture");
                            break;
                        }
                    }
                    running.store(false, Ordering::Release);
                    source
                }
            })?;

        self.delivery = Some(Delivery { running, thread });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.delivery
            .as_ref()
            .is_some_and(|d| d.running.load(Ordering::Acquire) && !d.thread.is_finished())
    }

    /// Stops delivery and waits for the thread. The session can be run again.
    pub fn stop(&mut self) {
        let Some(delivery) = self.delivery.take() else {
            return;
        };
        delivery.running.store(false, Ordering::Release);
        match delivery.thread.join() {
            Ok(source) => self.source = Some(source),
            Err(_) => tracing::error!("capture-delivery thread panicked"),
        }
    }
}

impl<S: CaptureSource> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture source producing a bright square sliding over a dark
/// background. Useful for demos and tests without a camera.
#[derive(Debug, Clone)]
pub struct SyntheticCaptureSource {
    format: FormatDescriptor,
    authorization: AuthorizationStatus,
    grant_on_request: bool,
    device_present: bool,
    square_size: u32,
    step: u32,
    frame_limit: Option<usize>,
    interval: Duration,
    produced: usize,
}

impl SyntheticCaptureSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            format: FormatDescriptor::bgra(width, height),
            authorization: AuthorizationStatus::Authorized,
            grant_on_request: true,
            device_present: true,
            square_size: (width.min(height) / 4).max(1),
            step: (width / 8).max(1),
            frame_limit: None,
            interval: Duration::ZERO,
            produced: 0,
        }
    }

    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Square moves `step` pixels per frame; zero keeps it still.
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    pub fn with_authorization(mut self, status: AuthorizationStatus, grant_on_request: bool) -> Self {
        self.authorization = status;
        self.grant_on_request = grant_on_request;
        self
    }

    pub fn without_device(mut self) -> Self {
        self.device_present = false;
        self
    }

    fn render(&self, index: usize) -> Result<Frame> {
        let FormatDescriptor { width, height, .. } = self.format;
        let span = width.saturating_sub(self.square_size).max(1);
        let left = (index as u64 * self.step as u64 % span as u64) as u32;
        let top = height.saturating_sub(self.square_size) / 2;

        let mut bytes = vec![0u8; self.format.size_in_bytes()];
        for (y, row) in bytes.chunks_exact_mut(self.format.row_bytes()).enumerate() {
            let y = y as u32;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u32;
                let inside = (left..left + self.square_size).contains(&x)
                    && (top..top + self.square_size).contains(&y);
                let v = if inside { 235 } else { 24 };
                px.copy_from_slice(&[v, v, v, 255]);
            }
        }

        Frame::new(self.format, bytes)
    }
}

impl CaptureSource for SyntheticCaptureSource {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization
    }

    fn request_access(&mut self) -> bool {
        self.authorization = if self.grant_on_request {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        self.grant_on_request
    }

    fn open(&mut self) -> Result<FormatDescriptor> {
        if !self.device_present {
            return Err(Error::NoCaptureDevice);
        }
        if self.format.is_empty() {
            return Err(Error::CaptureInput(format!("cannot capture {}", self.format)));
        }
        Ok(self.format)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }

        match self.render(self.produced) {
            Ok(frame) => {
                self.produced += 1;
                Some(frame)
            }
            Err(err) => {
                tracing::error!("synthetic frame generation failed: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::controller::FramePipelineController;
    use crate::kernel::DifferenceKernel;
    use crate::renderer::{MotionDetectRenderer, RenderBackend};

    #[test]
    fn authorized_source_configures() {
        let session = CaptureSession::configure(SyntheticCaptureSource::new(16, 8));
        assert_eq!(session.setup_result(), SetupResult::Success);
        assert_eq!(session.format(), Some(&FormatDescriptor::bgra(16, 8)));
    }

    #[test]
    fn access_request_decides_authorization() {
        let granted = SyntheticCaptureSource::new(4, 4)
            .with_authorization(AuthorizationStatus::NotDetermined, true);
        assert_eq!(
            CaptureSession::configure(granted).setup_result(),
            SetupResult::Success
        );

        let refused = SyntheticCaptureSource::new(4, 4)
            .with_authorization(AuthorizationStatus::NotDetermined, false);
        assert_eq!(
            CaptureSession::configure(refused).setup_result(),
            SetupResult::NotAuthorized
        );
    }

    #[test]
    fn missing_device_fails_configuration() {
        let session = CaptureSession::configure(SyntheticCaptureSource::new(4, 4).without_device());
        assert_eq!(session.setup_result(), SetupResult::ConfigurationFailed);
        assert_eq!(session.format(), None);
    }

    #[test]
    fn synthetic_frames_move() {
        let mut source = SyntheticCaptureSource::new(32, 16).with_frame_limit(2);
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert!(source.next_frame().is_none());
        assert_ne!(a.bytes(), b.bytes());
    }

    #[tokio::test]
    async fn failed_sessions_never_deliver() {
        let renderer = MotionDetectRenderer::new(RenderBackend::Cpu, DifferenceKernel::default());
        let mut controller = FramePipelineController::spawn(
            renderer,
            |_: &crate::pool::PooledBuffer| {},
            |_: crate::pool::BufferId, _: &crate::motion::DetectionResult| {},
            &PipelineConfig::default(),
        );

        let denied = SyntheticCaptureSource::new(8, 8)
            .with_authorization(AuthorizationStatus::Denied, false);
        let mut session = CaptureSession::configure(denied);
        assert!(matches!(
            session.run(controller.frame_sender()),
            Err(Error::NotAuthorized)
        ));

        let mut session = CaptureSession::configure(SyntheticCaptureSource::new(8, 8).without_device());
        assert!(matches!(
            session.run(controller.frame_sender()),
            Err(Error::CaptureInput(_))
        ));
        assert!(!session.is_running());

        controller.exit().await;
        assert_eq!(controller.stats().frames_received, 0);
    }

    #[tokio::test]
    async fn session_feeds_pipeline_until_source_ends() {
        let renderer = MotionDetectRenderer::new(RenderBackend::Cpu, DifferenceKernel::default());
        let mut controller = FramePipelineController::spawn(
            renderer,
            |_: &crate::pool::PooledBuffer| {},
            |_: crate::pool::BufferId, _: &crate::motion::DetectionResult| {},
            &PipelineConfig::default(),
        );

        let source = SyntheticCaptureSource::new(64, 48).with_frame_limit(6);
        let mut session = CaptureSession::configure(source);
        session.run(controller.frame_sender()).unwrap();

        while session.is_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        session.stop();
        controller.exit().await;

        let stats = controller.stats();
        assert_eq!(stats.frames_received, 6);
        assert_eq!(stats.warmup_frames, 1);
        assert_eq!(stats.frames_rendered, 5);
        assert_eq!(stats.detections_completed, 5);
    }
}

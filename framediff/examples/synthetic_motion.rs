//! Runs the frame pipeline on a synthetic moving square and logs every
//! motion alert.
//!
//! Usage: cargo run -p framediff --example synthetic_motion [config.yaml]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framediff::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load_or_default(path),
        None => PipelineConfig::default(),
    };
    config.validate()?;
    common::log_setup::setup_logging(&config.log_level);

    let backend = RenderBackend::from_preference(config.backend)?;
    let renderer = MotionDetectRenderer::from_config(backend, &config);
    tracing::info!("renderer: {}", renderer.description());

    let presented = Arc::new(AtomicUsize::new(0));
    let display = {
        let presented = Arc::clone(&presented);
        move |_: &PooledBuffer| {
            presented.fetch_add(1, Ordering::Relaxed);
        }
    };
    let alerts = |id: BufferId, result: &DetectionResult| {
        if result.detected {
            tracing::info!(
                "motion in {}: {} changed samples, evidence {:?}",
                id,
                result.changed_samples,
                result.evidence
            );
        }
    };

    let mut controller = FramePipelineController::spawn(renderer, display, alerts, &config);

    let source = SyntheticCaptureSource::new(320, 240)
        .with_frame_limit(60)
        .with_interval(Duration::from_millis(5));
    let mut session = CaptureSession::configure(source);
    match session.setup_result() {
        SetupResult::Success => {}
        SetupResult::NotAuthorized => tracing::error!("not authorized"),
        SetupResult::ConfigurationFailed => tracing::error!("configuration failed"),
    }
    session.run(controller.frame_sender())?;

    // pause halfway through to show frames being dropped
    tokio::time::sleep(Duration::from_millis(120)).await;
    controller.set_rendering_enabled(false)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.set_rendering_enabled(true)?;

    while session.is_running() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.stop();
    controller.exit().await;

    let stats = controller.stats();
    tracing::info!(
        "received {}, rendered {}, presented {}, paused drops {}, errors {}, motion {}",
        stats.frames_received,
        stats.frames_rendered,
        presented.load(Ordering::Relaxed),
        stats.dropped_disabled,
        stats.dropped_errors,
        stats.motion_detections
    );

    Ok(())
}

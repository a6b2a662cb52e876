use crate::camera::FrameSource;
use crate::error::{OfficecamError, Result, TrackerError};
use crate::frame::{Frame, FrameProcessor};
use crate::preview::{PreviewHub, StageArtifacts};
use crate::report::Reporter;
use crate::slot_queue::SlotQueue;
use crate::tracker::{DetectionResult, Tracker};
use crate::watchdog::ActivityClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Pause after a non-transient capture error before retrying
const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Pull frames from the source into the frame queue until cancelled.
///
/// Capture failures are logged and retried; they never end the loop.
pub(super) async fn capture_loop(
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    queue: Arc<SlotQueue<Frame>>,
    capture_timeout: Duration,
    running: CancellationToken,
) {
    let mut source = source.lock().await;
    // Outer bound in case a source ignores its own timeout
    let guard = capture_timeout.saturating_mul(2);
    let mut consecutive_failures: u32 = 0;

    info!("Capture loop started ({})", source.name());

    while !running.is_cancelled() {
        let captured = tokio::select! {
            _ = running.cancelled() => break,
            captured = tokio::time::timeout(guard, source.capture_frame(capture_timeout)) => captured,
        };

        match captured {
            Ok(Ok(frame)) => {
                if consecutive_failures > 0 {
                    info!(
                        "Capture recovered after {} failed attempts",
                        consecutive_failures
                    );
                    consecutive_failures = 0;
                }
                let frame_id = frame.id;
                if !queue.push(frame) {
                    trace!("Frame queue busy, dropped frame {}", frame_id);
                }
            }
            Ok(Err(e)) => {
                consecutive_failures += 1;
                warn!(
                    "Frame capture failed ({} in a row): {}",
                    consecutive_failures, e
                );
                if !e.is_transient() {
                    tokio::time::sleep(CAPTURE_ERROR_BACKOFF).await;
                }
            }
            Err(_) => {
                consecutive_failures += 1;
                warn!(
                    "Frame capture did not return within {:?} ({} in a row)",
                    guard, consecutive_failures
                );
            }
        }
    }

    info!("Capture loop stopped");
}

/// Everything the processing loop owns or shares
pub(super) struct ProcessingContext {
    pub queue: Arc<SlotQueue<Frame>>,
    pub tracker: Arc<parking_lot::Mutex<Box<dyn Tracker>>>,
    pub reporter: Reporter,
    pub preview: Arc<PreviewHub>,
    pub activity: Arc<ActivityClock>,
    pub downscaled_resolution: (u32, u32),
    pub pop_timeout: Duration,
}

/// Consume frames: downscale, track, record the count, mirror to preview, report.
pub(super) async fn processing_loop(mut ctx: ProcessingContext, running: CancellationToken) {
    info!("Processing loop started");

    while !running.is_cancelled() {
        let frame = tokio::select! {
            _ = running.cancelled() => break,
            frame = ctx.queue.pop(ctx.pop_timeout) => frame,
        };

        let Some(frame) = frame else {
            continue;
        };

        // A popped frame is progress even if tracking it fails
        ctx.activity.touch();
        process_frame(&mut ctx, frame).await;
    }

    info!("Processing loop stopped");
}

async fn process_frame(ctx: &mut ProcessingContext, frame: Frame) {
    let frame_id = frame.id;

    let (downscaled, detection) =
        match track(Arc::clone(&ctx.tracker), frame.clone(), ctx.downscaled_resolution).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Skipping frame {}: {}", frame_id, e);
                return;
            }
        };

    let count = detection.count();
    debug!("Frame {} tracked, {} people", frame_id, count);
    ctx.reporter.record(count);

    ctx.preview.offer(&StageArtifacts {
        captured: frame.clone(),
        downscaled,
        annotated: detection.annotated,
    });

    // The send runs detached; its outcome is only logged
    let _ = ctx.reporter.submit(&frame);
}

/// Downscale and track on the blocking pool
async fn track(
    tracker: Arc<parking_lot::Mutex<Box<dyn Tracker>>>,
    frame: Frame,
    size: (u32, u32),
) -> Result<(Frame, DetectionResult)> {
    tokio::task::spawn_blocking(move || -> Result<(Frame, DetectionResult)> {
        let downscaled = FrameProcessor::downscale(&frame, size)?;
        let detection = tracker.lock().track(&downscaled)?;
        Ok((downscaled, detection))
    })
    .await
    .map_err(|e| {
        error!("Tracker task failed: {}", e);
        OfficecamError::from(TrackerError::Worker {
            details: e.to_string(),
        })
    })?
}

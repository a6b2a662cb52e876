use super::debounce::Debouncer;
use super::estimate::estimate_occupancy;
use super::sink::{ReportPayload, ReportSink};
use crate::frame::{Frame, FrameProcessor};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Accumulates per-frame counts and emits a debounced occupancy report.
///
/// Owned by the processing loop. Sending happens on a spawned task so the
/// loop never waits on the network.
pub struct Reporter {
    sink: Option<Arc<dyn ReportSink>>,
    debouncer: Debouncer,
    window: Vec<u32>,
    jpeg_quality: u8,
}

impl Reporter {
    pub fn new(sink: Option<Arc<dyn ReportSink>>, interval: Duration, jpeg_quality: u8) -> Self {
        if sink.is_none() {
            info!("No core URL configured, occupancy reporting is disabled");
        }

        Self {
            sink,
            debouncer: Debouncer::new(interval),
            window: Vec::new(),
            jpeg_quality,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Append one frame's people count to the window
    pub fn record(&mut self, count: u32) {
        self.window.push(count);
    }

    pub fn window(&self) -> &[u32] {
        &self.window
    }

    /// Report if the debounce interval has elapsed.
    ///
    /// The window is always emptied when the interval elapses, even when
    /// reporting is disabled. Returns the handle of the spawned send, if any.
    pub fn submit(&mut self, frame: &Frame) -> Option<JoinHandle<()>> {
        let window = &mut self.window;
        let estimate = self
            .debouncer
            .try_run(|| {
                let estimate = estimate_occupancy(window);
                debug!(
                    "Report window of {} counts gives estimate {}",
                    window.len(),
                    estimate
                );
                window.clear();
                estimate
            })?;

        let sink = Arc::clone(self.sink.as_ref()?);
        let frame = frame.clone();
        let quality = self.jpeg_quality;

        Some(tokio::spawn(async move {
            // Without a snapshot the count still goes out as a plain report
            let snapshot = if estimate > 0 {
                encode_snapshot(frame, quality).await
            } else {
                None
            };

            if estimate > 0 {
                info!("People detected, count = {}", estimate);
            }

            if let Err(e) = sink.send(ReportPayload::new(estimate, snapshot)).await {
                warn!("Failed to send occupancy report: {}", e);
            }
        }))
    }
}

async fn encode_snapshot(frame: Frame, quality: u8) -> Option<Vec<u8>> {
    let frame_id = frame.id;
    match tokio::task::spawn_blocking(move || FrameProcessor::encode_jpeg(&frame, quality)).await {
        Ok(Ok(jpeg)) => Some(jpeg),
        Ok(Err(e)) => {
            error!(
                "Failed to encode snapshot for frame {}, reporting count only: {}",
                frame_id, e
            );
            None
        }
        Err(e) => {
            error!("Snapshot encoder task failed, reporting count only: {}", e);
            None
        }
    }
}

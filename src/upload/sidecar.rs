use super::session::{Encoder, SessionSlot};
use crate::config::UploadConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state of the upload stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Disconnected => "disconnected",
            UploadState::Connecting => "connecting",
            UploadState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Best-effort worker keeping an encoded stream to the upload sink alive.
///
/// Failures never reach the capture path. A dropped stream is reopened at once;
/// a failed start is logged and retried after `retry_delay`.
pub struct UploadSidecar {
    encoder: Option<Arc<dyn Encoder>>,
    sink: Option<String>,
    retry_delay: Duration,
    check_interval: Duration,
    slot: Arc<SessionSlot>,
    state_tx: watch::Sender<UploadState>,
}

impl UploadSidecar {
    pub fn new(config: &UploadConfig, encoder: Option<Arc<dyn Encoder>>) -> Self {
        let (state_tx, _) = watch::channel(UploadState::Disconnected);
        Self {
            encoder,
            sink: config.sink.clone().filter(|sink| !sink.trim().is_empty()),
            retry_delay: config.retry_delay(),
            check_interval: config.check_interval(),
            slot: Arc::new(SessionSlot::new()),
            state_tx,
        }
    }

    /// Slot holding the live session, for emergency teardown
    pub fn session_slot(&self) -> Arc<SessionSlot> {
        Arc::clone(&self.slot)
    }

    pub fn state(&self) -> watch::Receiver<UploadState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: UploadState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Upload state {} -> {}", current, state);
            *current = state;
            true
        });
    }

    /// Run until cancelled. Returns immediately when there is nothing to stream to.
    pub async fn run(self, cancel: CancellationToken) {
        let Some(sink) = self.sink.clone() else {
            info!("No upload sink configured, upload sidecar not started");
            return;
        };
        let Some(encoder) = self.encoder.clone() else {
            warn!("Upload sink {} configured but no encoder is available", sink);
            return;
        };

        info!("Upload sidecar streaming to {} via {}", sink, encoder.name());

        while !cancel.is_cancelled() {
            self.set_state(UploadState::Connecting);

            match encoder.start_stream(&sink).await {
                Ok(session) => {
                    self.slot.install(session);
                    self.set_state(UploadState::Connected);
                    info!("Upload stream to {} connected", sink);

                    if !self.supervise(&cancel).await {
                        break;
                    }
                    warn!("Upload stream to {} dropped, reopening", sink);
                    self.slot.close();
                    self.set_state(UploadState::Disconnected);
                }
                Err(e) => {
                    error!("Failed to start upload stream to {}: {}", sink, e);
                    self.set_state(UploadState::Disconnected);
                    debug!("Retrying upload in {:?}", self.retry_delay);
                    if !self.wait(self.retry_delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.slot.close();
        self.set_state(UploadState::Disconnected);
        info!("Upload sidecar stopped");
    }

    /// Poll the live session. Returns false on cancellation, true once the session drops.
    async fn supervise(&self, cancel: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.check_interval) => {}
            }

            if self.slot.is_active() != Some(true) {
                return true;
            }
        }
    }

    /// Sleep in `check_interval` steps. Returns false if cancelled first.
    async fn wait(&self, total: Duration, cancel: &CancellationToken) -> bool {
        let deadline = tokio::time::Instant::now() + total;
        while tokio::time::Instant::now() < deadline {
            let step = self
                .check_interval
                .min(deadline.saturating_duration_since(tokio::time::Instant::now()));
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
        }
        !cancel.is_cancelled()
    }
}

use super::protocol::write_frame;
use super::stage::{OutputStage, StageArtifacts};
use crate::config::PreviewConfig;
use crate::error::{PreviewError, Result};
use crate::frame::Frame;
use crate::slot_queue::SlotQueue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One accepted viewer connection
#[derive(Debug)]
pub struct PreviewSession {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    started: Instant,
}

impl PreviewSession {
    fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            frames_sent: 0,
            bytes_sent: 0,
            started: Instant::now(),
        }
    }

    fn record(&mut self, frame: &Frame) {
        self.frames_sent += 1;
        self.bytes_sent += (super::protocol::HEADER_LEN + frame.len()) as u64;
    }
}

#[derive(Debug, Clone, Copy)]
struct SenderSettings {
    send_timeout: Duration,
    pop_timeout: Duration,
}

struct SenderWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SenderWorker {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Preview sender task failed: {}", e);
        }
    }
}

/// Stage and worker are only ever changed together under this lock
struct HubState {
    stage: OutputStage,
    worker: Option<SenderWorker>,
    /// Set by `shutdown`; active stages are refused until `resume`
    closed: bool,
}

/// Owns the preview output stage and the stream sender worker.
pub struct PreviewHub {
    state: Mutex<HubState>,
    stage_tx: watch::Sender<OutputStage>,
    queue: Arc<SlotQueue<Frame>>,
    listener: Arc<TcpListener>,
    settings: SenderSettings,
}

impl PreviewHub {
    /// Bind the stream listener from configuration
    pub async fn bind(config: &PreviewConfig) -> Result<Arc<Self>> {
        let addr = config.stream_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PreviewError::BindFailed {
                address: addr.to_string(),
                source: e,
            })?;

        info!("Preview stream listening on {}", addr);
        Ok(Self::with_listener(
            listener,
            config.send_timeout(),
            config.queue_pop_timeout(),
        ))
    }

    pub fn with_listener(
        listener: TcpListener,
        send_timeout: Duration,
        pop_timeout: Duration,
    ) -> Arc<Self> {
        let (stage_tx, _) = watch::channel(OutputStage::Off);
        Arc::new(Self {
            state: Mutex::new(HubState {
                stage: OutputStage::Off,
                worker: None,
                closed: false,
            }),
            stage_tx,
            queue: Arc::new(SlotQueue::new("preview")),
            listener: Arc::new(listener),
            settings: SenderSettings {
                send_timeout,
                pop_timeout,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Current stage, readable from any task
    pub fn stage(&self) -> OutputStage {
        *self.stage_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<OutputStage> {
        self.stage_tx.subscribe()
    }

    /// Whether a frame is waiting for the sender
    pub fn has_pending_frame(&self) -> bool {
        self.queue.is_occupied()
    }

    pub async fn worker_running(&self) -> bool {
        let state = self.state.lock().await;
        state
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Switch the mirrored stage, starting or stopping the sender worker as needed
    pub async fn set_stage(&self, stage: OutputStage) {
        let mut state = self.state.lock().await;
        if state.closed && stage.is_on() {
            warn!("Preview is shut down, ignoring stage {}", stage);
            return;
        }
        self.apply_stage(&mut state, stage).await;
    }

    async fn apply_stage(&self, state: &mut HubState, stage: OutputStage) {
        let previous = state.stage;

        if previous == stage {
            debug!("Preview already at stage {}", stage);
            return;
        }

        state.stage = stage;
        self.stage_tx.send_replace(stage);
        // A queued frame belongs to the previous stage
        self.queue.clear();
        info!("Preview stage {} -> {}", previous, stage);

        if !stage.is_on() {
            if let Some(worker) = state.worker.take() {
                worker.stop().await;
                debug!("Preview sender stopped");
            }
            return;
        }

        let needs_worker = match state.worker.as_ref() {
            None => true,
            Some(worker) => worker.handle.is_finished(),
        };

        if needs_worker {
            if let Some(stale) = state.worker.take() {
                stale.stop().await;
            }
            state.worker = Some(self.spawn_worker());
        }
    }

    /// Hand the current stage's frame to the sender. No-op when off.
    pub fn offer(&self, artifacts: &StageArtifacts) -> bool {
        match self.stage().select(artifacts) {
            Some(frame) => self.queue.push(frame.clone()),
            None => false,
        }
    }

    /// Turn the preview off, join the sender and refuse further stages
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.apply_stage(&mut state, OutputStage::Off).await;
    }

    /// Accept stage changes again after `shutdown`
    pub async fn resume(&self) {
        self.state.lock().await.closed = false;
    }

    fn spawn_worker(&self) -> SenderWorker {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sender(
            Arc::clone(&self.listener),
            Arc::clone(&self.queue),
            self.stage_tx.subscribe(),
            self.settings,
            cancel.clone(),
        ));
        debug!("Preview sender started");
        SenderWorker { cancel, handle }
    }
}

enum SessionEnd {
    Cancelled,
    Failed(String),
}

async fn run_sender(
    listener: Arc<TcpListener>,
    queue: Arc<SlotQueue<Frame>>,
    stage: watch::Receiver<OutputStage>,
    settings: SenderSettings,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to accept preview viewer: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }
        queue.clear();

        let mut session = PreviewSession::new(peer);
        info!("Preview viewer {} connected (session {})", peer, session.id);

        let end = serve_session(stream, &mut session, &queue, settings, &cancel).await;
        info!(
            "Preview session {} ended after {} frames ({} bytes) in {:?}",
            session.id,
            session.frames_sent,
            session.bytes_sent,
            session.started.elapsed()
        );

        match end {
            SessionEnd::Cancelled => break,
            SessionEnd::Failed(reason) => {
                warn!("Preview viewer {} dropped: {}", peer, reason);
                if !stage.borrow().is_on() {
                    break;
                }
            }
        }
    }

    debug!("Preview sender exiting");
}

async fn serve_session(
    mut stream: TcpStream,
    session: &mut PreviewSession,
    queue: &SlotQueue<Frame>,
    settings: SenderSettings,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            frame = queue.pop(settings.pop_timeout) => frame,
        };

        let Some(frame) = frame else {
            continue;
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            sent = tokio::time::timeout(settings.send_timeout, write_frame(&mut stream, &frame)) => sent,
        };

        match sent {
            Ok(Ok(())) => session.record(&frame),
            Ok(Err(e)) => return SessionEnd::Failed(e.to_string()),
            Err(_) => {
                return SessionEnd::Failed(format!(
                    "send exceeded {:?}",
                    settings.send_timeout
                ))
            }
        }
    }
}

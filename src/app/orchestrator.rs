use super::types::{PipelineState, ShutdownReason};
use crate::camera::{FrameSource, FrameSourceBuilder};
use crate::config::{OfficecamConfig, ReportConfig};
use crate::error::{OfficecamError, Result};
use crate::frame::Frame;
use crate::preview::PreviewHub;
use crate::report::{HttpReportSink, ReportSink};
use crate::slot_queue::SlotQueue;
use crate::tracker::{PassthroughTracker, Tracker};
use crate::upload::{Encoder, UploadState};
use crate::watchdog::{ActivityClock, RestartPolicy};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application coordinator owning the capture session and its workers
pub struct OfficecamOrchestrator {
    pub(super) config: OfficecamConfig,
    pub(super) source: Arc<Mutex<Box<dyn FrameSource>>>,
    pub(super) tracker: Arc<parking_lot::Mutex<Box<dyn Tracker>>>,
    pub(super) encoder: Option<Arc<dyn Encoder>>,
    pub(super) report_sink: Option<Arc<dyn ReportSink>>,
    pub(super) restart_policy: Option<Arc<dyn RestartPolicy>>,
    pub(super) preview: Arc<PreviewHub>,

    pub(super) activity: Arc<ActivityClock>,
    pub(super) frame_queue: Arc<SlotQueue<Frame>>,

    // Lifecycle management
    pub(super) state: parking_lot::Mutex<PipelineState>,
    pub(super) workers: Vec<(&'static str, JoinHandle<()>)>,
    pub(super) running: CancellationToken,
    pub(super) upload_state: Option<watch::Receiver<UploadState>>,
    pub(super) shutdown: ShutdownTrigger,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

/// Cloneable handle that asks a running orchestrator to shut down. Only the first request counts.
#[derive(Clone)]
pub struct ShutdownTrigger {
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
}

impl ShutdownTrigger {
    /// Returns false if shutdown was already requested
    pub async fn fire(&self, reason: ShutdownReason) -> bool {
        match self.sender.lock().await.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }
}

impl OfficecamOrchestrator {
    pub fn builder() -> OfficecamOrchestratorBuilder {
        OfficecamOrchestratorBuilder::new()
    }

    /// Wire production dependencies from configuration
    pub async fn from_config(config: OfficecamConfig) -> Result<Self> {
        let source = FrameSourceBuilder::new()
            .config(config.camera.clone())
            .build()?;

        let report_sink = report_sink_from_config(&config.report);
        let preview = PreviewHub::bind(&config.preview).await?;
        let encoder = production_encoder(&config);

        OfficecamOrchestratorBuilder::new()
            .config(config)
            .source(source)
            .tracker(Box::new(PassthroughTracker::new()))
            .encoder(encoder)
            .report_sink(report_sink)
            .preview(preview)
            .build()
    }

    pub fn config(&self) -> &OfficecamConfig {
        &self.config
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }
}

/// Reporting is best-effort: a bad core URL disables it rather than failing startup
pub(super) fn report_sink_from_config(config: &ReportConfig) -> Option<Arc<dyn ReportSink>> {
    let url = config.core_url.as_deref().filter(|url| !url.trim().is_empty())?;
    match HttpReportSink::new(url, config.request_timeout()) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            error!("Occupancy reporting disabled, core URL unusable: {}", e);
            None
        }
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn production_encoder(config: &OfficecamConfig) -> Option<Arc<dyn Encoder>> {
    config.upload.sink.as_ref()?;
    match crate::upload::GstEncoder::new(&config.upload) {
        Ok(encoder) => Some(Arc::new(encoder)),
        Err(e) => {
            warn!("Upload encoder unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn production_encoder(config: &OfficecamConfig) -> Option<Arc<dyn Encoder>> {
    if config.upload.sink.is_some() {
        warn!("Upload sink configured but this build has no video encoder");
    }
    None
}

/// Builder collecting the orchestrator's injected dependencies
pub struct OfficecamOrchestratorBuilder {
    config: Option<OfficecamConfig>,
    source: Option<Box<dyn FrameSource>>,
    tracker: Option<Box<dyn Tracker>>,
    encoder: Option<Arc<dyn Encoder>>,
    report_sink: Option<Arc<dyn ReportSink>>,
    restart_policy: Option<Arc<dyn RestartPolicy>>,
    preview: Option<Arc<PreviewHub>>,
}

impl OfficecamOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            source: None,
            tracker: None,
            encoder: None,
            report_sink: None,
            restart_policy: None,
            preview: None,
        }
    }

    pub fn config(mut self, config: OfficecamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn tracker(mut self, tracker: Box<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn encoder(mut self, encoder: Option<Arc<dyn Encoder>>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn report_sink(mut self, sink: Option<Arc<dyn ReportSink>>) -> Self {
        self.report_sink = sink;
        self
    }

    /// Replace the default exit-on-stall policy
    pub fn restart_policy(mut self, policy: Arc<dyn RestartPolicy>) -> Self {
        self.restart_policy = Some(policy);
        self
    }

    pub fn preview(mut self, preview: Arc<PreviewHub>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn build(self) -> Result<OfficecamOrchestrator> {
        let missing = |what: &str| {
            OfficecamError::component("orchestrator", format!("{} must be specified", what))
        };

        let config = self.config.ok_or_else(|| missing("Configuration"))?;
        let source = self.source.ok_or_else(|| missing("Frame source"))?;
        let tracker = self.tracker.ok_or_else(|| missing("Tracker"))?;
        let preview = self.preview.ok_or_else(|| missing("Preview hub"))?;

        let (sender, receiver) = oneshot::channel();
        info!(
            "Orchestrator assembled with {} source and {} tracker",
            source.name(),
            tracker.name()
        );

        Ok(OfficecamOrchestrator {
            config,
            source: Arc::new(Mutex::new(source)),
            tracker: Arc::new(parking_lot::Mutex::new(tracker)),
            encoder: self.encoder,
            report_sink: self.report_sink,
            restart_policy: self.restart_policy,
            preview,
            activity: Arc::new(ActivityClock::new()),
            frame_queue: Arc::new(SlotQueue::new("frame")),
            state: parking_lot::Mutex::new(PipelineState::Stopped),
            workers: Vec::new(),
            running: CancellationToken::new(),
            upload_state: None,
            shutdown: ShutdownTrigger {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            shutdown_receiver: Some(receiver),
        })
    }
}

impl Default for OfficecamOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

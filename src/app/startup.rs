use super::pipeline::{capture_loop, processing_loop, ProcessingContext};
use super::{OfficecamOrchestrator, PipelineState};
use crate::error::{OfficecamError, Result};
use crate::report::Reporter;
use crate::upload::UploadSidecar;
use crate::watchdog::{ExitProcess, RestartPolicy, Watchdog};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

impl OfficecamOrchestrator {
    /// Open the frame source and spawn the capture, processing, watchdog and upload workers
    pub async fn start(&mut self) -> Result<()> {
        let current = self.state();
        if current != PipelineState::Stopped {
            return Err(OfficecamError::component(
                "orchestrator",
                format!("cannot start while {}", current),
            ));
        }

        info!("Starting officecam pipeline");
        self.set_state(PipelineState::Starting);

        if let Err(e) = self.source.lock().await.open().await {
            error!("Failed to open frame source: {}", e);
            self.set_state(PipelineState::Stopped);
            return Err(e);
        }

        self.running = CancellationToken::new();
        self.frame_queue.clear();
        self.preview.resume().await;
        self.activity.touch();

        let capture = tokio::spawn(capture_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.frame_queue),
            self.config.camera.capture_timeout(),
            self.running.clone(),
        ));

        let context = ProcessingContext {
            queue: Arc::clone(&self.frame_queue),
            tracker: Arc::clone(&self.tracker),
            reporter: Reporter::new(
                self.report_sink.clone(),
                self.config.report.interval(),
                self.config.report.jpeg_quality,
            ),
            preview: Arc::clone(&self.preview),
            activity: Arc::clone(&self.activity),
            downscaled_resolution: self.config.pipeline.downscaled_resolution,
            pop_timeout: self.config.pipeline.pop_timeout(),
        };
        let processing = tokio::spawn(processing_loop(context, self.running.clone()));

        let sidecar = UploadSidecar::new(&self.config.upload, self.encoder.clone());
        self.upload_state = Some(sidecar.state());

        let policy: Arc<dyn RestartPolicy> = match &self.restart_policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(
                ExitProcess::new(self.config.watchdog.exit_code)
                    .with_upload_session(sidecar.session_slot())
                    .with_running_token(self.running.clone()),
            ),
        };
        let watchdog = Watchdog::from_config(&self.config.watchdog, Arc::clone(&self.activity), policy);
        let watchdog_token = self.running.clone();
        let watchdog = tokio::spawn(async move {
            watchdog.run(watchdog_token).await;
        });

        let upload = tokio::spawn(sidecar.run(self.running.clone()));

        self.workers = vec![
            ("capture", capture),
            ("processing", processing),
            ("watchdog", watchdog),
            ("upload", upload),
        ];

        self.set_state(PipelineState::Running);
        info!("Officecam pipeline running");
        Ok(())
    }
}

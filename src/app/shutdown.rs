use super::{OfficecamOrchestrator, PipelineState};
use crate::error::Result;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl OfficecamOrchestrator {
    /// Stop all workers and close the frame source. Returns the exit code.
    pub async fn stop(&mut self) -> Result<i32> {
        if self.state() == PipelineState::Stopped {
            return Ok(0);
        }

        info!("Beginning graceful shutdown");
        self.set_state(PipelineState::Stopping);
        self.running.cancel();

        // Stops any in-progress preview send
        self.preview.shutdown().await;

        let mut exit_code = 0;
        let join_timeout = self.config.pipeline.join_timeout();

        for (name, mut handle) in self.workers.drain(..) {
            match timeout(join_timeout, &mut handle).await {
                Ok(Ok(())) => info!("{} worker stopped", name),
                Ok(Err(e)) => {
                    error!("{} worker failed: {}", name, e);
                    exit_code = 1;
                }
                Err(_) => {
                    warn!("{} worker did not stop within {:?}, aborting", name, join_timeout);
                    handle.abort();
                    exit_code = 1;
                }
            }
        }

        match timeout(join_timeout, self.source.lock()).await {
            Ok(mut source) => {
                if let Err(e) = source.close().await {
                    error!("Error closing frame source: {}", e);
                    exit_code = 1;
                }
            }
            Err(_) => {
                error!("Frame source still busy after {:?}, not closed", join_timeout);
                exit_code = 1;
            }
        }

        self.set_state(PipelineState::Stopped);
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}

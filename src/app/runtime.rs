use super::{OfficecamOrchestrator, ShutdownReason, ShutdownTrigger};
use crate::error::{OfficecamError, Result};
use crate::preview::ControlServer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

impl OfficecamOrchestrator {
    /// Run until a shutdown signal arrives, then stop and return the exit code
    pub async fn run(&mut self) -> Result<i32> {
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| OfficecamError::System {
                message: "Shutdown receiver already taken".to_string(),
            })?;

        // The control listener lives until shutdown, across pipeline restarts
        let control = ControlServer::bind(self.config.preview.command_addr()?).await?;
        let process_token = CancellationToken::new();
        let control_task = tokio::spawn(control.serve(self.preview(), process_token.clone()));

        if let Err(e) = self.start().await {
            process_token.cancel();
            let _ = control_task.await;
            return Err(e);
        }

        info!("Officecam is running");
        setup_signal_handlers(self.shutdown_trigger());

        let shutdown_reason = shutdown_receiver.await.map_err(|_| OfficecamError::System {
            message: "Shutdown channel closed unexpectedly".to_string(),
        })?;
        info!("Shutdown initiated: {:?}", shutdown_reason);

        // No stage commands once shutdown has begun
        process_token.cancel();
        if let Err(e) = control_task.await {
            error!("Preview control task failed: {}", e);
        }

        let exit_code = self.stop().await?;

        info!("Officecam shutdown complete");
        Ok(exit_code)
    }
}

fn setup_signal_handlers(trigger: ShutdownTrigger) {
    // Handle SIGTERM (systemd stop) - Unix only
    #[cfg(unix)]
    {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        trigger
                            .fire(ShutdownReason::Signal("SIGTERM".to_string()))
                            .await;
                    }
                }
                Err(e) => error!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            trigger
                .fire(ShutdownReason::Signal("SIGINT".to_string()))
                .await;
        }
    });
}

use crate::config::WatchdogConfig;
use crate::upload::SessionSlot;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Last time the processing loop made progress, on the monotonic clock
#[derive(Debug)]
pub struct ActivityClock {
    last: Mutex<Instant>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record progress now
    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last.lock()
    }

    /// Time since the last recorded progress
    pub fn stale_for(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Action taken when the pipeline is found wedged
pub trait RestartPolicy: Send + Sync {
    fn trigger(&self, stale_for: Duration);
}

/// Tears down external resources and terminates the process so the supervisor restarts it
pub struct ExitProcess {
    exit_code: i32,
    upload: Option<Arc<SessionSlot>>,
    running: Option<CancellationToken>,
}

impl ExitProcess {
    pub fn new(exit_code: i32) -> Self {
        Self {
            exit_code,
            upload: None,
            running: None,
        }
    }

    /// Close this upload session before exiting
    pub fn with_upload_session(mut self, slot: Arc<SessionSlot>) -> Self {
        self.upload = Some(slot);
        self
    }

    /// Cancel this token before exiting
    pub fn with_running_token(mut self, token: CancellationToken) -> Self {
        self.running = Some(token);
        self
    }

    /// Best-effort cleanup run before exit
    pub fn teardown(&self) {
        if let Some(token) = &self.running {
            token.cancel();
        }
        if let Some(slot) = &self.upload {
            if slot.close() {
                info!("Upload session closed during emergency teardown");
            }
        }
    }
}

impl RestartPolicy for ExitProcess {
    fn trigger(&self, stale_for: Duration) {
        self.teardown();
        error!(
            "Exiting with status {} after {:?} without progress",
            self.exit_code, stale_for
        );
        std::process::exit(self.exit_code);
    }
}

/// Supervisor that fires the restart policy when the activity clock goes stale
pub struct Watchdog {
    clock: Arc<ActivityClock>,
    poll_interval: Duration,
    stale_threshold: Duration,
    policy: Arc<dyn RestartPolicy>,
}

impl Watchdog {
    pub fn new(
        clock: Arc<ActivityClock>,
        poll_interval: Duration,
        stale_threshold: Duration,
        policy: Arc<dyn RestartPolicy>,
    ) -> Self {
        Self {
            clock,
            poll_interval,
            stale_threshold,
            policy,
        }
    }

    pub fn from_config(
        config: &WatchdogConfig,
        clock: Arc<ActivityClock>,
        policy: Arc<dyn RestartPolicy>,
    ) -> Self {
        Self::new(
            clock,
            config.poll_interval(),
            config.stale_threshold(),
            policy,
        )
    }

    /// Whether the pipeline has been idle longer than the threshold
    pub fn is_stale(&self) -> Option<Duration> {
        let stale_for = self.clock.stale_for();
        (stale_for > self.stale_threshold).then_some(stale_for)
    }

    /// Poll until cancelled or until the policy fires. Returns true if it fired.
    pub async fn run(self, cancel: CancellationToken) -> bool {
        info!(
            "Watchdog started (poll {:?}, threshold {:?})",
            self.poll_interval, self.stale_threshold
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Watchdog stopped");
                    return false;
                }
                _ = interval.tick() => {}
            }

            if let Some(stale_for) = self.is_stale() {
                error!(
                    "Pipeline stalled: no processed frame for {:?} (threshold {:?})",
                    stale_for, self.stale_threshold
                );
                self.policy.trigger(stale_for);
                warn!("Restart policy returned, watchdog no longer polling");
                return true;
            }
        }
    }
}

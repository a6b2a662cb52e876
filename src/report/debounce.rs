use std::time::{Duration, Instant};

/// Rate limiter admitting at most one call per interval.
///
/// The first call is always admitted. Calls made before `interval` has elapsed
/// since the last admitted call are dropped, not deferred.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_run: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    /// Run `f` if the interval has elapsed, returning its result
    pub fn try_run<R>(&mut self, f: impl FnOnce() -> R) -> Option<R> {
        self.try_run_at(Instant::now(), f)
    }

    pub fn try_run_at<R>(&mut self, now: Instant, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_ready_at(now) {
            return None;
        }
        self.last_run = Some(now);
        Some(f())
    }

    pub fn is_ready_at(&self, now: Instant) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

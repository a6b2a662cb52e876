use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// Single-slot handoff buffer between one producer and one consumer.
///
/// `push` never blocks. While the slot is occupied, new items are discarded and
/// the older, not-yet-consumed item is kept. `pop` waits for an item up to a
/// timeout so the consumer can re-check its shutdown condition.
pub struct SlotQueue<T> {
    name: &'static str,
    slot: Mutex<Option<T>>,
    ready: Notify,
    stats: SlotQueueStats,
}

/// Counters for queue throughput and backpressure
#[derive(Debug, Default)]
pub struct SlotQueueStats {
    pub pushed: AtomicU64,
    pub dropped: AtomicU64,
    pub popped: AtomicU64,
}

/// Snapshot of queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotQueueStatsSnapshot {
    pub pushed: u64,
    pub dropped: u64,
    pub popped: u64,
}

impl SlotQueueStats {
    pub fn snapshot(&self) -> SlotQueueStatsSnapshot {
        SlotQueueStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
        }
    }
}

impl<T> SlotQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
            ready: Notify::new(),
            stats: SlotQueueStats::default(),
        }
    }

    /// Offer an item. Returns `false` if the slot was full and the item was dropped.
    pub fn push(&self, item: T) -> bool {
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);

        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("{} queue full, dropping incoming item", self.name);
                return false;
            }
            *slot = Some(item);
        }

        self.ready.notify_one();
        true
    }

    /// Take the item without waiting
    pub fn try_pop(&self) -> Option<T> {
        let item = self.slot.lock().take();
        if item.is_some() {
            self.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Wait up to `timeout` for an item. `None` means nothing arrived in time.
    pub async fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a push between check and await is not missed
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Discard any pending item
    pub fn clear(&self) -> bool {
        self.slot.lock().take().is_some()
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn stats(&self) -> SlotQueueStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_push_wins_until_pop() {
        let queue = SlotQueue::new("test");
        assert!(queue.push(1));
        for value in 2..10 {
            assert!(!queue.push(value));
        }
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), None);

        assert!(queue.push(42));
        assert_eq!(queue.try_pop(), Some(42));

        let stats = queue.stats();
        assert_eq!(stats.pushed, 10);
        assert_eq!(stats.dropped, 8);
        assert_eq!(stats.popped, 2);
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue: SlotQueue<u32> = SlotQueue::new("test");
        let start = Instant::now();
        assert_eq!(queue.pop(Duration::from_millis(50)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pop_returns_pending_item_immediately() {
        let queue = SlotQueue::new("test");
        queue.push("frame");
        assert_eq!(queue.pop(Duration::from_secs(5)).await, Some("frame"));
        assert!(!queue.is_occupied());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(SlotQueue::new("test"));
        let producer = Arc::clone(&queue);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(5u32);
        });

        assert_eq!(queue.pop(Duration::from_secs(5)).await, Some(5));
        handle.await.unwrap();
    }

    #[test]
    fn test_clear() {
        let queue = SlotQueue::new("test");
        assert!(!queue.clear());
        queue.push(1);
        assert!(queue.clear());
        assert!(queue.push(2));
    }
}

use super::{OfficecamOrchestrator, PipelineState};
use crate::preview::PreviewHub;
use crate::slot_queue::SlotQueueStatsSnapshot;
use crate::upload::UploadState;
use crate::watchdog::ActivityClock;
use std::sync::Arc;
use tracing::debug;

impl OfficecamOrchestrator {
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub(super) fn set_state(&self, state: PipelineState) {
        let mut current = self.state.lock();
        debug!("Pipeline state {} -> {}", *current, state);
        *current = state;
    }

    /// Upload stream state, `None` before the first start
    pub fn upload_state(&self) -> Option<UploadState> {
        self.upload_state.as_ref().map(|rx| *rx.borrow())
    }

    pub fn activity(&self) -> Arc<ActivityClock> {
        Arc::clone(&self.activity)
    }

    pub fn preview(&self) -> Arc<PreviewHub> {
        Arc::clone(&self.preview)
    }

    pub fn frame_queue_stats(&self) -> SlotQueueStatsSnapshot {
        self.frame_queue.stats()
    }
}

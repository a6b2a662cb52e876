pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod offline;
pub mod preview;
pub mod report;
pub mod slot_queue;
pub mod tracker;
pub mod upload;
pub mod watchdog;

pub use app::{OfficecamOrchestrator, OfficecamOrchestratorBuilder, PipelineState, ShutdownReason};
pub use camera::{FrameSource, FrameSourceBuilder, TestPatternSource};
pub use config::OfficecamConfig;
pub use error::{OfficecamError, Result};
pub use frame::{Frame, FrameProcessor};
pub use preview::{OutputStage, PreviewClient, PreviewHub, StageArtifacts};
pub use report::{estimate_occupancy, Debouncer, Reporter};
pub use slot_queue::SlotQueue;
pub use tracker::{annotate_boxes, BoundingBox, DetectionResult, PassthroughTracker, Tracker};
pub use upload::{Encoder, UploadSession, UploadSidecar, UploadState};
pub use watchdog::{ActivityClock, ExitProcess, RestartPolicy, Watchdog};

use crate::error::{CameraError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use std::time::Duration;

/// Camera capability consumed by the capture loop.
///
/// Implementations own the hardware handle. `capture_frame` must honor its
/// timeout and report `CameraError::Timeout` rather than block indefinitely;
/// the capture loop wraps every call in its own timeout as well.
#[async_trait]
pub trait FrameSource: Send {
    /// Acquire the device and start streaming
    async fn open(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the next frame
    async fn capture_frame(&mut self, timeout: Duration) -> std::result::Result<Frame, CameraError>;

    /// Release the device. Safe to call on a closed source.
    async fn close(&mut self) -> Result<()>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

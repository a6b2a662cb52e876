use super::interface::FrameSource;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

/// Synthetic RGB source producing a moving bar over a gradient at the configured rate.
///
/// Used on hosts without camera hardware and for exercising the pipeline end to end.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    base: Vec<u8>,
    next_frame_at: Option<Instant>,
    frame_counter: u64,
}

impl TestPatternSource {
    pub fn new(config: &CameraConfig) -> Self {
        let (width, height) = config.resolution;
        Self {
            width,
            height,
            frame_interval: Duration::from_micros(1_000_000u64 / config.fps.max(1) as u64),
            base: Vec::new(),
            next_frame_at: None,
            frame_counter: 0,
        }
    }

    fn render(&self, frame_id: u64) -> Vec<u8> {
        let mut data = self.base.clone();
        let bar_width = (self.width / 16).max(1);
        let offset = ((frame_id * 8) % self.width.max(1) as u64) as u32;
        let row_bytes = self.width as usize * 3;

        for y in 0..self.height as usize {
            let row = &mut data[y * row_bytes..(y + 1) * row_bytes];
            for x in offset..(offset + bar_width).min(self.width) {
                let px = x as usize * 3;
                row[px..px + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        data
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.push((x * 255 / width.max(1)) as u8);
                data.push((y * 255 / height.max(1)) as u8);
                data.push(96);
            }
        }
        data
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn open(&mut self) -> Result<()> {
        info!(
            "Opening test pattern source ({}x{} @ {:?} per frame)",
            self.width, self.height, self.frame_interval
        );
        self.base = Self::gradient(self.width, self.height);
        self.next_frame_at = Some(Instant::now());
        Ok(())
    }

    async fn capture_frame(&mut self, timeout: Duration) -> std::result::Result<Frame, CameraError> {
        let due = self.next_frame_at.ok_or(CameraError::NotOpen)?;
        let now = Instant::now();

        if due > now + timeout {
            sleep_until(now + timeout).await;
            return Err(CameraError::Timeout { timeout });
        }

        sleep_until(due).await;
        // Pace from the later of the schedule and now so a slow consumer does not cause bursts
        self.next_frame_at = Some(due.max(Instant::now()) + self.frame_interval);

        let frame_id = self.frame_counter;
        self.frame_counter += 1;

        let frame = Frame::new(
            frame_id,
            SystemTime::now(),
            self.height,
            self.width,
            3,
            self.render(frame_id),
        )
        .map_err(|e| CameraError::CaptureStream {
            details: e.to_string(),
        })?;

        trace!("Generated test pattern frame {}", frame_id);
        Ok(frame)
    }

    async fn close(&mut self) -> Result<()> {
        if self.next_frame_at.take().is_some() {
            debug!(
                "Test pattern source closed after {} frames",
                self.frame_counter
            );
        }
        self.base = Vec::new();
        Ok(())
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

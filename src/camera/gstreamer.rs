use super::interface::FrameSource;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

/// GStreamer-backed RGB frame source
pub struct GstFrameSource {
    config: CameraConfig,
    /// Decoding a file: keep every frame and ignore the configured rate
    from_file: bool,
    pipeline: Option<Pipeline>,
    appsink: Option<AppSink>,
    frame_counter: u64,
}

impl GstFrameSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            from_file: false,
            pipeline: None,
            appsink: None,
            frame_counter: 0,
        }
    }

    /// Decode a video file frame by frame, scaled to the configured resolution
    pub fn for_file(mut config: CameraConfig, path: &Path) -> Self {
        config.pipeline = format!(
            "filesrc location=\"{}\" ! decodebin",
            path.display().to_string().replace('"', "\\\"")
        );
        Self {
            from_file: true,
            ..Self::new(config)
        }
    }

    /// Build the pipeline description: configured source converted to packed RGB
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        if self.from_file {
            return format!(
                "{} ! videoconvert ! videoscale ! \
                 video/x-raw,format=RGB,width={},height={} ! \
                 appsink name=sink sync=false max-buffers=4 drop=false emit-signals=false",
                self.config.pipeline, width, height
            );
        }
        format!(
            "{} ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true emit-signals=false",
            self.config.pipeline, width, height, self.config.fps
        )
    }

    /// Copy a mapped RGB buffer into a tightly packed frame, dropping row padding
    fn sample_to_frame(
        sample: &gstreamer::Sample,
        frame_id: u64,
    ) -> std::result::Result<Frame, CameraError> {
        let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
            details: "No buffer in sample".to_string(),
        })?;

        let caps = sample.caps().ok_or_else(|| CameraError::CaptureStream {
            details: "No caps in sample".to_string(),
        })?;

        let video_info = VideoInfo::from_caps(caps).map_err(|e| CameraError::CaptureStream {
            details: format!("Failed to get video info: {}", e),
        })?;

        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::CaptureStream {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let width = video_info.width();
        let height = video_info.height();
        let stride = video_info.stride()[0] as usize;
        let row_bytes = width as usize * 3;
        let src = map.as_slice();

        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            if end > src.len() {
                return Err(CameraError::CaptureStream {
                    details: format!("Buffer truncated at row {}", row),
                });
            }
            data.extend_from_slice(&src[start..end]);
        }

        Frame::new(frame_id, SystemTime::now(), height, width, 3, data).map_err(|e| {
            CameraError::CaptureStream {
                details: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl FrameSource for GstFrameSource {
    async fn open(&mut self) -> Result<()> {
        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no element named 'sink'".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Element 'sink' is not an AppSink".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to start pipeline: {}", e),
            })?;

        info!("GStreamer pipeline started successfully");
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    async fn capture_frame(&mut self, timeout: Duration) -> std::result::Result<Frame, CameraError> {
        let appsink = self.appsink.clone().ok_or(CameraError::NotOpen)?;
        let wait = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);

        let sample = tokio::task::spawn_blocking(move || {
            let sample = appsink.try_pull_sample(wait);
            (sample, appsink.is_eos())
        })
        .await
        .map_err(|e| CameraError::CaptureStream {
            details: format!("Capture worker failed: {}", e),
        })?;

        match sample {
            (Some(sample), _) => {
                let frame_id = self.frame_counter;
                self.frame_counter += 1;
                let frame = Self::sample_to_frame(&sample, frame_id)?;
                trace!("Captured frame {} ({}x{})", frame_id, frame.width, frame.height);
                Ok(frame)
            }
            (None, true) => Err(CameraError::EndOfStream),
            (None, false) => Err(CameraError::Timeout { timeout }),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop GStreamer pipeline cleanly: {}", e);
            }
            debug!("GStreamer capture pipeline stopped");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        if self.from_file {
            "gstreamer-file"
        } else {
            "gstreamer"
        }
    }
}

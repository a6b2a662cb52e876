use super::session::{Encoder, UploadSession};
use super::target::sink_elements;
use crate::config::UploadConfig;
use crate::error::UploadError;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{MessageType, Pipeline};
use tracing::{debug, error, info, warn};

/// H.264 encoder pipeline streaming to the configured sink
pub struct GstEncoder {
    source: String,
    bitrate_kbps: u32,
}

impl GstEncoder {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        gstreamer::init().map_err(|e| UploadError::Pipeline {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            source: config.pipeline.clone(),
            bitrate_kbps: config.bitrate_kbps,
        })
    }

    fn pipeline_description(&self, sink: &str) -> Result<String, UploadError> {
        Ok(format!(
            "{} ! videoconvert ! x264enc tune=zerolatency speed-preset=ultrafast bitrate={} ! \
             h264parse ! {}",
            self.source,
            self.bitrate_kbps,
            sink_elements(sink)?
        ))
    }
}

#[async_trait]
impl Encoder for GstEncoder {
    async fn start_stream(&self, sink: &str) -> Result<Box<dyn UploadSession>, UploadError> {
        let description = self.pipeline_description(sink)?;
        info!("Creating upload pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| UploadError::Pipeline {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| UploadError::Pipeline {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(UploadError::SinkUnavailable {
                sink: sink.to_string(),
                details: e.to_string(),
            });
        }

        Ok(Box::new(GstUploadSession {
            pipeline: Some(pipeline),
        }))
    }

    fn name(&self) -> &str {
        "gstreamer-x264"
    }
}

struct GstUploadSession {
    pipeline: Option<Pipeline>,
}

impl UploadSession for GstUploadSession {
    fn is_active(&mut self) -> bool {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return false;
        };
        let Some(bus) = pipeline.bus() else {
            return false;
        };

        if let Some(msg) = bus.pop_filtered(&[MessageType::Error, MessageType::Eos]) {
            match msg.view() {
                gstreamer::MessageView::Error(err) => {
                    error!("Upload pipeline error: {}", err.error());
                    if let Some(debug_info) = err.debug() {
                        debug!("Upload pipeline debug info: {}", debug_info);
                    }
                }
                _ => warn!("Upload pipeline reached end of stream"),
            }
            return false;
        }
        true
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop upload pipeline: {}", e);
            }
        }
    }
}

impl Drop for GstUploadSession {
    fn drop(&mut self) {
        self.close();
    }
}

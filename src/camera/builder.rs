use super::interface::FrameSource;
use super::pattern::TestPatternSource;
use crate::config::CameraConfig;
use crate::error::{CameraError, OfficecamError, Result};
use std::path::Path;

/// Builder selecting the frame source backend from configuration
pub struct FrameSourceBuilder {
    config: Option<CameraConfig>,
}

impl FrameSourceBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Box<dyn FrameSource>> {
        let config = self
            .config
            .ok_or_else(|| OfficecamError::system("Camera configuration must be specified"))?;

        match config.source.as_str() {
            "test" => Ok(Box::new(TestPatternSource::new(&config))),
            "gstreamer" => gstreamer_source(config),
            other => Err(CameraError::Configuration {
                details: format!("Unknown camera source '{}'", other),
            }
            .into()),
        }
    }
}

impl Default for FrameSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Source decoding a video file, scaled to the camera resolution in `config`
pub fn video_file_source(config: CameraConfig, path: &Path) -> Result<Box<dyn FrameSource>> {
    file_source(config, path)
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn file_source(config: CameraConfig, path: &Path) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(super::gstreamer::GstFrameSource::for_file(config, path)))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn file_source(_config: CameraConfig, path: &Path) -> Result<Box<dyn FrameSource>> {
    Err(CameraError::Configuration {
        details: format!(
            "Decoding video file {} requires the 'camera' feature on Linux",
            path.display()
        ),
    }
    .into())
}

#[cfg(all(feature = "camera", target_os = "linux"))]
fn gstreamer_source(config: CameraConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(super::gstreamer::GstFrameSource::new(config)))
}

#[cfg(not(all(feature = "camera", target_os = "linux")))]
fn gstreamer_source(_config: CameraConfig) -> Result<Box<dyn FrameSource>> {
    Err(CameraError::Configuration {
        details: "GStreamer source requires the 'camera' feature on Linux".to_string(),
    }
    .into())
}

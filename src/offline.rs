//! Offline debug path: run a still image or a video file through the
//! processing stages without the live pipeline.

use crate::camera::FrameSource;
use crate::error::{CameraError, OfficecamError, Result};
use crate::frame::{Frame, FrameProcessor};
use crate::preview::{MjpegRecorder, OutputStage, StageArtifacts};
use crate::tracker::{annotate_boxes, Tracker};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extensions decoded as a single still image; anything else is treated as video
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif"];

/// Extensions written as a Motion JPEG stream rather than a single frame
pub const MJPEG_EXTENSIONS: &[&str] = &["mjpeg", "mjpg"];

/// Consecutive capture timeouts tolerated before a video is abandoned
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Video,
}

impl InputKind {
    pub fn from_path(path: &Path) -> Self {
        if has_extension(path, IMAGE_EXTENSIONS) {
            InputKind::Image
        } else {
            InputKind::Video
        }
    }
}

/// Whether `path` asks for every processed frame as Motion JPEG
pub fn wants_mjpeg(path: &Path) -> bool {
    has_extension(path, MJPEG_EXTENSIONS)
}

fn has_extension(path: &Path, candidates: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| candidates.iter().any(|c| ext.eq_ignore_ascii_case(c)))
}

/// Downscale, track and annotate frames, keeping the chosen stage
pub struct OfflineProcessor {
    tracker: Box<dyn Tracker>,
    downscaled_resolution: (u32, u32),
    stage: OutputStage,
    processed: u64,
    people_seen: u32,
}

impl OfflineProcessor {
    pub fn new(
        tracker: Box<dyn Tracker>,
        downscaled_resolution: (u32, u32),
        stage: OutputStage,
    ) -> Result<Self> {
        if !stage.is_on() {
            return Err(OfficecamError::component(
                "offline",
                "output stage off produces no image",
            ));
        }
        Ok(Self {
            tracker,
            downscaled_resolution,
            stage,
            processed: 0,
            people_seen: 0,
        })
    }

    /// Run one captured frame through every stage and return the selected one
    pub fn process(&mut self, captured: Frame) -> Result<Frame> {
        let downscaled = FrameProcessor::downscale(&captured, self.downscaled_resolution)?;
        let detection = self.tracker.track(&downscaled)?;
        let annotated = annotate_boxes(&detection.annotated, &detection.boxes)?;

        self.processed += 1;
        self.people_seen = self.people_seen.max(detection.count());
        debug!(
            "Frame {}: {} people ({} tracker)",
            captured.id,
            detection.count(),
            self.tracker.name()
        );

        let artifacts = StageArtifacts {
            captured,
            downscaled,
            annotated,
        };
        self.stage.select(&artifacts).cloned().ok_or_else(|| {
            OfficecamError::component("offline", format!("stage {} has no frame", self.stage))
        })
    }

    pub fn frames_processed(&self) -> u64 {
        self.processed
    }

    /// Highest count seen in any single frame
    pub fn peak_count(&self) -> u32 {
        self.people_seen
    }
}

/// Decode a still image and process it
pub fn process_image(processor: &mut OfflineProcessor, bytes: &[u8]) -> Result<Frame> {
    let captured = FrameProcessor::decode(0, bytes)?;
    processor.process(captured)
}

/// Process every frame of a finite source until it reports end of stream.
///
/// Each selected frame goes to `recorder` when one is given. Returns the last
/// selected frame, or `None` if the source produced nothing.
pub async fn process_video(
    source: &mut dyn FrameSource,
    processor: &mut OfflineProcessor,
    mut recorder: Option<&mut MjpegRecorder>,
    capture_timeout: Duration,
) -> Result<Option<Frame>> {
    source.open().await?;
    info!("Processing video from {} source", source.name());

    let mut last = None;
    let mut timeouts = 0;

    let outcome = loop {
        match source.capture_frame(capture_timeout).await {
            Ok(frame) => {
                timeouts = 0;
                let selected = match processor.process(frame) {
                    Ok(selected) => selected,
                    Err(e) => break Err(e),
                };
                if let Some(recorder) = recorder.as_deref_mut() {
                    if let Err(e) = recorder.record(&selected).await {
                        break Err(e);
                    }
                }
                last = Some(selected);
            }
            Err(CameraError::EndOfStream) => break Ok(()),
            Err(CameraError::Timeout { timeout }) => {
                timeouts += 1;
                if timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                    warn!(
                        "No frame for {} attempts of {:?}, treating video as finished",
                        timeouts, timeout
                    );
                    break Ok(());
                }
            }
            Err(e) => break Err(e.into()),
        }
    };

    if let Err(e) = source.close().await {
        warn!("Failed to close video source: {}", e);
    }
    outcome?;

    info!(
        "Processed {} frames, peak count {}",
        processor.frames_processed(),
        processor.peak_count()
    );
    Ok(last)
}

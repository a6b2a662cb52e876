use crate::error::{Result, TrackerError};
use crate::frame::Frame;
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::BTreeSet;
use tracing::trace;

/// Box outline color used when annotating detections
pub const ANNOTATION_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Axis-aligned detection box in pixel coordinates of the tracked frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Output of one tracker invocation
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Persistent ids of people currently tracked
    pub ids: BTreeSet<u32>,
    pub boxes: Vec<BoundingBox>,
    pub confidences: Vec<f32>,
    /// Input frame with detections drawn on it
    pub annotated: Frame,
}

impl DetectionResult {
    /// Result with no detections; the annotated frame is the input itself
    pub fn empty(frame: &Frame) -> Self {
        Self {
            ids: BTreeSet::new(),
            boxes: Vec::new(),
            confidences: Vec::new(),
            annotated: frame.clone(),
        }
    }

    /// Number of distinct people in the frame
    pub fn count(&self) -> u32 {
        self.ids.len() as u32
    }
}

/// Person detector/tracker. Calls are CPU-bound and run on the blocking pool.
pub trait Tracker: Send {
    fn track(&mut self, frame: &Frame) -> Result<DetectionResult>;

    fn name(&self) -> &str;
}

/// Tracker that never detects anyone. Used when no model is deployed.
#[derive(Debug, Default)]
pub struct PassthroughTracker {
    frames_seen: u64,
}

impl PassthroughTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Tracker for PassthroughTracker {
    fn track(&mut self, frame: &Frame) -> Result<DetectionResult> {
        self.frames_seen += 1;
        trace!("Passthrough tracker saw frame {}", frame.id);
        Ok(DetectionResult::empty(frame))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Draw detection boxes onto a copy of the frame. Boxes are clipped to the image.
pub fn annotate_boxes(frame: &Frame, boxes: &[BoundingBox]) -> Result<Frame> {
    if boxes.is_empty() {
        return Ok(frame.clone());
    }

    let mut canvas = frame.to_rgb_image().map_err(|e| TrackerError::Inference {
        details: format!("cannot annotate frame {}: {}", frame.id, e),
    })?;

    for bbox in boxes {
        // Zero-sized rects are rejected by imageproc
        if bbox.width == 0 || bbox.height == 0 {
            continue;
        }
        let rect = Rect::at(bbox.x, bbox.y).of_size(bbox.width, bbox.height);
        draw_hollow_rect_mut(&mut canvas, rect, ANNOTATION_COLOR);
    }

    Frame::from_dynamic(frame.id, frame.timestamp, DynamicImage::ImageRgb8(canvas))
}

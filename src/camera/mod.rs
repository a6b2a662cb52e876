mod builder;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gstreamer;
mod interface;
mod pattern;

pub use builder::{video_file_source, FrameSourceBuilder};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gstreamer::GstFrameSource;
pub use interface::FrameSource;
pub use pattern::TestPatternSource;

#[cfg(all(feature = "camera", target_os = "linux"))]
mod gstreamer;
mod session;
mod sidecar;
mod target;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gstreamer::GstEncoder;
pub use session::{Encoder, SessionSlot, UploadSession};
pub use sidecar::{UploadSidecar, UploadState};
pub use target::sink_elements;

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfficecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Preview error: {0}")]
    Preview(#[from] PreviewError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl OfficecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    /// The source produced nothing within the capture timeout. Transient.
    #[error("No frame within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Capture stream failure: {details}")]
    CaptureStream { details: String },

    #[error("Camera configuration failed: {details}")]
    Configuration { details: String },

    #[error("Frame source is not open")]
    NotOpen,

    /// A finite source (a video file) has no more frames
    #[error("End of stream")]
    EndOfStream,

    #[error("Invalid frame: {details}")]
    InvalidFrame { details: String },
}

impl CameraError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::Timeout { .. } | CameraError::CaptureStream { .. })
    }
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Tracking failed: {details}")]
    Inference { details: String },

    #[error("Tracker worker panicked: {details}")]
    Worker { details: String },
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid reporting URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },

    #[error("Core responded with status {status}")]
    Status { status: u16 },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload sink '{sink}' unavailable: {details}")]
    SinkUnavailable { sink: String, details: String },

    #[error("Encoder pipeline error: {details}")]
    Pipeline { details: String },
}

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Unknown output stage '{token}'")]
    InvalidToken { token: String },

    #[error("Failed to bind preview listener on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Preview protocol violation: {details}")]
    Protocol { details: String },
}

pub type Result<T> = std::result::Result<T, OfficecamError>;

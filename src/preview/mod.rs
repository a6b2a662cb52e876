mod client;
mod control;
pub mod protocol;
mod stage;
mod stream;
#[cfg(test)]
mod tests;

pub use client::{send_stage, MjpegRecorder, PreviewClient};
pub use control::{ControlServer, MAX_TOKEN_LEN, TOKEN_READ_TIMEOUT};
pub use stage::{OutputStage, StageArtifacts};
pub use stream::{PreviewHub, PreviewSession};

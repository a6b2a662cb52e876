use crate::error::PreviewError;
use crate::frame::Frame;
use std::fmt;
use std::str::FromStr;

/// Pipeline artifact mirrored to the preview stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputStage {
    #[default]
    Off,
    Captured,
    Downscaled,
    Annotated,
}

impl OutputStage {
    pub const ALL: [OutputStage; 4] = [
        OutputStage::Off,
        OutputStage::Captured,
        OutputStage::Downscaled,
        OutputStage::Annotated,
    ];

    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStage::Off => "off",
            OutputStage::Captured => "captured",
            OutputStage::Downscaled => "downscaled",
            OutputStage::Annotated => "annotated",
        }
    }

    pub fn is_on(&self) -> bool {
        !matches!(self, OutputStage::Off)
    }

    /// Frame to mirror for this stage, `None` when off
    pub fn select<'a>(&self, artifacts: &'a StageArtifacts) -> Option<&'a Frame> {
        match self {
            OutputStage::Off => None,
            OutputStage::Captured => Some(&artifacts.captured),
            OutputStage::Downscaled => Some(&artifacts.downscaled),
            OutputStage::Annotated => Some(&artifacts.annotated),
        }
    }
}

impl fmt::Display for OutputStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputStage {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        OutputStage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| PreviewError::InvalidToken {
                token: token.to_string(),
            })
    }
}

/// The frames produced for one captured image
#[derive(Debug, Clone)]
pub struct StageArtifacts {
    pub captured: Frame,
    pub downscaled: Frame,
    pub annotated: Frame,
}

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("axis calibration missing: raw maximum for {axis} was not probed before parsing")]
    MissingCalibration { axis: &'static str },
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("capture session already active for device `{0}`")]
    SessionAlreadyActive(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed reading config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed parsing config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("capture did not complete within {0:?}")]
    CaptureTimeout(Duration),
    #[error("previous capture is still outstanding")]
    CaptureBusy,
    #[error("empty buffer and no fallback capture configured (action t={action_timestamp:.3})")]
    NoFallbackCapture { action_timestamp: f64 },
    #[error("artifact directory {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingCalibration { .. }
                | Error::InvalidCalibration(_)
                | Error::SessionAlreadyActive(_)
                | Error::InvalidConfig(_)
                | Error::ConfigRead { .. }
                | Error::ConfigParse { .. }
        )
    }
}

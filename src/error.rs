use std::{error::Error, fmt, io, path::PathBuf};

use safetensors::SafeTensorError;

use crate::initialization::RandErr;

/// The result type used across the trainer.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Json(serde_json::Error),
    Image(image::ImageError),
    Init(RandErr),
    InvalidConfig(String),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    DuplicateParam(String),
    UnknownParam(String),
    TowerMismatch {
        tower: usize,
    },
    Checkpoint(String),
    WeightsNotFound(PathBuf),
    Dataset(String),
    NoDevices,
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Json(e) => write!(f, "json error: {e}"),
            TrainErr::Image(e) => write!(f, "image error: {e}"),
            TrainErr::Init(e) => write!(f, "initialization error: {e}"),
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            TrainErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for '{name}': got {got:?}, expected {expected:?}"
            ),
            TrainErr::DuplicateParam(name) => write!(f, "parameter '{name}' is already registered"),
            TrainErr::UnknownParam(name) => write!(f, "unknown parameter '{name}'"),
            TrainErr::TowerMismatch { tower } => write!(
                f,
                "tower {tower} reported a gradient list that doesn't match tower 0"
            ),
            TrainErr::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            TrainErr::WeightsNotFound(path) => {
                write!(f, "prior weights '{}' do not exist", path.display())
            }
            TrainErr::Dataset(msg) => write!(f, "dataset error: {msg}"),
            TrainErr::NoDevices => write!(f, "no visible devices"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            TrainErr::Image(e) => Some(e),
            TrainErr::Init(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<image::ImageError> for TrainErr {
    fn from(value: image::ImageError) -> Self {
        Self::Image(value)
    }
}

impl From<RandErr> for TrainErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}

impl From<SafeTensorError> for TrainErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}

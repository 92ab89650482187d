//! Calibration errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    /// A step of the poke sequence failed to analyse
    #[error("step {step}: {source}")]
    Frame {
        step: usize,
        #[source]
        source: interf::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] interf::Error),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("aperture mismatch: {0}")]
    ApertureMismatch(String),

    #[error("numeric instability: {0}")]
    NumericInstability(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CalibrationError>;

impl CalibrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CalibrationError::Io {
            path: path.into(),
            source,
        }
    }

    /// Step index for per-frame failures.
    pub fn step(&self) -> Option<usize> {
        match self {
            CalibrationError::Frame { step, .. } => Some(*step),
            _ => None,
        }
    }
}

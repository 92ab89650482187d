//! Error types for the phase-retrieval pipeline.
//!
//! Every stage returns a bare [`Error`]; the orchestrator tags it with the
//! [`Stage`] it came from and callers that iterate over frames attach the frame
//! index. [`Error::root`] peels the context back off when the failure kind
//! matters more than where it happened.

use thiserror::Error;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Transform,
    LocateOrders,
    ExtractOrder,
    RepadOrder,
    PhaseExtraction,
    Unwrap,
    Mask,
    Aperture,
}

/// Errors produced by the phase-retrieval pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("no diffraction order found: prominence {prominence:.2} below threshold {threshold:.2}")]
    OrderNotFound { prominence: f64, threshold: f64 },

    #[error("order window out of bounds: {0}")]
    OrderOutOfBounds(String),

    #[error("extracted order {got:?} exceeds canonical grid {canonical:?}")]
    RepadOverflow {
        got: (usize, usize),
        canonical: (usize, usize),
    },

    #[error("phase unwrapping failed: {0}")]
    UnwrapFailure(String),

    #[error("aperture mismatch: {0}")]
    ApertureMismatch(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("numeric instability: {0}")]
    NumericInstability(String),

    #[error("{stage} failed{}: {source}", frame_suffix(.frame))]
    Stage {
        stage: Stage,
        frame: Option<usize>,
        #[source]
        source: Box<Error>,
    },
}

fn frame_suffix(frame: &Option<usize>) -> String {
    frame.map(|f| format!(" on frame {f}")).unwrap_or_default()
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Tag this error with the stage it came from.
    pub fn in_stage(self, stage: Stage) -> Self {
        Error::Stage {
            stage,
            frame: None,
            source: Box::new(self),
        }
    }

    /// Attach a frame index. Errors without stage context are returned unchanged.
    pub fn with_frame(self, frame: usize) -> Self {
        match self {
            Error::Stage { stage, source, .. } => Error::Stage {
                stage,
                frame: Some(frame),
                source,
            },
            other => other,
        }
    }

    /// The innermost error, with all stage context removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage the error was tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Frame index the error was tagged with, if any.
    pub fn frame(&self) -> Option<usize> {
        match self {
            Error::Stage { frame, .. } => *frame,
            _ => None,
        }
    }

    /// Short machine-friendly name of the root failure.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Error::InvalidGrid(_) => "invalid_grid",
            Error::ShapeMismatch { .. } => "shape_mismatch",
            Error::OrderNotFound { .. } => "order_not_found",
            Error::OrderOutOfBounds(_) => "order_out_of_bounds",
            Error::RepadOverflow { .. } => "repad_overflow",
            Error::UnwrapFailure(_) => "unwrap_failure",
            Error::ApertureMismatch(_) => "aperture_mismatch",
            Error::InsufficientData(_) => "insufficient_data",
            Error::NumericInstability(_) => "numeric_instability",
            Error::Stage { .. } => "stage",
        }
    }
}

/// Extension for tagging a stage result in one call.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.in_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_includes_frame() {
        let err = Error::UnwrapFailure("all pixels are NaN".to_string())
            .in_stage(Stage::Unwrap)
            .with_frame(17);
        let msg = err.to_string();
        assert!(msg.starts_with("unwrap failed on frame 17"), "{msg}");
        assert!(msg.contains("all pixels are NaN"));
    }

    #[test]
    fn test_root_peels_context() {
        let err = Error::OrderNotFound {
            prominence: -12.0,
            threshold: -6.9,
        }
        .in_stage(Stage::LocateOrders);
        assert_eq!(err.stage(), Some(Stage::LocateOrders));
        assert!(matches!(err.root(), Error::OrderNotFound { .. }));
        assert_eq!(err.kind(), "order_not_found");
        assert_eq!(err.frame(), None);
    }

    #[test]
    fn test_with_frame_on_untagged_error_is_noop() {
        let err = Error::InvalidGrid("zero rows".to_string()).with_frame(3);
        assert!(matches!(err, Error::InvalidGrid(_)));
    }
}

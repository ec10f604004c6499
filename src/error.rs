//! Error types
//!
//! Only authoring and configuration problems are errors. Gameplay outcomes
//! (a ball escaping, a chain running empty) are reported as events.

use std::path::PathBuf;

/// Rejected path authoring input
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PathError {
    #[error("path needs at least 4 control points, got {got}")]
    TooFewControlPoints { got: usize },
    #[error("sample step must be positive and finite, got {0}")]
    InvalidStep(f32),
}

/// Failure to load or validate tuning data
#[derive(Debug, thiserror::Error)]
pub enum TuningError {
    #[error("failed to read tuning file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed tuning data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid tuning value: {0}")]
    Invalid(String),
}

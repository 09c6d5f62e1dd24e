//! Error types for market validation.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised while loading or analysing a run.
///
/// `MissingInput` and `SchemaMismatch` are fatal for the run that raised them and
/// cause it to be skipped in a batch. `InsufficientData` and
/// `DegenerateComputation` are recovered locally: the affected metric is reported
/// as undetermined.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// An expected file or document is absent.
    #[error("missing input: {}", path.display())]
    MissingInput { path: PathBuf },

    /// An expected column or field is absent or has the wrong type.
    #[error("schema mismatch in {source_file}: field '{field}' {detail}")]
    SchemaMismatch {
        source_file: String,
        field: String,
        detail: String,
    },

    /// Series shorter than the routine's minimum.
    #[error("insufficient data for {routine}: need at least {needed}, got {got}")]
    InsufficientData {
        routine: &'static str,
        needed: usize,
        got: usize,
    },

    /// Numerically degenerate input (zero variance, near-zero denominator).
    #[error("degenerate computation in {routine}: {detail}")]
    DegenerateComputation { routine: &'static str, detail: String },

    /// Invalid analysis configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl AnalysisError {
    pub fn insufficient(routine: &'static str, needed: usize, got: usize) -> Self {
        AnalysisError::InsufficientData {
            routine,
            needed,
            got,
        }
    }

    pub fn degenerate(routine: &'static str, detail: impl Into<String>) -> Self {
        AnalysisError::DegenerateComputation {
            routine,
            detail: detail.into(),
        }
    }

    /// Whether the error only makes a single metric undetermined
    pub fn is_undetermined(&self) -> bool {
        matches!(
            self,
            AnalysisError::InsufficientData { .. } | AnalysisError::DegenerateComputation { .. }
        )
    }
}

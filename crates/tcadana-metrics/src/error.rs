//! Error types for tcadana-metrics.

use thiserror::Error;

/// Why a metric could not be computed. Fatal for that metric only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("non-monotonic sweep: {0}")]
    NonMonotonic(String),

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("no threshold crossing: {0}")]
    NoCrossing(String),

    #[error("non-finite input: {0}")]
    NonFinite(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),
}

pub type Result<T> = std::result::Result<T, ComputationError>;

//! Error types for tcadana-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid run identity: {0}")]
    InvalidRunId(String),

    #[error("unknown format tag: {0}")]
    UnknownFormat(String),

    #[error("record shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("configuration digest failed: {0}")]
    Digest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

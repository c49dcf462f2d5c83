//! Error types for tcadana-cache.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key lock was held by another writer for the whole timeout.
    /// Retryable.
    #[error("contention on {key}: lock not acquired within {waited:?}")]
    Contention { key: String, waited: Duration },

    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Contention { .. } | CacheError::Io { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Why a stored entry could not be decoded. Never surfaced to callers:
/// the entry is evicted and reported absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionError {
    #[error("entry is {0} bytes, shorter than its header")]
    Truncated(usize),

    #[error("bad magic")]
    BadMagic,

    #[error("unsupported entry version {0}")]
    Version(u16),

    #[error("entry kind {found} does not match key kind {expected}")]
    KindMismatch { expected: u8, found: u8 },

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("payload length {found} does not match header length {expected}")]
    Length { expected: u64, found: u64 },

    #[error("checksum mismatch")]
    Checksum,

    #[error("payload does not decode: {0}")]
    Decode(String),
}

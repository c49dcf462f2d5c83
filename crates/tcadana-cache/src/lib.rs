//! Content-addressed on-disk cache for tcadana.
//!
//! Entries are addressed by a [`CacheKey`]: a 32-byte [`Digest`] (normally
//! a run fingerprint), an [`EntryKind`], and a short tag. Payloads are
//! opaque bytes, zstd-compressed and framed with a BLAKE3 checksum.
//!
//! On-disk layout:
//!
//! ```text
//! <root>/v1/<first two hex chars>/<digest hex>--<kind>--<tag>.tce
//! ```
//!
//! # Guarantees
//!
//! - A committed entry is visible in full or not at all (write to a
//!   temporary file, then rename).
//! - At most one writer per key at a time; other keys are not blocked.
//! - Corrupt or truncated entries are removed and reported absent, never
//!   returned.
//! - Size and count bounds are enforced by evicting least recently used
//!   entries; entries being read are never evicted.
//!
//! # Example
//!
//! ```no_run
//! use tcadana_cache::{CacheConfig, CacheKey, CacheStore, Digest, EntryKind};
//!
//! let store = CacheStore::open(CacheConfig::new("/tmp/tcadana-cache"))?;
//! let key = CacheKey::new(Digest::of(b"device/variant/0"), EntryKind::Metric, "leakage")?;
//! store.put_typed(&key, &1.5e-9f64)?;
//! assert_eq!(store.get_typed::<f64>(&key), Some(1.5e-9));
//! # Ok::<(), tcadana_cache::CacheError>(())
//! ```

pub mod envelope;
pub mod error;
mod index;
pub mod key;
pub mod store;

pub use error::{CacheError, CorruptionError, Result};
pub use key::{CacheKey, Digest, EntryKind};
pub use store::{CacheConfig, CacheStats, CacheStore, PutOutcome};

//! Cache keys and their on-disk names.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Extension of committed entries.
pub const ENTRY_EXTENSION: &str = "tce";

/// 32-byte content digest addressing a group of entries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// BLAKE3 digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return Err(CacheError::InvalidKey(format!("digest '{}' is not 64 hex characters", s)));
        }
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| CacheError::InvalidKey(format!("digest '{}' is not hex", s)))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// What an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Fields,
    Curves,
    Metric,
    Manifest,
}

impl EntryKind {
    pub const ALL: [EntryKind; 4] = [
        EntryKind::Fields,
        EntryKind::Curves,
        EntryKind::Metric,
        EntryKind::Manifest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Fields => "fields",
            EntryKind::Curves => "curves",
            EntryKind::Metric => "metric",
            EntryKind::Manifest => "manifest",
        }
    }

    /// Byte stored in the entry header.
    pub fn code(&self) -> u8 {
        match self {
            EntryKind::Fields => 1,
            EntryKind::Curves => 2,
            EntryKind::Metric => 3,
            EntryKind::Manifest => 4,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        EntryKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CacheError::InvalidKey(format!("unknown entry kind '{}'", s)))
    }
}

/// Address of one cache entry: (digest, kind, tag).
///
/// The tag distinguishes entries of the same kind for the same digest, e.g.
/// a parse-option digest or a metric slug. It is limited to
/// `[A-Za-z0-9._-]` so it can be part of a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub digest: Digest,
    pub kind: EntryKind,
    pub tag: String,
}

impl CacheKey {
    pub fn new(digest: Digest, kind: EntryKind, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        let valid = !tag.is_empty()
            && !tag.contains("--")
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(CacheError::InvalidKey(format!("tag '{}'", tag)));
        }
        Ok(Self { digest, kind, tag })
    }

    /// `<hex>--<kind>--<tag>.tce`
    pub fn file_name(&self) -> String {
        format!(
            "{}--{}--{}.{}",
            self.digest.to_hex(),
            self.kind,
            self.tag,
            ENTRY_EXTENSION
        )
    }

    /// Path relative to the versioned cache root: `<aa>/<file name>`.
    pub fn relative_path(&self) -> PathBuf {
        let hex = self.digest.to_hex();
        Path::new(&hex[..2]).join(self.file_name())
    }

    /// Recover a key from an entry file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(ENTRY_EXTENSION)?.strip_suffix('.')?;
        let mut parts = stem.splitn(3, "--");
        let digest = Digest::from_hex(parts.next()?).ok()?;
        let kind = parts.next()?.parse().ok()?;
        let tag = parts.next()?;
        CacheKey::new(digest, kind, tag).ok()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}--{}", &self.digest.to_hex()[..12], self.kind, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let key = CacheKey::new(Digest::of(b"run"), EntryKind::Metric, "breakdown_voltage-1-abc").unwrap();
        let name = key.file_name();
        assert!(name.ends_with("--metric--breakdown_voltage-1-abc.tce"));
        assert_eq!(CacheKey::from_file_name(&name), Some(key.clone()));
        assert_eq!(
            key.relative_path().parent().unwrap(),
            Path::new(&key.digest.to_hex()[..2])
        );
    }

    #[test]
    fn test_invalid_tags() {
        let d = Digest::of(b"x");
        assert!(CacheKey::new(d, EntryKind::Fields, "").is_err());
        assert!(CacheKey::new(d, EntryKind::Fields, "a/b").is_err());
        assert!(CacheKey::new(d, EntryKind::Fields, "a--b").is_err());
        assert!(CacheKey::from_file_name("junk.tce").is_none());
        assert!(CacheKey::from_file_name("tmp.partial").is_none());
    }

    #[test]
    fn test_digest_hex() {
        let d = Digest::of(b"hello");
        assert_eq!(Digest::from_hex(&d.to_hex()).unwrap(), d);
        assert!(Digest::from_hex("00").is_err());
    }
}

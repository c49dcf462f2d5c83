//! Simulation run identity and content fingerprints.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::format::FormatTag;

/// Identity of a simulation run: device, process/split variant and run index.
///
/// Serialized as `device/variant/index` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId {
    pub device: String,
    pub variant: String,
    pub index: u32,
}

impl RunId {
    /// Create a run identity. Components may not contain `/` or be empty.
    pub fn new(device: impl Into<String>, variant: impl Into<String>, index: u32) -> Result<Self> {
        let device = device.into();
        let variant = variant.into();
        for part in [&device, &variant] {
            if part.is_empty() || part.contains('/') {
                return Err(Error::InvalidRunId(format!("{}/{}/{}", device, variant, index)));
            }
        }
        Ok(Self {
            device,
            variant,
            index,
        })
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device, self.variant, self.index)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidRunId(s.to_string()));
        }
        let index = parts[2]
            .parse::<u32>()
            .map_err(|_| Error::InvalidRunId(s.to_string()))?;
        RunId::new(parts[0], parts[1], index)
    }
}

impl TryFrom<String> for RunId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.to_string()
    }
}

/// BLAKE3 content fingerprint of a run's inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding (64 characters).
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex characters, for logs and reports.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return Err(Error::InvalidFingerprint(s.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| Error::InvalidFingerprint(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FingerprintVisitor;

        impl<'de> Visitor<'de> for FingerprintVisitor {
            type Value = Fingerprint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-byte fingerprint or its hex encoding")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Fingerprint, E> {
                Fingerprint::from_hex(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Fingerprint, E> {
                let bytes: [u8; 32] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Fingerprint(bytes))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Fingerprint, A::Error> {
                let mut bytes = [0u8; 32];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(Fingerprint(bytes))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(FingerprintVisitor)
        } else {
            deserializer.deserialize_bytes(FingerprintVisitor)
        }
    }
}

/// Incremental fingerprint computation.
///
/// Feed sources in a deterministic order (sorted by relative path); the
/// builder itself does not sort.
pub struct FingerprintBuilder {
    hasher: blake3::Hasher,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"tcadana-run-v1\0");
        Self { hasher }
    }

    /// Mix in a source file's metadata (path, size, modification time).
    pub fn add_metadata(&mut self, source: &SourceFile) -> &mut Self {
        self.add_path(source);
        self.hasher.update(&source.size.to_le_bytes());
        self.hasher.update(&source.modified_secs.to_le_bytes());
        self.hasher.update(&source.modified_nanos.to_le_bytes());
        self
    }

    /// Mix in a source file's path and full content.
    pub fn add_content(&mut self, source: &SourceFile, content: &[u8]) -> &mut Self {
        self.add_path(source);
        self.hasher.update(&(content.len() as u64).to_le_bytes());
        self.hasher.update(content);
        self
    }

    /// Mix in a content digest computed elsewhere (streamed hashing of large files).
    pub fn add_content_digest(&mut self, source: &SourceFile, digest: &[u8; 32]) -> &mut Self {
        self.add_path(source);
        self.hasher.update(digest);
        self
    }

    fn add_path(&mut self, source: &SourceFile) {
        // Forward slashes so fingerprints agree across platforms.
        let rel = source.relative_path.to_string_lossy().replace('\\', "/");
        self.hasher.update(&(rel.len() as u64).to_le_bytes());
        self.hasher.update(rel.as_bytes());
        let tag = source.format.map(|f| f.as_str()).unwrap_or("-");
        self.hasher.update(tag.as_bytes());
        self.hasher.update(b"\0");
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(*self.hasher.finalize().as_bytes())
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A dump file belonging to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Absolute (or caller-relative) path used to open the file.
    pub path: PathBuf,
    /// Path relative to the run directory; this is what gets fingerprinted.
    pub relative_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub modified_secs: u64,
    /// Sub-second part of the modification time.
    pub modified_nanos: u32,
    /// Declared or sniffed format, if known at discovery time.
    pub format: Option<FormatTag>,
}

/// A discovered, fingerprinted simulation run.
///
/// Rebuilt on every invocation by re-scanning inputs; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub id: RunId,
    pub root: PathBuf,
    pub sources: Vec<SourceFile>,
    pub fingerprint: Fingerprint,
}

impl SimulationRun {
    pub fn new(id: RunId, root: PathBuf, sources: Vec<SourceFile>, fingerprint: Fingerprint) -> Self {
        Self {
            id,
            root,
            sources,
            fingerprint,
        }
    }

    /// Relative source paths, for lineage records.
    pub fn source_list(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.relative_path.to_string_lossy().replace('\\', "/"))
            .collect()
    }
}

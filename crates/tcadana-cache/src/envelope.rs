//! Entry framing.
//!
//! Every committed entry is a fixed header followed by a zstd frame:
//!
//! ```text
//! magic "TCAC" | version u16 LE | kind u8 | reserved u8 | raw length u64 LE | blake3(raw) 32 bytes | zstd(raw)
//! ```
//!
//! The checksum covers the uncompressed payload, so a flipped bit in either
//! the header or the compressed body is caught on read.

use crate::error::{CacheError, CorruptionError, Result};
use crate::key::EntryKind;

pub const MAGIC: &[u8; 4] = b"TCAC";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 32;

/// Payloads larger than this are refused on read, whatever the header says.
const MAX_RAW_LEN: u64 = 1 << 34;

/// Frame `payload` for storage under an entry of `kind`.
pub fn encode(kind: EntryKind, payload: &[u8], level: i32) -> Result<Vec<u8>> {
    let compressed = zstd::encode_all(payload, level)
        .map_err(|e| CacheError::Serialization(format!("zstd: {}", e)))?;
    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.push(kind.code());
    out.push(0);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(blake3::hash(payload).as_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Validate and unpack an entry read from disk.
pub fn decode(kind: EntryKind, bytes: &[u8]) -> std::result::Result<Vec<u8>, CorruptionError> {
    if bytes.len() < HEADER_LEN {
        return Err(CorruptionError::Truncated(bytes.len()));
    }
    if &bytes[..4] != MAGIC {
        return Err(CorruptionError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(CorruptionError::Version(version));
    }
    if bytes[6] != kind.code() {
        return Err(CorruptionError::KindMismatch {
            expected: kind.code(),
            found: bytes[6],
        });
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[8..16]);
    let raw_len = u64::from_le_bytes(len);
    if raw_len > MAX_RAW_LEN {
        return Err(CorruptionError::Length {
            expected: MAX_RAW_LEN,
            found: raw_len,
        });
    }
    let checksum = &bytes[16..HEADER_LEN];

    let payload = zstd::decode_all(&bytes[HEADER_LEN..])
        .map_err(|e| CorruptionError::Decompress(e.to_string()))?;
    if payload.len() as u64 != raw_len {
        return Err(CorruptionError::Length {
            expected: raw_len,
            found: payload.len() as u64,
        });
    }
    if blake3::hash(&payload).as_bytes() != checksum {
        return Err(CorruptionError::Checksum);
    }
    Ok(payload)
}

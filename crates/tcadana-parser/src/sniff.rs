//! Format detection by header signature.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tcadana_core::FormatTag;

use crate::error::{Error, Result, UnsupportedFormatError};

/// Bytes examined when sniffing.
pub const SNIFF_LEN: usize = 512;

const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

/// Detect the format of `path` from its first bytes.
pub fn sniff_file(path: &Path) -> Result<FormatTag> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| Error::io(path, e))?;
    sniff_bytes(path, &head)
}

/// Detect the format from the leading bytes of a file.
pub fn sniff_bytes(path: &Path, head: &[u8]) -> Result<FormatTag> {
    let unsupported = |reason: &str| {
        Error::UnsupportedFormat(UnsupportedFormatError {
            path: path.to_path_buf(),
            signature: signature_of(head),
            reason: reason.to_string(),
        })
    };

    if head.starts_with(HDF5_MAGIC) {
        return Ok(FormatTag::TdrHdf5);
    }

    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}');
    let first = text.lines().next().unwrap_or("").trim();

    if first == "DF-ISE text" {
        return Ok(FormatTag::DfiseXyPlot);
    }
    if let Some(rest) = first.strip_prefix('#') {
        let mut words = rest.split_whitespace();
        if words.next() == Some("tcadgrid") {
            return match words.next() {
                Some("1.0") => Ok(FormatTag::GridV1),
                Some("2.0") => Ok(FormatTag::GridV2),
                Some(v) => Err(unsupported(&format!("grid version {} is not supported", v))),
                None => Err(unsupported("grid header has no version")),
            };
        }
    }
    if text.trim_start().starts_with('{') {
        return Ok(FormatTag::QaJson);
    }
    Err(unsupported("no known header signature"))
}

/// Resolve the format to parse with, given an optional declared tag.
///
/// A declared tag must agree with the sniffed one; there is no best-effort
/// reinterpretation.
pub fn resolve_format(path: &Path, declared: Option<FormatTag>) -> Result<FormatTag> {
    let sniffed = sniff_file(path)?;
    match declared {
        Some(tag) if tag != sniffed => Err(Error::UnsupportedFormat(UnsupportedFormatError {
            path: path.to_path_buf(),
            signature: sniffed.to_string(),
            reason: format!("declared as {} but the header is {}", tag, sniffed),
        })),
        _ => Ok(sniffed),
    }
}

fn signature_of(head: &[u8]) -> String {
    let line = head.split(|&b| b == b'\n').next().unwrap_or(&[]);
    let line = &line[..line.len().min(40)];
    String::from_utf8_lossy(line).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniff(head: &[u8]) -> Result<FormatTag> {
        sniff_bytes(Path::new("f"), head)
    }

    #[test]
    fn test_signatures() {
        assert_eq!(sniff(b"DF-ISE text\n\nInfo {").unwrap(), FormatTag::DfiseXyPlot);
        assert_eq!(sniff(b"# tcadgrid 1.0\nquantity").unwrap(), FormatTag::GridV1);
        assert_eq!(sniff(b"# tcadgrid 2.0\n").unwrap(), FormatTag::GridV2);
        assert_eq!(sniff(b"  {\"Metadata\": {}}").unwrap(), FormatTag::QaJson);
        assert_eq!(sniff(b"\x89HDF\r\n\x1a\n\0\0").unwrap(), FormatTag::TdrHdf5);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = sniff(b"# tcadgrid 3.0\n").unwrap_err();
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("3.0"));
    }

    #[test]
    fn test_unknown_signature_rejected() {
        assert!(sniff(b"x y value\n0 0 1\n").unwrap_err().is_unsupported());
        assert!(sniff(b"").unwrap_err().is_unsupported());
    }
}

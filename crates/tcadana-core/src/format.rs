//! Closed set of simulation dump formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A supported (or recognized but rejected) dump format.
///
/// Each variant corresponds to exactly one header signature. Parsers dispatch
/// on this tag; anything that does not sniff as one of these is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatTag {
    /// DF-ISE text `xyplot` file (device curves, `.plt`).
    #[serde(rename = "dfise_xyplot")]
    DfiseXyPlot,
    /// Single-field text grid dump, version 1.0.
    GridV1,
    /// Multi-field block grid dump with shared vertices, version 2.0.
    GridV2,
    /// Measurement export in QA JSON form (I-V or C-V).
    QaJson,
    /// TDR container (HDF5). Recognized so it can be rejected explicitly.
    TdrHdf5,
}

impl FormatTag {
    pub const ALL: [FormatTag; 5] = [
        FormatTag::DfiseXyPlot,
        FormatTag::GridV1,
        FormatTag::GridV2,
        FormatTag::QaJson,
        FormatTag::TdrHdf5,
    ];

    /// Stable short name used in configuration files and cache tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::DfiseXyPlot => "dfise_xyplot",
            FormatTag::GridV1 => "grid_v1",
            FormatTag::GridV2 => "grid_v2",
            FormatTag::QaJson => "qa_json",
            FormatTag::TdrHdf5 => "tdr_hdf5",
        }
    }

    /// Whether this format yields field (grid) records.
    pub fn is_grid(&self) -> bool {
        matches!(self, FormatTag::GridV1 | FormatTag::GridV2 | FormatTag::TdrHdf5)
    }

    /// Whether this format yields curve records.
    pub fn is_curve(&self) -> bool {
        matches!(self, FormatTag::DfiseXyPlot | FormatTag::QaJson)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        FormatTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == lower)
            .ok_or_else(|| Error::UnknownFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names_round_trip() {
        for tag in FormatTag::ALL {
            assert_eq!(tag.as_str().parse::<FormatTag>().unwrap(), tag);
        }
        assert!("hdf5".parse::<FormatTag>().is_err());
    }

    #[test]
    fn test_serde_matches_display() {
        for tag in FormatTag::ALL {
            assert_eq!(serde_json::to_string(&tag).unwrap(), format!("\"{}\"", tag));
        }
    }

    #[test]
    fn test_tag_classes() {
        assert!(FormatTag::GridV2.is_grid());
        assert!(!FormatTag::GridV2.is_curve());
        assert!(FormatTag::QaJson.is_curve());
    }
}

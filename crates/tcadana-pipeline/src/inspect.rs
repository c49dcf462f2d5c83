//! Single-file inspection: detected format and a summary of its records.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tcadana_core::{AnalysisConfig, FormatTag, Record};
use tcadana_parser::RecordReader;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub name: String,
    /// `field` or `curve`.
    pub kind: String,
    pub unit: String,
    pub points: usize,
    /// Coordinate or bias range, per axis.
    pub ranges: Vec<(f64, f64)>,
    pub non_finite: usize,
}

impl RecordSummary {
    fn of(record: &Record) -> Self {
        match record {
            Record::Field(field) => Self {
                name: field.name.clone(),
                kind: "field".into(),
                unit: field.unit.clone(),
                points: field.len(),
                ranges: field.bounds(),
                non_finite: field.non_finite,
            },
            Record::Curve(curve) => Self {
                name: curve.name.clone(),
                kind: "curve".into(),
                unit: format!("{} vs {}", curve.y_unit, curve.x_unit),
                points: curve.len(),
                ranges: curve.bias_range().into_iter().collect(),
                non_finite: curve.non_finite,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub format: FormatTag,
    pub records: Vec<RecordSummary>,
    pub warnings: Vec<String>,
}

impl FileSummary {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", self.path.display(), self.format);
        for record in &self.records {
            let ranges: Vec<String> = record
                .ranges
                .iter()
                .map(|(lo, hi)| format!("[{:.4e}, {:.4e}]", lo, hi))
                .collect();
            let _ = writeln!(
                out,
                "  {} {} ({}): {} points {}",
                record.kind,
                record.name,
                record.unit,
                record.points,
                ranges.join(" ")
            );
            if record.non_finite > 0 {
                let _ = writeln!(out, "    {} non-finite values", record.non_finite);
            }
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "  warning: {}", warning);
        }
        out
    }
}

/// Sniff (or check the declared format of) `path` and summarize every record.
pub fn inspect_file(path: &Path, declared: Option<FormatTag>, config: &AnalysisConfig) -> Result<FileSummary> {
    let mut reader = RecordReader::open(path, declared, config)?;
    let format = reader.format();
    let mut records = Vec::new();
    for record in reader.by_ref() {
        records.push(RecordSummary::of(&record?));
    }
    let warnings = reader.take_warnings().iter().map(|w| w.to_string()).collect();
    Ok(FileSummary {
        path: path.to_path_buf(),
        format,
        records,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.grd");
        std::fs::write(
            &path,
            "# tcadgrid 1.0\nquantity ElectricField V/cm\ndimension 1\ndata\n0 1\n2 nan\n",
        )
        .unwrap();

        let summary = inspect_file(&path, None, &AnalysisConfig::default()).unwrap();
        assert_eq!(summary.format, FormatTag::GridV1);
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].kind, "field");
        assert_eq!(summary.records[0].points, 2);
        assert_eq!(summary.records[0].non_finite, 1);
        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.to_text().contains("grid_v1"));
    }
}

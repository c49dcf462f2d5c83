//! Explicit, versioned analysis configuration.
//!
//! Nothing in the parsers or the metric engine reads process-wide state:
//! everything that can change a result lives in [`AnalysisConfig`] and is
//! passed into each call. The digests below are mixed into cache tags so a
//! configuration change never serves results computed under another one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::UnitTable;

/// Configuration schema version (increment on breaking changes).
pub const CONFIG_VERSION: u32 = 1;

/// Options that influence how dump files become records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// DF-ISE dataset used as the independent axis. `None` picks the first
    /// dataset whose name ends in `OuterVoltage`.
    #[serde(default)]
    pub bias_dataset: Option<String>,
    /// Temperature (K) attached to curves whose source carries none.
    #[serde(default)]
    pub default_temperature: Option<f64>,
    /// Treat NaN/Inf samples as a parse error instead of a warning.
    #[serde(default)]
    pub reject_non_finite: bool,
    /// QA JSON metadata key/value pairs a file must match to yield records.
    #[serde(default)]
    pub qa_metadata_filter: BTreeMap<String, String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            bias_dataset: None,
            default_temperature: None,
            reject_non_finite: false,
            qa_metadata_filter: BTreeMap::new(),
        }
    }
}

/// Parameters of the metric rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricParams {
    /// Current magnitude (A) defining breakdown.
    pub breakdown_current: f64,
    /// Bias magnitude (V) at which leakage current is reported.
    pub reference_voltage: f64,
    /// Trailing samples averaged for the 1/C² plateau.
    pub plateau_points: usize,
    /// Samples below this fraction of the plateau form the rising 1/C² line.
    pub rise_fraction: f64,
    /// Axis held fixed by the cutline (0 = x, 1 = y).
    pub cutline_axis: usize,
    /// Cutline position along `cutline_axis` (um).
    pub cutline_position: f64,
    /// Half-width of the cutline band (um).
    pub cutline_tolerance: f64,
    /// Field magnitude, as a fraction of the peak, that bounds the depleted zone.
    pub depletion_fraction: f64,
    /// Relative step below which two samples are treated as coincident.
    pub interpolation_tolerance: f64,
    /// Centered moving-average window applied to curves before root finding (1 = off).
    pub smoothing_window: usize,
    /// Grid samples per parallel work chunk.
    pub chunk_size: usize,
}

impl Default for MetricParams {
    fn default() -> Self {
        Self {
            breakdown_current: 1e-6,
            reference_voltage: 500.0,
            plateau_points: 5,
            rise_fraction: 0.8,
            cutline_axis: 0,
            cutline_position: 0.0,
            cutline_tolerance: 1.0,
            depletion_fraction: 0.05,
            interpolation_tolerance: 1e-12,
            smoothing_window: 1,
            chunk_size: 1 << 16,
        }
    }
}

impl MetricParams {
    pub fn with_breakdown_current(mut self, current: f64) -> Self {
        self.breakdown_current = current;
        self
    }

    pub fn with_reference_voltage(mut self, voltage: f64) -> Self {
        self.reference_voltage = voltage;
        self
    }

    pub fn with_cutline(mut self, axis: usize, position: f64, tolerance: f64) -> Self {
        self.cutline_axis = axis;
        self.cutline_position = position;
        self.cutline_tolerance = tolerance;
        self
    }

    pub fn with_smoothing_window(mut self, window: usize) -> Self {
        self.smoothing_window = window.max(1);
        self
    }
}

/// Complete analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub version: u32,
    #[serde(default)]
    pub units: UnitTable,
    #[serde(default)]
    pub parse: ParseOptions,
    #[serde(default)]
    pub metrics: MetricParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            units: UnitTable::default(),
            parse: ParseOptions::default(),
            metrics: MetricParams::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn with_parse_options(mut self, parse: ParseOptions) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_metric_params(mut self, metrics: MetricParams) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_units(mut self, units: UnitTable) -> Self {
        self.units = units;
        self
    }

    /// Digest of everything that affects parsing (version, units, parse options).
    pub fn parse_digest(&self) -> Result<String> {
        digest_hex(&(self.version, &self.units, &self.parse))
    }

    /// Digest of everything that affects a metric value: the parsing
    /// options that shape its input records plus the metric parameters.
    pub fn metric_digest(&self) -> Result<String> {
        digest_hex(&(self.version, &self.units, &self.parse, &self.metrics))
    }
}

/// 16-hex-character BLAKE3 digest of a value's bincode encoding.
///
/// bincode's default encoding is fixed-width little-endian, so the digest is
/// the same on every platform.
pub fn digest_hex<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = bincode::serialize(value).map_err(|e| Error::Digest(e.to_string()))?;
    let hash = blake3::hash(&bytes);
    Ok(hash.to_hex()[..16].to_string())
}

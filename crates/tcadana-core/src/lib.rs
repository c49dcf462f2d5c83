//! Core data model for tcadana.
//!
//! This crate provides the normalized representation shared by the parsers,
//! the derived-quantity engine and the pipeline:
//! - simulation run identity and content fingerprints
//! - field (grid) and curve (sweep) records
//! - derived metrics with their lineage
//! - units and the explicit, versioned analysis configuration

pub mod config;
pub mod error;
pub mod format;
pub mod metric;
pub mod record;
pub mod run;
pub mod units;

pub use config::{AnalysisConfig, CONFIG_VERSION, MetricParams, ParseOptions, digest_hex};
pub use error::{Error, Result};
pub use format::FormatTag;
pub use metric::{DerivedMetric, MetricValue};
pub use record::{CurveQuantity, CurveRecord, FieldRecord, Record, SourceRef};
pub use run::{Fingerprint, FingerprintBuilder, RunId, SimulationRun, SourceFile};
pub use units::{QuantityClass, UnitRule, UnitTable};

//! tcadana: ingestion, derived metrics and caching for TCAD simulation output.
//!
//! This crate re-exports the workspace libraries:
//!
//! | Module | Crate | Contents |
//! |--------|-------|----------|
//! | [`model`] | `tcadana-core` | runs, fingerprints, records, units, configuration |
//! | [`parser`] | `tcadana-parser` | streaming readers for DF-ISE, grid and QA JSON dumps |
//! | [`metrics`] | `tcadana-metrics` | breakdown, leakage, depletion and field metrics |
//! | [`cache`] | `tcadana-cache` | compressed, content-addressed on-disk store |
//! | [`pipeline`] | `tcadana-pipeline` | batch orchestration and reports |
//!
//! The most used types are also available from the [`prelude`].

pub use tcadana_cache as cache;
pub use tcadana_core as model;
pub use tcadana_metrics as metrics;
pub use tcadana_parser as parser;
pub use tcadana_pipeline as pipeline;

pub mod prelude {
    pub use tcadana_cache::{CacheConfig, CacheStore};
    pub use tcadana_core::{
        AnalysisConfig, CurveRecord, DerivedMetric, FieldRecord, Fingerprint, FormatTag, MetricParams,
        MetricValue, Record, RunId,
    };
    pub use tcadana_metrics::{MetricEngine, MetricKind};
    pub use tcadana_parser::{RecordReader, parse_file};
    pub use tcadana_pipeline::{BatchReport, CancellationToken, Pipeline, PipelineConfig};
}

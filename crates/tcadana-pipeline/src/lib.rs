//! Batch pipeline for tcadana.
//!
//! Ties discovery, parsing, metric evaluation and the compressed cache
//! together. For each run:
//!
//! ```text
//! Discovered → Fingerprinted → CacheHit ─────────────────────→ Done
//!                            ↘ Parsing → Computing → Cached ↗
//!                                  ↘         ↘
//!                                   Failed    Failed (every metric failed)
//! ```
//!
//! Runs are independent: a failure in one never affects another, and the
//! batch always yields a [`BatchReport`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use tcadana_metrics::MetricKind;
//! use tcadana_pipeline::{CancellationToken, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::default().with_cache_dir("/tmp/tcadana-cache");
//! let pipeline = Pipeline::new(config)?;
//! let report = pipeline.analyze(
//!     Path::new("/data/sensors"),
//!     &[MetricKind::BreakdownVoltage, MetricKind::LeakageCurrent],
//!     &CancellationToken::new(),
//! )?;
//! println!("{}", report.to_text());
//! # Ok::<(), tcadana_pipeline::Error>(())
//! ```

pub mod cancel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod inspect;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod retry;

pub use cancel::CancellationToken;
pub use config::{FingerprintMode, PipelineConfig, StalePolicy};
pub use discovery::{RunSpec, SkippedFile, discover_runs};
pub use error::{Error, Result};
pub use inspect::{FileSummary, RecordSummary, inspect_file};
pub use orchestrator::{Pipeline, RunManifest, cache_digest};
pub use progress::{ProgressObserver, ProgressSnapshot, ProgressTracker, RunPhase};
pub use report::{BatchReport, BatchSummary, FailureCause, LineageRecord, MetricCell, MetricError, MetricTable, RunReport};
pub use retry::RetryPolicy;

//! Batch orchestration.
//!
//! For each run: fingerprint, look up every requested metric in the cache,
//! and only for the missing ones load the record sets they need (from the
//! cache, else by parsing), compute, and write back. Runs are independent
//! and processed on a dedicated rayon pool.

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tcadana_cache::{CacheError, CacheKey, CacheStore, Digest, EntryKind};
use tcadana_core::{DerivedMetric, Fingerprint, FormatTag, Record, RunId, SimulationRun, SourceFile};
use tcadana_metrics::{ComputationError, MetricEngine, MetricKind, RunOutcome};
use tcadana_parser::RecordReader;

use crate::cancel::CancellationToken;
use crate::config::{PipelineConfig, StalePolicy};
use crate::discovery::{RunSpec, discover_runs};
use crate::error::{Error, Result};
use crate::progress::{ProgressObserver, ProgressTracker, RunPhase};
use crate::report::{BatchReport, FailureCause, MetricError, RunReport};

/// Cache digest addressing the artifacts of a run fingerprint.
pub fn cache_digest(fingerprint: &Fingerprint) -> Digest {
    Digest(*fingerprint.as_bytes())
}

/// Last fingerprint seen for a run identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub fingerprint: Fingerprint,
    pub sources: Vec<String>,
}

/// Parsed contents of one source file, as cached.
#[derive(Serialize, Deserialize)]
struct RecordSet {
    records: Vec<Record>,
    warnings: Vec<String>,
}

/// Why a source file produced no records.
enum LoadFailure {
    /// Not parseable as its format; carries the warning to report.
    Unsupported(String),
    Failed(FailureCause),
}

/// Failure of a value produced under a cache key lock.
enum Produce<E> {
    Failed(E),
    Cache(CacheError),
}

impl<E> From<CacheError> for Produce<E> {
    fn from(e: CacheError) -> Self {
        Produce::Cache(e)
    }
}

fn manifest_key(id: &RunId) -> Result<CacheKey> {
    Ok(CacheKey::new(Digest::of(id.to_string().as_bytes()), EntryKind::Manifest, "run")?)
}

pub struct Pipeline {
    config: PipelineConfig,
    cache: Option<CacheStore>,
    engine: MetricEngine,
    parse_digest: String,
    pool: rayon::ThreadPool,
    tracker: ProgressTracker,
    files_parsed: AtomicU64,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let cache = if config.use_cache {
            Some(CacheStore::open(config.cache.clone())?)
        } else {
            None
        };
        let engine = MetricEngine::for_analysis(&config.analysis)?;
        let parse_digest = config.analysis.parse_digest()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .thread_name(|i| format!("tcadana-worker-{}", i))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        Ok(Self {
            config,
            cache,
            engine,
            parse_digest,
            pool,
            tracker: ProgressTracker::new(),
            files_parsed: AtomicU64::new(0),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.tracker = ProgressTracker::new().with_observer(observer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Source files parsed since this pipeline was created.
    pub fn files_parsed(&self) -> u64 {
        self.files_parsed.load(Ordering::Relaxed)
    }

    pub fn discover(&self, root: &Path) -> Result<Vec<RunSpec>> {
        discover_runs(root, &self.config)
    }

    /// Discover the runs under `root` and process them.
    pub fn analyze(&self, root: &Path, metrics: &[MetricKind], cancel: &CancellationToken) -> Result<BatchReport> {
        let runs = self.discover(root)?;
        Ok(self.run(&runs, metrics, cancel))
    }

    /// Process `runs`. Never fails as a whole: per-run failures are in the
    /// report.
    pub fn run(&self, runs: &[RunSpec], metrics: &[MetricKind], cancel: &CancellationToken) -> BatchReport {
        let mut requested: Vec<MetricKind> = Vec::with_capacity(metrics.len());
        for kind in metrics {
            if !requested.contains(kind) {
                requested.push(*kind);
            }
        }

        self.tracker.start(runs.iter().map(|r| &r.id));
        log::info!(
            "Processing {} runs ({} metrics, {} threads)",
            runs.len(),
            requested.len(),
            self.pool.current_num_threads()
        );

        let reports: Vec<RunReport> = self.pool.install(|| {
            runs.par_iter()
                .map(|spec| {
                    if cancel.is_cancelled() {
                        self.tracker.set(&spec.id, RunPhase::Cancelled);
                        return RunReport::cancelled(spec.id.clone());
                    }
                    self.process_run(spec, &requested)
                })
                .collect()
        });

        let mut batch = BatchReport::new(requested.iter().map(|k| k.name().to_string()).collect());
        for report in reports {
            batch.insert(report);
        }
        let summary = batch.summary();
        log::info!(
            "Batch finished: {} done, {} failed, {} cancelled ({} from cache, {} files parsed)",
            summary.done,
            summary.failed,
            summary.cancelled,
            summary.cache_hits,
            summary.files_parsed
        );
        batch
    }

    fn process_run(&self, spec: &RunSpec, metrics: &[MetricKind]) -> RunReport {
        let mut report = RunReport::new(spec.id.clone());
        report.skipped = spec.skipped.clone();

        let run = match spec.fingerprint(self.config.fingerprint_mode) {
            Ok(run) => run,
            Err(e) => {
                let cause = FailureCause::Io { message: e.to_string() };
                return self.fail(report, cause);
            }
        };
        report.fingerprint = Some(run.fingerprint);
        report.sources = run.source_list();
        self.tracker.set(&run.id, RunPhase::Fingerprinted);
        self.check_manifest(&run, &mut report);

        let mut missing = Vec::new();
        for &kind in metrics {
            match self.cached_metric(kind, &run.fingerprint) {
                Some(metric) => {
                    report.metrics.insert(kind.name().to_string(), metric);
                }
                None => missing.push(kind),
            }
        }
        if missing.is_empty() {
            report.cache_hit = true;
            self.tracker.set(&run.id, RunPhase::CacheHit);
            self.write_manifest(&run, &mut report);
            return self.finish(report);
        }

        self.tracker.set(&run.id, RunPhase::Parsing);
        let needs_fields = missing.iter().any(|k| k.needs_fields());
        let needs_curves = missing.iter().any(|k| !k.needs_fields());
        let mut records = Vec::new();
        for source in &run.sources {
            let Some(format) = source.format else {
                continue;
            };
            if (format.is_grid() && !needs_fields) || (format.is_curve() && !needs_curves) {
                continue;
            }
            match self.load_records(&run, source, format, &mut report) {
                Ok(Some(mut loaded)) => records.append(&mut loaded),
                Ok(None) => {}
                Err(cause) => return self.fail(report, cause),
            }
        }

        self.tracker.set(&run.id, RunPhase::Computing);
        let mut outcome = RunOutcome::default();
        for kind in missing {
            let result = self.produce_metric(kind, &records, &run, &mut report);
            outcome.record(kind, result);
        }
        for metric in outcome.metrics {
            report.metrics.insert(metric.name.clone(), metric);
        }
        for failure in outcome.failures {
            log::debug!("{}: {} failed: {}", run.id, failure.metric, failure.error);
            report.metric_errors.push(MetricError {
                metric: failure.metric.name().to_string(),
                message: failure.error.to_string(),
            });
        }

        if report.metrics.is_empty() {
            let message = report
                .metric_errors
                .iter()
                .map(|e| format!("{}: {}", e.metric, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return self.fail(report, FailureCause::Computation { message });
        }

        self.tracker.set(&run.id, RunPhase::Cached);
        self.write_manifest(&run, &mut report);
        self.finish(report)
    }

    fn finish(&self, mut report: RunReport) -> RunReport {
        report.phase = RunPhase::Done;
        self.tracker.set(&report.id, RunPhase::Done);
        report
    }

    fn fail(&self, mut report: RunReport, cause: FailureCause) -> RunReport {
        log::warn!("{}: failed: {}", report.id, cause);
        report.phase = RunPhase::Failed;
        report.cause = Some(cause);
        self.tracker.set(&report.id, RunPhase::Failed);
        report
    }

    fn metric_key(&self, kind: MetricKind, fingerprint: &Fingerprint) -> Result<CacheKey> {
        let tag = format!("{}-v{}-{}", kind.name(), kind.rule_version(), self.engine.params_digest());
        Ok(CacheKey::new(cache_digest(fingerprint), EntryKind::Metric, tag)?)
    }

    fn records_key(&self, fingerprint: &Fingerprint, source: &SourceFile, format: FormatTag) -> Result<CacheKey> {
        let rel = source.relative_path.to_string_lossy().replace('\\', "/");
        let path_hash = blake3::hash(rel.as_bytes()).to_hex();
        let tag = format!("{}-{}", self.parse_digest, &path_hash[..16]);
        let kind = if format.is_grid() {
            EntryKind::Fields
        } else {
            EntryKind::Curves
        };
        Ok(CacheKey::new(cache_digest(fingerprint), kind, tag)?)
    }

    /// A cached metric for `kind`, if present and still valid for
    /// `fingerprint`. Invalid entries are dropped.
    fn cached_metric(&self, kind: MetricKind, fingerprint: &Fingerprint) -> Option<DerivedMetric> {
        let cache = self.cache.as_ref()?;
        if self.config.force {
            return None;
        }
        let key = self.metric_key(kind, fingerprint).ok()?;
        let metric: DerivedMetric = cache.get_typed(&key)?;
        if self.engine.is_current(&metric, kind, fingerprint) {
            Some(metric)
        } else {
            log::debug!("Dropping stale {} entry {}", kind, key);
            if let Err(e) = cache.remove(&key) {
                log::warn!("Failed to drop stale entry {}: {}", key, e);
            }
            None
        }
    }

    /// Compute one metric, at most once per cache key across every store
    /// sharing the cache directory. Without a usable cache the metric is
    /// computed in memory.
    fn produce_metric(
        &self,
        kind: MetricKind,
        records: &[Record],
        run: &SimulationRun,
        report: &mut RunReport,
    ) -> std::result::Result<DerivedMetric, ComputationError> {
        let compute = || self.engine.compute(kind, records, run.fingerprint);
        let key = self.metric_key(kind, &run.fingerprint).ok();
        let (Some(cache), Some(key)) = (&self.cache, key) else {
            return compute();
        };
        if self.config.force {
            let metric = compute()?;
            self.write_back(&key, &metric, report);
            return Ok(metric);
        }

        match cache.get_or_insert_typed(&key, || compute().map_err(Produce::Failed)) {
            Ok((metric, _)) if self.engine.is_current(&metric, kind, &run.fingerprint) => Ok(metric),
            Ok(_) => {
                let metric = compute()?;
                self.write_back_replace(&key, &metric, report);
                Ok(metric)
            }
            Err(Produce::Failed(e)) => Err(e),
            Err(Produce::Cache(e)) => {
                self.note_cache_unavailable(&key, &e, report);
                compute()
            }
        }
    }

    fn note_cache_unavailable(&self, key: &CacheKey, e: &CacheError, report: &mut RunReport) {
        log::warn!("{}: cache unavailable for {}: {}", report.id, key, e);
        report.warnings.push(format!("cache unavailable for {}: {}", key, e));
    }

    /// Records of one source file. `Ok(None)` when the file turned out to
    /// be in an unsupported format (recorded as a warning). With a cache the
    /// file is parsed at most once per cache key, even across processes.
    fn load_records(
        &self,
        run: &SimulationRun,
        source: &SourceFile,
        format: FormatTag,
        report: &mut RunReport,
    ) -> std::result::Result<Option<Vec<Record>>, FailureCause> {
        let rel = source.relative_path.to_string_lossy().replace('\\', "/");
        let key = self.records_key(&run.fingerprint, source, format).ok();
        let parsed = Cell::new(false);
        let parse = || self.parse_source(run, source, format, &rel, &parsed);

        let loaded = match (&self.cache, &key) {
            (Some(cache), Some(key)) if !self.config.force => {
                match cache.get_or_insert_typed(key, || parse().map_err(Produce::Failed)) {
                    Ok((set, computed)) => {
                        if !computed {
                            log::trace!("{}: {} served from cache", run.id, rel);
                        }
                        Ok(set)
                    }
                    Err(Produce::Failed(failure)) => Err(failure),
                    Err(Produce::Cache(e)) => {
                        self.note_cache_unavailable(key, &e, report);
                        parse()
                    }
                }
            }
            _ => {
                let loaded = parse();
                if let (Ok(set), Some(key)) = (&loaded, &key) {
                    self.write_back(key, set, report);
                }
                loaded
            }
        };
        if parsed.get() {
            report.files_parsed += 1;
        }

        match loaded {
            Ok(set) => {
                report.warnings.extend(set.warnings);
                Ok(Some(set.records))
            }
            Err(LoadFailure::Unsupported(warning)) => {
                log::warn!("{}: skipping {}", run.id, warning);
                report.warnings.push(warning);
                Ok(None)
            }
            Err(LoadFailure::Failed(cause)) => Err(cause),
        }
    }

    /// Parse one source file. Sets `parsed` once the file has been opened.
    fn parse_source(
        &self,
        run: &SimulationRun,
        source: &SourceFile,
        format: FormatTag,
        rel: &str,
        parsed: &Cell<bool>,
    ) -> std::result::Result<RecordSet, LoadFailure> {
        let failed = |e: tcadana_parser::Error| {
            if e.is_unsupported() {
                LoadFailure::Unsupported(format!("{}: {}", rel, e))
            } else {
                LoadFailure::Failed(FailureCause::Parse {
                    file: rel.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let reader = RecordReader::open(&source.path, Some(format), &self.config.analysis).map_err(failed)?;
        let mut reader = reader.with_source_name(rel);
        self.files_parsed.fetch_add(1, Ordering::Relaxed);
        parsed.set(true);

        let records = reader
            .by_ref()
            .collect::<tcadana_parser::Result<Vec<_>>>()
            .map_err(failed)?;
        let warnings: Vec<String> = reader
            .take_warnings()
            .iter()
            .map(|w| format!("{}: {}", rel, w))
            .collect();
        log::debug!("{}: parsed {} ({} records)", run.id, rel, records.len());
        Ok(RecordSet { records, warnings })
    }

    /// Store an artifact, retrying on contention. On exhaustion the artifact
    /// stays in memory only and a warning is recorded.
    fn write_back<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, report: &mut RunReport) {
        self.store_artifact(key, value, self.config.force, report);
    }

    fn write_back_replace<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, report: &mut RunReport) {
        self.store_artifact(key, value, true, report);
    }

    fn store_artifact<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, replace: bool, report: &mut RunReport) {
        let Some(cache) = &self.cache else {
            return;
        };
        let result = self.config.retry.run(|| {
            if replace {
                cache.replace_typed(key, value)
            } else {
                cache.put_typed(key, value).map(|_| ())
            }
        });
        if let Err(e) = result {
            log::warn!("{}: cache write for {} failed: {}", report.id, key, e);
            report.warnings.push(format!("cache write for {} failed: {}", key, e));
        }
    }

    /// Compare against the last fingerprint seen for this run; under the
    /// eager policy drop everything cached for a superseded fingerprint.
    fn check_manifest(&self, run: &SimulationRun, report: &mut RunReport) {
        let Some(cache) = &self.cache else {
            return;
        };
        let Ok(key) = manifest_key(&run.id) else {
            return;
        };
        let Some(previous) = cache.get_typed::<RunManifest>(&key) else {
            return;
        };
        if previous.fingerprint == run.fingerprint {
            return;
        }
        log::info!(
            "{}: inputs changed ({} -> {})",
            run.id,
            previous.fingerprint.short(),
            run.fingerprint.short()
        );
        if self.config.stale_policy == StalePolicy::Eager {
            match cache.invalidate(&cache_digest(&previous.fingerprint)) {
                Ok(n) => log::debug!("{}: invalidated {} stale entries", run.id, n),
                Err(e) => report.warnings.push(format!("invalidating stale entries failed: {}", e)),
            }
        }
    }

    fn write_manifest(&self, run: &SimulationRun, report: &mut RunReport) {
        let Some(cache) = &self.cache else {
            return;
        };
        let Ok(key) = manifest_key(&run.id) else {
            return;
        };
        if let Some(existing) = cache.get_typed::<RunManifest>(&key) {
            if existing.fingerprint == run.fingerprint {
                return;
            }
        }
        let manifest = RunManifest {
            run_id: run.id.clone(),
            fingerprint: run.fingerprint,
            sources: run.source_list(),
        };
        let result = self.config.retry.run(|| cache.replace_typed(&key, &manifest));
        if let Err(e) = result {
            report.warnings.push(format!("manifest write failed: {}", e));
        }
    }
}

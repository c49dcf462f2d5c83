//! Batch results and their downstream views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tcadana_core::{DerivedMetric, Fingerprint, MetricValue, RunId};

use crate::discovery::SkippedFile;
use crate::progress::RunPhase;

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// A source file could not be parsed.
    Parse { file: String, message: String },
    /// Every requested metric failed.
    Computation { message: String },
    /// The run directory could not be read or fingerprinted.
    Io { message: String },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Parse { file, message } => write!(f, "parse error in {}: {}", file, message),
            FailureCause::Computation { message } => write!(f, "no metric could be computed: {}", message),
            FailureCause::Io { message } => write!(f, "I/O error: {}", message),
        }
    }
}

/// A metric that could not be computed for a run that otherwise succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricError {
    pub metric: String,
    pub message: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub id: RunId,
    /// Final phase: `Done`, `Failed` or `Cancelled`.
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Source files, relative to the run directory.
    pub sources: Vec<String>,
    pub metrics: BTreeMap<String, DerivedMetric>,
    pub metric_errors: Vec<MetricError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    pub skipped: Vec<SkippedFile>,
    pub warnings: Vec<String>,
    /// All requested metrics were served from the cache.
    pub cache_hit: bool,
    /// Source files actually parsed (not served from the cache).
    pub files_parsed: usize,
}

impl RunReport {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            phase: RunPhase::Discovered,
            fingerprint: None,
            sources: Vec::new(),
            metrics: BTreeMap::new(),
            metric_errors: Vec::new(),
            cause: None,
            skipped: Vec::new(),
            warnings: Vec::new(),
            cache_hit: false,
            files_parsed: 0,
        }
    }

    pub fn cancelled(id: RunId) -> Self {
        Self {
            phase: RunPhase::Cancelled,
            ..Self::new(id)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.phase == RunPhase::Failed
    }

    pub fn is_done(&self) -> bool {
        self.phase == RunPhase::Done
    }
}

/// A metric value with its unit, as consumed by reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricCell<'a> {
    pub value: MetricValue,
    pub unit: &'a str,
}

/// Run identity → metric name → (value, unit).
pub type MetricTable<'a> = BTreeMap<&'a RunId, BTreeMap<&'a str, MetricCell<'a>>>;

/// One metric with everything needed to trace it back to its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub run_id: RunId,
    pub fingerprint: Fingerprint,
    pub sources: Vec<String>,
    pub metric: String,
    pub value: MetricValue,
    pub unit: String,
    pub rule_version: u32,
    pub params_digest: String,
}

/// Summary statistics for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub cache_hits: usize,
    pub files_parsed: usize,
}

/// Complete batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Requested metric names.
    pub metrics: Vec<String>,
    pub runs: BTreeMap<RunId, RunReport>,
}

impl BatchReport {
    pub fn new(metrics: Vec<String>) -> Self {
        Self {
            metrics,
            runs: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, report: RunReport) {
        self.runs.insert(report.id.clone(), report);
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &RunReport> {
        self.runs.values().filter(|r| r.is_done())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunReport> {
        self.runs.values().filter(|r| r.is_failed())
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.runs.len(),
            ..Default::default()
        };
        for run in self.runs.values() {
            match run.phase {
                RunPhase::Done => summary.done += 1,
                RunPhase::Failed => summary.failed += 1,
                RunPhase::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            summary.cache_hits += run.cache_hit as usize;
            summary.files_parsed += run.files_parsed;
        }
        summary
    }

    /// Failed runs over attempted (non-cancelled) runs.
    pub fn failure_rate(&self) -> f64 {
        let summary = self.summary();
        let attempted = summary.total - summary.cancelled;
        if attempted == 0 {
            0.0
        } else {
            summary.failed as f64 / attempted as f64
        }
    }

    /// Whether the failure rate exceeds `threshold` (None = never).
    pub fn exceeds(&self, threshold: Option<f64>) -> bool {
        threshold.is_some_and(|t| self.failure_rate() > t)
    }

    pub fn metric_table(&self) -> MetricTable<'_> {
        self.runs
            .iter()
            .filter(|(_, run)| !run.metrics.is_empty())
            .map(|(id, run)| {
                let row = run
                    .metrics
                    .iter()
                    .map(|(name, m)| {
                        (
                            name.as_str(),
                            MetricCell {
                                value: m.value,
                                unit: m.unit.as_str(),
                            },
                        )
                    })
                    .collect();
                (id, row)
            })
            .collect()
    }

    pub fn lineage(&self) -> Vec<LineageRecord> {
        let mut out = Vec::new();
        for run in self.runs.values() {
            for metric in run.metrics.values() {
                out.push(LineageRecord {
                    run_id: run.id.clone(),
                    fingerprint: metric.input_fingerprint,
                    sources: run.sources.clone(),
                    metric: metric.name.clone(),
                    value: metric.value,
                    unit: metric.unit.clone(),
                    rule_version: metric.rule_version,
                    params_digest: metric.params_digest.clone(),
                });
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Format as human-readable text.
    pub fn to_text(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();

        out.push_str(&format!("Batch Report: {}\n", self.metrics.join(", ")));
        out.push_str(&format!(
            "Runs: {} done, {} failed, {} cancelled of {} ({} from cache, {} files parsed)\n\n",
            summary.done,
            summary.failed,
            summary.cancelled,
            summary.total,
            summary.cache_hits,
            summary.files_parsed
        ));

        for run in self.runs.values() {
            let fp = run.fingerprint.map(|f| f.short()).unwrap_or_else(|| "-".into());
            out.push_str(&format!("  {} [{}] {}\n", run.id, run.phase, fp));
            for (name, metric) in &run.metrics {
                out.push_str(&format!("    {}: {} {}\n", name, metric.value, metric.unit));
            }
            for err in &run.metric_errors {
                out.push_str(&format!("    {}: error: {}\n", err.metric, err.message));
            }
            if let Some(cause) = &run.cause {
                out.push_str(&format!("    cause: {}\n", cause));
            }
            for skipped in &run.skipped {
                out.push_str(&format!("    skipped {}: {}\n", skipped.relative_path, skipped.reason));
            }
            for warning in &run.warnings {
                out.push_str(&format!("    warning: {}\n", warning));
            }
        }

        if summary.failed > 0 {
            out.push_str("\nFailed runs:\n");
            for run in self.failed() {
                out.push_str(&format!("  - {}\n", run.id));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: &str, value: f64) -> DerivedMetric {
        DerivedMetric {
            name: name.into(),
            value: MetricValue::Scalar(value),
            unit: "V".into(),
            input_fingerprint: Fingerprint::from_bytes([7; 32]),
            rule_version: 1,
            params_digest: "abc".into(),
        }
    }

    fn sample() -> BatchReport {
        let mut report = BatchReport::new(vec!["breakdown_voltage".into()]);
        let mut ok = RunReport::new(RunId::new("dev", "base", 0).unwrap());
        ok.phase = RunPhase::Done;
        ok.sources = vec!["IV.plt".into()];
        ok.metrics.insert("breakdown_voltage".into(), metric("breakdown_voltage", -612.5));
        report.insert(ok);

        let mut bad = RunReport::new(RunId::new("dev", "base", 1).unwrap());
        bad.phase = RunPhase::Failed;
        bad.cause = Some(FailureCause::Parse {
            file: "field.grd".into(),
            message: "truncated".into(),
        });
        report.insert(bad);
        report.insert(RunReport::cancelled(RunId::new("dev", "base", 2).unwrap()));
        report
    }

    #[test]
    fn test_failure_rate_ignores_cancelled() {
        let report = sample();
        assert_eq!(report.failure_rate(), 0.5);
        assert!(!report.exceeds(None));
        assert!(report.exceeds(Some(0.25)));
        assert!(!report.exceeds(Some(0.5)));
    }

    #[test]
    fn test_views() {
        let report = sample();
        let table = report.metric_table();
        assert_eq!(table.len(), 1);
        let (id, row) = table.iter().next().unwrap();
        assert_eq!(id.to_string(), "dev/base/0");
        assert_eq!(row["breakdown_voltage"].unit, "V");

        let lineage = report.lineage();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].sources, vec!["IV.plt".to_string()]);
        assert_eq!(lineage[0].params_digest, "abc");

        let text = report.to_text();
        assert!(text.contains("1 done, 1 failed, 1 cancelled of 3"));
        assert!(text.contains("cause: parse error in field.grd: truncated"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["runs"]["dev/base/1"]["cause"]["kind"], "parse");
    }
}

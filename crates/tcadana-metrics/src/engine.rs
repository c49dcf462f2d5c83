//! Metric evaluation for single runs and batches.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tcadana_core::{
    AnalysisConfig, CurveQuantity, CurveRecord, DerivedMetric, FieldRecord, Fingerprint, MetricParams,
    MetricValue, QuantityClass, Record, RunId, digest_hex,
};

use crate::error::{ComputationError, Result};
use crate::metric::{MetricInput, MetricKind};
use crate::rules;

/// Evaluates metrics under one fixed parameter set.
#[derive(Debug, Clone)]
pub struct MetricEngine {
    params: MetricParams,
    params_digest: String,
}

impl MetricEngine {
    pub fn new(params: MetricParams) -> tcadana_core::Result<Self> {
        let params_digest = digest_hex(&params)?;
        Ok(Self {
            params,
            params_digest,
        })
    }

    /// Engine for a full analysis configuration. The recorded digest also
    /// covers the parsing options, so metrics computed from records parsed
    /// under different options never compare as current.
    pub fn for_analysis(config: &AnalysisConfig) -> tcadana_core::Result<Self> {
        Ok(Self {
            params: config.metrics.clone(),
            params_digest: config.metric_digest()?,
        })
    }

    pub fn params(&self) -> &MetricParams {
        &self.params
    }

    /// Digest recorded on every metric this engine produces.
    pub fn params_digest(&self) -> &str {
        &self.params_digest
    }

    /// Whether a cached metric can be reused for `fingerprint`.
    pub fn is_current(&self, metric: &DerivedMetric, kind: MetricKind, fingerprint: &Fingerprint) -> bool {
        metric.name == kind.name() && metric.is_valid_for(fingerprint, kind.rule_version(), &self.params_digest)
    }

    /// Compute one metric from a run's records.
    pub fn compute(&self, kind: MetricKind, records: &[Record], fingerprint: Fingerprint) -> Result<DerivedMetric> {
        let (value, unit) = self.evaluate(kind, records)?;
        Ok(DerivedMetric {
            name: kind.name().to_string(),
            value,
            unit,
            input_fingerprint: fingerprint,
            rule_version: kind.rule_version(),
            params_digest: self.params_digest.clone(),
        })
    }

    /// Compute every metric in `kinds` for one run. Each metric succeeds or
    /// fails on its own; the outcome keeps request order.
    pub fn compute_all(&self, kinds: &[MetricKind], records: &[Record], fingerprint: Fingerprint) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        for &kind in kinds {
            outcome.record(kind, self.compute(kind, records, fingerprint));
        }
        outcome
    }

    fn evaluate(&self, kind: MetricKind, records: &[Record]) -> Result<(MetricValue, String)> {
        let p = &self.params;
        match kind.input() {
            MetricInput::CurrentCurve => {
                let curve = find_curve(records, CurveQuantity::Current)?;
                match kind {
                    MetricKind::LeakageCurrent => Ok((rules::leakage_current(curve, p)?, curve.y_unit.clone())),
                    _ => Ok((rules::breakdown_voltage(curve, p)?, curve.x_unit.clone())),
                }
            }
            MetricInput::CapacitanceCurve => {
                let curve = find_curve(records, CurveQuantity::Capacitance)?;
                Ok((rules::full_depletion_voltage(curve, p)?, curve.x_unit.clone()))
            }
            MetricInput::ElectricField => {
                let field = find_field(records, QuantityClass::ElectricField)?;
                match kind {
                    MetricKind::PeakField => Ok((rules::peak_field(field, p)?, field.unit.clone())),
                    _ => Ok((rules::depletion_depth(field, p)?, kind.unit().to_string())),
                }
            }
            MetricInput::Doping => {
                let field = find_field(records, QuantityClass::DopingConcentration)?;
                Ok((rules::sheet_doping(field, p)?, kind.unit().to_string()))
            }
        }
    }
}

/// First curve of the given quantity, in record order.
fn find_curve(records: &[Record], quantity: CurveQuantity) -> Result<&CurveRecord> {
    records
        .iter()
        .find_map(|r| match r {
            Record::Curve(c) if c.quantity == quantity => Some(c),
            _ => None,
        })
        .ok_or_else(|| ComputationError::MissingInput(format!("no {:?} curve", quantity).to_lowercase()))
}

/// First field of the given class, in record order.
fn find_field(records: &[Record], class: QuantityClass) -> Result<&FieldRecord> {
    records
        .iter()
        .find_map(|r| match r {
            Record::Field(f) if f.class == class => Some(f),
            _ => None,
        })
        .ok_or_else(|| ComputationError::MissingInput(format!("no {:?} field", class)))
}

/// One run's records, borrowed for evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RunInputs<'a> {
    pub id: &'a RunId,
    pub fingerprint: Fingerprint,
    pub records: &'a [Record],
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFailure {
    pub metric: MetricKind,
    pub error: ComputationError,
}

/// Metrics and failures of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub metrics: Vec<DerivedMetric>,
    pub failures: Vec<MetricFailure>,
}

impl RunOutcome {
    /// Add the result of one metric.
    pub fn record(&mut self, kind: MetricKind, result: Result<DerivedMetric>) {
        match result {
            Ok(metric) => self.metrics.push(metric),
            Err(error) => self.failures.push(MetricFailure { metric: kind, error }),
        }
    }

    /// True when metrics were requested and every one failed.
    pub fn all_failed(&self) -> bool {
        self.metrics.is_empty() && !self.failures.is_empty()
    }
}

/// Evaluate `metrics` for every run in parallel.
///
/// Failures are isolated per run and per metric and returned alongside the
/// successes; nothing short-circuits the batch.
pub fn evaluate_batch(
    engine: &MetricEngine,
    runs: &[RunInputs<'_>],
    metrics: &[MetricKind],
) -> BTreeMap<RunId, RunOutcome> {
    let outcomes: Vec<(RunId, RunOutcome)> = runs
        .par_iter()
        .map(|run| {
            let outcome = engine.compute_all(metrics, run.records, run.fingerprint);
            for failure in &outcome.failures {
                log::warn!("{}: {} failed: {}", run.id, failure.metric, failure.error);
            }
            (run.id.clone(), outcome)
        })
        .collect();
    outcomes.into_iter().collect()
}

//! Derived metrics and their lineage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::run::Fingerprint;
use crate::units::format_value;

/// Value of a derived metric: a scalar or a small pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Scalar(f64),
    /// Primary value plus a secondary coordinate (e.g. peak field and its depth).
    Pair(f64, f64),
}

impl MetricValue {
    /// The primary value.
    pub fn primary(&self) -> f64 {
        match *self {
            MetricValue::Scalar(v) | MetricValue::Pair(v, _) => v,
        }
    }

    /// Bitwise comparison, so NaN payloads and signed zeros count as differences.
    pub fn bit_eq(&self, other: &MetricValue) -> bool {
        match (self, other) {
            (MetricValue::Scalar(a), MetricValue::Scalar(b)) => a.to_bits() == b.to_bits(),
            (MetricValue::Pair(a, b), MetricValue::Pair(c, d)) => {
                a.to_bits() == c.to_bits() && b.to_bits() == d.to_bits()
            }
            _ => false,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricValue::Scalar(v) => f.write_str(&format_value(v)),
            MetricValue::Pair(v, at) => write!(f, "{} @ {}", format_value(v), format_value(at)),
        }
    }
}

/// A figure of merit computed from one run's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub name: String,
    pub value: MetricValue,
    pub unit: String,
    /// Fingerprint of the run inputs this was computed from.
    pub input_fingerprint: Fingerprint,
    /// Version of the computation rule.
    pub rule_version: u32,
    /// Digest of the parameter set used.
    pub params_digest: String,
}

impl DerivedMetric {
    /// A metric is only valid for the exact inputs, rule and parameters it was
    /// computed with; anything else is stale.
    pub fn is_valid_for(&self, fingerprint: &Fingerprint, rule_version: u32, params_digest: &str) -> bool {
        self.input_fingerprint == *fingerprint
            && self.rule_version == rule_version
            && self.params_digest == params_digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(fp: Fingerprint) -> DerivedMetric {
        DerivedMetric {
            name: "breakdown_voltage".to_string(),
            value: MetricValue::Scalar(-412.5),
            unit: "V".to_string(),
            input_fingerprint: fp,
            rule_version: 1,
            params_digest: "abc".to_string(),
        }
    }

    #[test]
    fn test_staleness() {
        let a = Fingerprint::from_bytes([1; 32]);
        let b = Fingerprint::from_bytes([2; 32]);
        let m = metric(a);
        assert!(m.is_valid_for(&a, 1, "abc"));
        assert!(!m.is_valid_for(&b, 1, "abc"));
        assert!(!m.is_valid_for(&a, 2, "abc"));
        assert!(!m.is_valid_for(&a, 1, "def"));
    }

    #[test]
    fn test_bit_eq() {
        assert!(MetricValue::Scalar(1.0).bit_eq(&MetricValue::Scalar(1.0)));
        assert!(!MetricValue::Scalar(0.0).bit_eq(&MetricValue::Scalar(-0.0)));
        assert!(!MetricValue::Scalar(1.0).bit_eq(&MetricValue::Pair(1.0, 0.0)));
    }

    #[test]
    fn test_display() {
        assert_eq!(MetricValue::Scalar(1500.0).to_string(), "1.5000k");
        assert_eq!(MetricValue::Pair(2e5, 1.5).to_string(), "200.0000k @ 1.5000");
    }
}

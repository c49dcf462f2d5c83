//! The closed set of derived metrics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ComputationError;

/// A named figure of merit with a versioned computation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Bias at which |I| first reaches the breakdown current.
    BreakdownVoltage,
    /// |I| at the reference bias.
    LeakageCurrent,
    /// Bias where the rising 1/C² line meets the plateau.
    FullDepletionVoltage,
    /// Largest |E| and its depth.
    PeakField,
    /// Deepest point of the cutline where |E| exceeds a fraction of its maximum.
    DepletionDepth,
    /// Integral of |N| along the cutline.
    SheetDoping,
}

/// What a metric reads from a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricInput {
    CurrentCurve,
    CapacitanceCurve,
    ElectricField,
    Doping,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::BreakdownVoltage,
        MetricKind::LeakageCurrent,
        MetricKind::FullDepletionVoltage,
        MetricKind::PeakField,
        MetricKind::DepletionDepth,
        MetricKind::SheetDoping,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::BreakdownVoltage => "breakdown_voltage",
            MetricKind::LeakageCurrent => "leakage_current",
            MetricKind::FullDepletionVoltage => "full_depletion_voltage",
            MetricKind::PeakField => "peak_field",
            MetricKind::DepletionDepth => "depletion_depth",
            MetricKind::SheetDoping => "sheet_doping",
        }
    }

    /// Version of the computation rule; bump when results would change.
    pub fn rule_version(&self) -> u32 {
        match self {
            MetricKind::BreakdownVoltage
            | MetricKind::LeakageCurrent
            | MetricKind::FullDepletionVoltage
            | MetricKind::PeakField
            | MetricKind::DepletionDepth
            | MetricKind::SheetDoping => 1,
        }
    }

    /// Unit of the result when the input carries canonical units.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::BreakdownVoltage | MetricKind::FullDepletionVoltage => "V",
            MetricKind::LeakageCurrent => "A",
            MetricKind::PeakField => "V/cm",
            MetricKind::DepletionDepth => "um",
            MetricKind::SheetDoping => "cm^-2",
        }
    }

    pub fn input(&self) -> MetricInput {
        match self {
            MetricKind::BreakdownVoltage | MetricKind::LeakageCurrent => MetricInput::CurrentCurve,
            MetricKind::FullDepletionVoltage => MetricInput::CapacitanceCurve,
            MetricKind::PeakField | MetricKind::DepletionDepth => MetricInput::ElectricField,
            MetricKind::SheetDoping => MetricInput::Doping,
        }
    }

    /// Whether the metric reads field (grid) records rather than curves.
    pub fn needs_fields(&self) -> bool {
        matches!(self.input(), MetricInput::ElectricField | MetricInput::Doping)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = ComputationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        MetricKind::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| ComputationError::UnknownMetric(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.name().parse::<MetricKind>().unwrap(), kind);
        }
        assert!("breakdown".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_inputs() {
        assert!(MetricKind::SheetDoping.needs_fields());
        assert!(!MetricKind::LeakageCurrent.needs_fields());
        assert_eq!(MetricKind::PeakField.unit(), "V/cm");
    }
}

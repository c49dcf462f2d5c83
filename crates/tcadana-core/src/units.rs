//! Physical units, SI prefixes and the unit table used while parsing.
//!
//! Every quantity class has one canonical unit. Parsers convert incoming
//! values to the canonical unit using the scale factor returned by
//! [`UnitTable::resolve`]; a unit the table cannot resolve for a known class
//! is a unit mismatch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Broad physical class of a quantity, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityClass {
    ElectricField,
    DopingConcentration,
    Potential,
    Voltage,
    Current,
    Capacitance,
    Length,
    Temperature,
    /// Anything else; values are kept as-is and no unit check is applied.
    Other,
}

impl QuantityClass {
    /// Classify a dataset or field name.
    ///
    /// Matching is case-insensitive and follows Sentaurus naming
    /// (`ElectricField`, `DopingConcentration`, `Anode TotalCurrent`, `c(A,B)`).
    pub fn classify(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("electricfield") || lower == "e" || lower.starts_with("efield") {
            QuantityClass::ElectricField
        } else if lower.contains("doping")
            || lower.contains("concentration")
            || lower.contains("donor")
            || lower.contains("acceptor")
        {
            QuantityClass::DopingConcentration
        } else if lower.contains("potential") {
            QuantityClass::Potential
        } else if lower.contains("density") {
            QuantityClass::Other
        } else if lower.contains("current") {
            QuantityClass::Current
        } else if lower.starts_with("c(") || lower.contains("capacitance") {
            QuantityClass::Capacitance
        } else if lower.contains("voltage") || lower.starts_with("v(") {
            QuantityClass::Voltage
        } else if lower.contains("temperature") {
            QuantityClass::Temperature
        } else if matches!(lower.as_str(), "x" | "y" | "z" | "depth" | "position") {
            QuantityClass::Length
        } else {
            QuantityClass::Other
        }
    }
}

/// Scale factor for a single-character (or `da`-free) SI prefix.
///
/// Supported prefixes:
/// - T (tera, 1e12)
/// - G (giga, 1e9)
/// - M (mega, 1e6)
/// - k (kilo, 1e3)
/// - m (milli, 1e-3)
/// - u (micro, 1e-6)
/// - n (nano, 1e-9)
/// - p (pico, 1e-12)
/// - f (femto, 1e-15)
///
/// Unlike SPICE values, unit prefixes are case-sensitive (`M` is mega, `m` is milli).
pub fn prefix_scale(prefix: &str) -> Option<f64> {
    let scale = match prefix {
        "T" => 1e12,
        "G" => 1e9,
        "M" => 1e6,
        "k" => 1e3,
        "" => 1.0,
        "m" => 1e-3,
        "u" | "µ" => 1e-6,
        "n" => 1e-9,
        "p" => 1e-12,
        "f" => 1e-15,
        _ => return None,
    };
    Some(scale)
}

/// Format a value with appropriate SI prefix.
pub fn format_value(value: f64) -> String {
    let abs_value = value.abs();

    let (scaled, suffix) = if !value.is_finite() || abs_value == 0.0 {
        (value, "")
    } else if abs_value >= 1e12 {
        (value / 1e12, "T")
    } else if abs_value >= 1e9 {
        (value / 1e9, "G")
    } else if abs_value >= 1e6 {
        (value / 1e6, "M")
    } else if abs_value >= 1e3 {
        (value / 1e3, "k")
    } else if abs_value >= 1.0 {
        (value, "")
    } else if abs_value >= 1e-3 {
        (value * 1e3, "m")
    } else if abs_value >= 1e-6 {
        (value * 1e6, "u")
    } else if abs_value >= 1e-9 {
        (value * 1e9, "n")
    } else if abs_value >= 1e-12 {
        (value * 1e12, "p")
    } else if abs_value >= 1e-15 {
        (value * 1e15, "f")
    } else {
        (value, "")
    };

    format!("{:.4}{}", scaled, suffix)
}

/// Canonical unit of a class plus accepted aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRule {
    /// Unit values are converted to.
    pub canonical: String,
    /// Whether an SI prefix on the canonical unit (`mA`, `pF`) is accepted.
    #[serde(default)]
    pub allow_prefix: bool,
    /// Additional spellings and their factor to the canonical unit.
    #[serde(default)]
    pub aliases: BTreeMap<String, f64>,
}

impl UnitRule {
    fn new(canonical: &str, allow_prefix: bool, aliases: &[(&str, f64)]) -> Self {
        Self {
            canonical: canonical.to_string(),
            allow_prefix,
            aliases: aliases.iter().map(|(u, f)| (u.to_string(), *f)).collect(),
        }
    }

    /// Factor converting `unit` to the canonical unit, if accepted.
    pub fn scale_of(&self, unit: &str) -> Option<f64> {
        let unit = unit.trim();
        if unit == self.canonical {
            return Some(1.0);
        }
        if let Some(factor) = self.aliases.get(unit) {
            return Some(*factor);
        }
        if self.allow_prefix {
            let prefix = unit.strip_suffix(self.canonical.as_str())?;
            return prefix_scale(prefix);
        }
        None
    }
}

/// Unit rules per quantity class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTable {
    pub rules: BTreeMap<QuantityClass, UnitRule>,
}

impl Default for UnitTable {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            QuantityClass::ElectricField,
            UnitRule::new(
                "V/cm",
                false,
                &[("V/um", 1e4), ("V/m", 1e-2), ("kV/cm", 1e3), ("MV/cm", 1e6)],
            ),
        );
        rules.insert(
            QuantityClass::DopingConcentration,
            UnitRule::new(
                "cm^-3",
                false,
                &[("cm-3", 1.0), ("1/cm3", 1.0), ("1/cm^3", 1.0), ("m^-3", 1e-6)],
            ),
        );
        rules.insert(QuantityClass::Potential, UnitRule::new("V", true, &[]));
        rules.insert(QuantityClass::Voltage, UnitRule::new("V", true, &[]));
        rules.insert(QuantityClass::Current, UnitRule::new("A", true, &[]));
        rules.insert(QuantityClass::Capacitance, UnitRule::new("F", true, &[]));
        rules.insert(
            QuantityClass::Length,
            UnitRule::new("um", false, &[("nm", 1e-3), ("mm", 1e3), ("cm", 1e4), ("m", 1e6)]),
        );
        rules.insert(
            QuantityClass::Temperature,
            UnitRule::new("K", false, &[]),
        );
        Self { rules }
    }
}

impl UnitTable {
    /// Scale factor from `unit` to the canonical unit of `class`.
    ///
    /// `Other` quantities, and classes without a rule, always resolve to 1.0.
    /// Returns `None` only for a known class with an unknown unit.
    pub fn resolve(&self, class: QuantityClass, unit: &str) -> Option<f64> {
        match self.rules.get(&class) {
            Some(rule) => rule.scale_of(unit),
            None => Some(1.0),
        }
    }

    /// Canonical unit for a class, falling back to `declared` when unconstrained.
    pub fn canonical<'a>(&'a self, class: QuantityClass, declared: &'a str) -> &'a str {
        self.rules
            .get(&class)
            .map(|r| r.canonical.as_str())
            .unwrap_or(declared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(QuantityClass::classify("ElectricField"), QuantityClass::ElectricField);
        assert_eq!(
            QuantityClass::classify("DopingConcentration"),
            QuantityClass::DopingConcentration
        );
        assert_eq!(QuantityClass::classify("Anode TotalCurrent"), QuantityClass::Current);
        assert_eq!(QuantityClass::classify("c(A,B)"), QuantityClass::Capacitance);
        assert_eq!(QuantityClass::classify("Anode OuterVoltage"), QuantityClass::Voltage);
        assert_eq!(QuantityClass::classify("LatticeTemperature"), QuantityClass::Temperature);
        assert_eq!(QuantityClass::classify("time"), QuantityClass::Other);
    }

    #[test]
    fn test_prefix_scale() {
        assert_eq!(prefix_scale("k"), Some(1e3));
        assert_eq!(prefix_scale("m"), Some(1e-3));
        assert_eq!(prefix_scale("M"), Some(1e6));
        assert_eq!(prefix_scale("x"), None);
    }

    #[test]
    fn test_resolve_units() {
        let table = UnitTable::default();
        assert_eq!(table.resolve(QuantityClass::ElectricField, "V/cm"), Some(1.0));
        assert_eq!(table.resolve(QuantityClass::ElectricField, "V/um"), Some(1e4));
        assert_eq!(table.resolve(QuantityClass::Current, "nA"), Some(1e-9));
        assert_eq!(table.resolve(QuantityClass::Capacitance, "pF"), Some(1e-12));
        assert_eq!(table.resolve(QuantityClass::ElectricField, "A"), None);
        assert_eq!(table.resolve(QuantityClass::Other, "whatever"), Some(1.0));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1000.0), "1.0000k");
        assert_eq!(format_value(0.001), "1.0000m");
        assert_eq!(format_value(1e-9), "1.0000n");
        assert_eq!(format_value(0.0), "0.0000");
    }
}

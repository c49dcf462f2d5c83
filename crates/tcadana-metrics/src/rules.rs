//! Computation rules, one function per metric.
//!
//! Each rule is a pure function of its input record and [`MetricParams`].

use tcadana_core::{CurveRecord, FieldRecord, MetricParams, MetricValue};

use crate::cutline::{Cutline, cutline, depth_axis};
use crate::error::{ComputationError, Result};
use crate::kernels::{
    first_crossing_log, interpolate, linear_fit, max_abs, moving_average, require_finite,
    require_increasing, trapezoid,
};

const UM_PER_CM: f64 = 1e4;

/// A bias sweep folded to magnitudes: |V| strictly increasing, |y| smoothed.
struct Sweep {
    /// +1 or -1: polarity of the applied bias.
    sign: f64,
    bias: Vec<f64>,
    response: Vec<f64>,
}

fn sweep(curve: &CurveRecord, params: &MetricParams, min_points: usize) -> Result<Sweep> {
    if curve.len() < min_points {
        return Err(ComputationError::InsufficientData(format!(
            "{} has {} samples, need {}",
            curve.name,
            curve.len(),
            min_points
        )));
    }
    require_finite(&curve.x, &curve.x_name)?;
    require_finite(&curve.y, &curve.name)?;

    let extreme = curve.x.iter().copied().fold(0.0f64, |m, v| if v.abs() > m.abs() { v } else { m });
    let sign = if extreme < 0.0 { -1.0 } else { 1.0 };
    let bias: Vec<f64> = curve.x.iter().map(|v| v.abs()).collect();
    require_increasing(&bias, params.interpolation_tolerance)?;

    let magnitude: Vec<f64> = curve.y.iter().map(|v| v.abs()).collect();
    Ok(Sweep {
        sign,
        bias,
        response: moving_average(&magnitude, params.smoothing_window),
    })
}

pub fn breakdown_voltage(curve: &CurveRecord, params: &MetricParams) -> Result<MetricValue> {
    let s = sweep(curve, params, 2)?;
    match first_crossing_log(&s.bias, &s.response, params.breakdown_current)? {
        Some(v) => Ok(MetricValue::Scalar(s.sign * v)),
        None => Err(ComputationError::NoCrossing(format!(
            "|I| stays below {:e} A up to {} V",
            params.breakdown_current,
            s.bias.last().copied().unwrap_or(0.0)
        ))),
    }
}

pub fn leakage_current(curve: &CurveRecord, params: &MetricParams) -> Result<MetricValue> {
    let s = sweep(curve, params, 2)?;
    let at = params.reference_voltage.abs();
    interpolate(&s.bias, &s.response, at)
        .map(MetricValue::Scalar)
        .ok_or_else(|| {
            ComputationError::InsufficientData(format!(
                "reference bias {} V outside the sweep [{}, {}] V",
                at,
                s.bias[0],
                s.bias[s.bias.len() - 1]
            ))
        })
}

pub fn full_depletion_voltage(curve: &CurveRecord, params: &MetricParams) -> Result<MetricValue> {
    let plateau_points = params.plateau_points.max(1);
    if let Some(i) = curve.y.iter().position(|c| *c == 0.0) {
        return Err(ComputationError::NonFinite(format!(
            "{} is zero at sample {}, 1/C² undefined",
            curve.name, i
        )));
    }
    let s = sweep(curve, params, plateau_points + 2)?;
    let inv: Vec<f64> = s.response.iter().map(|c| 1.0 / (c * c)).collect();

    let n = inv.len();
    let plateau = inv[n - plateau_points..].iter().sum::<f64>() / plateau_points as f64;
    let limit = params.rise_fraction * plateau;
    let (x, y): (Vec<f64>, Vec<f64>) = s.bias[..n - plateau_points]
        .iter()
        .zip(&inv[..n - plateau_points])
        .filter(|(_, v)| **v < limit)
        .map(|(b, v)| (*b, *v))
        .unzip();
    if x.len() < 2 {
        return Err(ComputationError::InsufficientData(format!(
            "{} samples below {} of the 1/C² plateau",
            x.len(),
            params.rise_fraction
        )));
    }
    let (a, b) = linear_fit(&x, &y)?;
    if b <= 0.0 {
        return Err(ComputationError::NoCrossing("1/C² does not rise with bias".to_string()));
    }
    Ok(MetricValue::Scalar(s.sign * (plateau - a) / b))
}

pub fn peak_field(field: &FieldRecord, params: &MetricParams) -> Result<MetricValue> {
    require_finite(&field.values, &field.name)?;
    let (index, value) = max_abs(&field.values, params.chunk_size)
        .ok_or_else(|| ComputationError::InsufficientData(format!("{} is empty", field.name)))?;
    let depth = field.coords[depth_axis(field)][index];
    Ok(MetricValue::Pair(value, depth))
}

fn field_cutline(field: &FieldRecord, params: &MetricParams) -> Result<Cutline> {
    let cut = cutline(
        field,
        params.cutline_axis,
        params.cutline_position,
        params.cutline_tolerance,
    )?;
    if cut.len() < 2 {
        return Err(ComputationError::InsufficientData(format!(
            "cutline through {} has {} samples",
            field.name,
            cut.len()
        )));
    }
    require_finite(&cut.values, &field.name)?;
    require_finite(&cut.positions, "cutline positions")?;
    Ok(cut)
}

pub fn depletion_depth(field: &FieldRecord, params: &MetricParams) -> Result<MetricValue> {
    let cut = field_cutline(field, params)?;
    let (_, emax) = max_abs(&cut.values, params.chunk_size)
        .ok_or_else(|| ComputationError::InsufficientData("empty cutline".to_string()))?;
    if emax == 0.0 {
        return Err(ComputationError::InsufficientData(format!(
            "{} vanishes along the cutline",
            field.name
        )));
    }
    let threshold = params.depletion_fraction * emax;
    let depth = cut
        .positions
        .iter()
        .zip(&cut.values)
        .filter(|(_, v)| v.abs() >= threshold)
        .map(|(p, _)| *p)
        .fold(f64::NEG_INFINITY, f64::max);
    Ok(MetricValue::Scalar(depth))
}

pub fn sheet_doping(field: &FieldRecord, params: &MetricParams) -> Result<MetricValue> {
    let cut = field_cutline(field, params)?;
    let magnitude: Vec<f64> = cut.values.iter().map(|v| v.abs()).collect();
    let integral = trapezoid(&cut.positions, &magnitude, params.chunk_size);
    Ok(MetricValue::Scalar(integral / UM_PER_CM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tcadana_core::{CurveQuantity, FormatTag, QuantityClass, SourceRef};

    fn src() -> SourceRef {
        SourceRef {
            file: PathBuf::from("iv.plt"),
            format: FormatTag::DfiseXyPlot,
        }
    }

    fn curve(quantity: CurveQuantity, x: Vec<f64>, y: Vec<f64>) -> CurveRecord {
        CurveRecord::new("Anode", quantity, "Anode OuterVoltage", "V", "A", x, y, None, src()).unwrap()
    }

    /// Exponentially rising leakage on a negative sweep, 1 nA at 0 V growing x10 per 100 V.
    fn iv() -> CurveRecord {
        let x: Vec<f64> = (0..=10).map(|i| -(i as f64) * 100.0).collect();
        let y: Vec<f64> = (0..=10).map(|i| -1e-9 * 10f64.powi(i)).collect();
        curve(CurveQuantity::Current, x, y)
    }

    #[test]
    fn test_breakdown_negative_sweep() {
        let params = MetricParams::default().with_breakdown_current(1e-6);
        let v = breakdown_voltage(&iv(), &params).unwrap().primary();
        assert!((v + 300.0).abs() < 1e-6, "{}", v);
    }

    #[test]
    fn test_breakdown_no_crossing() {
        let params = MetricParams::default().with_breakdown_current(1.0e3);
        assert!(matches!(
            breakdown_voltage(&iv(), &params),
            Err(ComputationError::NoCrossing(_))
        ));
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let c = curve(CurveQuantity::Current, vec![0.0, -10.0, -5.0], vec![1e-9, 2e-9, 3e-9]);
        assert!(matches!(
            breakdown_voltage(&c, &MetricParams::default()),
            Err(ComputationError::NonMonotonic(_))
        ));
    }

    #[test]
    fn test_leakage_interpolated() {
        let params = MetricParams::default().with_reference_voltage(250.0);
        let i = leakage_current(&iv(), &params).unwrap().primary();
        // Linear between 1e-7 at 200 V and 1e-6 at 300 V.
        assert!((i - 5.5e-7).abs() < 1e-18);

        let params = MetricParams::default().with_reference_voltage(5000.0);
        assert!(matches!(
            leakage_current(&iv(), &params),
            Err(ComputationError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_full_depletion() {
        // 1/C² = 1e20 * V up to 100 V, flat at 1e22 beyond.
        let x: Vec<f64> = (0..=20).map(|i| i as f64 * 10.0).collect();
        let c: Vec<f64> = x
            .iter()
            .map(|v| {
                let inv = (1e20 * v.max(1.0)).min(1e22);
                1.0 / inv.sqrt()
            })
            .collect();
        let cv = curve(CurveQuantity::Capacitance, x, c);
        let v = full_depletion_voltage(&cv, &MetricParams::default()).unwrap().primary();
        assert!((v - 100.0).abs() < 1.0, "{}", v);
    }

    #[test]
    fn test_non_finite_rejected() {
        let c = curve(CurveQuantity::Current, vec![0.0, 10.0], vec![1e-9, f64::NAN]);
        assert!(matches!(
            leakage_current(&c, &MetricParams::default()),
            Err(ComputationError::NonFinite(_))
        ));
    }

    fn field_1d(class: QuantityClass, values: Vec<f64>) -> FieldRecord {
        let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        FieldRecord::new("F", "u", class, None, vec![x], values, None, src()).unwrap()
    }

    #[test]
    fn test_field_metrics() {
        let e = field_1d(QuantityClass::ElectricField, vec![1e5, 8e4, 4e4, 1e4, 1e3, 0.0]);
        let params = MetricParams::default();
        assert_eq!(peak_field(&e, &params).unwrap(), MetricValue::Pair(1e5, 0.0));
        // 5% of 1e5 is 5e3: the deepest sample at or above it is x = 3.
        assert_eq!(depletion_depth(&e, &params).unwrap(), MetricValue::Scalar(3.0));

        let n = field_1d(QuantityClass::DopingConcentration, vec![-1e12; 11]);
        let sheet = sheet_doping(&n, &params).unwrap().primary();
        // 1e12 cm^-3 over 10 um = 1e9 cm^-2
        assert!((sheet - 1e9).abs() < 1e-3);
    }
}

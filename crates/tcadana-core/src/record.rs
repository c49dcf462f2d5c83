//! Normalized field (grid) and curve (sweep) records.
//!
//! Records are produced by the parsers, owned by the run that produced them
//! and never mutated after construction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::FormatTag;
use crate::units::QuantityClass;

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Path of the dump file relative to its run directory.
    pub file: PathBuf,
    /// Format the file was parsed as.
    pub format: FormatTag,
}

/// A physical quantity sampled on a spatial grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Quantity name (e.g. `ElectricField`).
    pub name: String,
    /// Unit after conversion to the canonical unit of `class`.
    pub unit: String,
    pub class: QuantityClass,
    /// Device region the samples belong to, when the format carries one.
    pub region: Option<String>,
    /// One coordinate array per axis (x, y, z order), each `values.len()` long.
    pub coords: Vec<Vec<f64>>,
    pub values: Vec<f64>,
    /// Triangle connectivity (vertex indices) for unstructured 2D grids.
    pub triangles: Option<Vec<[u32; 3]>>,
    /// Number of NaN/Inf samples seen while parsing.
    pub non_finite: usize,
    pub source: SourceRef,
}

impl FieldRecord {
    /// Build a record, checking that every axis matches the value count and
    /// that triangle indices stay inside the vertex list.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        class: QuantityClass,
        region: Option<String>,
        coords: Vec<Vec<f64>>,
        values: Vec<f64>,
        triangles: Option<Vec<[u32; 3]>>,
        source: SourceRef,
    ) -> Result<Self> {
        let name = name.into();
        if coords.is_empty() {
            return Err(Error::ShapeMismatch(format!("{}: no coordinate axes", name)));
        }
        for (axis, c) in coords.iter().enumerate() {
            if c.len() != values.len() {
                return Err(Error::ShapeMismatch(format!(
                    "{}: axis {} has {} coordinates for {} values",
                    name,
                    axis,
                    c.len(),
                    values.len()
                )));
            }
        }
        if let Some(tris) = &triangles {
            let n = values.len() as u32;
            if let Some(bad) = tris.iter().flatten().find(|&&i| i >= n) {
                return Err(Error::ShapeMismatch(format!(
                    "{}: triangle references vertex {} of {}",
                    name, bad, n
                )));
            }
        }
        let non_finite = values.iter().filter(|v| !v.is_finite()).count();
        Ok(Self {
            name,
            unit: unit.into(),
            class,
            region,
            coords,
            values,
            triangles,
            non_finite,
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.coords.len()
    }

    /// Coordinates along one axis (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> Option<&[f64]> {
        self.coords.get(axis).map(|c| c.as_slice())
    }

    /// True when both records are sampled on bitwise-identical grids.
    pub fn same_grid(&self, other: &FieldRecord) -> bool {
        self.coords.len() == other.coords.len()
            && self
                .coords
                .iter()
                .zip(&other.coords)
                .all(|(a, b)| a.len() == b.len() && a.iter().zip(b).all(|(p, q)| p.to_bits() == q.to_bits()))
    }

    /// (min, max) per axis over finite coordinates.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.coords
            .iter()
            .map(|axis| {
                axis.iter()
                    .filter(|v| v.is_finite())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    })
            })
            .collect()
    }
}

/// Physical meaning of a curve's dependent variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveQuantity {
    Current,
    Capacitance,
    Voltage,
    Other,
}

impl From<QuantityClass> for CurveQuantity {
    fn from(class: QuantityClass) -> Self {
        match class {
            QuantityClass::Current => CurveQuantity::Current,
            QuantityClass::Capacitance => CurveQuantity::Capacitance,
            QuantityClass::Voltage | QuantityClass::Potential => CurveQuantity::Voltage,
            _ => CurveQuantity::Other,
        }
    }
}

/// A sweep of (independent, dependent) pairs, e.g. bias voltage vs current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveRecord {
    /// Dependent dataset name (e.g. `Anode TotalCurrent`).
    pub name: String,
    pub quantity: CurveQuantity,
    /// Independent dataset name (e.g. `Anode OuterVoltage`).
    pub x_name: String,
    pub x_unit: String,
    pub y_unit: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Device temperature in K, when known.
    pub temperature: Option<f64>,
    pub non_finite: usize,
    pub source: SourceRef,
}

impl CurveRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        quantity: CurveQuantity,
        x_name: impl Into<String>,
        x_unit: impl Into<String>,
        y_unit: impl Into<String>,
        x: Vec<f64>,
        y: Vec<f64>,
        temperature: Option<f64>,
        source: SourceRef,
    ) -> Result<Self> {
        let name = name.into();
        if x.len() != y.len() {
            return Err(Error::ShapeMismatch(format!(
                "{}: {} independent values for {} dependent values",
                name,
                x.len(),
                y.len()
            )));
        }
        let non_finite = x.iter().chain(&y).filter(|v| !v.is_finite()).count();
        Ok(Self {
            name,
            quantity,
            x_name: x_name.into(),
            x_unit: x_unit.into(),
            y_unit: y_unit.into(),
            x,
            y,
            temperature,
            non_finite,
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    /// (min, max) of the finite independent values.
    pub fn bias_range(&self) -> Option<(f64, f64)> {
        let mut finite = self.x.iter().copied().filter(|v| v.is_finite());
        let first = finite.next()?;
        Some(finite.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Field(FieldRecord),
    Curve(CurveRecord),
}

impl Record {
    pub fn name(&self) -> &str {
        match self {
            Record::Field(f) => &f.name,
            Record::Curve(c) => &c.name,
        }
    }

    pub fn non_finite(&self) -> usize {
        match self {
            Record::Field(f) => f.non_finite,
            Record::Curve(c) => c.non_finite,
        }
    }
}

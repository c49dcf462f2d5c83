//! Cutlines and region cropping on field grids.

use tcadana_core::FieldRecord;

use crate::error::{ComputationError, Result};

/// Samples of a field along one axis, ordered by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Cutline {
    /// Axis the positions run along.
    pub axis: usize,
    pub positions: Vec<f64>,
    pub values: Vec<f64>,
}

impl Cutline {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Axis along which depth is measured: the last axis of the grid.
pub fn depth_axis(field: &FieldRecord) -> usize {
    field.dimension().saturating_sub(1)
}

/// Cut `field` at `position` on `fixed_axis`.
///
/// Vertices within `tolerance` of the cut are kept; when none are, the
/// nearest vertices are used instead. On a 1D grid the cutline is the whole
/// grid and the position is ignored.
pub fn cutline(field: &FieldRecord, fixed_axis: usize, position: f64, tolerance: f64) -> Result<Cutline> {
    let (axis, selected): (usize, Vec<usize>) = match field.dimension() {
        1 => (0, (0..field.len()).collect()),
        2 => {
            if fixed_axis > 1 {
                return Err(ComputationError::GridMismatch(format!(
                    "cutline axis {} on a 2D grid",
                    fixed_axis
                )));
            }
            let fixed = &field.coords[fixed_axis];
            let diff: Vec<f64> = fixed.iter().map(|c| (c - position).abs()).collect();
            let nearest = diff
                .iter()
                .copied()
                .filter(|d| d.is_finite())
                .fold(f64::INFINITY, f64::min);
            let band = tolerance.max(nearest);
            let selected = diff
                .iter()
                .enumerate()
                .filter(|(_, d)| **d <= band)
                .map(|(i, _)| i)
                .collect();
            (1 - fixed_axis, selected)
        }
        d => {
            return Err(ComputationError::GridMismatch(format!(
                "cutlines are defined on 1D and 2D grids, not {}D",
                d
            )));
        }
    };

    let along = &field.coords[axis];
    let mut samples: Vec<(f64, f64)> = selected
        .into_iter()
        .map(|i| (along[i], field.values[i]))
        .collect();
    samples.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let (positions, values) = samples.into_iter().unzip();
    Ok(Cutline {
        axis,
        positions,
        values,
    })
}

/// Indices of the triangles lying entirely inside the given limits.
///
/// `None` limits leave that axis unconstrained. Fails on fields without
/// triangle connectivity.
pub fn crop_triangles(
    field: &FieldRecord,
    xlim: Option<(f64, f64)>,
    ylim: Option<(f64, f64)>,
) -> Result<Vec<usize>> {
    let triangles = field.triangles.as_deref().ok_or_else(|| {
        ComputationError::GridMismatch(format!("{} has no triangle connectivity", field.name))
    })?;
    if field.dimension() != 2 {
        return Err(ComputationError::GridMismatch(format!(
            "{} is not a 2D grid",
            field.name
        )));
    }
    let inside = |coords: &[f64], tri: &[u32; 3], lim: Option<(f64, f64)>| match lim {
        None => true,
        Some((a, b)) => {
            let (lo, hi) = (a.min(b), a.max(b));
            tri.iter().all(|&i| {
                let c = coords[i as usize];
                c >= lo && c <= hi
            })
        }
    };
    Ok(triangles
        .iter()
        .enumerate()
        .filter(|(_, t)| inside(&field.coords[0], t, xlim) && inside(&field.coords[1], t, ylim))
        .map(|(i, _)| i)
        .collect())
}

/// Copy of `field` restricted to the cropped triangles and the vertices they use.
pub fn crop_field(field: &FieldRecord, xlim: Option<(f64, f64)>, ylim: Option<(f64, f64)>) -> Result<FieldRecord> {
    let kept = crop_triangles(field, xlim, ylim)?;
    if kept.is_empty() {
        return Err(ComputationError::InsufficientData(format!(
            "no triangle of {} lies inside the crop region",
            field.name
        )));
    }
    let triangles = field.triangles.as_deref().unwrap_or(&[]);

    let mut remap: Vec<Option<u32>> = vec![None; field.len()];
    let mut order = Vec::new();
    let mut new_triangles = Vec::with_capacity(kept.len());
    for &t in &kept {
        let mut tri = [0u32; 3];
        for (slot, &v) in tri.iter_mut().zip(&triangles[t]) {
            let idx = *remap[v as usize].get_or_insert_with(|| {
                order.push(v as usize);
                (order.len() - 1) as u32
            });
            *slot = idx;
        }
        new_triangles.push(tri);
    }

    let coords = field
        .coords
        .iter()
        .map(|axis| order.iter().map(|&i| axis[i]).collect())
        .collect();
    let values = order.iter().map(|&i| field.values[i]).collect();
    FieldRecord::new(
        field.name.clone(),
        field.unit.clone(),
        field.class,
        field.region.clone(),
        coords,
        values,
        Some(new_triangles),
        field.source.clone(),
    )
    .map_err(|e| ComputationError::GridMismatch(e.to_string()))
}

//! TDR (HDF5) field containers.
//!
//! Layout read here:
//!
//! ```text
//! collection/geometry_0/
//!     vertex            compound {x, y} per mesh vertex, um
//!     region_<n>        attr name; dataset elements_0 = [2 a b c 2 d e f ...]
//!     state_0/<item>    attrs quantity, region = <n>; dataset values
//! ```
//!
//! Every state item becomes one field record over the triangles of its
//! region. A region is compacted to the vertices its triangles use, in
//! ascending vertex order, which is the order the item's values follow.
//! Items on regions that are not triangle meshes (contacts, interfaces) are
//! skipped with a warning.
//!
//! Reading needs the `tdr` feature; without it TDR files are rejected as
//! unsupported.

use crate::error::ParseErrorKind;
use crate::grid::ELEMENT_TRIANGLE;

/// Decode a region's element list (`[type a b c]` repeated) into triangles.
pub fn extract_triangles(raw: &[i64], vertex_count: usize) -> Result<Vec<[u32; 3]>, ParseErrorKind> {
    let mut triangles = Vec::with_capacity(raw.len() / 4);
    for element in raw.chunks(4) {
        if element[0] != i64::from(ELEMENT_TRIANGLE) {
            return Err(ParseErrorKind::UnsupportedTopology(format!("element type {}", element[0])));
        }
        if element.len() != 4 {
            return Err(ParseErrorKind::TruncatedData(format!(
                "triangle with {} of 3 vertex indices",
                element.len() - 1
            )));
        }
        let mut tri = [0u32; 3];
        for (slot, &index) in tri.iter_mut().zip(&element[1..]) {
            if index < 0 || index as usize >= vertex_count {
                return Err(ParseErrorKind::Structure(format!(
                    "vertex index {} out of {}",
                    index, vertex_count
                )));
            }
            *slot = index as u32;
        }
        triangles.push(tri);
    }
    Ok(triangles)
}

/// Restrict a mesh to the vertices `triangles` reference.
///
/// Returns the used global vertex indices in ascending order and the
/// triangles renumbered against that list.
pub fn compact_region(triangles: &[[u32; 3]], vertex_count: usize) -> (Vec<u32>, Vec<[u32; 3]>) {
    let mut used: Vec<u32> = triangles.iter().flatten().copied().collect();
    used.sort_unstable();
    used.dedup();

    let mut local = vec![u32::MAX; vertex_count];
    for (i, &v) in used.iter().enumerate() {
        local[v as usize] = i as u32;
    }
    let renumbered = triangles
        .iter()
        .map(|t| t.map(|v| local[v as usize]))
        .collect();
    (used, renumbered)
}

#[cfg(feature = "tdr")]
pub use reader::TdrReader;

#[cfg(feature = "tdr")]
mod reader {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
    use hdf5::{File, Group, H5Type};
    use tcadana_core::{AnalysisConfig, FieldRecord, QuantityClass, SourceRef};

    use super::{compact_region, extract_triangles};
    use crate::dfise::note_non_finite;
    use crate::error::{Error, Location, ParseError, ParseErrorKind, ParseWarning, Result};

    const GEOMETRY: &str = "collection/geometry_0";
    const STATE: &str = "state_0";
    const ELEMENTS: &str = "elements_0";

    /// Longest string attribute read.
    const ATTR_LEN: usize = 256;

    #[derive(H5Type, Debug, Clone, Copy, PartialEq)]
    #[repr(C)]
    struct Vertex {
        x: f64,
        y: f64,
    }

    #[derive(Debug, Clone)]
    struct RegionMesh {
        name: String,
        coords: Vec<Vec<f64>>,
        triangles: Vec<[u32; 3]>,
    }

    /// Reader yielding one field per state item, in item order.
    pub struct TdrReader<'a> {
        path: PathBuf,
        _file: File,
        geometry: Group,
        state: Group,
        vertices: Vec<Vertex>,
        items: Vec<String>,
        next: usize,
        meshes: BTreeMap<i64, std::result::Result<RegionMesh, ParseErrorKind>>,
        config: &'a AnalysisConfig,
        source: SourceRef,
    }

    fn structure(e: hdf5::Error) -> ParseErrorKind {
        ParseErrorKind::Structure(e.to_string())
    }

    fn read_string_attr(loc: &hdf5::Location, name: &str) -> hdf5::Result<String> {
        let attr = loc.attr(name)?;
        let text = match attr.read_scalar::<FixedAscii<ATTR_LEN>>() {
            Ok(s) => s.as_str().to_string(),
            Err(_) => match attr.read_scalar::<VarLenUnicode>() {
                Ok(s) => s.as_str().to_string(),
                Err(_) => attr.read_scalar::<VarLenAscii>()?.as_str().to_string(),
            },
        };
        Ok(text.trim_end_matches('\0').trim().to_string())
    }

    /// Trailing number of an item name, for `dataset_2` before `dataset_10`.
    fn item_order(name: &str) -> (u64, &str) {
        let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
        (digits.parse().unwrap_or(u64::MAX), name)
    }

    impl<'a> TdrReader<'a> {
        pub fn open(path: &Path, config: &'a AnalysisConfig, source: SourceRef) -> Result<Self> {
            let fail = |kind: ParseErrorKind| {
                Error::Parse(ParseError {
                    path: path.to_path_buf(),
                    location: Location::default(),
                    kind,
                })
            };
            let file = File::open(path).map_err(|e| fail(ParseErrorKind::MalformedHeader(e.to_string())))?;
            let geometry = file
                .group(GEOMETRY)
                .map_err(|e| fail(ParseErrorKind::MalformedHeader(format!("{}: {}", GEOMETRY, e))))?;
            let vertices = geometry
                .dataset("vertex")
                .and_then(|d| d.read_raw::<Vertex>())
                .map_err(|e| fail(structure(e)))?;
            let state = geometry.group(STATE).map_err(|e| fail(structure(e)))?;
            let mut items = state.member_names().map_err(|e| fail(structure(e)))?;
            items.sort_by(|a, b| item_order(a).cmp(&item_order(b)));
            log::debug!(
                "{}: {} vertices, {} state items",
                path.display(),
                vertices.len(),
                items.len()
            );

            Ok(Self {
                path: path.to_path_buf(),
                _file: file,
                geometry,
                state,
                vertices,
                items,
                next: 0,
                meshes: BTreeMap::new(),
                config,
                source,
            })
        }

        fn error(&self, kind: ParseErrorKind) -> Error {
            Error::Parse(ParseError {
                path: self.path.clone(),
                location: Location::default(),
                kind,
            })
        }

        fn build_mesh(&self, region: i64) -> std::result::Result<RegionMesh, ParseErrorKind> {
            let group = self.geometry.group(&format!("region_{}", region)).map_err(structure)?;
            let name = read_string_attr(&group, "name").map_err(structure)?;
            let raw = group
                .dataset(ELEMENTS)
                .and_then(|d| d.read_raw::<i64>())
                .map_err(structure)?;
            let triangles = extract_triangles(&raw, self.vertices.len())
                .map_err(|kind| match kind {
                    ParseErrorKind::UnsupportedTopology(what) => {
                        ParseErrorKind::UnsupportedTopology(format!("region {}: {}", name, what))
                    }
                    other => other,
                })?;
            let (used, triangles) = compact_region(&triangles, self.vertices.len());
            let xs = used.iter().map(|&v| self.vertices[v as usize].x).collect();
            let ys = used.iter().map(|&v| self.vertices[v as usize].y).collect();
            Ok(RegionMesh {
                name,
                coords: vec![xs, ys],
                triangles,
            })
        }

        pub fn next_field(&mut self, warnings: &mut Vec<ParseWarning>) -> Result<Option<FieldRecord>> {
            while let Some(item) = self.items.get(self.next).cloned() {
                self.next += 1;
                let group = self.state.group(&item).map_err(|e| self.error(structure(e)))?;
                let quantity = read_string_attr(&group, "quantity");
                let region = group.attr("region").and_then(|a| a.read_scalar::<i64>());
                let (Ok(quantity), Ok(region)) = (quantity, region) else {
                    log::debug!("{}: {} has no quantity or region", self.path.display(), item);
                    continue;
                };

                if !self.meshes.contains_key(&region) {
                    let mesh = self.build_mesh(region);
                    self.meshes.insert(region, mesh);
                }
                let mesh = match &self.meshes[&region] {
                    Ok(mesh) => mesh.clone(),
                    Err(kind) => {
                        warnings.push(ParseWarning::SkippedField {
                            field: quantity,
                            reason: kind.to_string(),
                        });
                        continue;
                    }
                };

                let values = group
                    .dataset("values")
                    .and_then(|d| d.read_raw::<f64>())
                    .map_err(|e| self.error(structure(e)))?;
                if values.len() != mesh.coords[0].len() {
                    return Err(self.error(ParseErrorKind::Structure(format!(
                        "{} has {} values for {} vertices of region {}",
                        quantity,
                        values.len(),
                        mesh.coords[0].len(),
                        mesh.name
                    ))));
                }
                for v in &values {
                    if !v.is_finite() {
                        if self.config.parse.reject_non_finite {
                            return Err(self.error(ParseErrorKind::NonFinite(quantity)));
                        }
                        note_non_finite(warnings, Location::default(), &quantity);
                    }
                }

                let class = QuantityClass::classify(&quantity);
                let unit = self.config.units.canonical(class, "").to_string();
                let record = FieldRecord::new(
                    quantity,
                    unit,
                    class,
                    Some(mesh.name),
                    mesh.coords,
                    values,
                    Some(mesh.triangles),
                    self.source.clone(),
                )
                .map_err(|e| self.error(ParseErrorKind::Structure(e.to_string())))?;
                return Ok(Some(record));
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_triangles() {
        let raw = [2, 0, 1, 2, 2, 1, 3, 2];
        assert_eq!(extract_triangles(&raw, 4).unwrap(), vec![[0, 1, 2], [1, 3, 2]]);
    }

    #[test]
    fn test_non_triangle_elements_unsupported() {
        let err = extract_triangles(&[1, 0, 1], 4).unwrap_err();
        assert_eq!(err, ParseErrorKind::UnsupportedTopology("element type 1".to_string()));
        let err = extract_triangles(&[2, 0, 1, 2, 3, 0, 1, 2], 4).unwrap_err();
        assert!(matches!(err, ParseErrorKind::UnsupportedTopology(_)));
    }

    #[test]
    fn test_bad_indices() {
        assert!(matches!(
            extract_triangles(&[2, 0, 1, 9], 4),
            Err(ParseErrorKind::Structure(_))
        ));
        assert!(matches!(
            extract_triangles(&[2, 0, 1], 4),
            Err(ParseErrorKind::TruncatedData(_))
        ));
    }

    #[test]
    fn test_compact_region() {
        let (used, tris) = compact_region(&[[7, 3, 5], [5, 3, 9]], 10);
        assert_eq!(used, vec![3, 5, 7, 9]);
        assert_eq!(tris, vec![[2, 0, 1], [1, 0, 3]]);
    }
}

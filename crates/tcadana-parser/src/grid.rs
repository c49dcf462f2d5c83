//! Text grid dumps, versions 1.0 and 2.0.
//!
//! Version 1.0 holds a single quantity as rows of coordinates plus value:
//!
//! ```text
//! # tcadgrid 1.0
//! quantity ElectricField V/cm
//! dimension 2
//! region Bulk
//! coordinates um
//! data
//! 0.0 0.0 1.5e4
//! ```
//!
//! Version 2.0 shares one vertex list (and optional triangle list) between
//! any number of `field` blocks. Blocks are parsed one at a time, so a dump
//! with many quantities is never held in memory at once:
//!
//! ```text
//! # tcadgrid 2.0
//! dimension 2
//! vertices 3
//! 0.0 0.0
//! 1.0 0.0
//! 0.0 1.0
//! elements 1
//! 2 0 1 2
//! field DopingConcentration cm^-3
//! 1e12 1e12 1e15
//! end
//! ```

use std::io::BufRead;

use tcadana_core::{AnalysisConfig, FieldRecord, QuantityClass, SourceRef};

use crate::dfise::note_non_finite;
use crate::error::{Location, ParseErrorKind, ParseWarning, Result};
use crate::lexer::{LineReader, parse_numbers_into};

pub const SIGNATURE_V1: &str = "# tcadgrid 1.0";
pub const SIGNATURE_V2: &str = "# tcadgrid 2.0";

/// Element type code for triangles.
pub const ELEMENT_TRIANGLE: u32 = 2;

const COORDINATES: &str = "coordinates";

/// Upper bound on capacity reserved from a header count; larger sections
/// grow as rows arrive.
const PREALLOC_LIMIT: usize = 1 << 20;

/// Resolved unit of a quantity.
struct UnitScale {
    class: QuantityClass,
    unit: String,
    factor: f64,
}

fn resolve_unit(config: &AnalysisConfig, quantity: &str, class: QuantityClass, unit: &str) -> std::result::Result<UnitScale, ParseErrorKind> {
    let factor = config
        .units
        .resolve(class, unit)
        .ok_or_else(|| ParseErrorKind::UnitMismatch {
            quantity: quantity.to_string(),
            unit: unit.to_string(),
        })?;
    Ok(UnitScale {
        class,
        unit: config.units.canonical(class, unit).to_string(),
        factor,
    })
}

fn parse_dimension(word: Option<&str>) -> std::result::Result<usize, ParseErrorKind> {
    let word = word.ok_or_else(|| ParseErrorKind::MalformedHeader("dimension needs a value".to_string()))?;
    match word.parse::<usize>() {
        Ok(d @ 1..=3) => Ok(d),
        _ => Err(ParseErrorKind::MalformedHeader(format!("invalid dimension '{}'", word))),
    }
}

fn check_signature<R: BufRead>(lines: &mut LineReader<R>, signature: &str) -> Result<()> {
    let signed = matches!(
        lines.next_line()?,
        Some(first) if first.trim_start_matches('\u{feff}').trim() == signature
    );
    if !signed {
        return Err(lines.error(ParseErrorKind::MalformedHeader(format!("expected '{}'", signature))));
    }
    Ok(())
}

/// Record or reject non-finite samples in `values`.
fn screen_non_finite(
    values: &[f64],
    quantity: &str,
    location: Location,
    config: &AnalysisConfig,
    warnings: &mut Vec<ParseWarning>,
) -> std::result::Result<(), ParseErrorKind> {
    for v in values {
        if !v.is_finite() {
            if config.parse.reject_non_finite {
                return Err(ParseErrorKind::NonFinite(quantity.to_string()));
            }
            note_non_finite(warnings, location, quantity);
        }
    }
    Ok(())
}

/// Reader for version 1.0 grids (exactly one field).
pub struct GridV1Reader<'a, R> {
    lines: LineReader<R>,
    config: &'a AnalysisConfig,
    source: SourceRef,
    done: bool,
}

impl<'a, R: BufRead> GridV1Reader<'a, R> {
    pub fn new(lines: LineReader<R>, config: &'a AnalysisConfig, source: SourceRef) -> Self {
        Self {
            lines,
            config,
            source,
            done: false,
        }
    }

    pub fn next_field(&mut self, warnings: &mut Vec<ParseWarning>) -> Result<Option<FieldRecord>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        check_signature(&mut self.lines, SIGNATURE_V1)?;

        let mut quantity: Option<(String, String)> = None;
        let mut dimension = None;
        let mut region = None;
        let mut coord_unit = "um".to_string();

        loop {
            let Some(line) = self.lines.next_content_line()? else {
                return Err(self
                    .lines
                    .error(ParseErrorKind::TruncatedData("no data section".to_string())));
            };
            let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            let mut it = words.iter().map(String::as_str);
            match it.next() {
                Some("quantity") => match (it.next(), it.next()) {
                    (Some(name), Some(unit)) => quantity = Some((name.to_string(), unit.to_string())),
                    _ => {
                        return Err(self.lines.error(ParseErrorKind::MalformedHeader(
                            "quantity needs a name and a unit".to_string(),
                        )));
                    }
                },
                Some("dimension") => {
                    dimension = Some(parse_dimension(it.next()).map_err(|k| self.lines.error(k))?)
                }
                Some("region") => region = it.next().map(str::to_string),
                Some(COORDINATES) => {
                    if let Some(unit) = it.next() {
                        coord_unit = unit.to_string();
                    }
                }
                Some("data") => break,
                Some(other) => {
                    return Err(self.lines.error(ParseErrorKind::MalformedHeader(format!(
                        "unknown header key '{}'",
                        other
                    ))));
                }
                None => continue,
            }
        }

        let header_location = self.lines.location();
        let (Some((name, unit)), Some(dimension)) = (quantity, dimension) else {
            return Err(self.lines.error(ParseErrorKind::MalformedHeader(
                "quantity and dimension are required".to_string(),
            )));
        };
        let value_scale = resolve_unit(self.config, &name, QuantityClass::classify(&name), &unit)
            .map_err(|k| self.lines.error_at(header_location, k))?;
        let coord_scale = resolve_unit(self.config, COORDINATES, QuantityClass::Length, &coord_unit)
            .map_err(|k| self.lines.error_at(header_location, k))?;

        let mut coords: Vec<Vec<f64>> = vec![Vec::new(); dimension];
        let mut values = Vec::new();
        let mut row = Vec::with_capacity(dimension + 1);

        loop {
            let parsed = match self.lines.next_content_line()? {
                None => break,
                Some(line) => {
                    row.clear();
                    parse_numbers_into(line, &mut row)
                }
            };
            let non_finite = parsed.map_err(|k| self.lines.error(k))?;
            if row.len() < dimension + 1 {
                return Err(self.lines.error(ParseErrorKind::TruncatedData(format!(
                    "row has {} of {} columns",
                    row.len(),
                    dimension + 1
                ))));
            }
            if row.len() > dimension + 1 {
                return Err(self.lines.error(ParseErrorKind::Structure(format!(
                    "row has {} columns, expected {}",
                    row.len(),
                    dimension + 1
                ))));
            }
            if non_finite > 0 {
                let location = self.lines.location();
                screen_non_finite(&row[..dimension], COORDINATES, location, self.config, warnings)
                    .and_then(|_| screen_non_finite(&row[dimension..], &name, location, self.config, warnings))
                    .map_err(|k| self.lines.error(k))?;
            }
            for (axis, c) in coords.iter_mut().enumerate() {
                c.push(row[axis] * coord_scale.factor);
            }
            values.push(row[dimension] * value_scale.factor);
        }

        if values.is_empty() {
            return Err(self
                .lines
                .error(ParseErrorKind::TruncatedData("data section is empty".to_string())));
        }

        log::debug!(
            "{}: {} ({} samples, {}D)",
            self.source.file.display(),
            name,
            values.len(),
            dimension
        );
        let record = FieldRecord::new(
            name,
            value_scale.unit,
            value_scale.class,
            region,
            coords,
            values,
            None,
            self.source.clone(),
        )
        .map_err(|e| self.lines.error(ParseErrorKind::Structure(e.to_string())))?;
        Ok(Some(record))
    }
}

/// Vertex and element section shared by all fields of a v2 grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridV2Mesh {
    pub dimension: usize,
    pub region: Option<String>,
    /// Per-axis coordinates in um.
    pub coords: Vec<Vec<f64>>,
    pub triangles: Option<Vec<[u32; 3]>>,
}

impl GridV2Mesh {
    pub fn vertex_count(&self) -> usize {
        self.coords.first().map_or(0, |c| c.len())
    }
}

/// Reader for version 2.0 grids, one field block per call.
pub struct GridV2Reader<'a, R> {
    lines: LineReader<R>,
    config: &'a AnalysisConfig,
    source: SourceRef,
    mesh: Option<GridV2Mesh>,
    /// First line after the mesh, read while looking for `elements`.
    pending: Option<(String, Location)>,
    finished: bool,
}

impl<'a, R: BufRead> GridV2Reader<'a, R> {
    pub fn new(lines: LineReader<R>, config: &'a AnalysisConfig, source: SourceRef) -> Self {
        Self {
            lines,
            config,
            source,
            mesh: None,
            pending: None,
            finished: false,
        }
    }

    /// The mesh, once the header has been read.
    pub fn mesh(&self) -> Option<&GridV2Mesh> {
        self.mesh.as_ref()
    }

    fn next_owned_line(&mut self) -> Result<Option<(String, Location)>> {
        if let Some(p) = self.pending.take() {
            return Ok(Some(p));
        }
        let line = self.lines.next_content_line()?.map(str::to_string);
        Ok(line.map(|l| (l, self.lines.location())))
    }

    fn read_mesh(&mut self, warnings: &mut Vec<ParseWarning>) -> Result<GridV2Mesh> {
        check_signature(&mut self.lines, SIGNATURE_V2)?;

        let mut dimension = None;
        let mut region = None;
        let mut coord_unit = "um".to_string();
        let vertex_count = loop {
            let Some((line, _)) = self.next_owned_line()? else {
                return Err(self
                    .lines
                    .error(ParseErrorKind::TruncatedData("no vertices section".to_string())));
            };
            let mut it = line.split_whitespace();
            match it.next() {
                Some("dimension") => {
                    dimension = Some(parse_dimension(it.next()).map_err(|k| self.lines.error(k))?)
                }
                Some("region") => region = it.next().map(str::to_string),
                Some(COORDINATES) => {
                    if let Some(unit) = it.next() {
                        coord_unit = unit.to_string();
                    }
                }
                Some("vertices") => {
                    let n = it.next().and_then(|w| w.parse::<usize>().ok()).ok_or_else(|| {
                        self.lines.error(ParseErrorKind::MalformedHeader(
                            "vertices needs a count".to_string(),
                        ))
                    })?;
                    break n;
                }
                Some(other) => {
                    return Err(self.lines.error(ParseErrorKind::MalformedHeader(format!(
                        "unknown header key '{}'",
                        other
                    ))));
                }
                None => continue,
            }
        };

        let dimension = dimension.ok_or_else(|| {
            self.lines
                .error(ParseErrorKind::MalformedHeader("dimension must precede vertices".to_string()))
        })?;
        let coord_scale = resolve_unit(self.config, COORDINATES, QuantityClass::Length, &coord_unit)
            .map_err(|k| self.lines.error(k))?;

        let mut coords: Vec<Vec<f64>> = (0..dimension)
            .map(|_| Vec::with_capacity(vertex_count.min(PREALLOC_LIMIT)))
            .collect();
        let mut row = Vec::with_capacity(dimension);
        for i in 0..vertex_count {
            let parsed = match self.lines.next_content_line()? {
                None => {
                    return Err(self.lines.error(ParseErrorKind::TruncatedData(format!(
                        "{} of {} vertices",
                        i, vertex_count
                    ))));
                }
                Some(line) => {
                    row.clear();
                    parse_numbers_into(line, &mut row)
                }
            };
            let non_finite = parsed.map_err(|k| self.lines.error(k))?;
            if row.len() != dimension {
                let kind = if row.len() < dimension {
                    ParseErrorKind::TruncatedData(format!("vertex has {} of {} coordinates", row.len(), dimension))
                } else {
                    ParseErrorKind::Structure(format!("vertex has {} coordinates, expected {}", row.len(), dimension))
                };
                return Err(self.lines.error(kind));
            }
            if non_finite > 0 {
                screen_non_finite(&row, COORDINATES, self.lines.location(), self.config, warnings)
                    .map_err(|k| self.lines.error(k))?;
            }
            for (axis, c) in coords.iter_mut().enumerate() {
                c.push(row[axis] * coord_scale.factor);
            }
        }

        let mut triangles = None;
        if let Some((line, location)) = self.next_owned_line()? {
            let mut it = line.split_whitespace();
            if it.next() == Some("elements") {
                let m = it.next().and_then(|w| w.parse::<usize>().ok()).ok_or_else(|| {
                    self.lines
                        .error(ParseErrorKind::MalformedHeader("elements needs a count".to_string()))
                })?;
                triangles = Some(self.read_elements(m, dimension, vertex_count)?);
            } else {
                self.pending = Some((line, location));
            }
        }

        Ok(GridV2Mesh {
            dimension,
            region,
            coords,
            triangles,
        })
    }

    fn read_elements(&mut self, count: usize, dimension: usize, vertex_count: usize) -> Result<Vec<[u32; 3]>> {
        if dimension != 2 {
            return Err(self.lines.error(ParseErrorKind::UnsupportedTopology(format!(
                "triangles on a {}D grid",
                dimension
            ))));
        }
        let mut triangles = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for i in 0..count {
            let parsed = match self.lines.next_content_line()? {
                None => {
                    return Err(self.lines.error(ParseErrorKind::TruncatedData(format!(
                        "{} of {} elements",
                        i, count
                    ))));
                }
                Some(line) => parse_element(line, vertex_count),
            };
            triangles.push(parsed.map_err(|k| self.lines.error(k))?);
        }
        Ok(triangles)
    }

    pub fn next_field(&mut self, warnings: &mut Vec<ParseWarning>) -> Result<Option<FieldRecord>> {
        if self.finished {
            return Ok(None);
        }
        if self.mesh.is_none() {
            self.mesh = Some(self.read_mesh(warnings)?);
        }
        let Some((line, location)) = self.next_owned_line()? else {
            self.finished = true;
            return Ok(None);
        };

        let words: Vec<&str> = line.split_whitespace().collect();
        let (name, unit) = match words.as_slice() {
            ["field", name, unit] => (name.to_string(), unit.to_string()),
            _ => {
                return Err(self.lines.error_at(
                    location,
                    ParseErrorKind::Structure(format!("expected 'field <name> <unit>', found '{}'", line)),
                ));
            }
        };
        let scale = resolve_unit(self.config, &name, QuantityClass::classify(&name), &unit)
            .map_err(|k| self.lines.error_at(location, k))?;

        let expected = self.mesh.as_ref().map_or(0, GridV2Mesh::vertex_count);
        let mut values = Vec::with_capacity(expected.min(PREALLOC_LIMIT));
        loop {
            let start = values.len();
            let parsed = match self.lines.next_content_line()? {
                None => {
                    return Err(self.lines.error(ParseErrorKind::TruncatedData(format!(
                        "field {} has no 'end' ({} of {} values)",
                        name, start, expected
                    ))));
                }
                Some("end") => break,
                Some(line) => parse_numbers_into(line, &mut values),
            };
            let non_finite = parsed.map_err(|k| self.lines.error(k))?;
            if non_finite > 0 {
                screen_non_finite(&values[start..], &name, self.lines.location(), self.config, warnings)
                    .map_err(|k| self.lines.error(k))?;
            }
        }
        if values.len() != expected {
            return Err(self.lines.error(ParseErrorKind::Structure(format!(
                "field {} has {} values for {} vertices",
                name,
                values.len(),
                expected
            ))));
        }
        for v in values.iter_mut() {
            *v *= scale.factor;
        }

        let Some(mesh) = self.mesh.as_ref() else {
            return Ok(None);
        };
        log::debug!(
            "{}: field {} ({} vertices)",
            self.source.file.display(),
            name,
            values.len()
        );
        let record = FieldRecord::new(
            name,
            scale.unit,
            scale.class,
            mesh.region.clone(),
            mesh.coords.clone(),
            values,
            mesh.triangles.clone(),
            self.source.clone(),
        )
        .map_err(|e| self.lines.error(ParseErrorKind::Structure(e.to_string())))?;
        Ok(Some(record))
    }
}

fn parse_element(line: &str, vertex_count: usize) -> std::result::Result<[u32; 3], ParseErrorKind> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let code = words
        .first()
        .and_then(|w| w.parse::<u32>().ok())
        .ok_or_else(|| ParseErrorKind::InvalidNumber(line.to_string()))?;
    if code != ELEMENT_TRIANGLE {
        return Err(ParseErrorKind::UnsupportedTopology(format!("element type {}", code)));
    }
    if words.len() != 4 {
        return Err(ParseErrorKind::Structure(format!(
            "triangle needs 3 vertex indices, found {}",
            words.len() - 1
        )));
    }
    let mut tri = [0u32; 3];
    for (slot, word) in tri.iter_mut().zip(&words[1..]) {
        let index = word
            .parse::<u32>()
            .map_err(|_| ParseErrorKind::InvalidNumber(word.to_string()))?;
        if index as usize >= vertex_count {
            return Err(ParseErrorKind::Structure(format!(
                "vertex index {} out of {}",
                index, vertex_count
            )));
        }
        *slot = index;
    }
    Ok(tri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;
    use tcadana_core::FormatTag;

    const V1: &str = "# tcadgrid 1.0\nquantity ElectricField V/um\ndimension 1\nregion Bulk\ndata\n\
        0.0 1.0\n1.0 2.5\n2.0 0.5\n";

    const V2: &str = "# tcadgrid 2.0\ndimension 2\nvertices 3\n0.0 0.0\n1.0 0.0\n0.0 1.0\n\
        elements 1\n2 0 1 2\n\
        field DopingConcentration cm^-3\n1e12 1e12\n1e15\nend\n\
        field ElectricField V/cm\n1.0 2.0 3.0\nend\n";

    fn lines(text: &str) -> LineReader<Cursor<Vec<u8>>> {
        LineReader::new(Cursor::new(text.as_bytes().to_vec()), "grid.txt")
    }

    fn source(format: FormatTag) -> SourceRef {
        SourceRef {
            file: PathBuf::from("grid.txt"),
            format,
        }
    }

    fn kind_of(err: crate::error::Error) -> ParseErrorKind {
        err.as_parse().map(|e| e.kind.clone()).expect("parse error")
    }

    #[test]
    fn test_v1_converts_units() {
        let config = AnalysisConfig::default();
        let mut reader = GridV1Reader::new(lines(V1), &config, source(FormatTag::GridV1));
        let mut warnings = Vec::new();
        let field = reader.next_field(&mut warnings).unwrap().unwrap();
        assert_eq!(field.unit, "V/cm");
        assert_eq!(field.values, vec![1e4, 2.5e4, 0.5e4]);
        assert_eq!(field.region.as_deref(), Some("Bulk"));
        assert!(reader.next_field(&mut warnings).unwrap().is_none());
    }

    #[test]
    fn test_v1_unknown_unit() {
        let config = AnalysisConfig::default();
        let text = V1.replace("V/um", "furlongs");
        let mut reader = GridV1Reader::new(lines(&text), &config, source(FormatTag::GridV1));
        let err = reader.next_field(&mut Vec::new()).unwrap_err();
        assert!(matches!(kind_of(err), ParseErrorKind::UnitMismatch { .. }));
    }

    #[test]
    fn test_v1_short_row_truncated() {
        let config = AnalysisConfig::default();
        let text = format!("{}3.0\n", V1);
        let mut reader = GridV1Reader::new(lines(&text), &config, source(FormatTag::GridV1));
        let err = reader.next_field(&mut Vec::new()).unwrap_err();
        let parse = err.as_parse().unwrap();
        assert_eq!(parse.location.line, 9);
        assert!(matches!(parse.kind, ParseErrorKind::TruncatedData(_)));
    }

    #[test]
    fn test_v1_byte_order_mark() {
        let config = AnalysisConfig::default();
        let text = format!("\u{feff}{}", V1);
        let mut reader = GridV1Reader::new(lines(&text), &config, source(FormatTag::GridV1));
        let field = reader.next_field(&mut Vec::new()).unwrap().unwrap();
        assert_eq!(field.len(), 3);
    }

    #[test]
    fn test_v2_fields_in_order() {
        let config = AnalysisConfig::default();
        let mut reader = GridV2Reader::new(lines(V2), &config, source(FormatTag::GridV2));
        let mut warnings = Vec::new();
        let doping = reader.next_field(&mut warnings).unwrap().unwrap();
        assert_eq!(doping.name, "DopingConcentration");
        assert_eq!(doping.values, vec![1e12, 1e12, 1e15]);
        assert_eq!(doping.triangles, Some(vec![[0, 1, 2]]));
        assert_eq!(reader.mesh().unwrap().vertex_count(), 3);

        let field = reader.next_field(&mut warnings).unwrap().unwrap();
        assert_eq!(field.class, QuantityClass::ElectricField);
        assert!(field.same_grid(&doping));
        assert!(reader.next_field(&mut warnings).unwrap().is_none());
    }

    #[test]
    fn test_v2_missing_end_truncated() {
        let config = AnalysisConfig::default();
        let text = V2.trim_end().trim_end_matches("end");
        let mut reader = GridV2Reader::new(lines(text), &config, source(FormatTag::GridV2));
        let mut warnings = Vec::new();
        assert!(reader.next_field(&mut warnings).unwrap().is_some());
        let err = reader.next_field(&mut warnings).unwrap_err();
        assert!(matches!(kind_of(err), ParseErrorKind::TruncatedData(_)));
    }

    #[test]
    fn test_v2_oversized_counts_truncated() {
        let config = AnalysisConfig::default();
        let text = "# tcadgrid 2.0\ndimension 1\nvertices 100000000000000000\n0.0\n1.0\n";
        let mut reader = GridV2Reader::new(lines(text), &config, source(FormatTag::GridV2));
        let err = reader.next_field(&mut Vec::new()).unwrap_err();
        assert!(matches!(kind_of(err), ParseErrorKind::TruncatedData(_)));

        let text = V2.replace("elements 1", "elements 100000000000000000");
        let mut reader = GridV2Reader::new(lines(&text), &config, source(FormatTag::GridV2));
        assert!(reader.next_field(&mut Vec::new()).is_err());
    }

    #[test]
    fn test_v2_quad_elements_unsupported() {
        let config = AnalysisConfig::default();
        let text = V2.replace("2 0 1 2", "3 0 1 2");
        let mut reader = GridV2Reader::new(lines(&text), &config, source(FormatTag::GridV2));
        let err = reader.next_field(&mut Vec::new()).unwrap_err();
        assert!(matches!(kind_of(err), ParseErrorKind::UnsupportedTopology(_)));
    }

    #[test]
    fn test_v2_value_count_mismatch() {
        let config = AnalysisConfig::default();
        let text = V2.replace("1.0 2.0 3.0", "1.0 2.0");
        let mut reader = GridV2Reader::new(lines(&text), &config, source(FormatTag::GridV2));
        let mut warnings = Vec::new();
        reader.next_field(&mut warnings).unwrap();
        let err = reader.next_field(&mut warnings).unwrap_err();
        assert!(matches!(kind_of(err), ParseErrorKind::Structure(_)));
    }

    #[test]
    fn test_v2_non_finite_warning() {
        let config = AnalysisConfig::default();
        let text = V2.replace("1.0 2.0 3.0", "1.0 NaN inf");
        let mut reader = GridV2Reader::new(lines(&text), &config, source(FormatTag::GridV2));
        let mut warnings = Vec::new();
        reader.next_field(&mut warnings).unwrap();
        let field = reader.next_field(&mut warnings).unwrap().unwrap();
        assert_eq!(field.non_finite, 2);
        assert_eq!(
            warnings,
            vec![ParseWarning::NonFinite {
                location: Location::new(14, 157),
                quantity: "ElectricField".to_string(),
                count: 2,
            }]
        );
    }
}

//! QA measurement exports (I-V and C-V) in JSON form.
//!
//! A file holds either one test:
//!
//! ```json
//! { "Metadata": { "TestType": "IV", "Component": "20USBSX0000123", "Temperature": -20 },
//!   "Results":  { "Voltage": [0, -10, -20], "Current": [1e-9, 2e-9, 3e-9] } }
//! ```
//!
//! or a map of test name to such objects. Temperatures are in degrees Celsius.
//! Units come from `VoltageUnit`/`CurrentUnit`/`CapacitanceUnit` metadata; an
//! area suffix such as `/cm2` is kept on the converted unit.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use tcadana_core::{AnalysisConfig, CurveQuantity, CurveRecord, QuantityClass, SourceRef};

use crate::dfise::note_non_finite;
use crate::error::{Error, Location, ParseError, ParseErrorKind, ParseWarning, Result, UnsupportedFormatError};

const CELSIUS_OFFSET: f64 = 273.15;

/// Metadata key/value filter applied to every test in a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QaFilter {
    pairs: BTreeMap<String, String>,
}

impl QaFilter {
    pub fn new(pairs: BTreeMap<String, String>) -> Self {
        Self { pairs }
    }

    /// Parse `"Institute=CNM,DeviceType=MD8"`.
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let mut pairs = BTreeMap::new();
        for pair in spec.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("filter '{}' is not key=value", pair.trim()))?;
            pairs.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// A test matches when every key is present with the expected value.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.pairs.iter().all(|(key, expected)| match metadata.get(key) {
            Some(Value::String(s)) => s == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct QaTest {
    #[serde(rename = "Metadata")]
    metadata: Map<String, Value>,
    #[serde(rename = "Results")]
    results: QaResults,
}

#[derive(Debug, Deserialize)]
struct QaResults {
    #[serde(rename = "Voltage")]
    voltage: Vec<Option<f64>>,
    #[serde(rename = "Current", default)]
    current: Option<Vec<Option<f64>>>,
    #[serde(rename = "Capacitance", default)]
    capacitance: Option<Vec<Option<f64>>>,
}

/// Position of byte `offset` in `text`.
fn locate(text: &str, offset: usize) -> Location {
    let offset = offset.min(text.len());
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    Location::new(line, line_start as u64)
}

/// Location of a serde_json error, from its 1-based line and column.
fn locate_serde(text: &str, err: &serde_json::Error) -> Location {
    let line = err.line().max(1);
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    Location::new(line, line_start as u64)
}

struct QaContext<'a> {
    path: &'a Path,
    text: &'a str,
    config: &'a AnalysisConfig,
    source: &'a SourceRef,
    filter: QaFilter,
}

impl QaContext<'_> {
    fn error(&self, needle: &str, kind: ParseErrorKind) -> Error {
        let offset = self.text.find(needle).unwrap_or(0);
        Error::Parse(ParseError {
            path: self.path.to_path_buf(),
            location: locate(self.text, offset),
            kind,
        })
    }

    /// Convert a unit (optionally area-normalized, `pF/cm2`) to canonical form.
    fn unit(&self, test: &str, class: QuantityClass, declared: &str) -> Result<(String, f64)> {
        let (base, per_area) = match declared.split_once('/') {
            Some((base, area)) => (base, Some(area)),
            None => (declared, None),
        };
        let factor = self.config.units.resolve(class, base).ok_or_else(|| {
            self.error(
                test,
                ParseErrorKind::UnitMismatch {
                    quantity: format!("{:?}", class),
                    unit: declared.to_string(),
                },
            )
        })?;
        let canonical = self.config.units.canonical(class, base);
        let unit = match per_area {
            Some(area) => format!("{}/{}", canonical, area),
            None => canonical.to_string(),
        };
        Ok((unit, factor))
    }

    fn column(
        &self,
        test: &str,
        quantity: &str,
        values: Vec<Option<f64>>,
        factor: f64,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<Vec<f64>> {
        let location = locate(self.text, self.text.find(test).unwrap_or(0));
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            let v = v.unwrap_or(f64::NAN);
            if !v.is_finite() {
                if self.config.parse.reject_non_finite {
                    return Err(self.error(test, ParseErrorKind::NonFinite(quantity.to_string())));
                }
                note_non_finite(warnings, location, quantity);
            }
            out.push(v * factor);
        }
        Ok(out)
    }

    fn curves(&self, name: &str, test: QaTest, warnings: &mut Vec<ParseWarning>) -> Result<Vec<CurveRecord>> {
        let meta_str = |key: &str| test.metadata.get(key).and_then(Value::as_str);
        let test_type = meta_str("TestType").unwrap_or("");
        let (class, quantity, dependent) = match test_type {
            "IV" => (QuantityClass::Current, CurveQuantity::Current, test.results.current),
            "CV" => (
                QuantityClass::Capacitance,
                CurveQuantity::Capacitance,
                test.results.capacitance,
            ),
            other => {
                log::debug!("{}: skipping test {} of type '{}'", self.source.file.display(), name, other);
                return Ok(Vec::new());
            }
        };
        let label = if class == QuantityClass::Current { "Current" } else { "Capacitance" };
        let Some(dependent) = dependent else {
            return Err(self.error(
                name,
                ParseErrorKind::Structure(format!("{} test {} has no {} results", test_type, name, label)),
            ));
        };

        let default_unit = if class == QuantityClass::Current { "A" } else { "F" };
        let (v_unit, v_factor) = self.unit(name, QuantityClass::Voltage, meta_str("VoltageUnit").unwrap_or("V"))?;
        let (y_unit, y_factor) = self.unit(
            name,
            class,
            meta_str(&format!("{}Unit", label)).unwrap_or(default_unit),
        )?;

        let x_name = format!("{} Voltage", name);
        let y_name = format!("{} {}", name, label);
        let x = self.column(name, &x_name, test.results.voltage, v_factor, warnings)?;
        let y = self.column(name, &y_name, dependent, y_factor, warnings)?;
        if x.len() != y.len() {
            return Err(self.error(
                name,
                ParseErrorKind::Structure(format!(
                    "test {} has {} voltages for {} {} values",
                    name,
                    x.len(),
                    y.len(),
                    label
                )),
            ));
        }

        let temperature = test
            .metadata
            .get("Temperature")
            .and_then(Value::as_f64)
            .map(|c| c + CELSIUS_OFFSET)
            .or(self.config.parse.default_temperature);

        let record = CurveRecord::new(y_name, quantity, x_name, v_unit, y_unit, x, y, temperature, self.source.clone())
            .map_err(|e| self.error(name, ParseErrorKind::Structure(e.to_string())))?;
        Ok(vec![record])
    }
}

/// Read every matching I-V/C-V test of a QA JSON file.
pub fn read_qa_json<R: Read>(
    mut reader: R,
    path: &Path,
    config: &AnalysisConfig,
    source: &SourceRef,
    warnings: &mut Vec<ParseWarning>,
) -> Result<Vec<CurveRecord>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| Error::io(path, e))?;

    let ctx = QaContext {
        path,
        text: &text,
        config,
        source,
        filter: QaFilter::new(config.parse.qa_metadata_filter.clone()),
    };

    let root: Value = serde_json::from_str(&text).map_err(|e| {
        let kind = if e.is_eof() {
            ParseErrorKind::TruncatedData(e.to_string())
        } else {
            ParseErrorKind::Structure(e.to_string())
        };
        Error::Parse(ParseError {
            path: path.to_path_buf(),
            location: locate_serde(&text, &e),
            kind,
        })
    })?;

    let Value::Object(map) = root else {
        return Err(ctx.error("", ParseErrorKind::Structure("top level is not an object".to_string())));
    };

    let tests: Vec<(String, Value)> = if map.contains_key("Metadata") {
        let name = map
            .get("Metadata")
            .and_then(|m| m.get("Component"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                source
                    .file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "test".to_string())
            });
        let test_type = map
            .get("Metadata")
            .and_then(|m| m.get("TestType"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if !matches!(test_type, "IV" | "CV") {
            return Err(Error::UnsupportedFormat(UnsupportedFormatError {
                path: path.to_path_buf(),
                signature: format!("TestType={}", test_type),
                reason: "only IV and CV measurements are supported".to_string(),
            }));
        }
        vec![(name, Value::Object(map))]
    } else {
        map.into_iter().collect()
    };

    let mut out = Vec::new();
    for (name, value) in tests {
        let test: QaTest = serde_json::from_value(value)
            .map_err(|e| ctx.error(&name, ParseErrorKind::Structure(format!("test {}: {}", name, e))))?;
        if !ctx.filter.matches(&test.metadata) {
            log::debug!("{}: test {} filtered out", source.file.display(), name);
            continue;
        }
        out.extend(ctx.curves(&name, test, warnings)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tcadana_core::{FormatTag, ParseOptions};

    fn source() -> SourceRef {
        SourceRef {
            file: PathBuf::from("qa.json"),
            format: FormatTag::QaJson,
        }
    }

    fn read(text: &str, config: &AnalysisConfig) -> (Result<Vec<CurveRecord>>, Vec<ParseWarning>) {
        let mut warnings = Vec::new();
        let result = read_qa_json(text.as_bytes(), Path::new("qa.json"), config, &source(), &mut warnings);
        (result, warnings)
    }

    const MULTI: &str = r#"{
  "MD8_IV_1": {
    "Metadata": {"TestType": "IV", "Institute": "CNM", "Temperature": -20,
                 "CurrentUnit": "nA/cm2"},
    "Results": {"Voltage": [0, -100, -200], "Current": [1, 2, null]}
  },
  "MD8_CV_1": {
    "Metadata": {"TestType": "CV", "Institute": "SFU", "CapacitanceUnit": "pF"},
    "Results": {"Voltage": [0, -100], "Capacitance": [50, 10]}
  },
  "CCE_1": {
    "Metadata": {"TestType": "CCE"},
    "Results": {"Voltage": [0]}
  }
}"#;

    #[test]
    fn test_multi_test_file() {
        let (result, warnings) = read(MULTI, &AnalysisConfig::default());
        let curves = result.unwrap();
        assert_eq!(curves.len(), 2);

        let iv = &curves[1];
        assert_eq!(iv.name, "MD8_IV_1 Current");
        assert_eq!(iv.y_unit, "A/cm2");
        assert!((iv.y[1] - 2e-9).abs() < 1e-24);
        assert!((iv.temperature.unwrap() - 253.15).abs() < 1e-9);
        assert_eq!(iv.non_finite, 1);
        assert_eq!(warnings.len(), 1);

        let cv = &curves[0];
        assert_eq!(cv.quantity, CurveQuantity::Capacitance);
        assert_eq!(cv.y_unit, "F");
    }

    #[test]
    fn test_metadata_filter() {
        let mut filter = BTreeMap::new();
        filter.insert("Institute".to_string(), "CNM".to_string());
        let config = AnalysisConfig::default().with_parse_options(ParseOptions {
            qa_metadata_filter: filter,
            ..ParseOptions::default()
        });
        let (result, _) = read(MULTI, &config);
        let curves = result.unwrap();
        assert_eq!(curves.len(), 1);
        assert_eq!(curves[0].name, "MD8_IV_1 Current");
    }

    #[test]
    fn test_filter_parse() {
        let f = QaFilter::parse("Institute=CNM, DeviceType=MD8").unwrap();
        let meta: Map<String, Value> =
            serde_json::from_str(r#"{"Institute": "CNM", "DeviceType": "MD8", "IsSim": false}"#).unwrap();
        assert!(f.matches(&meta));
        assert!(QaFilter::parse("IsSim=false").unwrap().matches(&meta));
        assert!(!QaFilter::parse("Institute=SFU").unwrap().matches(&meta));
        assert!(QaFilter::parse("broken").is_err());
    }

    #[test]
    fn test_single_test_unsupported_type() {
        let text = r#"{"Metadata": {"TestType": "CCE"}, "Results": {"Voltage": []}}"#;
        let (result, _) = read(text, &AnalysisConfig::default());
        assert!(result.unwrap_err().is_unsupported());
    }

    #[test]
    fn test_truncated_json() {
        let text = &MULTI[..MULTI.len() / 2];
        let (result, _) = read(text, &AnalysisConfig::default());
        let err = result.unwrap_err();
        assert!(matches!(
            err.as_parse().map(|e| &e.kind),
            Some(ParseErrorKind::TruncatedData(_))
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let text = r#"{"Metadata": {"TestType": "IV", "Component": "S1"},
            "Results": {"Voltage": [0, 1], "Current": [1e-9]}}"#;
        let (result, _) = read(text, &AnalysisConfig::default());
        let err = result.unwrap_err();
        let parse = err.as_parse().unwrap();
        assert!(matches!(parse.kind, ParseErrorKind::Structure(_)));
        assert_eq!(parse.location.line, 1);
    }
}

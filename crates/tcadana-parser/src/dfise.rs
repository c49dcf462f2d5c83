//! DF-ISE text `xyplot` files (Sentaurus `.plt`).
//!
//! ```text
//! DF-ISE text
//!
//! Info {
//!   version   = 1.0
//!   type      = xyplot
//!   datasets  = [ "time" "Anode OuterVoltage" "Anode TotalCurrent" ]
//!   functions = [ time OuterVoltage TotalCurrent ]
//! }
//!
//! Data {
//!   0.0 0.0 1.2e-12
//!   0.1 -10.0 3.4e-12
//! }
//! ```
//!
//! Values in `Data` are interleaved: value `k` belongs to dataset
//! `k % datasets.len()`.

use std::collections::BTreeMap;
use std::io::BufRead;

use tcadana_core::{CurveQuantity, CurveRecord, ParseOptions, QuantityClass, SourceRef, UnitTable};

use crate::error::{Error, Location, ParseErrorKind, ParseWarning, Result, UnsupportedFormatError};
use crate::lexer::{LineReader, Token, Tokenizer, parse_number};

pub const SIGNATURE: &str = "DF-ISE text";
pub const ACCEPTED_VERSIONS: &[&str] = &["1.0"];

/// Contents of the `Info` block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DfiseInfo {
    pub version: String,
    pub kind: String,
    pub datasets: Vec<String>,
    pub functions: Vec<String>,
}

/// A fully read xyplot file: one column per dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DfiseFile {
    pub info: DfiseInfo,
    pub columns: Vec<Vec<f64>>,
}

impl DfiseFile {
    /// Values of a dataset by its full name (e.g. `Anode OuterVoltage`).
    pub fn dataset(&self, name: &str) -> Option<&[f64]> {
        let idx = self.info.datasets.iter().position(|d| d == name)?;
        self.columns.get(idx).map(|c| c.as_slice())
    }

    /// Datasets grouped by contact: `"<group> <attr>"` names nest under
    /// `group`, single-word names form a group of their own with no attributes.
    pub fn groups(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in &self.info.datasets {
            match name.split_once(' ') {
                Some((group, attr)) => groups.entry(group).or_default().push(attr.trim()),
                None => {
                    groups.entry(name.as_str()).or_default();
                }
            }
        }
        groups
    }

    /// Number of samples per dataset.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read an xyplot file from the start of its first line.
pub fn read_dfise<R: BufRead>(
    mut lines: LineReader<R>,
    options: &ParseOptions,
    warnings: &mut Vec<ParseWarning>,
) -> Result<DfiseFile> {
    let signed = matches!(lines.next_line()?, Some(first) if first.trim() == SIGNATURE);
    if !signed {
        return Err(lines.error(ParseErrorKind::MalformedHeader(format!(
            "expected '{}'",
            SIGNATURE
        ))));
    }

    let mut tokens = Tokenizer::new(lines);
    expect_block(&mut tokens, "Info")?;
    let info = read_info(&mut tokens)?;

    if !ACCEPTED_VERSIONS.contains(&info.version.as_str()) {
        return Err(unsupported(&tokens, &info, format!("version {} is not supported", info.version)));
    }
    if info.kind != "xyplot" {
        return Err(unsupported(&tokens, &info, format!("type {} is not supported", info.kind)));
    }

    expect_block(&mut tokens, "Data")?;
    let columns = read_data(&mut tokens, &info.datasets, options, warnings)?;
    Ok(DfiseFile { info, columns })
}

/// Turn an xyplot file into curves against the bias dataset.
pub fn curves(
    file: &DfiseFile,
    options: &ParseOptions,
    units: &UnitTable,
    source: &SourceRef,
) -> std::result::Result<Vec<CurveRecord>, ParseErrorKind> {
    let datasets = &file.info.datasets;
    let bias = match &options.bias_dataset {
        Some(name) => datasets
            .iter()
            .position(|d| d == name)
            .ok_or_else(|| ParseErrorKind::Structure(format!("bias dataset '{}' not found", name)))?,
        None => datasets
            .iter()
            .position(|d| d.ends_with("OuterVoltage"))
            .ok_or_else(|| ParseErrorKind::Structure("no OuterVoltage dataset to use as bias".to_string()))?,
    };

    let temperature = datasets
        .iter()
        .position(|d| QuantityClass::classify(d) == QuantityClass::Temperature)
        .and_then(|i| file.columns[i].iter().copied().find(|v| v.is_finite()))
        .or(options.default_temperature);

    let x_name = &datasets[bias];
    let x_unit = units.canonical(QuantityClass::Voltage, "V");

    let mut out = Vec::with_capacity(datasets.len().saturating_sub(1));
    for (i, name) in datasets.iter().enumerate() {
        if i == bias {
            continue;
        }
        let class = QuantityClass::classify(name);
        let record = CurveRecord::new(
            name.clone(),
            CurveQuantity::from(class),
            x_name.clone(),
            x_unit,
            units.canonical(class, ""),
            file.columns[bias].clone(),
            file.columns[i].clone(),
            temperature,
            source.clone(),
        )
        .map_err(|e| ParseErrorKind::Structure(e.to_string()))?;
        out.push(record);
    }
    Ok(out)
}

fn unsupported<R: BufRead>(tokens: &Tokenizer<R>, info: &DfiseInfo, reason: String) -> Error {
    Error::UnsupportedFormat(UnsupportedFormatError {
        path: tokens.lines().path().to_path_buf(),
        signature: format!("{} {} {}", SIGNATURE, info.kind, info.version),
        reason,
    })
}

fn expect_block<R: BufRead>(tokens: &mut Tokenizer<R>, name: &str) -> Result<()> {
    let context = format!("{} block", name);
    let tok = tokens.expect_token(&context)?;
    if tok.token != Token::Word(name.to_string()) {
        return Err(tokens.error_at(
            tok.location,
            ParseErrorKind::MalformedHeader(format!("expected '{}', found {:?}", name, tok.token)),
        ));
    }
    let tok = tokens.expect_token(&context)?;
    if tok.token != Token::LBrace {
        return Err(tokens.error_at(
            tok.location,
            ParseErrorKind::MalformedHeader(format!("expected '{{' after {}", name)),
        ));
    }
    Ok(())
}

fn read_info<R: BufRead>(tokens: &mut Tokenizer<R>) -> Result<DfiseInfo> {
    let mut info = DfiseInfo::default();
    let mut seen_version = false;
    let mut seen_type = false;
    let start = tokens.lines().location();

    loop {
        let tok = tokens.expect_token("Info block")?;
        let key = match tok.token {
            Token::RBrace => break,
            Token::Word(key) => key,
            other => {
                return Err(tokens.error_at(
                    tok.location,
                    ParseErrorKind::MalformedHeader(format!("unexpected {:?} in Info", other)),
                ));
            }
        };
        let eq = tokens.expect_token("Info block")?;
        if eq.token != Token::Equals {
            return Err(tokens.error_at(
                eq.location,
                ParseErrorKind::MalformedHeader(format!("expected '=' after {}", key)),
            ));
        }
        let values = read_value(tokens)?;
        match key.as_str() {
            "version" => {
                info.version = values.into_iter().next().unwrap_or_default();
                seen_version = true;
            }
            "type" => {
                info.kind = values.into_iter().next().unwrap_or_default();
                seen_type = true;
            }
            "datasets" => info.datasets = values,
            "functions" => info.functions = values,
            _ => {}
        }
    }

    if !seen_version || !seen_type {
        return Err(tokens.error_at(
            start,
            ParseErrorKind::MalformedHeader("Info lacks version or type".to_string()),
        ));
    }
    if info.datasets.is_empty() {
        return Err(tokens.error_at(
            start,
            ParseErrorKind::MalformedHeader("Info declares no datasets".to_string()),
        ));
    }
    if !info.functions.is_empty() && info.functions.len() != info.datasets.len() {
        return Err(tokens.error_at(
            start,
            ParseErrorKind::Structure(format!(
                "{} functions for {} datasets",
                info.functions.len(),
                info.datasets.len()
            )),
        ));
    }
    Ok(info)
}

/// A scalar value or a bracketed list of values.
fn read_value<R: BufRead>(tokens: &mut Tokenizer<R>) -> Result<Vec<String>> {
    let tok = tokens.expect_token("Info block")?;
    match tok.token {
        Token::Word(w) | Token::Str(w) => Ok(vec![w]),
        Token::LBracket => {
            let mut items = Vec::new();
            loop {
                let item = tokens.expect_token("Info list")?;
                match item.token {
                    Token::RBracket => return Ok(items),
                    Token::Word(w) | Token::Str(w) => items.push(w),
                    other => {
                        return Err(tokens.error_at(
                            item.location,
                            ParseErrorKind::MalformedHeader(format!("unexpected {:?} in list", other)),
                        ));
                    }
                }
            }
        }
        other => Err(tokens.error_at(
            tok.location,
            ParseErrorKind::MalformedHeader(format!("unexpected {:?} as value", other)),
        )),
    }
}

fn read_data<R: BufRead>(
    tokens: &mut Tokenizer<R>,
    datasets: &[String],
    options: &ParseOptions,
    warnings: &mut Vec<ParseWarning>,
) -> Result<Vec<Vec<f64>>> {
    let n = datasets.len();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); n];
    let mut count = 0usize;

    loop {
        let Some(tok) = tokens.next_token()? else {
            return Err(tokens.lines().error(ParseErrorKind::TruncatedData(
                "Data block has no closing '}'".to_string(),
            )));
        };
        match tok.token {
            Token::RBrace => break,
            Token::Word(word) => {
                let value = parse_number(&word).map_err(|kind| tokens.error_at(tok.location, kind))?;
                let column = count % n;
                if !value.is_finite() {
                    if options.reject_non_finite {
                        return Err(tokens.error_at(
                            tok.location,
                            ParseErrorKind::NonFinite(datasets[column].clone()),
                        ));
                    }
                    note_non_finite(warnings, tok.location, &datasets[column]);
                }
                columns[column].push(value);
                count += 1;
            }
            other => {
                return Err(tokens.error_at(
                    tok.location,
                    ParseErrorKind::Structure(format!("unexpected {:?} in Data", other)),
                ));
            }
        }
    }

    if count % n != 0 {
        return Err(tokens.lines().error(ParseErrorKind::TruncatedData(format!(
            "{} values do not fill {} datasets",
            count, n
        ))));
    }
    Ok(columns)
}

/// Merge non-finite findings on the same line and dataset into one warning.
pub(crate) fn note_non_finite(warnings: &mut Vec<ParseWarning>, location: Location, quantity: &str) {
    if let Some(ParseWarning::NonFinite {
        location: last_loc,
        quantity: last_q,
        count,
    }) = warnings.last_mut()
    {
        if *last_loc == location && last_q.as_str() == quantity {
            *count += 1;
            return;
        }
    }
    warnings.push(ParseWarning::NonFinite {
        location,
        quantity: quantity.to_string(),
        count: 1,
    });
}

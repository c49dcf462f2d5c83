//! Restartable record streams over dump files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::vec;

use tcadana_core::{AnalysisConfig, CurveRecord, FormatTag, Record, SourceRef};

use crate::dfise::{curves, read_dfise};
use crate::error::{Error, Location, ParseError, ParseWarning, Result, UnsupportedFormatError};
use crate::grid::{GridV1Reader, GridV2Reader};
use crate::lexer::LineReader;
use crate::qa_json::read_qa_json;
use crate::sniff::resolve_format;
#[cfg(feature = "tdr")]
use crate::tdr::TdrReader;

const READ_BUFFER: usize = 1 << 16;

type FileLines = BufReader<File>;

enum ReaderState<'a> {
    Unopened,
    GridV1(GridV1Reader<'a, FileLines>),
    GridV2(GridV2Reader<'a, FileLines>),
    #[cfg(feature = "tdr")]
    Tdr(TdrReader<'a>),
    /// Curve formats are small; they are read in one pass and replayed.
    Curves(vec::IntoIter<CurveRecord>),
    Done,
}

/// Lazy, finite, rewindable sequence of records from one file.
///
/// The header is sniffed when the reader is created; the file itself is only
/// opened on the first call to `next`. After the first error the reader is
/// fused and yields nothing until [`rewind`](RecordReader::rewind).
pub struct RecordReader<'a> {
    path: PathBuf,
    format: FormatTag,
    config: &'a AnalysisConfig,
    source: SourceRef,
    state: ReaderState<'a>,
    warnings: Vec<ParseWarning>,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    /// Create a reader for `path`, checking its signature against `declared`.
    pub fn open(path: impl AsRef<Path>, declared: Option<FormatTag>, config: &'a AnalysisConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let format = resolve_format(&path, declared)?;
        if !supports(format) {
            return Err(Error::UnsupportedFormat(UnsupportedFormatError {
                path,
                signature: "HDF5".to_string(),
                reason: "TDR support is not built in (enable the `tdr` feature)".to_string(),
            }));
        }
        let file_name = path.file_name().map(PathBuf::from).unwrap_or_else(|| path.clone());
        Ok(Self {
            source: SourceRef {
                file: file_name,
                format,
            },
            path,
            format,
            config,
            state: ReaderState::Unopened,
            warnings: Vec::new(),
            failed: false,
        })
    }

    /// Name recorded as the provenance of every record (usually the path
    /// relative to the run directory).
    pub fn with_source_name(mut self, name: impl Into<PathBuf>) -> Self {
        self.source.file = name.into();
        self
    }

    pub fn format(&self) -> FormatTag {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Warnings collected since the last rewind.
    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<ParseWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Restart from the beginning of the file.
    pub fn rewind(&mut self) {
        self.state = ReaderState::Unopened;
        self.warnings.clear();
        self.failed = false;
    }

    fn open_state(&mut self) -> Result<ReaderState<'a>> {
        #[cfg(feature = "tdr")]
        if self.format == FormatTag::TdrHdf5 {
            log::debug!("opening {} as {}", self.path.display(), self.format);
            let reader = TdrReader::open(&self.path, self.config, self.source.clone())?;
            return Ok(ReaderState::Tdr(reader));
        }
        let file = File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let buffered = BufReader::with_capacity(READ_BUFFER, file);
        log::debug!("opening {} as {}", self.path.display(), self.format);
        let state = match self.format {
            FormatTag::GridV1 => ReaderState::GridV1(GridV1Reader::new(
                LineReader::new(buffered, &self.path),
                self.config,
                self.source.clone(),
            )),
            FormatTag::GridV2 => ReaderState::GridV2(GridV2Reader::new(
                LineReader::new(buffered, &self.path),
                self.config,
                self.source.clone(),
            )),
            FormatTag::DfiseXyPlot => {
                let lines = LineReader::new(buffered, &self.path);
                let file = read_dfise(lines, &self.config.parse, &mut self.warnings)?;
                let records = curves(&file, &self.config.parse, &self.config.units, &self.source).map_err(|kind| {
                    Error::Parse(ParseError {
                        path: self.path.clone(),
                        location: Location::new(1, 0),
                        kind,
                    })
                })?;
                ReaderState::Curves(records.into_iter())
            }
            FormatTag::QaJson => {
                let records = read_qa_json(buffered, &self.path, self.config, &self.source, &mut self.warnings)?;
                ReaderState::Curves(records.into_iter())
            }
            FormatTag::TdrHdf5 => ReaderState::Done,
        };
        Ok(state)
    }

    fn advance(&mut self) -> Result<Option<Record>> {
        if matches!(self.state, ReaderState::Unopened) {
            self.state = self.open_state()?;
        }
        let record = match &mut self.state {
            ReaderState::GridV1(r) => r.next_field(&mut self.warnings)?.map(Record::Field),
            ReaderState::GridV2(r) => r.next_field(&mut self.warnings)?.map(Record::Field),
            #[cfg(feature = "tdr")]
            ReaderState::Tdr(r) => r.next_field(&mut self.warnings)?.map(Record::Field),
            ReaderState::Curves(it) => it.next().map(Record::Curve),
            ReaderState::Unopened | ReaderState::Done => None,
        };
        if record.is_none() {
            self.state = ReaderState::Done;
        }
        Ok(record)
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                self.state = ReaderState::Done;
                Some(Err(e))
            }
        }
    }
}

/// Whether this build can read `format`.
pub fn supports(format: FormatTag) -> bool {
    format != FormatTag::TdrHdf5 || cfg!(feature = "tdr")
}

/// Read every record of a file, returning them with the collected warnings.
pub fn parse_file(
    path: impl AsRef<Path>,
    declared: Option<FormatTag>,
    config: &AnalysisConfig,
) -> Result<(Vec<Record>, Vec<ParseWarning>)> {
    let mut reader = RecordReader::open(path, declared, config)?;
    let records = reader.by_ref().collect::<Result<Vec<_>>>()?;
    Ok((records, reader.take_warnings()))
}

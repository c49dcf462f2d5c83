//! Error and warning types for tcadana-parser.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Position in a dump file: 1-based line and 0-based byte offset of the line start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub offset: u64,
}

impl Location {
    pub fn new(line: usize, offset: u64) -> Self {
        Self { line, offset }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} (byte {})", self.line, self.offset)
    }
}

/// What went wrong while parsing a supported format.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("truncated data: {0}")]
    TruncatedData(String),

    #[error("unit mismatch: '{unit}' is not a unit of {quantity}")]
    UnitMismatch { quantity: String, unit: String },

    #[error("unsupported mesh topology: {0}")]
    UnsupportedTopology(String),

    #[error("invalid number: '{0}'")]
    InvalidNumber(String),

    #[error("non-finite value in {0}")]
    NonFinite(String),

    #[error("structural mismatch: {0}")]
    Structure(String),
}

/// A parse failure, fatal for the run the file belongs to.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {location}: {kind}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub location: Location,
    pub kind: ParseErrorKind,
}

/// The file's signature or version is outside the accepted set.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: unsupported format ({signature}): {reason}", path.display())]
pub struct UnsupportedFormatError {
    pub path: PathBuf,
    /// Header signature as read from the file (truncated, lossy).
    pub signature: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// The parse error, if this is one.
    pub fn as_parse(&self) -> Option<&ParseError> {
        match self {
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedFormat(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal findings collected while reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseWarning {
    /// `count` NaN/Inf samples of `quantity` found on the line at `location`.
    NonFinite {
        location: Location,
        quantity: String,
        count: usize,
    },
    /// A field that could not be read and was left out.
    SkippedField { field: String, reason: String },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::NonFinite {
                location,
                quantity,
                count,
            } => write!(f, "{}: {} non-finite value(s) in {}", location, count, quantity),
            ParseWarning::SkippedField { field, reason } => write!(f, "skipped {}: {}", field, reason),
        }
    }
}

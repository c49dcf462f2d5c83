//! Streaming parsers for TCAD simulation dumps.
//!
//! Every supported file format is identified by its header signature and
//! turned into normalized [`Record`](tcadana_core::Record)s:
//!
//! | Format | Signature | Records |
//! |--------|-----------|---------|
//! | DF-ISE xyplot | `DF-ISE text` | curves |
//! | tcadgrid 1.0 | `# tcadgrid 1.0` | one field |
//! | tcadgrid 2.0 | `# tcadgrid 2.0` | one field per block |
//! | QA JSON | JSON object | I-V / C-V curves |
//! | TDR | HDF5 signature | one field per state item (`tdr` feature) |
//!
//! Without the `tdr` feature TDR files are recognized and rejected.
//!
//! # Example
//!
//! ```no_run
//! use tcadana_core::AnalysisConfig;
//! use tcadana_parser::RecordReader;
//!
//! let config = AnalysisConfig::default();
//! let reader = RecordReader::open("run0/fields.grd", None, &config).unwrap();
//! for record in reader {
//!     println!("{}", record.unwrap().name());
//! }
//! ```

pub mod dfise;
pub mod error;
pub mod grid;
pub mod lexer;
pub mod qa_json;
pub mod reader;
pub mod sniff;
pub mod tdr;

pub use error::{
    Error, Location, ParseError, ParseErrorKind, ParseWarning, Result, UnsupportedFormatError,
};
pub use qa_json::QaFilter;
pub use reader::{RecordReader, parse_file, supports};
pub use sniff::{resolve_format, sniff_bytes, sniff_file};

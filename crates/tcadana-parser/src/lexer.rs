//! Line reading and tokenization shared by the text formats.
//!
//! [`LineReader`] tracks the line number and byte offset of every line it
//! hands out, so errors can point at the exact place in multi-gigabyte dumps.
//! [`Tokenizer`] splits DF-ISE text into braces, brackets, `=`, quoted strings
//! and bare words.

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use crate::error::{Error, Location, ParseError, ParseErrorKind, Result};

/// Buffered line reader with position tracking.
pub struct LineReader<R> {
    inner: R,
    path: PathBuf,
    buf: String,
    line: usize,
    offset: u64,
    next_offset: u64,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            buf: String::new(),
            line: 0,
            offset: 0,
            next_offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the line most recently returned.
    pub fn location(&self) -> Location {
        Location::new(self.line, self.offset)
    }

    /// Build a parse error at the current location.
    pub fn error(&self, kind: ParseErrorKind) -> Error {
        self.error_at(self.location(), kind)
    }

    pub fn error_at(&self, location: Location, kind: ParseErrorKind) -> Error {
        Error::Parse(ParseError {
            path: self.path.clone(),
            location,
            kind,
        })
    }

    fn read_raw(&mut self) -> Result<usize> {
        self.buf.clear();
        let n = match self.inner.read_line(&mut self.buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                let location = Location::new(self.line + 1, self.next_offset);
                return Err(self.error_at(
                    location,
                    ParseErrorKind::Structure("line is not valid UTF-8".to_string()),
                ));
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        if n > 0 {
            self.offset = self.next_offset;
            self.next_offset += n as u64;
            self.line += 1;
        }
        Ok(n)
    }

    /// Next raw line without its terminator, or `None` at end of input.
    pub fn next_line(&mut self) -> Result<Option<&str>> {
        if self.read_raw()? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.trim_end_matches(['\n', '\r'])))
    }

    /// Next line that is neither blank nor a `#` comment, trimmed.
    pub fn next_content_line(&mut self) -> Result<Option<&str>> {
        loop {
            if self.read_raw()? == 0 {
                return Ok(None);
            }
            let t = self.buf.trim();
            if !t.is_empty() && !t.starts_with('#') {
                break;
            }
        }
        Ok(Some(self.buf.trim()))
    }
}

/// Parse one numeric token as `f64`.
///
/// Accepts Rust float syntax (including `nan`/`inf`, case-insensitive) and
/// Fortran-style `D` exponents written by some simulators.
pub fn parse_number(token: &str) -> std::result::Result<f64, ParseErrorKind> {
    let t = token.trim();
    if let Ok(v) = t.parse::<f64>() {
        return Ok(v);
    }
    if t.contains(['D', 'd']) {
        if let Ok(v) = t.replace(['D', 'd'], "E").parse::<f64>() {
            return Ok(v);
        }
    }
    Err(ParseErrorKind::InvalidNumber(t.to_string()))
}

/// Parse every whitespace-separated token of `line` into `out`.
///
/// Returns the number of non-finite values appended.
pub fn parse_numbers_into(line: &str, out: &mut Vec<f64>) -> std::result::Result<usize, ParseErrorKind> {
    let mut non_finite = 0;
    for token in line.split_whitespace() {
        let v = parse_number(token)?;
        if !v.is_finite() {
            non_finite += 1;
        }
        out.push(v);
    }
    Ok(non_finite)
}

/// DF-ISE token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    /// Quoted string, without the quotes.
    Str(String),
    /// Bare word or number.
    Word(String),
}

/// A token with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub location: Location,
}

/// DF-ISE tokenizer, one line at a time.
pub struct Tokenizer<R> {
    lines: LineReader<R>,
    pending: VecDeque<SpannedToken>,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(lines: LineReader<R>) -> Self {
        Self {
            lines,
            pending: VecDeque::new(),
        }
    }

    pub fn lines(&self) -> &LineReader<R> {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut LineReader<R> {
        &mut self.lines
    }

    /// Next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<SpannedToken>> {
        while self.pending.is_empty() {
            let Some(line) = self.lines.next_line()? else {
                return Ok(None);
            };
            let line = line.to_string();
            let location = self.lines.location();
            tokenize_line(&line, location, &mut self.pending)
                .map_err(|kind| self.lines.error(kind))?;
        }
        Ok(self.pending.pop_front())
    }

    /// Next token, failing with truncated data at end of input.
    pub fn expect_token(&mut self, context: &str) -> Result<SpannedToken> {
        match self.next_token()? {
            Some(t) => Ok(t),
            None => Err(self.lines.error(ParseErrorKind::TruncatedData(format!(
                "end of file inside {}",
                context
            )))),
        }
    }

    pub fn error_at(&self, location: Location, kind: ParseErrorKind) -> Error {
        self.lines.error_at(location, kind)
    }
}

fn tokenize_line(
    line: &str,
    location: Location,
    out: &mut VecDeque<SpannedToken>,
) -> std::result::Result<(), ParseErrorKind> {
    let mut chars = line.char_indices().peekable();
    let push = |out: &mut VecDeque<SpannedToken>, token| out.push_back(SpannedToken { token, location });

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' | '}' | '[' | ']' | '=' => {
                chars.next();
                let token = match c {
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Equals,
                };
                push(out, token);
            }
            '"' => {
                chars.next();
                let rest = &line[start + 1..];
                let end = rest
                    .find('"')
                    .ok_or_else(|| ParseErrorKind::MalformedHeader("unterminated string".to_string()))?;
                push(out, Token::Str(rest[..end].to_string()));
                // Skip the string body and the closing quote.
                while let Some(&(i, _)) = chars.peek() {
                    if i > start + end + 1 {
                        break;
                    }
                    chars.next();
                }
            }
            _ => {
                let mut end = line.len();
                while let Some(&(i, ch)) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '{' | '}' | '[' | ']' | '=' | '"') {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                push(out, Token::Word(line[start..end].to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str) -> LineReader<Cursor<Vec<u8>>> {
        LineReader::new(Cursor::new(text.as_bytes().to_vec()), "test.txt")
    }

    #[test]
    fn test_line_locations() {
        let mut r = reader("first\r\n\n# comment\nsecond\n");
        assert_eq!(r.next_line().unwrap(), Some("first"));
        assert_eq!(r.location(), Location::new(1, 0));
        assert_eq!(r.next_content_line().unwrap(), Some("second"));
        assert_eq!(r.location(), Location::new(4, 18));
        assert_eq!(r.next_line().unwrap(), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1.5e3"), Ok(1500.0));
        assert_eq!(parse_number("-2.0D-02"), Ok(-0.02));
        assert!(parse_number("NaN").unwrap().is_nan());
        assert!(parse_number("inf").unwrap().is_infinite());
        assert_eq!(
            parse_number("1.2.3"),
            Err(ParseErrorKind::InvalidNumber("1.2.3".to_string()))
        );
    }

    #[test]
    fn test_parse_numbers_counts_non_finite() {
        let mut out = Vec::new();
        let n = parse_numbers_into("1 nan 3 -inf", &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_tokenize() {
        let mut t = Tokenizer::new(reader("Info {\n  datasets = [ \"Anode OuterVoltage\" \"time\" ]\n}\n"));
        let mut tokens = Vec::new();
        while let Some(tok) = t.next_token().unwrap() {
            tokens.push(tok.token);
        }
        assert_eq!(
            tokens,
            vec![
                Token::Word("Info".to_string()),
                Token::LBrace,
                Token::Word("datasets".to_string()),
                Token::Equals,
                Token::LBracket,
                Token::Str("Anode OuterVoltage".to_string()),
                Token::Str("time".to_string()),
                Token::RBracket,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let mut t = Tokenizer::new(reader("datasets = [ \"open\n"));
        let mut result = Ok(None);
        for _ in 0..4 {
            result = t.next_token();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}

/*!
error module defines the error types used in flowlyzer.
*/
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::{error::Error, fmt, io};

/// Errors raised by loaders, translators and other fallible (non hot-path)
/// code. Per-packet parsing never returns these; analyzers record failures
/// in their per-flow status bitsets instead.
#[derive(Debug)]
pub enum ParserError {
    IoError(io::Error),
    EofError(io::Error),
    ParseError(String),
    TruncatedMsg(String),
    Unsupported(String),
    /// A table file whose {version, range-mode} does not match the
    /// consumer's expectation.
    VersionMismatch { found: u32, expected: u32 },
}

impl Error for ParserError {}

impl Display for ParserError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::IoError(e) => write!(f, "Error: {e}"),
            ParserError::EofError(e) => write!(f, "Error: {e}"),
            ParserError::ParseError(s) => write!(f, "Error: {s}"),
            ParserError::TruncatedMsg(s) => write!(f, "Error: {s}"),
            ParserError::Unsupported(s) => write!(f, "Error: {s}"),
            ParserError::VersionMismatch { found, expected } => {
                write!(f, "Error: file version {found} does not match expected version {expected}")
            }
        }
    }
}

impl From<io::Error> for ParserError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            ErrorKind::UnexpectedEof => ParserError::EofError(io_error),
            _ => ParserError::IoError(io_error),
        }
    }
}

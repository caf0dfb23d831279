//! Error and warning contract. Fatal conditions are a single tagged enum
//! so callers can match on category; warnings are plain strings
//! accumulated on the interpreter rather than logged directly, so tests
//! and callers can inspect the list.

use thiserror::Error;

use crate::expression::ExprError;

#[derive(Debug, Error)]
pub enum GerberError {
    #[error("{0}")]
    Syntax(String),

    #[error("unknown aperture macro '{0}'")]
    UnknownMacro(String),

    #[error("D{dcode} mapped to ({kind}) aperture which is not supported for drawing traces")]
    UnsupportedApertureForDrawMode { dcode: u32, kind: &'static str },

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("{0}")]
    ParameterOutOfRange(String),

    #[error("Execution error. (polygon scan line data not even)")]
    UnevenScanline,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Wraps a [`GerberError`] with the source line it occurred on, so fatal
/// errors are tagged with a line number before halting the file.
#[derive(Debug, Error)]
#[error("line {line}: {source}")]
pub struct LocatedError {
    pub line: u32,
    #[source]
    pub source: GerberError,
}

impl GerberError {
    pub fn at_line(self, line: u32) -> LocatedError {
        LocatedError { line, source: self }
    }
}

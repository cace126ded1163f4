//! Error types for parsing, querying, and lifetime violations.
//!
//! Parse failures carry a [`SourceLocation`] (line, column, byte offset) the
//! way libxml2 reports them. Everything the DOM layer can fail with is folded
//! into the flat [`Error`] enum; there is no retry model, every failure is
//! returned to the immediate caller.

use std::fmt;

use thiserror::Error;

/// Source location within a markup document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (in characters, not bytes).
    pub column: u32,
    /// 0-based byte offset from the start of the input.
    pub byte_offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The error type returned when the native parser rejects its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {location}: {message}")]
pub struct ParseError {
    /// The primary error message.
    pub message: String,
    /// Where in the source the fatal error occurred.
    pub location: SourceLocation,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

/// Errors surfaced by [`Document`](crate::Document), node views, and the
/// XPath evaluator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The markup could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A structural query had no subject to search from (e.g. a document
    /// without a root element), or a named attribute does not exist.
    #[error("node not found")]
    NodeNotFound,

    /// A required input was empty or malformed (including XPath syntax
    /// errors and foreign nodes handed to mutation entry points).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The XPath engine failed while evaluating a well-formed expression.
    #[error("xpath evaluation failed: {0}")]
    Eval(String),

    /// The owning document has already been freed.
    #[error("document has already been freed")]
    UseAfterFree,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

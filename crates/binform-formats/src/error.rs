//! Error types for binary format parsing.

use thiserror::Error;

/// Error type for binary format parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Invalid magic number at start of file.
    #[error("invalid magic number: expected {expected}, got {actual:02x?}")]
    InvalidMagic {
        expected: &'static str,
        actual: Vec<u8>,
    },

    /// File is too short to contain required data.
    #[error("file too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// Read past the end of the backing buffer.
    #[error("out of bounds: {size} bytes at offset {offset:#x} (buffer is {len} bytes)")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    /// Truncated data while parsing.
    #[error("truncated data: expected {expected} bytes, got {actual} while parsing {context}")]
    TruncatedData {
        expected: usize,
        actual: usize,
        context: &'static str,
    },

    /// Invalid value encountered during parsing.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// Invalid section or structure.
    #[error("invalid {kind} at offset {offset:#x}: {reason}")]
    InvalidStructure {
        kind: &'static str,
        offset: u64,
        reason: String,
    },

    /// Lookup returned no match.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Integer overflow during parsing.
    #[error("integer overflow while parsing {context}")]
    Overflow { context: &'static str },
}

impl ParseError {
    /// Creates a new InvalidMagic error.
    pub fn invalid_magic(expected: &'static str, actual: &[u8]) -> Self {
        Self::InvalidMagic {
            expected,
            actual: actual.to_vec(),
        }
    }

    /// Creates a new TooShort error.
    pub fn too_short(expected: usize, actual: usize) -> Self {
        Self::TooShort { expected, actual }
    }

    /// Creates a new OutOfBounds error.
    pub fn out_of_bounds(offset: usize, size: usize, len: usize) -> Self {
        Self::OutOfBounds { offset, size, len }
    }

    /// Creates a new InvalidStructure error.
    pub fn invalid_structure(kind: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        Self::InvalidStructure {
            kind,
            offset,
            reason: reason.into(),
        }
    }
}

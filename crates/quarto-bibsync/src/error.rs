/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Error types for quarto-bibsync.
 */

use std::fmt;
use std::path::PathBuf;

use crate::ownership::Side;

/// A single record (bib) or block (doc) that could not be parsed.
///
/// Adapters collect these next to the well-formed entries instead of
/// failing the whole file, so one bad record never blocks the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    /// File the record came from
    pub side: Side,

    /// Citation key, when it could be recovered
    pub key: Option<String>,

    /// 1-based line where the record starts
    pub line: usize,

    /// What was wrong with it
    pub message: String,
}

impl RecordError {
    pub fn new(side: Side, key: Option<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            side,
            key,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "{} record '{}' at line {}: {}",
                self.side, key, self.line, self.message
            ),
            None => write!(
                f,
                "{} record at line {}: {}",
                self.side, self.line, self.message
            ),
        }
    }
}

impl std::error::Error for RecordError {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed {0}")]
    MalformedRecord(#[from] RecordError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse config: {0}")]
    ConfigParse(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

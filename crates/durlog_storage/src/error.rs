//! Error types for file-store operations.

use std::io;
use thiserror::Error;

/// Result type for file-store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while managing log files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log file that was expected to exist is absent.
    ///
    /// Absence is a routine signal for the log core (end-of-log detection,
    /// fresh-start detection), so it is kept distinct from other I/O errors.
    #[error("log file {number} not found")]
    NotFound {
        /// The file number that could not be opened.
        number: i64,
    },

    /// A read ran off the end of a log file.
    ///
    /// Reads are all-or-nothing: a short read surfaces as `Eof`, never as
    /// silently truncated data.
    #[error("unexpected end of log file {number} at offset {offset}")]
    Eof {
        /// The file number being read.
        number: i64,
        /// The offset at which the read started.
        offset: i64,
    },

    /// Another process holds the log directory lock.
    #[error("log directory locked: another process has exclusive access")]
    Locked,
}

impl StorageError {
    /// Returns `true` if this error means the addressed file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this error is an end-of-file condition.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof { .. })
    }
}

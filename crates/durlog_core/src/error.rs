//! Error types for the log core.

use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// File-store error.
    #[error("storage error: {0}")]
    Storage(#[from] durlog_storage::StorageError),

    /// The log content is corrupted or invalid.
    ///
    /// Covers bad magic numbers, impossible record lengths, non-monotonic
    /// sequence numbers, truncated frames, and checkpoint records that do
    /// not match the log they describe.
    #[error("invalid log: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A stored checksum did not match the recomputed value.
    #[error("checksum mismatch: expected {expected:#018x}, got {actual:#018x}")]
    ChecksumMismatch {
        /// Checksum read from disk.
        expected: i64,
        /// Checksum recomputed from the data.
        actual: i64,
    },

    /// The log instance has permanently failed.
    ///
    /// Set when an append or flush hits corruption or an I/O error. Every
    /// subsequent operation fails fast without touching disk; only a process
    /// restart (and the recovery that runs with it) clears the condition.
    #[error("log has failed; restart and recovery required")]
    Failed,

    /// An append was attempted with an empty payload.
    ///
    /// Rejected before the record is framed; the log instance stays usable.
    #[error("cannot append a record with no payload")]
    EmptyRecord,

    /// The supplied configuration is unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl LogError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` if this error denotes corrupt log content rather than
    /// an I/O failure.
    ///
    /// Startup recovery uses this to separate a recoverable torn tail from a
    /// disk that cannot be read at all.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::ChecksumMismatch { .. }
        ) || matches!(self, Self::Storage(e) if e.is_eof())
    }
}

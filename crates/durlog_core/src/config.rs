//! Log configuration.

use crate::error::{LogError, LogResult};
use crate::format::MAX_MARKER_SIZE;

/// Configuration for opening a log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// File name suffix of log files (`log_<n>.<suffix>`).
    pub file_suffix: String,

    /// Size of the in-memory append buffer in bytes.
    ///
    /// Records larger than the buffer are written to the file directly.
    pub buffer_size: usize,

    /// Size at which the current log file is rotated out.
    ///
    /// A file may grow past this by up to one record; the check happens
    /// before each append.
    pub target_file_size: i64,

    /// Whether every append waits for an fsync before returning.
    ///
    /// Callers can still request durability per append regardless of this
    /// setting.
    pub sync_on_append: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_suffix: "log".to_owned(),
            buffer_size: 128 * 1024,           // 128 KiB
            target_file_size: 16 * 1024 * 1024, // 16 MiB
            sync_on_append: false,
        }
    }
}

impl LogConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log file name suffix.
    #[must_use]
    pub fn file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.file_suffix = suffix.into();
        self
    }

    /// Sets the append buffer size.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the file rotation size.
    #[must_use]
    pub const fn target_file_size(mut self, size: i64) -> Self {
        self.target_file_size = size;
        self
    }

    /// Sets whether every append is durable.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Rejects configurations the log cannot run with.
    pub(crate) fn validate(&self) -> LogResult<()> {
        if self.file_suffix.is_empty() {
            return Err(LogError::invalid_config("file suffix must not be empty"));
        }
        // The buffer must hold at least one record header plus padding room,
        // or wraparound could never make progress.
        if self.buffer_size < 2 * MAX_MARKER_SIZE {
            return Err(LogError::invalid_config(format!(
                "buffer size {} is below the minimum of {}",
                self.buffer_size,
                2 * MAX_MARKER_SIZE
            )));
        }
        if self.target_file_size <= 0 {
            return Err(LogError::invalid_config(
                "target file size must be positive",
            ));
        }
        Ok(())
    }
}

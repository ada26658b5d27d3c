//! Numbered log-file store.
//!
//! Log files are addressed purely by number and named deterministically:
//!
//! ```text
//! <dir>/log_<fileNumber>.<suffix>
//! ```
//!
//! so any component holding a file number can locate the file without extra
//! bookkeeping. Negative file numbers are reserved for control files.
//!
//! The store holds an exclusive advisory lock on the log directory for its
//! lifetime; the log is strictly single-writer per process.

use crate::error::{StorageError, StorageResult};
use crate::file::{FileReader, FileWriter};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the advisory lock file inside the log directory.
const LOCK_FILE: &str = "LOCK";

/// Prefix for all log file names.
const FILE_PREFIX: &str = "log_";

/// Creates, opens, deletes, renames, and truncates numbered log files.
///
/// # Thread Safety
///
/// All operations take `&self` and open fresh file handles; the store itself
/// carries no per-file state. Callers coordinate who writes which file.
#[derive(Debug)]
pub struct FileStore {
    /// Log directory.
    dir: PathBuf,
    /// Suffix for log file names (without the leading dot).
    suffix: String,
    /// Lock file handle, held for exclusive directory access.
    _lock_file: File,
}

impl FileStore {
    /// Opens a file store over the given directory, creating it if needed.
    ///
    /// Acquires an exclusive lock on the directory; a second store over the
    /// same directory fails with [`StorageError::Locked`].
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, is not a
    /// directory, or is locked by another process.
    pub fn open(dir: &Path, suffix: &str) -> StorageResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        if !dir.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("log path is not a directory: {}", dir.display()),
            )));
        }

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            suffix: suffix.to_string(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the log file with the given number.
    #[must_use]
    pub fn file_path(&self, number: i64) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{number}.{}", self.suffix))
    }

    /// Creates the log file with the given number.
    ///
    /// Returns `true` if the file already existed (and was left untouched).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(&self, number: i64) -> StorageResult<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.file_path(number))
        {
            Ok(_) => {
                self.sync_directory()?;
                Ok(false)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens a sequential reader over the log file with the given number.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist; this is
    /// distinct from other I/O errors because absence signals end-of-log
    /// during recovery.
    pub fn open_reader(&self, number: i64) -> StorageResult<FileReader> {
        let file = match File::open(self.file_path(number)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound { number })
            }
            Err(e) => return Err(e.into()),
        };
        FileReader::new(file, number)
    }

    /// Opens a writer over the log file with the given number, positioned at
    /// the current end of the file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    pub fn open_writer(&self, number: i64) -> StorageResult<FileWriter> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.file_path(number))
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound { number })
            }
            Err(e) => return Err(e.into()),
        };
        FileWriter::new(file, number)
    }

    /// Truncates the log file with the given number to `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is absent or the truncation fails.
    pub fn truncate(&self, number: i64, size: i64) -> StorageResult<()> {
        let file = match OpenOptions::new()
            .write(true)
            .open(self.file_path(number))
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound { number })
            }
            Err(e) => return Err(e.into()),
        };
        file.set_len(u64::try_from(size).unwrap_or(0))?;
        file.sync_all()?;
        Ok(())
    }

    /// Deletes the log file with the given number, best-effort.
    ///
    /// Returns `true` if the file was deleted. Failures are logged and
    /// swallowed; a leftover file is harmless and will be retried on the
    /// next checkpoint.
    pub fn delete(&self, number: i64) -> bool {
        let path = self.file_path(number);
        match fs::remove_file(&path) {
            Ok(()) => {
                let _ = self.sync_directory();
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(file = number, error = %e, "failed to delete log file");
                false
            }
        }
    }

    /// Renames the log file `from` over the log file `to`.
    ///
    /// The rename is atomic on the underlying filesystem. Returns `true` on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory cannot be synced afterwards;
    /// a failed rename itself returns `Ok(false)`.
    pub fn rename(&self, from: i64, to: i64) -> StorageResult<bool> {
        match fs::rename(self.file_path(from), self.file_path(to)) {
            Ok(()) => {
                self.sync_directory()?;
                Ok(true)
            }
            Err(e) => {
                warn!(from, to, error = %e, "failed to rename log file");
                Ok(false)
            }
        }
    }

    /// Syncs the log directory so metadata updates survive a crash.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journaling covers directory metadata durability.
        Ok(())
    }
}

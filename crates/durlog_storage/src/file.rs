//! Blocking sequential readers and writers over individual log files.

use crate::error::{StorageError, StorageResult};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

/// A blocking sequential reader over one log file.
///
/// All reads are read-fully-or-fail: a short read surfaces as
/// [`StorageError::Eof`], never as silently partial data.
#[derive(Debug)]
pub struct FileReader {
    file: File,
    number: i64,
    position: i64,
    len: i64,
}

impl FileReader {
    pub(crate) fn new(file: File, number: i64) -> StorageResult<Self> {
        let len = i64::try_from(file.metadata()?.len()).unwrap_or(i64::MAX);
        Ok(Self {
            file,
            number,
            position: 0,
            len,
        })
    }

    /// The number of the file this reader is positioned over.
    #[must_use]
    pub fn number(&self) -> i64 {
        self.number
    }

    /// Current read position in bytes from the start of the file.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Total length of the file at open time.
    #[must_use]
    pub fn len(&self) -> i64 {
        self.len
    }

    /// Returns `true` if the file was empty at open time.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Repositions the reader at an absolute offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying seek fails.
    pub fn seek(&mut self, offset: i64) -> StorageResult<()> {
        self.file
            .seek(SeekFrom::Start(u64::try_from(offset).unwrap_or(0)))?;
        self.position = offset;
        Ok(())
    }

    /// Fills `buf` completely from the current position.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Eof`] if fewer than `buf.len()` bytes remain,
    /// or an I/O error if the read fails outright.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        let start = self.position;
        match self.file.read_exact(buf) {
            Ok(()) => {
                self.position += buf.len() as i64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(StorageError::Eof {
                number: self.number,
                offset: start,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// A blocking sequential writer over one log file.
///
/// Opened positioned at the end of the file; all writes append.
#[derive(Debug)]
pub struct FileWriter {
    file: File,
    number: i64,
    len: i64,
}

impl FileWriter {
    pub(crate) fn new(mut file: File, number: i64) -> StorageResult<Self> {
        let len = i64::try_from(file.seek(SeekFrom::End(0))?).unwrap_or(i64::MAX);
        Ok(Self { file, number, len })
    }

    /// The number of the file this writer appends to.
    #[must_use]
    pub fn number(&self) -> i64 {
        self.number
    }

    /// Current length of the file, including unsynced writes.
    #[must_use]
    pub fn len(&self) -> i64 {
        self.len
    }

    /// Returns `true` if nothing has been written to the file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `data` to the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the file length is then
    /// indeterminate and the caller must treat the log as failed.
    pub fn write_all(&mut self, data: &[u8]) -> StorageResult<()> {
        self.file.write_all(data)?;
        self.len += data.len() as i64;
        Ok(())
    }

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Forces all written data to stable storage (fsync).
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

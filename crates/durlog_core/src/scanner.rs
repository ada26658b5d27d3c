//! Forward log scanner for recovery and client replay.
//!
//! The scanner is a state machine over one open file at a time:
//!
//! ```text
//! {no file} -> {file header verified} -> (header -> payload -> footer)* -> next file
//! ```
//!
//! On exhausting a file it opens `file_number + 1`; absence of that file is
//! the clean end of the log. Any malformed content transitions the scanner
//! into a terminal invalid state: all further reads are refused, and the
//! caller must treat everything past [`LogScanner::last_good_anchor`] as not
//! durable.

use crate::error::{LogError, LogResult};
use crate::format::{
    self, RecordHeader, FILE_HEADER_SIZE, RECORD_FOOTER_SIZE, RECORD_HEADER_SIZE,
};
use crate::types::{LogAnchor, UserRecord, UNKNOWN_SEQUENCE};
use durlog_storage::{FileReader, FileStore, StorageError};
use std::sync::Arc;

/// Sequentially decodes framed records from the file store, validating every
/// marker.
///
/// Tracks the last known-good position continuously, updated only after a
/// record (or file header) is fully validated, so a recovering caller can
/// find the exact truncation point of a corrupt tail.
#[derive(Debug)]
pub struct LogScanner {
    store: Arc<FileStore>,
    reader: Option<FileReader>,
    /// Number of the file the scanner is positioned in (or about to open).
    file_number: i64,
    /// Offset to seek to after verifying the first file's header.
    start_offset: i64,
    /// Sequence the first record must carry, or [`UNKNOWN_SEQUENCE`].
    expected_sequence: i64,
    /// Sequence of the last record returned, or [`UNKNOWN_SEQUENCE`].
    last_sequence: i64,
    last_good_file: i64,
    last_good_offset: i64,
    /// Whether any file has been opened yet; absence of the first file is an
    /// error, absence of a later file is the clean end of the log.
    opened_any: bool,
    invalid: bool,
}

impl LogScanner {
    /// Creates a scanner starting at `anchor`.
    ///
    /// If the anchor carries a known sequence number, the first record read
    /// must match it exactly; this guards against resuming from a stale or
    /// mismatched checkpoint.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the anchor does not name a position a
    /// log can contain.
    pub fn new(store: Arc<FileStore>, anchor: &LogAnchor) -> LogResult<Self> {
        if !anchor.is_valid() {
            return Err(LogError::corrupted(format!(
                "cannot scan from invalid anchor {anchor}"
            )));
        }
        Ok(Self {
            store,
            reader: None,
            file_number: anchor.file_number(),
            start_offset: anchor.file_offset(),
            expected_sequence: anchor.sequence(),
            last_sequence: UNKNOWN_SEQUENCE,
            last_good_file: anchor.file_number(),
            last_good_offset: anchor.file_offset(),
            opened_any: false,
            invalid: false,
        })
    }

    /// Reads the next record into `record`.
    ///
    /// Returns `Ok(false)` at the clean end of the log. On success the
    /// record's payload and anchor are filled in.
    ///
    /// # Errors
    ///
    /// Returns a corruption error on any malformed content; the scanner is
    /// then permanently invalid and refuses further reads. I/O errors other
    /// than expected file absence propagate unchanged.
    pub fn next(&mut self, record: &mut UserRecord) -> LogResult<bool> {
        if self.invalid {
            return Err(LogError::corrupted("log scanner is in the invalid state"));
        }
        match self.read_record(record) {
            Ok(advanced) => Ok(advanced),
            Err(e) => {
                if e.is_corruption() {
                    self.invalid = true;
                }
                Err(e)
            }
        }
    }

    /// File number of the last fully-validated position.
    #[must_use]
    pub fn last_good_file_number(&self) -> i64 {
        self.last_good_file
    }

    /// Offset just past the last fully-validated content.
    #[must_use]
    pub fn last_good_offset(&self) -> i64 {
        self.last_good_offset
    }

    /// The last fully-validated position as an anchor.
    ///
    /// The anchor's sequence is that of the last record returned, or
    /// [`UNKNOWN_SEQUENCE`] if none was.
    #[must_use]
    pub fn last_good_anchor(&self) -> LogAnchor {
        LogAnchor::new(self.last_good_file, self.last_good_offset, self.last_sequence)
    }

    /// Sequence number of the last record returned, or
    /// [`UNKNOWN_SEQUENCE`].
    #[must_use]
    pub fn last_sequence(&self) -> i64 {
        self.last_sequence
    }

    /// Number of the file the scanner stopped in.
    ///
    /// After an invalid transition this names the torn file, which may be
    /// one past the last good file when a successor's header never made it
    /// to disk intact.
    #[must_use]
    pub fn current_file_number(&self) -> i64 {
        self.file_number
    }

    fn read_record(&mut self, record: &mut UserRecord) -> LogResult<bool> {
        loop {
            if self.reader.is_none() && !self.open_next_file()? {
                return Ok(false);
            }
            let Some(reader) = self.reader.as_mut() else {
                unreachable!("reader opened above");
            };

            let remaining = reader.len() - reader.position();
            if remaining == 0 {
                // File cleanly exhausted; move on to its successor.
                self.reader = None;
                self.file_number += 1;
                continue;
            }
            if remaining < RECORD_HEADER_SIZE as i64 {
                return Err(LogError::corrupted(format!(
                    "truncated record header at end of log file {}",
                    self.file_number
                )));
            }

            let record_start = reader.position();
            let mut header_buf = [0u8; RECORD_HEADER_SIZE];
            reader.read_exact(&mut header_buf)?;
            let header = RecordHeader::decode(&header_buf);

            if header.magic != format::RECORD_HEADER_MAGIC {
                return Err(LogError::corrupted(format!(
                    "bad record magic in log file {} at offset {record_start}",
                    self.file_number
                )));
            }
            if header.total_length <= (RECORD_HEADER_SIZE + RECORD_FOOTER_SIZE) as i32 {
                return Err(LogError::corrupted(format!(
                    "impossible record length {} in log file {} at offset {record_start}",
                    header.total_length, self.file_number
                )));
            }
            if !header.checksum_ok() {
                return Err(LogError::ChecksumMismatch {
                    expected: header.checksum,
                    actual: format::header_checksum(header.sequence, header.total_length),
                });
            }
            if self.expected_sequence != UNKNOWN_SEQUENCE
                && header.sequence != self.expected_sequence
            {
                return Err(LogError::corrupted(format!(
                    "expected sequence {} at scan start, found {}",
                    self.expected_sequence, header.sequence
                )));
            }
            if self.last_sequence != UNKNOWN_SEQUENCE && header.sequence <= self.last_sequence {
                return Err(LogError::corrupted(format!(
                    "non-monotonic sequence {} after {} in log file {}",
                    header.sequence, self.last_sequence, self.file_number
                )));
            }

            let payload_len = header.payload_len();
            if remaining < header.total_length as i64 {
                return Err(LogError::corrupted(format!(
                    "truncated record payload in log file {} at offset {record_start}",
                    self.file_number
                )));
            }
            reader.read_exact(record.prepare(payload_len))?;

            let mut footer_buf = [0u8; RECORD_FOOTER_SIZE];
            reader.read_exact(&mut footer_buf)?;
            if !format::footer_magic_ok(&footer_buf) {
                return Err(LogError::corrupted(format!(
                    "bad record footer magic in log file {} at offset {record_start}",
                    self.file_number
                )));
            }

            record.set_anchor(self.file_number, record_start, header.sequence);
            self.expected_sequence = UNKNOWN_SEQUENCE;
            self.last_sequence = header.sequence;
            self.last_good_file = self.file_number;
            self.last_good_offset = reader.position();
            return Ok(true);
        }
    }

    /// Opens and verifies the header of `self.file_number`.
    ///
    /// Returns `Ok(false)` at the clean end of the log.
    fn open_next_file(&mut self) -> LogResult<bool> {
        let mut reader = match self.store.open_reader(self.file_number) {
            Ok(r) => r,
            Err(StorageError::NotFound { .. }) if self.opened_any => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let mut header_buf = [0u8; FILE_HEADER_SIZE as usize];
        reader.read_exact(&mut header_buf)?;
        format::decode_file_header(&header_buf, self.file_number)?;

        if !self.opened_any && self.start_offset > FILE_HEADER_SIZE {
            if self.start_offset > reader.len() {
                return Err(LogError::corrupted(format!(
                    "scan start offset {} past end of log file {}",
                    self.start_offset, self.file_number
                )));
            }
            reader.seek(self.start_offset)?;
        }

        self.opened_any = true;
        self.last_good_file = self.file_number;
        self.last_good_offset = reader.position();
        self.reader = Some(reader);
        Ok(true)
    }
}

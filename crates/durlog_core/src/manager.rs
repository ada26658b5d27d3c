//! Log manager: startup recovery, checkpointing, rotation, and minimum-needed
//! position tracking.
//!
//! The checkpoint (control file) bounds how far back recovery must scan and
//! tells the manager which old files may be deleted. It lives under a fixed
//! reserved file number and is replaced atomically: the new record is written
//! to a shadow file, fsynced, and renamed over the canonical file, so a crash
//! mid-write leaves either the old checkpoint or the new one, never a mix.

use crate::error::{LogError, LogResult};
use crate::format::{encode_file_header, Checkpoint, CHECKPOINT_SIZE, FILE_HEADER_SIZE};
use crate::scanner::LogScanner;
use crate::types::{LogAnchor, UserRecord, MIN_FILE_NUMBER, UNKNOWN_SEQUENCE};
use durlog_storage::{FileStore, FileWriter, StorageError};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reserved file number of the canonical checkpoint file.
pub(crate) const CONTROL_FILE_NUMBER: i64 = -1;

/// Reserved file number of the shadow checkpoint file used for atomic
/// replacement.
pub(crate) const SHADOW_FILE_NUMBER: i64 = -2;

/// Where appends resume after initialization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppendPoint {
    /// File the next record is written to.
    pub(crate) file_number: i64,
    /// Offset at which the next record starts.
    pub(crate) offset: i64,
    /// Sequence number the next record is assigned.
    pub(crate) next_sequence: i64,
}

struct AnchorState {
    /// Lowest-numbered log file still on disk.
    min_existing_file: i64,
    /// Oldest position still needed by consumers; a monotonic ratchet.
    min_needed: LogAnchor,
}

/// Orchestrates recovery, checkpoint persistence, file rotation, and
/// tracking of the minimum log position still needed by consumers.
pub(crate) struct LogManager {
    store: Arc<FileStore>,
    anchors: Mutex<AnchorState>,
}

impl LogManager {
    pub(crate) fn new(store: Arc<FileStore>) -> Self {
        Self {
            store,
            anchors: Mutex::new(AnchorState {
                min_existing_file: MIN_FILE_NUMBER,
                min_needed: LogAnchor::start(),
            }),
        }
    }

    /// Recovers the log and returns the position where appends resume.
    ///
    /// A missing checkpoint means a fresh log: file [`MIN_FILE_NUMBER`] is
    /// created (or reformatted, tolerating a crash between file creation and
    /// the first checkpoint write) and a checkpoint is persisted. An
    /// existing checkpoint is validated and every record from its anchor is
    /// scanned; a torn tail is truncated away, anything worse aborts.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure, on checkpoint corruption, or if
    /// records continue past a corrupt tail (the log is then unrecoverable).
    pub(crate) fn initialize(&self) -> LogResult<AppendPoint> {
        let checkpoint = match self.read_checkpoint() {
            Ok(checkpoint) => checkpoint,
            Err(LogError::Storage(e)) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let Some(checkpoint) = checkpoint else {
            return self.initialize_fresh();
        };

        {
            let mut anchors = self.anchors.lock();
            anchors.min_existing_file = checkpoint.min_existing_file;
            anchors.min_needed = LogAnchor::new(
                checkpoint.min_needed_file,
                checkpoint.min_needed_offset,
                checkpoint.min_needed_sequence,
            );
        }

        let anchor = LogAnchor::new(
            checkpoint.min_needed_file,
            checkpoint.min_needed_offset,
            checkpoint.min_needed_sequence,
        );
        debug!(%anchor, "replaying log from checkpoint");

        let mut scanner = LogScanner::new(Arc::clone(&self.store), &anchor)?;
        let mut record = UserRecord::new();
        let clean = loop {
            match scanner.next(&mut record) {
                Ok(true) => {}
                Ok(false) => break true,
                Err(e) if e.is_corruption() => break false,
                Err(e) => return Err(e),
            }
        };

        let next_sequence = if scanner.last_sequence() != UNKNOWN_SEQUENCE {
            scanner.last_sequence() + 1
        } else if checkpoint.min_needed_sequence != UNKNOWN_SEQUENCE {
            // Nothing past the anchor: the anchor's record was the newest.
            checkpoint.min_needed_sequence
        } else {
            0
        };

        let (file_number, offset) = if clean {
            (scanner.last_good_file_number(), scanner.last_good_offset())
        } else {
            self.repair_tail(&scanner)?
        };

        info!(
            file = file_number,
            offset,
            next_sequence,
            clean,
            "log recovered"
        );
        Ok(AppendPoint {
            file_number,
            offset,
            next_sequence,
        })
    }

    fn initialize_fresh(&self) -> LogResult<AppendPoint> {
        let existed = self.store.create(MIN_FILE_NUMBER)?;
        if existed {
            // Crash between file creation and the first checkpoint write
            // leaves at most a header; anything more is someone else's log.
            let reader = self.store.open_reader(MIN_FILE_NUMBER)?;
            if reader.len() > FILE_HEADER_SIZE {
                return Err(LogError::corrupted(
                    "log file exists without a checkpoint",
                ));
            }
        }
        self.format_file(MIN_FILE_NUMBER)?;

        {
            let mut anchors = self.anchors.lock();
            anchors.min_existing_file = MIN_FILE_NUMBER;
            anchors.min_needed = LogAnchor::start();
        }
        self.write_checkpoint()?;

        info!("initialized fresh log");
        Ok(AppendPoint {
            file_number: MIN_FILE_NUMBER,
            offset: FILE_HEADER_SIZE,
            next_sequence: 0,
        })
    }

    /// Handles a scan that stopped on invalid content: verifies the log does
    /// not continue past the corruption, then truncates or reformats the
    /// torn file.
    fn repair_tail(&self, scanner: &LogScanner) -> LogResult<(i64, i64)> {
        let torn_file = scanner.current_file_number();
        match self.store.open_reader(torn_file + 1) {
            Err(StorageError::NotFound { .. }) => {}
            Ok(_) => {
                return Err(LogError::corrupted(
                    "log continues past a corrupt tail; cannot recover",
                ))
            }
            Err(e) => return Err(e.into()),
        }

        if torn_file == scanner.last_good_file_number() {
            let offset = scanner.last_good_offset();
            warn!(file = torn_file, offset, "truncating torn log tail");
            self.store.truncate(torn_file, offset)?;
            Ok((torn_file, offset))
        } else {
            // The torn file never got a valid header; reformat it.
            warn!(file = torn_file, "reformatting log file with torn header");
            self.format_file(torn_file)?;
            Ok((torn_file, FILE_HEADER_SIZE))
        }
    }

    /// Closes `writer`, persists the checkpoint (deleting files no consumer
    /// needs), and returns a writer over the freshly formatted next file.
    pub(crate) fn switch_to_next_file(&self, mut writer: FileWriter) -> LogResult<FileWriter> {
        let current = writer.number();
        writer.sync()?;
        drop(writer);

        self.write_checkpoint()?;

        let next = current + 1;
        let writer = self.format_file(next)?;
        info!(from = current, to = next, "rotated to next log file");
        Ok(writer)
    }

    /// Advances the minimum-needed anchor, never moving it backward.
    pub(crate) fn advance_min_needed(&self, anchor: &LogAnchor) {
        if !anchor.is_valid() {
            return;
        }
        let mut anchors = self.anchors.lock();
        if *anchor > anchors.min_needed {
            anchors.min_needed = *anchor;
        }
    }

    /// The oldest position still needed by consumers.
    pub(crate) fn min_needed(&self) -> LogAnchor {
        self.anchors.lock().min_needed
    }

    /// Persists the current checkpoint via shadow write + atomic rename,
    /// then deletes log files below the minimum-needed file.
    pub(crate) fn write_checkpoint(&self) -> LogResult<()> {
        let checkpoint = {
            let anchors = self.anchors.lock();
            Checkpoint {
                min_existing_file: anchors.min_existing_file,
                min_needed_file: anchors.min_needed.file_number(),
                min_needed_offset: anchors.min_needed.file_offset(),
                min_needed_sequence: anchors.min_needed.sequence(),
            }
        };

        self.store.create(SHADOW_FILE_NUMBER)?;
        self.store.truncate(SHADOW_FILE_NUMBER, 0)?;
        let mut writer = self.store.open_writer(SHADOW_FILE_NUMBER)?;
        writer.write_all(&checkpoint.encode())?;
        writer.sync()?;
        drop(writer);

        if !self.store.rename(SHADOW_FILE_NUMBER, CONTROL_FILE_NUMBER)? {
            return Err(LogError::Storage(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "failed to publish checkpoint file",
            ))));
        }
        debug!(?checkpoint, "checkpoint persisted");

        // Old files are removed only after the checkpoint that makes them
        // unnecessary is durable. The persisted minExistingFile may lag the
        // deletions by one checkpoint, which the invariant tolerates.
        let mut anchors = self.anchors.lock();
        for number in anchors.min_existing_file..anchors.min_needed.file_number() {
            self.store.delete(number);
        }
        anchors.min_existing_file = anchors.min_existing_file.max(anchors.min_needed.file_number());
        Ok(())
    }

    /// Reads and validates the checkpoint.
    ///
    /// # Errors
    ///
    /// Propagates `NotFound` (fresh log) distinctly from corruption, which
    /// aborts initialization.
    fn read_checkpoint(&self) -> LogResult<Option<Checkpoint>> {
        let mut reader = match self.store.open_reader(CONTROL_FILE_NUMBER) {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = [0u8; CHECKPOINT_SIZE];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.is_eof() => {
                return Err(LogError::corrupted("truncated checkpoint file"))
            }
            Err(e) => return Err(e.into()),
        }
        Checkpoint::decode(&buf).map(Some)
    }

    /// Creates (or reformats) a log file and returns a writer positioned
    /// just after its freshly written header.
    fn format_file(&self, number: i64) -> LogResult<FileWriter> {
        self.store.create(number)?;
        self.store.truncate(number, 0)?;
        let mut writer = self.store.open_writer(number)?;
        writer.write_all(&encode_file_header(number))?;
        writer.sync()?;
        Ok(writer)
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let anchors = self.anchors.lock();
        f.debug_struct("LogManager")
            .field("min_existing_file", &anchors.min_existing_file)
            .field("min_needed", &anchors.min_needed)
            .finish_non_exhaustive()
    }
}

//! The public log handle.

use crate::config::LogConfig;
use crate::error::LogResult;
use crate::flush::FlushManager;
use crate::manager::LogManager;
use crate::scanner::LogScanner;
use crate::types::{LogAnchor, UserRecord};
use durlog_storage::FileStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A single-writer, crash-recoverable append log.
///
/// Opening a log recovers it: the last checkpoint is read, every record
/// after it is validated, and a torn tail left by a crash is trimmed away.
/// Appends then resume exactly where the durable log ends, with the next
/// unused sequence number.
///
/// All methods take `&self`; a `Log` is meant to be shared across threads
/// (wrapped in an [`Arc`]). Appends from concurrent threads receive
/// contiguous sequence numbers, and a durable append waits only for a flush
/// covering its own record, so concurrent waiters share fsyncs.
pub struct Log {
    store: Arc<FileStore>,
    manager: Arc<LogManager>,
    flush: FlushManager,
    sync_on_append: bool,
}

impl Log {
    /// Opens (and recovers) the log in `dir`.
    ///
    /// The directory is created if missing. An exclusive lock file guards
    /// against a second log instance over the same directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is degenerate, the directory is
    /// locked by another instance, or recovery finds damage it cannot repair
    /// (records continuing past a corrupt point).
    pub fn open(dir: impl AsRef<Path>, config: LogConfig) -> LogResult<Self> {
        config.validate()?;
        let store = Arc::new(FileStore::open(dir.as_ref(), &config.file_suffix)?);
        let manager = Arc::new(LogManager::new(Arc::clone(&store)));
        let start = manager.initialize()?;
        info!(
            file = start.file_number,
            offset = start.offset,
            sequence = start.next_sequence,
            "log opened"
        );
        let flush = FlushManager::new(
            Arc::clone(&store),
            Arc::clone(&manager),
            config.buffer_size,
            config.target_file_size,
            start,
        );
        Ok(Self {
            store,
            manager,
            flush,
            sync_on_append: config.sync_on_append,
        })
    }

    /// Appends `record`, filling in its anchor.
    ///
    /// With `sync` set (or [`LogConfig::sync_on_append`]), the call returns
    /// only after the record is fsynced. Otherwise the record is buffered
    /// and reaches disk with a later flush.
    ///
    /// # Errors
    ///
    /// The first I/O failure permanently fails the log; this and every later
    /// append returns [`LogError::Failed`](crate::LogError::Failed) until
    /// the process reopens the log.
    pub fn append(&self, record: &mut UserRecord, sync: bool) -> LogResult<()> {
        self.flush.append(record, sync || self.sync_on_append)
    }

    /// Forces everything appended so far to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the log has failed or the flush itself fails.
    pub fn sync(&self) -> LogResult<()> {
        self.flush.sync_all()
    }

    /// Opens a forward scanner starting at `anchor`.
    ///
    /// Use [`Log::start_anchor`] to replay everything still needed. The
    /// scanner sees only durable records; call [`Log::sync`] first to
    /// include buffered appends.
    ///
    /// # Errors
    ///
    /// Returns an error if the anchor is invalid.
    pub fn scan(&self, anchor: &LogAnchor) -> LogResult<LogScanner> {
        LogScanner::new(Arc::clone(&self.store), anchor)
    }

    /// The oldest position still needed, where recovery replay begins.
    #[must_use]
    pub fn start_anchor(&self) -> LogAnchor {
        self.manager.min_needed()
    }

    /// Declares that records before `anchor` are no longer needed.
    ///
    /// The bound only ratchets forward; an older or invalid anchor is
    /// ignored. Files before the bound are deleted at the next checkpoint.
    pub fn advance_min_needed(&self, anchor: &LogAnchor) {
        self.manager.advance_min_needed(anchor);
    }

    /// Persists a checkpoint recording the current minimum-needed position,
    /// then deletes log files wholly before it.
    ///
    /// Call [`Log::sync`] first if the position being released was reached
    /// by buffered appends.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written durably. Failure
    /// to delete an old file is logged and ignored.
    pub fn checkpoint(&self) -> LogResult<()> {
        self.manager.write_checkpoint()
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("sync_on_append", &self.sync_on_append)
            .field("start_anchor", &self.start_anchor())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;
    use durlog_storage::StorageError;
    use tempfile::tempdir;

    fn collect(log: &Log, anchor: &LogAnchor) -> Vec<Vec<u8>> {
        let mut scanner = log.scan(anchor).unwrap();
        let mut record = UserRecord::new();
        let mut out = Vec::new();
        while scanner.next(&mut record).unwrap() {
            out.push(record.payload().to_vec());
        }
        out
    }

    #[test]
    fn append_and_scan() {
        let temp = tempdir().unwrap();
        let log = Log::open(temp.path(), LogConfig::default()).unwrap();

        let mut record = UserRecord::new();
        record.set_payload(b"first");
        log.append(&mut record, false).unwrap();
        record.set_payload(b"second");
        log.append(&mut record, true).unwrap();

        assert_eq!(
            collect(&log, &log.start_anchor()),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[test]
    fn scan_from_mid_log_anchor() {
        let temp = tempdir().unwrap();
        let log = Log::open(temp.path(), LogConfig::default()).unwrap();

        let mut record = UserRecord::new();
        record.set_payload(b"old");
        log.append(&mut record, true).unwrap();

        record.set_payload(b"new");
        log.append(&mut record, true).unwrap();
        let from = *record.anchor();

        assert_eq!(collect(&log, &from), vec![b"new".to_vec()]);
    }

    #[test]
    fn sync_makes_buffered_records_visible() {
        let temp = tempdir().unwrap();
        let log = Log::open(temp.path(), LogConfig::default()).unwrap();

        let mut record = UserRecord::new();
        record.set_payload(b"lazy");
        log.append(&mut record, false).unwrap();
        assert!(collect(&log, &log.start_anchor()).is_empty());

        log.sync().unwrap();
        assert_eq!(collect(&log, &log.start_anchor()), vec![b"lazy".to_vec()]);
    }

    #[test]
    fn sync_on_append_config_makes_every_append_durable() {
        let temp = tempdir().unwrap();
        let config = LogConfig::new().sync_on_append(true);
        let log = Log::open(temp.path(), config).unwrap();

        let mut record = UserRecord::new();
        record.set_payload(b"always");
        log.append(&mut record, false).unwrap();
        assert_eq!(collect(&log, &log.start_anchor()), vec![b"always".to_vec()]);
    }

    #[test]
    fn reopen_resumes_sequence_numbers() {
        let temp = tempdir().unwrap();
        let mut record = UserRecord::new();

        {
            let log = Log::open(temp.path(), LogConfig::default()).unwrap();
            for payload in [&b"a"[..], b"b", b"c"] {
                record.set_payload(payload);
                log.append(&mut record, true).unwrap();
            }
            assert_eq!(record.anchor().sequence(), 2);
        }

        let log = Log::open(temp.path(), LogConfig::default()).unwrap();
        record.set_payload(b"d");
        log.append(&mut record, true).unwrap();
        assert_eq!(record.anchor().sequence(), 3);
        assert_eq!(collect(&log, &log.start_anchor()).len(), 4);
    }

    #[test]
    fn checkpoint_advances_start_anchor() {
        let temp = tempdir().unwrap();
        let log = Log::open(temp.path(), LogConfig::default()).unwrap();

        let mut record = UserRecord::new();
        record.set_payload(b"consumed");
        log.append(&mut record, true).unwrap();
        record.set_payload(b"kept");
        log.append(&mut record, true).unwrap();
        let kept_at = *record.anchor();

        log.advance_min_needed(&kept_at);
        log.checkpoint().unwrap();

        assert_eq!(log.start_anchor(), kept_at);
        assert_eq!(collect(&log, &log.start_anchor()), vec![b"kept".to_vec()]);
    }

    #[test]
    fn second_instance_is_locked_out() {
        let temp = tempdir().unwrap();
        let _log = Log::open(temp.path(), LogConfig::default()).unwrap();

        let err = Log::open(temp.path(), LogConfig::default()).unwrap_err();
        assert!(matches!(err, LogError::Storage(StorageError::Locked)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let temp = tempdir().unwrap();
        let config = LogConfig::new().buffer_size(1);
        assert!(matches!(
            Log::open(temp.path(), config),
            Err(LogError::InvalidConfig { .. })
        ));
    }
}

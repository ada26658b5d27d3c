//! Append buffering and flush coordination.
//!
//! This is the concurrency core of the log. Appends are absorbed by a
//! fixed-size circular byte buffer under the append lock, which also hands
//! out monotonically increasing sequence numbers. Draining the buffer to the
//! current file and fsyncing is serialized by a flush lock and condition
//! variable: at most one thread performs the physical flush, while
//! concurrent requesters raise a shared high-water mark and wait, then are
//! released once the winning flush covers their sequence ("group commit").
//!
//! ## Circular buffer
//!
//! The buffer is one owned byte arena with independent read and write
//! cursors. Each cursor pairs an index with a rewind count - a wraparound
//! generation counter - so emptiness and fullness are decided by comparing
//! `(position, rewind_count)` pairs rather than by aliasing tricks:
//!
//! - equal rewind counts: the read cursor is at or behind the write cursor
//!   in the same generation; free space runs from the write cursor to the
//!   physical end of the arena
//! - write one generation ahead: the write cursor has wrapped; free space
//!   runs from the write cursor up to the read cursor
//!
//! A tail too small for the next record is padded with a header-only *skip
//! record* (length sentinel -1) before wrapping. Skip records exist only in
//! the buffer; the drain recognizes them, wraps its read cursor, and never
//! copies them to disk.
//!
//! ## Failure
//!
//! Any I/O or framing failure during append or flush permanently fails the
//! log instance: the sticky `failed` flag is checked at the top of every
//! public operation, all flush waiters are woken to fail fast, and only a
//! process restart (with recovery) produces a working log again.

use crate::error::{LogError, LogResult};
use crate::format::{self, RecordHeader, RECORD_FOOTER_SIZE, RECORD_HEADER_SIZE};
use crate::manager::{AppendPoint, LogManager};
use crate::types::{UserRecord, UNKNOWN_SEQUENCE};
use durlog_storage::{FileStore, FileWriter};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A buffer cursor: arena index plus wraparound generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    position: usize,
    rewind_count: u64,
}

/// The circular append buffer.
struct LogBuffer {
    arena: Vec<u8>,
    write: Cursor,
    read: Cursor,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        let start = Cursor {
            position: 0,
            rewind_count: 0,
        };
        Self {
            arena: vec![0; capacity],
            write: start,
            read: start,
        }
    }

    fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Contiguous bytes available at the write cursor.
    fn contiguous_free(&self) -> usize {
        if self.write.rewind_count == self.read.rewind_count {
            debug_assert!(self.read.position <= self.write.position);
            self.arena.len() - self.write.position
        } else {
            debug_assert_eq!(self.write.rewind_count, self.read.rewind_count + 1);
            debug_assert!(self.write.position <= self.read.position);
            self.read.position - self.write.position
        }
    }

    /// Whether the write cursor may wrap without overtaking the read cursor.
    fn can_wrap_write(&self) -> bool {
        self.write.rewind_count == self.read.rewind_count
    }

    /// Pads the tail with a skip record when a header fits, then wraps the
    /// write cursor into the next generation.
    fn rewind_write(&mut self, sequence: i64) {
        debug_assert!(self.can_wrap_write());
        let pos = self.write.position;
        if self.arena.len() - pos >= RECORD_HEADER_SIZE {
            self.arena[pos..pos + RECORD_HEADER_SIZE]
                .copy_from_slice(&RecordHeader::encode_skip(sequence));
        }
        self.write.position = 0;
        self.write.rewind_count += 1;
    }

    fn rewind_read(&mut self) {
        debug_assert!(self.read.rewind_count < self.write.rewind_count);
        self.read.position = 0;
        self.read.rewind_count += 1;
    }

    /// Frames `payload` at the write cursor. The caller has checked that the
    /// framed record fits contiguously.
    fn put(&mut self, sequence: i64, payload: &[u8]) {
        let total = format::framed_len(payload.len());
        debug_assert!(total <= self.contiguous_free());
        let pos = self.write.position;

        self.arena[pos..pos + RECORD_HEADER_SIZE]
            .copy_from_slice(&RecordHeader::encode(sequence, total as i32));
        let payload_start = pos + RECORD_HEADER_SIZE;
        self.arena[payload_start..payload_start + payload.len()].copy_from_slice(payload);
        let footer_start = payload_start + payload.len();
        self.arena[footer_start..footer_start + RECORD_FOOTER_SIZE]
            .copy_from_slice(&format::encode_footer());

        self.write.position = pos + total;
    }

    /// Copies framed records from the read cursor into `scratch`, advancing
    /// the read cursor past them and past any skip padding.
    ///
    /// Stops after the last record whose sequence is at most `target`, or
    /// when caught up to the write cursor if `drain_all` is set. Returns the
    /// highest sequence drained, or [`UNKNOWN_SEQUENCE`].
    fn drain(&mut self, target: i64, drain_all: bool, scratch: &mut Vec<u8>) -> i64 {
        let mut highest = UNKNOWN_SEQUENCE;
        loop {
            if self.is_empty() {
                break;
            }
            let pos = self.read.position;
            if self.arena.len() - pos < RECORD_HEADER_SIZE {
                // Tail too small to have held a header; the writer wrapped
                // without padding.
                self.rewind_read();
                continue;
            }
            let header = RecordHeader::decode(&self.arena[pos..pos + RECORD_HEADER_SIZE]);
            debug_assert_eq!(header.magic, format::RECORD_HEADER_MAGIC);
            if header.is_skip() {
                self.rewind_read();
                continue;
            }
            if !drain_all && header.sequence > target {
                break;
            }
            let len = header.total_length as usize;
            scratch.extend_from_slice(&self.arena[pos..pos + len]);
            self.read.position = pos + len;
            highest = header.sequence;
        }
        highest
    }
}

/// Append-side state, serialized by the append lock.
struct AppendState {
    /// Sequence number the next append is assigned.
    next_sequence: i64,
    /// File the next record lands in.
    file_number: i64,
    /// Logical end of the current file, counting buffered bytes.
    pending_offset: i64,
    /// Whether the current file's writer has been opened.
    writer_open: bool,
}

/// Flush-side state, serialized by the flush lock.
struct FlushState {
    /// A thread is currently draining and fsyncing.
    in_progress: bool,
    /// Highest sequence any caller has asked to make durable.
    requested: i64,
    /// Highest sequence known durable on disk.
    flushed: i64,
}

/// Absorbs appends into the circular buffer and coordinates draining and
/// fsyncing that buffer to the current log file.
pub(crate) struct FlushManager {
    store: Arc<FileStore>,
    manager: Arc<LogManager>,
    target_file_size: i64,
    buffer_capacity: usize,
    failed: AtomicBool,
    append: Mutex<AppendState>,
    buffer: Mutex<LogBuffer>,
    io: Mutex<Option<FileWriter>>,
    flush_state: Mutex<FlushState>,
    flush_done: Condvar,
}

impl FlushManager {
    pub(crate) fn new(
        store: Arc<FileStore>,
        manager: Arc<LogManager>,
        buffer_size: usize,
        target_file_size: i64,
        start: AppendPoint,
    ) -> Self {
        Self {
            store,
            manager,
            target_file_size,
            buffer_capacity: buffer_size,
            failed: AtomicBool::new(false),
            append: Mutex::new(AppendState {
                next_sequence: start.next_sequence,
                file_number: start.file_number,
                pending_offset: start.offset,
                writer_open: false,
            }),
            buffer: Mutex::new(LogBuffer::new(buffer_size)),
            io: Mutex::new(None),
            flush_state: Mutex::new(FlushState {
                in_progress: false,
                requested: UNKNOWN_SEQUENCE,
                flushed: UNKNOWN_SEQUENCE,
            }),
            flush_done: Condvar::new(),
        }
    }

    /// Appends `record`, assigning it the next sequence number and filling
    /// in its anchor.
    ///
    /// With `sync` set, blocks until the record is fsynced to stable
    /// storage. Without it, returns as soon as the bytes are buffered (or
    /// written, for records larger than the buffer).
    ///
    /// # Errors
    ///
    /// Any I/O or framing error permanently fails the log; this and all
    /// subsequent appends return an error without touching disk.
    pub(crate) fn append(&self, record: &mut UserRecord, sync: bool) -> LogResult<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(LogError::Failed);
        }
        if record.is_empty() {
            // An empty frame would be indistinguishable from padding on
            // scan; reject it without failing the log.
            return Err(LogError::EmptyRecord);
        }
        let sequence = match self.append_buffered(record) {
            Ok(sequence) => sequence,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };
        if sync {
            // Outside the append lock, so concurrent appenders keep going
            // while this thread waits for durability.
            self.flush(sequence, None, false)?;
        }
        Ok(())
    }

    fn append_buffered(&self, record: &mut UserRecord) -> LogResult<i64> {
        let mut state = self.append.lock();
        if self.failed.load(Ordering::Acquire) {
            return Err(LogError::Failed);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        if !state.writer_open {
            let writer = self.store.open_writer(state.file_number)?;
            *self.io.lock() = Some(writer);
            state.writer_open = true;
        }

        if state.pending_offset >= self.target_file_size {
            self.rotate(&mut state)?;
        }

        let total = format::framed_len(record.len());
        let file_number = state.file_number;
        let anchor_offset = state.pending_offset;

        if total <= self.buffer_capacity {
            loop {
                let mut buffer = self.buffer.lock();
                if total <= buffer.contiguous_free() {
                    buffer.put(sequence, record.payload());
                    break;
                }
                if buffer.can_wrap_write() {
                    buffer.rewind_write(sequence);
                    continue;
                }
                // Buffer full: drain it while still holding the append
                // lock, so no other appender can slip records in between.
                drop(buffer);
                self.flush(sequence - 1, None, true)?;
            }
        } else {
            debug!(sequence, bytes = total, "oversized record bypasses buffer");
            self.flush(sequence, Some((sequence, record.payload())), true)?;
        }

        state.pending_offset += total as i64;
        record.set_anchor(file_number, anchor_offset, sequence);
        Ok(sequence)
    }

    /// Drains everything pending, then asks the log manager to rotate to the
    /// next file.
    fn rotate(&self, state: &mut AppendState) -> LogResult<()> {
        self.flush(state.next_sequence - 1, None, true)?;

        let mut io = self.io.lock();
        let Some(writer) = io.take() else {
            unreachable!("rotation requires an open writer");
        };
        let writer = self.manager.switch_to_next_file(writer)?;
        state.file_number = writer.number();
        state.pending_offset = writer.len();
        *io = Some(writer);
        Ok(())
    }

    /// Makes every record appended so far durable.
    pub(crate) fn sync_all(&self) -> LogResult<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(LogError::Failed);
        }
        let upto = self.append.lock().next_sequence - 1;
        self.flush(upto, None, false)
    }

    /// Makes everything up to `upto` durable.
    ///
    /// Only one flush is in progress at a time. Losing callers record their
    /// requirement in the shared high-water mark and wait; the winner drains
    /// the buffer, writes any oversized payload, fsyncs, and wakes everyone.
    ///
    /// A caller holding the append lock drains to its own sequence (or the
    /// write cursor); other callers flush up to the global high-water mark.
    fn flush(
        &self,
        upto: i64,
        direct: Option<(i64, &[u8])>,
        append_lock_held: bool,
    ) -> LogResult<()> {
        let target;
        {
            let mut flush_state = self.flush_state.lock();
            if upto > flush_state.requested {
                flush_state.requested = upto;
            }
            loop {
                if self.failed.load(Ordering::Acquire) {
                    return Err(LogError::Failed);
                }
                if !append_lock_held && direct.is_none() && flush_state.flushed >= upto {
                    // Someone else's flush already covered this sequence.
                    return Ok(());
                }
                if !flush_state.in_progress {
                    break;
                }
                self.flush_done.wait(&mut flush_state);
            }
            flush_state.in_progress = true;
            target = if append_lock_held {
                upto
            } else {
                flush_state.requested
            };
        }

        let result = self.write_and_sync(target, direct, append_lock_held);

        let mut flush_state = self.flush_state.lock();
        flush_state.in_progress = false;
        match result {
            Ok(highest) => {
                if highest > flush_state.flushed {
                    flush_state.flushed = highest;
                }
                self.flush_done.notify_all();
                Ok(())
            }
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                self.flush_done.notify_all();
                Err(e)
            }
        }
    }

    /// The physical drain: buffer to file, optional direct payload, fsync.
    fn write_and_sync(
        &self,
        target: i64,
        direct: Option<(i64, &[u8])>,
        drain_all: bool,
    ) -> LogResult<i64> {
        let mut scratch = Vec::new();
        let mut highest = self.buffer.lock().drain(target, drain_all, &mut scratch);

        let mut io = self.io.lock();
        let Some(writer) = io.as_mut() else {
            // Nothing has ever been appended; there is nothing to sync.
            debug_assert!(scratch.is_empty());
            return Ok(highest);
        };

        if !scratch.is_empty() {
            writer.write_all(&scratch)?;
        }
        if let Some((sequence, payload)) = direct {
            let total = format::framed_len(payload.len());
            writer.write_all(&RecordHeader::encode(sequence, total as i32))?;
            writer.write_all(payload)?;
            writer.write_all(&format::encode_footer())?;
            if sequence > highest {
                highest = sequence;
            }
        }
        writer.sync()?;
        Ok(highest)
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
        self.flush_done.notify_all();
    }
}

impl std::fmt::Debug for FlushManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushManager")
            .field("target_file_size", &self.target_file_size)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogAnchor, MIN_FILE_NUMBER};
    use crate::scanner::LogScanner;
    use std::path::Path;
    use tempfile::tempdir;

    fn drain_to_vec(buffer: &mut LogBuffer) -> Vec<u8> {
        let mut scratch = Vec::new();
        buffer.drain(i64::MAX, true, &mut scratch);
        scratch
    }

    #[test]
    fn buffer_put_and_drain_round_trip() {
        let mut buffer = LogBuffer::new(256);
        buffer.put(0, b"alpha");
        buffer.put(1, b"beta");

        let bytes = drain_to_vec(&mut buffer);
        assert!(buffer.is_empty());

        let first = RecordHeader::decode(&bytes[..RECORD_HEADER_SIZE]);
        assert_eq!(first.sequence, 0);
        assert_eq!(first.total_length as usize, format::framed_len(5));
    }

    #[test]
    fn buffer_drain_respects_target() {
        let mut buffer = LogBuffer::new(256);
        buffer.put(0, b"a");
        buffer.put(1, b"b");
        buffer.put(2, b"c");

        let mut scratch = Vec::new();
        let highest = buffer.drain(1, false, &mut scratch);
        assert_eq!(highest, 1);
        assert_eq!(scratch.len(), format::framed_len(1) * 2);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn buffer_wraparound_with_skip_record() {
        let mut buffer = LogBuffer::new(128);
        // Fill most of the arena, drain it, then wrap.
        buffer.put(0, &[0xAA; 60]); // 92 framed bytes
        let drained = drain_to_vec(&mut buffer);
        assert_eq!(drained.len(), format::framed_len(60));

        // 36 contiguous bytes remain at the tail; a 40-byte frame needs a
        // skip record and a wrap into the drained region.
        assert_eq!(buffer.contiguous_free(), 36);
        assert!(buffer.can_wrap_write());
        buffer.rewind_write(1);
        assert_eq!(buffer.write.rewind_count, 1);
        assert_eq!(buffer.contiguous_free(), 92);
        buffer.put(1, &[0xBB; 8]);

        let bytes = drain_to_vec(&mut buffer);
        assert!(buffer.is_empty());
        assert_eq!(buffer.read.rewind_count, 1);

        // The skip record stays in the buffer; only the real record drains.
        let header = RecordHeader::decode(&bytes[..RECORD_HEADER_SIZE]);
        assert_eq!(header.sequence, 1);
        assert_eq!(bytes.len(), format::framed_len(8));
    }

    #[test]
    fn buffer_wrap_without_room_for_skip_header() {
        let mut buffer = LogBuffer::new(64);
        buffer.put(0, &[1; 16]); // 48 framed bytes, 16 left at the tail
        let _ = drain_to_vec(&mut buffer);

        assert_eq!(buffer.contiguous_free(), 16);
        buffer.rewind_write(1);
        buffer.put(1, &[2; 4]);

        let bytes = drain_to_vec(&mut buffer);
        assert_eq!(bytes.len(), format::framed_len(4));
        assert!(buffer.is_empty());
    }

    fn open_flush_manager(path: &Path, buffer_size: usize, target: i64) -> FlushManager {
        let store = Arc::new(FileStore::open(path, "log").unwrap());
        let manager = Arc::new(LogManager::new(Arc::clone(&store)));
        let start = manager.initialize().unwrap();
        FlushManager::new(store, manager, buffer_size, target, start)
    }

    fn scan_payloads(flush: &FlushManager) -> Vec<Vec<u8>> {
        let mut scanner =
            LogScanner::new(Arc::clone(&flush.store), &LogAnchor::start()).unwrap();
        let mut record = UserRecord::new();
        let mut out = Vec::new();
        while scanner.next(&mut record).unwrap() {
            out.push(record.payload().to_vec());
        }
        out
    }

    #[test]
    fn durable_appends_reach_disk_in_order() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 4096, 1 << 20);

        let mut record = UserRecord::new();
        for payload in [&b"one"[..], b"two", b"three"] {
            record.set_payload(payload);
            flush.append(&mut record, true).unwrap();
        }

        assert_eq!(
            scan_payloads(&flush),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }

    #[test]
    fn anchors_are_sequential_and_contiguous() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 4096, 1 << 20);

        let mut record = UserRecord::new();
        let mut last_offset = 0;
        for i in 0..5 {
            record.set_payload(&[i as u8; 10]);
            flush.append(&mut record, false).unwrap();
            assert_eq!(record.anchor().sequence(), i);
            assert_eq!(record.anchor().file_number(), MIN_FILE_NUMBER);
            assert!(record.anchor().file_offset() > last_offset);
            last_offset = record.anchor().file_offset();
        }
    }

    #[test]
    fn non_durable_appends_become_visible_after_durable_one() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 4096, 1 << 20);

        let mut record = UserRecord::new();
        record.set_payload(b"buffered");
        flush.append(&mut record, false).unwrap();

        // Nothing on disk yet past the file header.
        assert!(scan_payloads(&flush).is_empty());

        record.set_payload(b"synced");
        flush.append(&mut record, true).unwrap();
        assert_eq!(
            scan_payloads(&flush),
            vec![b"buffered".to_vec(), b"synced".to_vec()]
        );
    }

    #[test]
    fn oversized_record_bypasses_buffer() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 256, 1 << 20);

        let mut record = UserRecord::new();
        record.set_payload(b"small");
        flush.append(&mut record, false).unwrap();

        let big = vec![0xCD; 1000];
        record.set_payload(&big);
        flush.append(&mut record, true).unwrap();
        assert_eq!(record.anchor().sequence(), 1);

        let payloads = scan_payloads(&flush);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], b"small");
        assert_eq!(payloads[1], big);
    }

    #[test]
    fn file_rotation_past_target_size() {
        let temp = tempdir().unwrap();
        // Tiny target: every append past the first rotates.
        let flush = open_flush_manager(temp.path(), 4096, 64);

        let mut record = UserRecord::new();
        record.set_payload(&[1; 100]);
        flush.append(&mut record, true).unwrap();
        assert_eq!(record.anchor().file_number(), 0);

        record.set_payload(&[2; 100]);
        flush.append(&mut record, true).unwrap();
        assert_eq!(record.anchor().file_number(), 1);

        let payloads = scan_payloads(&flush);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1], vec![2; 100]);
    }

    #[test]
    fn wraparound_mid_stream_keeps_all_records() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 4096, 1 << 20);

        let sizes = [100usize, 4000, 50];
        let mut record = UserRecord::new();
        let mut sequences = Vec::new();
        for (i, &size) in sizes.iter().enumerate() {
            record.set_payload(&vec![i as u8; size]);
            flush.append(&mut record, true).unwrap();
            sequences.push(record.anchor().sequence());
        }
        assert_eq!(sequences, vec![0, 1, 2]);

        let payloads = scan_payloads(&flush);
        assert_eq!(payloads.len(), 3);
        for (i, &size) in sizes.iter().enumerate() {
            assert_eq!(payloads[i], vec![i as u8; size]);
        }
    }

    #[test]
    fn concurrent_appends_get_contiguous_sequences() {
        use std::thread;

        let temp = tempdir().unwrap();
        let flush = Arc::new(open_flush_manager(temp.path(), 4096, 1 << 20));

        let mut handles = Vec::new();
        for t in 0..4 {
            let flush = Arc::clone(&flush);
            handles.push(thread::spawn(move || {
                let mut sequences = Vec::new();
                let mut record = UserRecord::new();
                for i in 0..25 {
                    record.set_payload(&[t as u8, i as u8]);
                    flush.append(&mut record, true).unwrap();
                    sequences.push(record.anchor().sequence());
                }
                sequences
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<i64> = (0..100).collect();
        assert_eq!(all, expected);

        assert_eq!(scan_payloads(&flush).len(), 100);
    }

    #[test]
    fn empty_record_is_rejected_without_failing_the_log() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 4096, 1 << 20);

        let mut record = UserRecord::new();
        assert!(matches!(
            flush.append(&mut record, true),
            Err(LogError::EmptyRecord)
        ));

        record.set_payload(b"still fine");
        flush.append(&mut record, true).unwrap();
        assert_eq!(scan_payloads(&flush), vec![b"still fine".to_vec()]);
    }

    #[test]
    fn failed_log_rejects_appends() {
        let temp = tempdir().unwrap();
        let flush = open_flush_manager(temp.path(), 4096, 1 << 20);

        flush.fail();

        let mut record = UserRecord::new();
        record.set_payload(b"nope");
        assert!(matches!(
            flush.append(&mut record, true),
            Err(LogError::Failed)
        ));
    }
}

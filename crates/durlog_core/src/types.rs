//! Core value types: log anchors and user records.

use crate::format::FILE_HEADER_SIZE;
use std::cmp::Ordering;
use std::fmt;

/// Lowest valid log file number.
pub const MIN_FILE_NUMBER: i64 = 0;

/// Lowest valid offset inside a log file (the byte after the file header).
pub const MIN_FILE_OFFSET: i64 = FILE_HEADER_SIZE;

/// Sentinel sequence number meaning "don't care".
///
/// Used by anchors that pin a byte position without asserting which record
/// starts there.
pub const UNKNOWN_SEQUENCE: i64 = i64::MIN;

/// A position in the log: file number, byte offset, and the sequence number
/// of the record starting there.
///
/// Anchors are ordered by `(file_number, file_offset)`; the sequence number
/// is carried alongside and does not participate in comparisons.
#[derive(Debug, Clone, Copy)]
pub struct LogAnchor {
    file_number: i64,
    file_offset: i64,
    sequence: i64,
}

impl LogAnchor {
    /// Creates an anchor at the given position.
    #[must_use]
    pub const fn new(file_number: i64, file_offset: i64, sequence: i64) -> Self {
        Self {
            file_number,
            file_offset,
            sequence,
        }
    }

    /// The anchor at the very start of a fresh log.
    #[must_use]
    pub const fn start() -> Self {
        Self::new(MIN_FILE_NUMBER, MIN_FILE_OFFSET, UNKNOWN_SEQUENCE)
    }

    /// The file number this anchor points into.
    #[must_use]
    pub const fn file_number(&self) -> i64 {
        self.file_number
    }

    /// The byte offset within the file.
    #[must_use]
    pub const fn file_offset(&self) -> i64 {
        self.file_offset
    }

    /// The sequence number of the record at this position, or
    /// [`UNKNOWN_SEQUENCE`].
    #[must_use]
    pub const fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Updates this anchor in place.
    ///
    /// Anchors are immutable by convention; `reset` exists so callers can
    /// reuse one allocation across calls.
    pub fn reset(&mut self, file_number: i64, file_offset: i64, sequence: i64) {
        self.file_number = file_number;
        self.file_offset = file_offset;
        self.sequence = sequence;
    }

    /// Returns `true` if the anchor names a position a log can contain.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.file_number >= MIN_FILE_NUMBER && self.file_offset >= MIN_FILE_OFFSET
    }
}

impl PartialEq for LogAnchor {
    fn eq(&self, other: &Self) -> bool {
        self.file_number == other.file_number && self.file_offset == other.file_offset
    }
}

impl Eq for LogAnchor {}

impl PartialOrd for LogAnchor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogAnchor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.file_number, self.file_offset).cmp(&(other.file_number, other.file_offset))
    }
}

impl fmt::Display for LogAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "anchor:{}:{}:{}",
            self.file_number, self.file_offset, self.sequence
        )
    }
}

/// A caller-supplied byte record, reusable across appends and scans.
///
/// The internal buffer grows on demand and is never shrunk, so a single
/// `UserRecord` can serve an entire append or replay loop without
/// reallocating. After a successful append (or scan step) the record carries
/// the [`LogAnchor`] at which its payload lives.
#[derive(Debug)]
pub struct UserRecord {
    data: Vec<u8>,
    length: usize,
    anchor: LogAnchor,
}

impl UserRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty record with `capacity` bytes preallocated.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            length: 0,
            anchor: LogAnchor::new(MIN_FILE_NUMBER, MIN_FILE_OFFSET, UNKNOWN_SEQUENCE),
        }
    }

    /// Copies `payload` into the record, reusing the existing buffer.
    pub fn set_payload(&mut self, payload: &[u8]) {
        if self.data.len() < payload.len() {
            self.data.resize(payload.len(), 0);
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.length = payload.len();
    }

    /// The logical payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Logical payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the record carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The anchor recorded by the last successful append or scan.
    #[must_use]
    pub fn anchor(&self) -> &LogAnchor {
        &self.anchor
    }

    /// Resizes the logical payload and returns it for filling.
    ///
    /// Used by the scanner to read payload bytes directly into the record.
    pub(crate) fn prepare(&mut self, length: usize) -> &mut [u8] {
        if self.data.len() < length {
            self.data.resize(length, 0);
        }
        self.length = length;
        &mut self.data[..length]
    }

    pub(crate) fn set_anchor(&mut self, file_number: i64, file_offset: i64, sequence: i64) {
        self.anchor.reset(file_number, file_offset, sequence);
    }
}

impl Default for UserRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_ordering_is_lexicographic() {
        let a = LogAnchor::new(0, 100, 5);
        let b = LogAnchor::new(0, 200, 1);
        let c = LogAnchor::new(1, 12, 0);

        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn anchor_equality_ignores_sequence() {
        let a = LogAnchor::new(0, 100, 5);
        let b = LogAnchor::new(0, 100, UNKNOWN_SEQUENCE);
        assert_eq!(a, b);
    }

    #[test]
    fn anchor_reset_in_place() {
        let mut a = LogAnchor::start();
        a.reset(3, 400, 17);
        assert_eq!(a.file_number(), 3);
        assert_eq!(a.file_offset(), 400);
        assert_eq!(a.sequence(), 17);
    }

    #[test]
    fn start_anchor_is_valid() {
        assert!(LogAnchor::start().is_valid());
        assert!(!LogAnchor::new(-1, MIN_FILE_OFFSET, 0).is_valid());
        assert!(!LogAnchor::new(0, 0, 0).is_valid());
    }

    #[test]
    fn record_reuses_buffer() {
        let mut record = UserRecord::with_capacity(16);
        record.set_payload(b"hello");
        assert_eq!(record.payload(), b"hello");

        record.set_payload(b"hi");
        assert_eq!(record.payload(), b"hi");
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn record_grows_on_demand() {
        let mut record = UserRecord::new();
        let big = vec![0xAB; 1024];
        record.set_payload(&big);
        assert_eq!(record.payload(), &big[..]);
    }

    #[test]
    fn prepare_sets_logical_length() {
        let mut record = UserRecord::new();
        record.prepare(8).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(record.len(), 8);
        assert_eq!(record.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}

//! On-disk record framing.
//!
//! Pure constants and layout arithmetic for the three framed structures the
//! log writes, all big-endian with fixed widths:
//!
//! ```text
//! file header  (12 B): fileNumber:i64 | magic:u32
//! record header(24 B): magic:u32 | totalLength:i32 | sequence:i64 | checksum:i64
//! record footer( 8 B): checksum:i32 (reserved) | magic:u32
//! checkpoint   (44 B): minExistingFile:i64 | minNeededFile:i64
//!                    | minNeededOffset:i64 | minNeededSeq:i64
//!                    | checksum:i64 | magic:u32
//! ```
//!
//! `totalLength` covers header, payload, and footer. The header checksum is
//! `sequence XOR totalLength`. The footer checksum field is reserved: it is
//! written as zero and never verified.

use crate::error::{LogError, LogResult};

/// Size of a log file header in bytes.
pub const FILE_HEADER_SIZE: i64 = 12;

/// Size of a record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Size of a record footer in bytes.
pub const RECORD_FOOTER_SIZE: usize = 8;

/// Size of a checkpoint record in bytes.
pub const CHECKPOINT_SIZE: usize = 44;

/// Magic number at the end of a log file header.
pub const FILE_HEADER_MAGIC: u32 = 0xFF00_FF00;

/// Magic number at the start of a record header.
pub const RECORD_HEADER_MAGIC: u32 = 0x010F_010F;

/// Magic number at the end of a record footer.
pub const RECORD_FOOTER_MAGIC: u32 = 0x0F01_0F01;

/// Magic number at the end of a checkpoint record.
pub const CHECKPOINT_MAGIC: u32 = 0xFF11_FF11;

/// Length sentinel marking a skip record.
///
/// Skip records pad the unusable tail of the in-memory append buffer before
/// a wraparound; they are header-only and never written to disk.
pub const SKIP_RECORD_LENGTH: i32 = -1;

/// Largest of the three marker sizes; sizes the scratch buffer shared by the
/// scanner and the flush path.
pub const MAX_MARKER_SIZE: usize = RECORD_HEADER_SIZE;

/// Total framed length of a record with the given payload length.
#[must_use]
pub const fn framed_len(payload_len: usize) -> usize {
    RECORD_HEADER_SIZE + payload_len + RECORD_FOOTER_SIZE
}

/// Header checksum: `sequence XOR totalLength`.
#[must_use]
pub const fn header_checksum(sequence: i64, total_length: i32) -> i64 {
    sequence ^ total_length as i64
}

/// A decoded record header.
///
/// Decoding performs no validation beyond length; the scanner and flush path
/// each check the fields they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Header magic as read from disk.
    pub magic: u32,
    /// Total framed length including header and footer, or
    /// [`SKIP_RECORD_LENGTH`].
    pub total_length: i32,
    /// Sequence number of the record.
    pub sequence: i64,
    /// Stored checksum.
    pub checksum: i64,
}

impl RecordHeader {
    /// Encodes a record header for a record of `total_length` framed bytes.
    #[must_use]
    pub fn encode(sequence: i64, total_length: i32) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&RECORD_HEADER_MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&total_length.to_be_bytes());
        buf[8..16].copy_from_slice(&sequence.to_be_bytes());
        buf[16..24].copy_from_slice(&header_checksum(sequence, total_length).to_be_bytes());
        buf
    }

    /// Encodes a skip-record header.
    #[must_use]
    pub fn encode_skip(sequence: i64) -> [u8; RECORD_HEADER_SIZE] {
        Self::encode(sequence, SKIP_RECORD_LENGTH)
    }

    /// Decodes a record header from `src`.
    ///
    /// # Panics
    ///
    /// Panics if `src` is shorter than [`RECORD_HEADER_SIZE`]; callers frame
    /// their reads at exactly that size.
    #[must_use]
    pub fn decode(src: &[u8]) -> Self {
        Self {
            magic: u32::from_be_bytes(src[0..4].try_into().unwrap()),
            total_length: i32::from_be_bytes(src[4..8].try_into().unwrap()),
            sequence: i64::from_be_bytes(src[8..16].try_into().unwrap()),
            checksum: i64::from_be_bytes(src[16..24].try_into().unwrap()),
        }
    }

    /// Returns `true` if this header marks a skip record.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        self.total_length == SKIP_RECORD_LENGTH
    }

    /// Returns `true` if the stored checksum matches the header fields.
    #[must_use]
    pub const fn checksum_ok(&self) -> bool {
        self.checksum == header_checksum(self.sequence, self.total_length)
    }

    /// Payload length implied by `total_length`.
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.total_length as usize - RECORD_HEADER_SIZE - RECORD_FOOTER_SIZE
    }
}

/// Encodes a record footer.
///
/// The footer checksum field is reserved and written as zero.
#[must_use]
pub fn encode_footer() -> [u8; RECORD_FOOTER_SIZE] {
    let mut buf = [0u8; RECORD_FOOTER_SIZE];
    buf[4..8].copy_from_slice(&RECORD_FOOTER_MAGIC.to_be_bytes());
    buf
}

/// Returns `true` if `src` carries a valid footer magic.
#[must_use]
pub fn footer_magic_ok(src: &[u8]) -> bool {
    u32::from_be_bytes(src[4..8].try_into().unwrap()) == RECORD_FOOTER_MAGIC
}

/// Encodes a log file header for the given file number.
#[must_use]
pub fn encode_file_header(file_number: i64) -> [u8; FILE_HEADER_SIZE as usize] {
    let mut buf = [0u8; FILE_HEADER_SIZE as usize];
    buf[0..8].copy_from_slice(&file_number.to_be_bytes());
    buf[8..12].copy_from_slice(&FILE_HEADER_MAGIC.to_be_bytes());
    buf
}

/// Decodes and validates a log file header.
///
/// # Errors
///
/// Returns a corruption error if the magic is wrong or the stored file
/// number does not match `expected_number`.
pub fn decode_file_header(src: &[u8], expected_number: i64) -> LogResult<()> {
    let number = i64::from_be_bytes(src[0..8].try_into().unwrap());
    let magic = u32::from_be_bytes(src[8..12].try_into().unwrap());
    if magic != FILE_HEADER_MAGIC {
        return Err(LogError::corrupted(format!(
            "bad file header magic in log file {expected_number}"
        )));
    }
    if number != expected_number {
        return Err(LogError::corrupted(format!(
            "log file {expected_number} claims to be file {number}"
        )));
    }
    Ok(())
}

/// The persisted checkpoint (control-file) record.
///
/// Bounds how far back recovery must scan and which old files may be
/// deleted. Persisted via a shadow file plus atomic rename, so a crash
/// mid-write never corrupts the previous checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Lowest-numbered log file still present on disk.
    pub min_existing_file: i64,
    /// File number of the oldest position still needed by consumers.
    pub min_needed_file: i64,
    /// Offset of the oldest position still needed.
    pub min_needed_offset: i64,
    /// Sequence number at the oldest needed position, or
    /// [`crate::types::UNKNOWN_SEQUENCE`].
    pub min_needed_sequence: i64,
}

impl Checkpoint {
    fn checksum(&self) -> i64 {
        self.min_existing_file
            ^ self.min_needed_file
            ^ self.min_needed_offset
            ^ self.min_needed_sequence
    }

    /// Encodes the checkpoint record.
    #[must_use]
    pub fn encode(&self) -> [u8; CHECKPOINT_SIZE] {
        let mut buf = [0u8; CHECKPOINT_SIZE];
        buf[0..8].copy_from_slice(&self.min_existing_file.to_be_bytes());
        buf[8..16].copy_from_slice(&self.min_needed_file.to_be_bytes());
        buf[16..24].copy_from_slice(&self.min_needed_offset.to_be_bytes());
        buf[24..32].copy_from_slice(&self.min_needed_sequence.to_be_bytes());
        buf[32..40].copy_from_slice(&self.checksum().to_be_bytes());
        buf[40..44].copy_from_slice(&CHECKPOINT_MAGIC.to_be_bytes());
        buf
    }

    /// Decodes and fully validates a checkpoint record.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the magic, checksum, file-number
    /// ranges, or `minExisting <= minNeeded` ordering are violated.
    pub fn decode(src: &[u8]) -> LogResult<Self> {
        if src.len() < CHECKPOINT_SIZE {
            return Err(LogError::corrupted("truncated checkpoint record"));
        }
        let magic = u32::from_be_bytes(src[40..44].try_into().unwrap());
        if magic != CHECKPOINT_MAGIC {
            return Err(LogError::corrupted("bad checkpoint magic"));
        }

        let checkpoint = Self {
            min_existing_file: i64::from_be_bytes(src[0..8].try_into().unwrap()),
            min_needed_file: i64::from_be_bytes(src[8..16].try_into().unwrap()),
            min_needed_offset: i64::from_be_bytes(src[16..24].try_into().unwrap()),
            min_needed_sequence: i64::from_be_bytes(src[24..32].try_into().unwrap()),
        };

        let stored = i64::from_be_bytes(src[32..40].try_into().unwrap());
        let actual = checkpoint.checksum();
        if stored != actual {
            return Err(LogError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        if checkpoint.min_existing_file < crate::types::MIN_FILE_NUMBER
            || checkpoint.min_needed_file < crate::types::MIN_FILE_NUMBER
        {
            return Err(LogError::corrupted("checkpoint file number out of range"));
        }
        if checkpoint.min_existing_file > checkpoint.min_needed_file {
            return Err(LogError::corrupted(
                "checkpoint minExistingFile exceeds minNeededFile",
            ));
        }
        if checkpoint.min_needed_offset < FILE_HEADER_SIZE {
            return Err(LogError::corrupted("checkpoint offset inside file header"));
        }

        Ok(checkpoint)
    }
}

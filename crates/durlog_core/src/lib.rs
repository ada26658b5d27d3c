//! Single-writer, crash-recoverable append log.
//!
//! A log is a sequence of byte records spread over numbered files in one
//! directory. Every record gets a monotonically increasing sequence number
//! and a [`LogAnchor`] naming its exact byte position, so callers can
//! replay from any position they have seen. Appends are absorbed by an
//! in-memory circular buffer and made durable by grouped fsyncs; a
//! checkpoint file bounds how far back recovery must look and which old
//! files may be deleted.
//!
//! # Example
//!
//! ```no_run
//! use durlog_core::{Log, LogConfig, UserRecord};
//!
//! # fn main() -> durlog_core::LogResult<()> {
//! let log = Log::open("/var/lib/myapp/log", LogConfig::default())?;
//!
//! let mut record = UserRecord::new();
//! record.set_payload(b"state change");
//! log.append(&mut record, true)?;
//!
//! // Replay everything still needed after a restart.
//! let mut scanner = log.scan(&log.start_anchor())?;
//! while scanner.next(&mut record)? {
//!     // apply record.payload()
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod flush;
pub mod format;
mod log;
mod manager;
mod scanner;
mod types;

pub use config::LogConfig;
pub use error::{LogError, LogResult};
pub use log::Log;
pub use scanner::LogScanner;
pub use types::{LogAnchor, UserRecord, MIN_FILE_NUMBER, MIN_FILE_OFFSET, UNKNOWN_SEQUENCE};

//! # durlog Storage
//!
//! Numbered log-file store for the durlog write-ahead log.
//!
//! This crate provides the lowest-level file abstraction for the log core.
//! Files are **opaque byte stores** addressed by number - the store does not
//! interpret record framing, checkpoints, or anything else the core writes.
//!
//! ## Design Principles
//!
//! - Files are named deterministically from their number, so any component
//!   can address a file by number alone
//! - Absence of a file is a routine signal ([`StorageError::NotFound`]),
//!   distinct from other I/O errors
//! - Reads are all-or-nothing: short reads surface as [`StorageError::Eof`]
//! - The log directory is exclusively locked for the store's lifetime
//!
//! ## Example
//!
//! ```no_run
//! use durlog_storage::FileStore;
//! use std::path::Path;
//!
//! let store = FileStore::open(Path::new("logs"), "log").unwrap();
//! store.create(0).unwrap();
//! let mut writer = store.open_writer(0).unwrap();
//! writer.write_all(b"record bytes").unwrap();
//! writer.sync().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileReader, FileWriter};
pub use store::FileStore;

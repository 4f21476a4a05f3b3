// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Record persistence
//!
//! Records are JSON documents in one flat directory, one file per analysis,
//! named after their id (`farmland_<id>.json`). The control loop talks to the
//! store through [`RecordStore`]; [`DirectoryRecordStore`] is the filesystem
//! implementation.
//!
//! ## Id allocation
//!
//! Ids are strictly increasing for the lifetime of the data directory. At
//! start-up the next id is rebuilt as the highest id found on disk plus one,
//! so deleting a record never lets its id be reused. Only [`RecordStore::wipe`]
//! brings the counter back to 1.

pub mod directory;
pub mod record;

use std::io::Read;
use std::path::PathBuf;

use thiserror::Error;

pub use directory::DirectoryRecordStore;
pub use record::{LogRecord, PhCategory};

/// Name and size of one persisted record, as announced to the companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub name: String,
    pub size: u64,
}

/// Summary reported by the periodic health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreHealth {
    pub records: usize,
    pub bytes: u64,
    /// Free space on the medium, when the platform reports it.
    pub available: Option<u64>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing medium is missing or refuses the operation.
    #[error("persistence unavailable at {}: {source}", path.display())]
    PersistenceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Less free space than the configured floor.
    #[error("only {available} bytes free at {}, {required} required", path.display())]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    /// Records are immutable once written.
    #[error("record {0} already exists")]
    AlreadyExists(String),

    #[error("no record named {0}")]
    NotFound(String),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Flat record storage used by the control loop.
pub trait RecordStore: Send {
    /// Id the next written record should carry.
    fn next_id(&self) -> u64;

    /// Bring the id counter in line with the medium if an earlier scan
    /// failed. Call before [`RecordStore::next_id`] when allocating.
    fn refresh(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Persist `record` under its id and advance the id counter past it.
    fn write(&mut self, record: &LogRecord) -> Result<RecordEntry, StorageError>;

    /// All records, ordered by id.
    fn list(&self) -> Result<Vec<RecordEntry>, StorageError>;

    /// Open a record for streaming.
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Delete every record and reset the id counter to 1.
    ///
    /// Returns the number of entries removed.
    fn wipe(&mut self) -> Result<usize, StorageError>;

    /// Fails when the medium is read-only or short of free space.
    fn check_health(&self) -> Result<StoreHealth, StorageError>;
}

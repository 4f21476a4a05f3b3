// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the agni-soil-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Flat-directory record store

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sysinfo::Disks;

use super::{LogRecord, RecordEntry, RecordStore, StorageError, StoreHealth};

pub const RECORD_PREFIX: &str = "farmland_";
pub const RECORD_SUFFIX: &str = ".json";

pub fn record_file_name(id: u64) -> String {
    format!("{}{}{}", RECORD_PREFIX, id, RECORD_SUFFIX)
}

/// Id of a record file name, `None` for anything else in the directory.
pub fn parse_record_id(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(RECORD_PREFIX)?.strip_suffix(RECORD_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Free bytes on the medium holding a path, `None` when unknown.
pub type SpaceProbe = fn(&Path) -> Option<u64>;

/// Below this much free space the medium is reported unhealthy.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 1024 * 1024;

/// Free space of the mounted disk whose mount point is the longest prefix of
/// `path`.
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// [`RecordStore`] backed by one directory on the local filesystem.
#[derive(Debug)]
pub struct DirectoryRecordStore {
    root: PathBuf,
    next_id: u64,
    /// The id counter reflects what is on disk. Cleared while the medium
    /// could not be scanned.
    scanned: bool,
    min_free_bytes: u64,
    space_probe: SpaceProbe,
}

impl DirectoryRecordStore {
    /// Attach to `root`, creating it if needed, and rebuild the id counter.
    ///
    /// An unusable directory is logged and left for later operations to
    /// report; the store itself is always returned and scans again on the
    /// next [`RecordStore::refresh`] or write.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            root: root.into(),
            next_id: 1,
            scanned: false,
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            space_probe: available_space,
        };
        match store.rescan() {
            Ok(count) => info!(
                "Record store at {}: {} records, next id {}",
                store.root.display(),
                count,
                store.next_id
            ),
            Err(e) => warn!("Record store not available yet: {}", e),
        }
        store
    }

    /// Free space floor below which writes are refused.
    pub fn with_min_free_bytes(mut self, min_free_bytes: u64) -> Self {
        self.min_free_bytes = min_free_bytes;
        self
    }

    pub fn with_space_probe(mut self, probe: SpaceProbe) -> Self {
        self.space_probe = probe;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unavailable(&self, source: io::Error) -> StorageError {
        StorageError::PersistenceUnavailable {
            path: self.root.clone(),
            source,
        }
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|e| self.unavailable(e))
    }

    /// Rebuild the id counter from disk. The counter never moves backwards.
    fn rescan(&mut self) -> Result<usize, StorageError> {
        self.ensure_dir()?;
        let records = self.scan()?;
        let on_disk = records.last().map_or(1, |(id, _)| id + 1);
        self.next_id = self.next_id.max(on_disk);
        self.scanned = true;
        Ok(records.len())
    }

    /// Free space on the medium, refused below the floor.
    fn check_space(&self) -> Result<Option<u64>, StorageError> {
        let available = (self.space_probe)(&self.root);
        match available {
            Some(free) if free < self.min_free_bytes => Err(StorageError::InsufficientSpace {
                path: self.root.clone(),
                available: free,
                required: self.min_free_bytes,
            }),
            _ => Ok(available),
        }
    }

    /// Record files currently on disk, sorted by id.
    fn scan(&self) -> Result<Vec<(u64, RecordEntry)>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| self.unavailable(e))? {
            let entry = entry.map_err(|e| self.unavailable(e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = parse_record_id(&name) else {
                continue;
            };
            let metadata = entry.metadata().map_err(|e| self.unavailable(e))?;
            if !metadata.is_file() {
                continue;
            }
            records.push((
                id,
                RecordEntry {
                    name,
                    size: metadata.len(),
                },
            ));
        }
        records.sort_by_key(|(id, _)| *id);
        Ok(records)
    }
}

impl RecordStore for DirectoryRecordStore {
    fn next_id(&self) -> u64 {
        self.next_id
    }

    fn refresh(&mut self) -> Result<(), StorageError> {
        if self.scanned {
            return Ok(());
        }
        let count = self.rescan()?;
        info!(
            "Record store at {} available again: {} records, next id {}",
            self.root.display(),
            count,
            self.next_id
        );
        Ok(())
    }

    fn write(&mut self, record: &LogRecord) -> Result<RecordEntry, StorageError> {
        self.refresh()?;
        self.check_space()?;
        let name = record_file_name(record.id);
        let target = self.root.join(&name);
        if target.exists() {
            return Err(StorageError::AlreadyExists(name));
        }
        let bytes = serde_json::to_vec(record)?;

        // Write beside the target and rename, so a torn write never shows up
        // as a record.
        let staging = self.root.join(format!(".{}.tmp", name));
        fs::write(&staging, &bytes).map_err(|e| self.unavailable(e))?;
        fs::rename(&staging, &target).map_err(|e| self.unavailable(e))?;

        self.next_id = self.next_id.max(record.id + 1);
        debug!("Wrote {} ({} bytes)", name, bytes.len());
        Ok(RecordEntry {
            name,
            size: bytes.len() as u64,
        })
    }

    fn list(&self) -> Result<Vec<RecordEntry>, StorageError> {
        Ok(self.scan()?.into_iter().map(|(_, entry)| entry).collect())
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        if parse_record_id(name).is_none() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        match File::open(self.root.join(name)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn wipe(&mut self) -> Result<usize, StorageError> {
        self.ensure_dir()?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.root).map_err(|e| self.unavailable(e))? {
            let path = entry.map_err(|e| self.unavailable(e))?.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| self.unavailable(e))?;
            debug!("Deleted {}", path.display());
            removed += 1;
        }
        self.next_id = 1;
        self.scanned = true;
        info!("Record store wiped, {} entries removed", removed);
        Ok(removed)
    }

    fn check_health(&self) -> Result<StoreHealth, StorageError> {
        let metadata = fs::metadata(&self.root).map_err(|e| self.unavailable(e))?;
        if metadata.permissions().readonly() {
            return Err(self.unavailable(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "directory is read-only",
            )));
        }
        let available = self.check_space()?;
        let records = self.scan()?;
        Ok(StoreHealth {
            records: records.len(),
            bytes: records.iter().map(|(_, entry)| entry.size).sum(),
            available,
        })
    }
}

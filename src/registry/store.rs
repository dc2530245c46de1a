// Path record persistence with a (host, kind, path) unique constraint

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{AnsiblePath, PathId, PathKind};
use crate::hosts::HostId;
use crate::output::errors::ControlNodeError;
use crate::output::messages;

/// Current snapshot format version
const SNAPSHOT_VERSION: &str = "1.0";

/// Storage seam for path records.
///
/// Implementations enforce uniqueness of `(host_id, kind, path)` atomically
/// with the write, so concurrent registrations cannot both succeed.
pub trait PathStore: Send + Sync {
    /// All records of a host, ordered by id
    fn list_by_host(&self, host_id: HostId) -> Result<Vec<AnsiblePath>, ControlNodeError>;

    fn get(&self, id: PathId) -> Result<Option<AnsiblePath>, ControlNodeError>;

    /// Insert a new record; `path` must already be validated
    fn insert(
        &self,
        kind: PathKind,
        host_id: HostId,
        path: &str,
    ) -> Result<AnsiblePath, ControlNodeError>;

    /// Replace the path string of an existing record
    fn update_path(&self, id: PathId, path: &str) -> Result<AnsiblePath, ControlNodeError>;

    /// Remove a record, `NotFound` if absent
    fn remove(&self, id: PathId) -> Result<AnsiblePath, ControlNodeError>;
}

/// The full set of records, as stored in memory and on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathTable {
    version: String,
    next_id: PathId,
    paths: BTreeMap<PathId, AnsiblePath>,
}

impl Default for PathTable {
    fn default() -> Self {
        PathTable {
            version: SNAPSHOT_VERSION.to_string(),
            next_id: 1,
            paths: BTreeMap::new(),
        }
    }
}

impl PathTable {
    fn is_taken(&self, host_id: HostId, kind: PathKind, path: &str, except: Option<PathId>) -> bool {
        self.paths.values().any(|p| {
            p.host_id == host_id && p.kind == kind && p.path == path && Some(p.id) != except
        })
    }

    fn list_by_host(&self, host_id: HostId) -> Vec<AnsiblePath> {
        self.paths
            .values()
            .filter(|p| p.host_id == host_id)
            .cloned()
            .collect()
    }

    fn insert(
        &mut self,
        kind: PathKind,
        host_id: HostId,
        path: &str,
    ) -> Result<AnsiblePath, ControlNodeError> {
        if self.is_taken(host_id, kind, path, None) {
            return Err(ControlNodeError::field("path", messages::PATH_DUPLICATE));
        }

        let now = Utc::now();
        let record = AnsiblePath {
            id: self.next_id,
            kind,
            host_id,
            path: path.to_string(),
            created: now,
            modified: now,
        };

        self.next_id += 1;
        self.paths.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_path(&mut self, id: PathId, path: &str) -> Result<AnsiblePath, ControlNodeError> {
        let (host_id, kind) = match self.paths.get(&id) {
            Some(existing) => (existing.host_id, existing.kind),
            None => return Err(ControlNodeError::NotFound),
        };

        if self.is_taken(host_id, kind, path, Some(id)) {
            return Err(ControlNodeError::field("path", messages::PATH_DUPLICATE));
        }

        let record = self.paths.get_mut(&id).ok_or(ControlNodeError::NotFound)?;
        record.path = path.to_string();
        record.modified = Utc::now();
        Ok(record.clone())
    }

    fn remove(&mut self, id: PathId) -> Result<AnsiblePath, ControlNodeError> {
        self.paths.remove(&id).ok_or(ControlNodeError::NotFound)
    }
}

/// In-process store, mainly for tests and single-run CLI use
#[derive(Debug, Default)]
pub struct MemoryPathStore {
    table: RwLock<PathTable>,
}

impl MemoryPathStore {
    pub fn new() -> Self {
        MemoryPathStore::default()
    }
}

impl PathStore for MemoryPathStore {
    fn list_by_host(&self, host_id: HostId) -> Result<Vec<AnsiblePath>, ControlNodeError> {
        Ok(self.table.read().list_by_host(host_id))
    }

    fn get(&self, id: PathId) -> Result<Option<AnsiblePath>, ControlNodeError> {
        Ok(self.table.read().paths.get(&id).cloned())
    }

    fn insert(
        &self,
        kind: PathKind,
        host_id: HostId,
        path: &str,
    ) -> Result<AnsiblePath, ControlNodeError> {
        self.table.write().insert(kind, host_id, path)
    }

    fn update_path(&self, id: PathId, path: &str) -> Result<AnsiblePath, ControlNodeError> {
        self.table.write().update_path(id, path)
    }

    fn remove(&self, id: PathId) -> Result<AnsiblePath, ControlNodeError> {
        self.table.write().remove(id)
    }
}

/// Store persisted as a JSON snapshot shared between processes.
///
/// Every operation takes an advisory lock on a sidecar `<file>.lock`: shared
/// for reads, exclusive for mutations. A mutation reloads the snapshot under
/// the exclusive lock, so the uniqueness check always sees the records other
/// processes wrote. Snapshots are replaced by renaming a fully written
/// temporary file over the old one.
pub struct JsonFilePathStore {
    file: PathBuf,
    lock_file: PathBuf,
}

impl JsonFilePathStore {
    /// Open the store, creating parent directories when needed
    pub fn open(file: impl Into<PathBuf>) -> Result<Self, ControlNodeError> {
        let file = file.into();

        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ControlNodeError::storage(
                        format!("Failed to create store directory: {}", e),
                        Some(parent.to_path_buf()),
                    )
                })?;
            }
        }

        let mut lock_name = file.as_os_str().to_owned();
        lock_name.push(".lock");

        let store = JsonFilePathStore {
            file,
            lock_file: PathBuf::from(lock_name),
        };

        // Refuse a corrupt or foreign snapshot up front
        store.snapshot()?;
        Ok(store)
    }

    /// Open the lock file and lock it; released when the handle drops
    fn lock(&self, exclusive: bool) -> Result<File, ControlNodeError> {
        let handle = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_file)
            .map_err(|e| {
                ControlNodeError::storage(
                    format!("Failed to open store lock: {}", e),
                    Some(self.lock_file.clone()),
                )
            })?;

        let locked = if exclusive {
            FileExt::lock_exclusive(&handle)
        } else {
            FileExt::lock_shared(&handle)
        };
        locked.map_err(|e| {
            ControlNodeError::storage(
                format!("Failed to lock path store: {}", e),
                Some(self.lock_file.clone()),
            )
        })?;

        Ok(handle)
    }

    /// Current snapshot, read under a shared lock
    fn snapshot(&self) -> Result<PathTable, ControlNodeError> {
        let _guard = self.lock(false)?;
        self.load()
    }

    /// Caller holds the lock
    fn load(&self) -> Result<PathTable, ControlNodeError> {
        if !self.file.exists() {
            return Ok(PathTable::default());
        }

        let json = fs::read_to_string(&self.file).map_err(|e| {
            ControlNodeError::storage(
                format!("Failed to read path store: {}", e),
                Some(self.file.clone()),
            )
        })?;

        let table: PathTable = serde_json::from_str(&json).map_err(|e| {
            ControlNodeError::storage(
                format!("Failed to parse path store: {}", e),
                Some(self.file.clone()),
            )
        })?;

        if table.version != SNAPSHOT_VERSION {
            return Err(ControlNodeError::storage(
                format!(
                    "Path store version mismatch: expected {}, found {}",
                    SNAPSHOT_VERSION, table.version
                ),
                Some(self.file.clone()),
            ));
        }

        Ok(table)
    }

    /// Caller holds the exclusive lock
    fn save(&self, table: &PathTable) -> Result<(), ControlNodeError> {
        let write_error = |e: std::io::Error| {
            ControlNodeError::storage(
                format!("Failed to write path store: {}", e),
                Some(self.file.clone()),
            )
        };

        let json = serde_json::to_string_pretty(table).map_err(|e| {
            ControlNodeError::storage(format!("Failed to serialize path store: {}", e), None)
        })?;

        let dir = match self.file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Same directory as the target so the rename stays on one filesystem
        let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
        temp.write_all(json.as_bytes()).map_err(write_error)?;
        temp.as_file().sync_all().map_err(write_error)?;
        temp.persist(&self.file).map_err(|e| write_error(e.error))?;
        Ok(())
    }

    /// Reload, mutate and persist while holding the exclusive lock
    fn mutate<F>(&self, f: F) -> Result<AnsiblePath, ControlNodeError>
    where
        F: FnOnce(&mut PathTable) -> Result<AnsiblePath, ControlNodeError>,
    {
        let _guard = self.lock(true)?;
        let mut table = self.load()?;
        let record = f(&mut table)?;
        self.save(&table)?;
        Ok(record)
    }
}

impl PathStore for JsonFilePathStore {
    fn list_by_host(&self, host_id: HostId) -> Result<Vec<AnsiblePath>, ControlNodeError> {
        Ok(self.snapshot()?.list_by_host(host_id))
    }

    fn get(&self, id: PathId) -> Result<Option<AnsiblePath>, ControlNodeError> {
        Ok(self.snapshot()?.paths.remove(&id))
    }

    fn insert(
        &self,
        kind: PathKind,
        host_id: HostId,
        path: &str,
    ) -> Result<AnsiblePath, ControlNodeError> {
        self.mutate(|table| table.insert(kind, host_id, path))
    }

    fn update_path(&self, id: PathId, path: &str) -> Result<AnsiblePath, ControlNodeError> {
        self.mutate(|table| table.update_path(id, path))
    }

    fn remove(&self, id: PathId) -> Result<AnsiblePath, ControlNodeError> {
        self.mutate(|table| table.remove(id))
    }
}

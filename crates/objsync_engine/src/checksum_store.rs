//! Bookkeeping of the last checksum the remote acknowledged per object.
//!
//! The stored checksum is the sole source of an envelope's
//! `previous_checksum`. Losing an entry makes the next save conflict once,
//! which the conflict policy then resolves.

use crate::error::{SyncError, SyncResult};
use objsync_codec::{from_canonical_bytes, to_canonical_bytes, Checksum};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Persistent map from object ID to last acknowledged checksum.
pub trait ChecksumStore: Send + Sync {
    /// Returns the stored checksum.
    fn get(&self, id: Uuid) -> SyncResult<Option<Checksum>>;

    /// Stores a checksum.
    fn set(&self, id: Uuid, checksum: Checksum) -> SyncResult<()>;

    /// Removes an entry.
    fn delete(&self, id: Uuid) -> SyncResult<()>;

    /// Returns the stored checksums of several objects.
    fn get_many(&self, ids: &[Uuid]) -> SyncResult<HashMap<Uuid, Checksum>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(checksum) = self.get(*id)? {
                found.insert(*id, checksum);
            }
        }
        Ok(found)
    }
}

/// In-memory checksum store.
#[derive(Debug, Default)]
pub struct MemoryChecksumStore {
    entries: RwLock<HashMap<Uuid, Checksum>>,
}

impl MemoryChecksumStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ChecksumStore for MemoryChecksumStore {
    fn get(&self, id: Uuid) -> SyncResult<Option<Checksum>> {
        Ok(self.entries.read().get(&id).copied())
    }

    fn set(&self, id: Uuid, checksum: Checksum) -> SyncResult<()> {
        self.entries.write().insert(id, checksum);
        Ok(())
    }

    fn delete(&self, id: Uuid) -> SyncResult<()> {
        self.entries.write().remove(&id);
        Ok(())
    }

    fn get_many(&self, ids: &[Uuid]) -> SyncResult<HashMap<Uuid, Checksum>> {
        let entries = self.entries.read();
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(id).map(|c| (*id, *c)))
            .collect())
    }
}

const TEMP_SUFFIX: &str = "tmp";

/// Checksum store backed by a single CBOR file.
///
/// Every mutation rewrites the file with write-then-rename:
/// 1. Write the full map to a temporary file
/// 2. Sync the temporary file to disk
/// 3. Rename it over the store file
/// 4. Fsync the parent directory
pub struct FileChecksumStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<Uuid, Checksum>>,
    write_lock: Mutex<()>,
}

impl FileChecksumStore {
    /// Opens the store at `path`, loading existing entries.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = Self::load(&path)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened checksum store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> SyncResult<BTreeMap<Uuid, Checksum>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let mut file = File::open(path).map_err(io_error)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(io_error)?;
        if data.is_empty() {
            return Ok(BTreeMap::new());
        }
        from_canonical_bytes(&data).map_err(|e| SyncError::local_store(e.to_string()))
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<Uuid, Checksum>)) -> SyncResult<()> {
        let _writer = self.write_lock.lock();
        let mut next = self.entries.read().clone();
        apply(&mut next);
        self.persist(&next)?;
        *self.entries.write() = next;
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<Uuid, Checksum>) -> SyncResult<()> {
        let data = to_canonical_bytes(entries)?;
        let temp_path = self.path.with_extension(TEMP_SUFFIX);

        let mut file = File::create(&temp_path).map_err(io_error)?;
        file.write_all(&data).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(io_error)?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> SyncResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(io_error)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SyncResult<()> {
        Ok(())
    }
}

impl ChecksumStore for FileChecksumStore {
    fn get(&self, id: Uuid) -> SyncResult<Option<Checksum>> {
        Ok(self.entries.read().get(&id).copied())
    }

    fn set(&self, id: Uuid, checksum: Checksum) -> SyncResult<()> {
        if self.entries.read().get(&id) == Some(&checksum) {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.insert(id, checksum);
        })
    }

    fn delete(&self, id: Uuid) -> SyncResult<()> {
        if !self.entries.read().contains_key(&id) {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(&id);
        })
    }
}

fn io_error(err: std::io::Error) -> SyncError {
    SyncError::local_store(err.to_string())
}

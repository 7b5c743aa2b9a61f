//! File-per-dataset persistence for parsed tables.
//!
//! Each table is a bincode blob at `<directory>/<id>.tbl`. Writes go to a
//! `.partial` file in the same directory and are renamed into place, so a
//! concurrent `load` sees either the previous blob or the new one.
//!
//! Decoded tables are cached per process. A cached table is only served while
//! the blob's size and modification time still match what was read, so deletes
//! and overwrites made by another process sharing the directory are seen on
//! the next `load`.

use crate::config::StorageConfig;
use crate::error::AppError;
use crate::services::ids::is_valid_dataset_id;
use crate::services::table::Table;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::Builder;
use tracing::{debug, info, warn};

const BLOB_EXTENSION: &str = "tbl";
const PARTIAL_PREFIX: &str = ".write-";
const PARTIAL_SUFFIX: &str = ".partial";
const FORMAT_VERSION: u32 = 1;
const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct StoredTableRef<'a> {
    version: u32,
    table: &'a Table,
}

#[derive(Deserialize)]
struct StoredTable {
    version: u32,
    table: Table,
}

/// Identity of a blob on disk as seen by one `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlobStamp {
    len: u64,
    modified: SystemTime,
}

impl BlobStamp {
    fn of(metadata: &Metadata) -> Result<Self, AppError> {
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified()?,
        })
    }
}

#[derive(Clone)]
struct CachedTable {
    stamp: BlobStamp,
    table: Arc<Table>,
}

/// A blob found on disk, used by the orphan pass of the cleanup sweep.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub id: String,
    pub modified: SystemTime,
}

pub struct TableStore {
    directory: PathBuf,
    cache: Cache<String, CachedTable>,
}

impl TableStore {
    /// Opens the store, creating the directory if it does not exist.
    pub fn open(config: &StorageConfig) -> Result<Self, AppError> {
        fs::create_dir_all(&config.directory).map_err(|e| {
            tracing::error!("Failed to create storage directory {:?}: {}", config.directory, e);
            AppError::Io(e)
        })?;
        info!("Table store ready at {:?}", config.directory);

        Ok(Self {
            directory: config.directory.clone(),
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(CACHE_TTL)
                .build(),
        })
    }

    /// Writes `table` under `id`, replacing any existing blob.
    pub fn save(&self, id: &str, table: &Table) -> Result<(), AppError> {
        if !is_valid_dataset_id(id) {
            return Err(AppError::InvalidInput(format!("Invalid dataset id: {:?}", id)));
        }

        let encoded = bincode::serialize(&StoredTableRef {
            version: FORMAT_VERSION,
            table,
        })?;

        let mut tmp = Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&self.directory)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.blob_path(id)).map_err(|e| AppError::Io(e.error))?;
        self.cache.invalidate(id);

        debug!("Saved dataset {} ({} bytes)", id, encoded.len());
        Ok(())
    }

    /// Reads the table stored under `id`. `Ok(None)` when nothing is stored there.
    pub fn load(&self, id: &str) -> Result<Option<Arc<Table>>, AppError> {
        if !is_valid_dataset_id(id) {
            return Ok(None);
        }
        let path = self.blob_path(id);

        let stamp = match fs::metadata(&path) {
            Ok(metadata) => BlobStamp::of(&metadata)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.cache.invalidate(id);
                return Ok(None);
            }
            Err(e) => return Err(AppError::Io(e)),
        };
        if let Some(cached) = self.cache.get(id) {
            if cached.stamp == stamp {
                return Ok(Some(cached.table));
            }
            debug!("Cached table for {} is stale, reloading", id);
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.cache.invalidate(id);
                return Ok(None);
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let stored: StoredTable = bincode::deserialize(&bytes)?;
        if stored.version != FORMAT_VERSION {
            return Err(AppError::Storage(format!(
                "Dataset {} has unsupported format version {}",
                id, stored.version
            )));
        }
        stored
            .table
            .validate()
            .map_err(|e| AppError::Storage(format!("Dataset {} is corrupt: {}", id, e)))?;

        // The stamp was taken before the read; if the blob changed in between,
        // the next load sees a newer stamp and reads again.
        let table = Arc::new(stored.table);
        self.cache.insert(
            id.to_string(),
            CachedTable {
                stamp,
                table: table.clone(),
            },
        );
        Ok(Some(table))
    }

    /// Removes the blob for `id`. Returns whether one existed; absence is not an error.
    pub fn delete(&self, id: &str) -> Result<bool, AppError> {
        if !is_valid_dataset_id(id) {
            return Ok(false);
        }

        let removed = match fs::remove_file(self.blob_path(id)) {
            Ok(()) => {
                debug!("Deleted dataset {}", id);
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(AppError::Io(e)),
        };
        self.cache.invalidate(id);
        Ok(removed)
    }

    pub fn exists(&self, id: &str) -> bool {
        is_valid_dataset_id(id) && self.blob_path(id).is_file()
    }

    /// Every blob currently on disk. Partial writes are skipped.
    pub fn list(&self) -> Result<Vec<StoredBlob>, AppError> {
        let mut blobs = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_dataset_id(id) {
                warn!("Ignoring unexpected file in storage directory: {:?}", path);
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            blobs.push(StoredBlob {
                id: id.to_string(),
                modified,
            });
        }
        Ok(blobs)
    }

    /// Deletes partial writes last modified before `cutoff`, left behind by a
    /// save that never reached the rename. Returns how many were removed.
    pub fn remove_partials_before(&self, cutoff: SystemTime) -> Result<usize, AppError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if !is_partial_write(&path) {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(AppError::Io(e)),
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed abandoned partial write {:?}", path);
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove partial write {:?}: {}", path, e),
            }
        }
        Ok(removed)
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", id, BLOB_EXTENSION))
    }
}

fn is_partial_write(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with(PARTIAL_PREFIX) && n.ends_with(PARTIAL_SUFFIX))
}

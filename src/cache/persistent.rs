//! Disk-backed cache tier
//!
//! Stores one JSON record per entry in a cache directory, named by the
//! SHA-256 of the composite key. Records survive process restarts. The tier
//! is an optimization, never a source of truth: every I/O or decode failure
//! is logged and degraded to a miss or a no-op.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::Builder;

use super::{expiry_after, CachedValue, Payload};
use crate::clock::Clock;

/// Prefix of in-progress writes; leftovers mean a crash before the rename
const TEMP_PREFIX: &str = ".marketgate-";

/// Temp files older than this are assumed abandoned by `cleanup`
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Record layout on disk
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord<V> {
    value: V,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Outcome of reading one record file
enum Loaded {
    Fresh(PersistedRecord<Payload>),
    /// Corrupt or expired, and deleted
    Dropped,
    /// Missing or unreadable
    Absent,
}

/// Persistent tier statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistentStats {
    /// Number of record files
    pub count: usize,
    /// Combined size of record files in bytes
    pub total_bytes: u64,
    /// Directory holding the records
    pub location: PathBuf,
}

/// Unbounded, TTL-aware, disk-backed key/value store
///
/// Uses an XDG-compliant cache directory by default
/// (`~/.cache/marketgate/` on Linux). The directory is created on first write.
#[derive(Debug, Clone)]
pub struct PersistentTier {
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl PersistentTier {
    /// Creates a tier in the platform cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn in_project_dirs(clock: Arc<dyn Clock>) -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "marketgate")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf(), clock))
    }

    /// Creates a tier storing records under `cache_dir`
    pub fn with_dir(cache_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self { cache_dir, clock }
    }

    pub fn location(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the record path for a composite key
    fn record_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }

    /// Lists record files; a missing directory has none
    fn record_files(&self) -> Vec<PathBuf> {
        self.list_files(|path| path.extension().is_some_and(|ext| ext == "json"))
    }

    /// Lists leftovers of interrupted writes
    fn temp_files(&self) -> Vec<PathBuf> {
        self.list_files(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(TEMP_PREFIX))
        })
    }

    fn list_files(&self, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("persistent tier: cannot list {}: {}", self.cache_dir.display(), e);
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| keep(path))
            .collect()
    }

    fn remove_record(path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                log::warn!("persistent tier: cannot remove {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Reads and validates the record at `path`
    ///
    /// Corrupt and expired records are removed as a side effect.
    fn read_record(&self, path: &Path) -> Loaded {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Loaded::Absent,
            Err(e) => {
                log::warn!("persistent tier: cannot read {}: {}", path.display(), e);
                return Loaded::Absent;
            }
        };

        let record: PersistedRecord<Payload> = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("persistent tier: dropping corrupt record {}: {}", path.display(), e);
                Self::remove_record(path);
                return Loaded::Dropped;
            }
        };

        if self.clock.now() >= record.expires_at {
            return if self.remove_if_expired(path) {
                Loaded::Dropped
            } else {
                Loaded::Absent
            };
        }
        Loaded::Fresh(record)
    }

    /// Removes the record at `path` only if it is still expired
    ///
    /// A concurrent `set` may have renamed a fresh record onto the path since
    /// it was last read; that record is kept. The window between this check
    /// and the removal remains, and losing it costs only a later miss.
    fn remove_if_expired(&self, path: &Path) -> bool {
        let still_expired = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<PersistedRecord<Payload>>(&content)
                .map_or(true, |record| self.clock.now() >= record.expires_at),
            Err(_) => false,
        };
        still_expired && Self::remove_record(path)
    }

    /// Reads the entry for `key`
    ///
    /// Returns `None` if the record is missing, unreadable, corrupt or expired.
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        match self.read_record(&self.record_path(key)) {
            Loaded::Fresh(record) => Some(CachedValue {
                value: record.value,
                created_at: record.created_at,
                expires_at: record.expires_at,
            }),
            Loaded::Dropped | Loaded::Absent => None,
        }
    }

    fn write_record(&self, key: &str, value: &Payload, ttl: Duration) -> io::Result<()> {
        self.ensure_dir()?;

        let now = self.clock.now();
        let record = PersistedRecord {
            value,
            expires_at: expiry_after(now, ttl),
            created_at: now,
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Write beside the target then rename, so readers never see a partial record
        let mut tmp = Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".part")
            .tempfile_in(&self.cache_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.record_path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Writes `value` under `key` for `ttl`
    ///
    /// Failures are logged and reported as `false`; they never propagate.
    pub fn set(&self, key: &str, value: &Payload, ttl: Duration) -> bool {
        match self.write_record(key, value, ttl) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("persistent tier: write for '{}' failed: {}", key, e);
                false
            }
        }
    }

    /// Returns whether `key` holds an unexpired, readable record
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes the record for `key`, returning whether one existed
    pub fn delete(&self, key: &str) -> bool {
        Self::remove_record(&self.record_path(key))
    }

    /// Removes every record, returning how many were deleted
    ///
    /// Leftovers of interrupted writes go too, without being counted.
    pub fn clear(&self) -> usize {
        for path in self.temp_files() {
            Self::remove_record(&path);
        }
        self.record_files()
            .iter()
            .filter(|path| Self::remove_record(path))
            .count()
    }

    /// Removes write leftovers that have not been touched for a while
    fn sweep_stale_temp_files(&self) {
        for path in self.temp_files() {
            let stale = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= STALE_TEMP_AGE);
            if stale && Self::remove_record(&path) {
                log::debug!("persistent tier: removed abandoned {}", path.display());
            }
        }
    }

    /// Deletes expired and corrupt records, returning how many were removed
    ///
    /// Abandoned temp files from interrupted writes are removed as well but
    /// not counted.
    pub fn cleanup(&self) -> usize {
        self.sweep_stale_temp_files();
        let files = self.record_files();
        let removed = files
            .iter()
            .filter(|path| matches!(self.read_record(path), Loaded::Dropped))
            .count();
        if removed > 0 {
            log::info!("persistent tier: swept {} of {} records", removed, files.len());
        }
        removed
    }

    pub fn stats(&self) -> PersistentStats {
        let files = self.record_files();
        let total_bytes = files
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum();
        PersistentStats {
            count: files.len(),
            total_bytes,
            location: self.cache_dir.clone(),
        }
    }
}

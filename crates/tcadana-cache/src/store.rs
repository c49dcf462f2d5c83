//! The on-disk cache store.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::envelope;
use crate::error::{CacheError, CorruptionError, Result};
use crate::index::LruIndex;
use crate::key::{CacheKey, Digest, ENTRY_EXTENSION};

/// Subdirectory holding entries of the current layout version.
pub const LAYOUT_DIR: &str = "v1";

const TMP_EXTENSION: &str = "partial";

/// Per-key lock files, next to the entry they guard.
const LOCK_EXTENSION: &str = "lock";

const MAX_BACKOFF: Duration = Duration::from_millis(10);

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root directory
    pub root: PathBuf,
    /// Upper bound on the summed size of stored entries (bytes)
    pub max_bytes: Option<u64>,
    /// Upper bound on the number of stored entries
    pub max_entries: Option<usize>,
    /// How long a writer waits for a key held by another writer
    pub lock_timeout_ms: u64,
    /// zstd level for entry payloads
    pub compression_level: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".tcadana-cache"),
            max_bytes: Some(4 * 1024 * 1024 * 1024), // 4GB
            max_entries: None,
            lock_timeout_ms: 30_000,
            compression_level: 3,
        }
    }
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Summed size of stored entries (bytes)
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    /// Entries found unreadable and removed
    pub corrupt: u64,
    /// Writes that gave up waiting for a key lock
    pub contention: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    corrupt: AtomicU64,
    contention: AtomicU64,
}

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// A valid entry was already committed under the key; nothing was written.
    AlreadyPresent,
}

/// Content-addressed store of compressed entries.
///
/// Writes to one key are serialized by a per-key lock; writes to different
/// keys proceed in parallel. The key lock is an in-process mutex plus an
/// advisory lock on `<entry>.lock`, so stores opened on the same directory
/// by other threads or processes exclude each other too. Lock files are
/// empty and stay in place until [`clear`](CacheStore::clear).
///
/// Entries become visible only through an atomic rename, so readers never
/// observe a partial entry. Unreadable entries are removed and reported as
/// absent.
pub struct CacheStore {
    config: CacheConfig,
    dir: PathBuf,
    locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    index: Mutex<LruIndex>,
    stats: CacheStatsInner,
    tmp_counter: AtomicU64,
}

impl CacheStore {
    /// Open (creating if needed) the cache at `config.root`, indexing any
    /// entries left by earlier processes.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let dir = config.root.join(LAYOUT_DIR);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let store = Self {
            config,
            dir,
            locks: DashMap::new(),
            index: Mutex::new(LruIndex::default()),
            stats: CacheStatsInner::default(),
            tmp_counter: AtomicU64::new(0),
        };
        store.rescan()?;
        store.evict_to_bounds(None);
        Ok(store)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.relative_path())
    }

    fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_path(key).with_extension(LOCK_EXTENSION)
    }

    fn lock_index(&self) -> MutexGuard<'_, LruIndex> {
        self.index.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Rebuild the index from the directory tree, oldest first. Stray
    /// partial writes from crashed processes are removed.
    fn rescan(&self) -> Result<()> {
        let mut found = Vec::new();
        let shards = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        for shard in shards {
            let shard = shard.map_err(|e| CacheError::io(&self.dir, e))?.path();
            if !shard.is_dir() {
                continue;
            }
            let files = fs::read_dir(&shard).map_err(|e| CacheError::io(&shard, e))?;
            for file in files {
                let file = file.map_err(|e| CacheError::io(&shard, e))?;
                let path = file.path();
                let name = file.file_name().to_string_lossy().into_owned();
                if name.ends_with(LOCK_EXTENSION) {
                    continue;
                }
                if name.ends_with(TMP_EXTENSION) {
                    log::debug!("Removing stale partial write {}", path.display());
                    let _ = fs::remove_file(&path);
                    continue;
                }
                let Some(key) = CacheKey::from_file_name(&name) else {
                    continue;
                };
                let meta = file.metadata().map_err(|e| CacheError::io(&path, e))?;
                let modified = meta.modified().ok();
                found.push((modified, key, meta.len()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = self.lock_index();
        for (_, key, size) in found {
            index.insert(key, size);
        }
        log::debug!(
            "Opened cache at {} with {} entries ({} bytes)",
            self.config.root.display(),
            index.len(),
            index.total_bytes()
        );
        Ok(())
    }

    /// Run `f` while holding the writer lock of `key`, waiting up to the
    /// configured timeout.
    fn with_key_lock<T>(&self, key: &CacheKey, f: impl FnOnce() -> T) -> Result<T> {
        let timeout = self.config.lock_timeout();
        match self.try_key_lock(key, timeout, f)? {
            Some(value) => Ok(value),
            None => {
                self.stats.contention.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Contention {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Run `f` holding the in-process mutex of `key` and then its lock file.
    /// `Ok(None)` when either is still held elsewhere after `timeout`.
    fn try_key_lock<T>(&self, key: &CacheKey, timeout: Duration, f: impl FnOnce() -> T) -> Result<Option<T>> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let start = Instant::now();
        let result = match acquire(&lock, timeout) {
            Some(_guard) => self.with_lock_file(key, timeout.saturating_sub(start.elapsed()), f),
            None => Ok(None),
        };

        drop(lock);
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    fn with_lock_file<T>(&self, key: &CacheKey, timeout: Duration, f: impl FnOnce() -> T) -> Result<Option<T>> {
        let path = self.lock_path(key);
        let shard = path.parent().unwrap_or(self.dir.as_path());
        fs::create_dir_all(shard).map_err(|e| CacheError::io(shard, e))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;
        let mut lock = RwLock::new(file);

        let start = Instant::now();
        let mut backoff = Duration::from_micros(50);
        loop {
            match lock.try_write() {
                Ok(_guard) => return Ok(Some(f())),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Ok(None);
                    }
                    std::thread::sleep(backoff.min(timeout - elapsed));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }
    }

    /// Read the entry under `key`. Missing and unreadable entries both
    /// yield `None`; unreadable ones are removed.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let found = self.read_entry(key);
        match found {
            Some(_) => self.stats.hits.fetch_add(1, Ordering::Relaxed),
            None => self.stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    fn read_entry(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        let pinned = self.lock_index().pin(key);

        let result = match fs::read(&path) {
            Ok(bytes) => envelope::decode(key.kind, &bytes).map_err(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(None),
            Err(e) => {
                log::warn!("Failed to read cache entry {}: {}", path.display(), e);
                Err(None)
            }
        };

        let mut index = self.lock_index();
        if pinned {
            index.unpin(key);
        }
        match result {
            Ok(payload) => {
                if !index.contains(key) {
                    // committed by another process since the last rescan
                    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    index.insert(key.clone(), size);
                }
                index.touch(key);
                Some(payload)
            }
            Err(reason) => {
                if let Some(reason) = reason {
                    drop(index);
                    self.discard_corrupt(key, &path, &reason);
                } else if pinned {
                    index.remove(key);
                }
                None
            }
        }
    }

    fn discard_corrupt(&self, key: &CacheKey, path: &Path, reason: &CorruptionError) {
        log::warn!("Discarding corrupt cache entry {}: {}", key, reason);
        self.stats.corrupt.fetch_add(1, Ordering::Relaxed);
        self.lock_index().remove(key);
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    /// Whether a committed entry exists under `key`. Does not validate it.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Store `payload` under `key`.
    ///
    /// Blocks while another writer holds the key, up to the configured lock
    /// timeout, then fails with [`CacheError::Contention`].
    pub fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<PutOutcome> {
        self.with_key_lock(key, || self.put_locked(key, payload))?
    }

    /// Store `payload` under `key`, replacing any existing entry.
    pub fn replace(&self, key: &CacheKey, payload: &[u8]) -> Result<()> {
        self.with_key_lock(key, || self.write_entry(key, payload))?
    }

    fn put_locked(&self, key: &CacheKey, payload: &[u8]) -> Result<PutOutcome> {
        if self.contains(key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        self.write_entry(key, payload)?;
        Ok(PutOutcome::Stored)
    }

    /// Must be called with the key lock held.
    fn write_entry(&self, key: &CacheKey, payload: &[u8]) -> Result<()> {
        let framed = envelope::encode(key.kind, payload, self.config.compression_level)?;
        let path = self.entry_path(key);
        let shard = path.parent().unwrap_or(self.dir.as_path());
        fs::create_dir_all(shard).map_err(|e| CacheError::io(shard, e))?;

        let tmp = shard.join(format!(
            "{}.{}.{}.{}",
            key.file_name(),
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed),
            TMP_EXTENSION
        ));
        let written = write_file(&tmp, &framed).and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::io(&path, e));
        }

        self.stats.stores.fetch_add(1, Ordering::Relaxed);
        self.lock_index().insert(key.clone(), framed.len() as u64);
        log::trace!("Stored {} ({} bytes)", key, framed.len());
        self.evict_to_bounds(Some(key));
        Ok(())
    }

    /// Return the entry under `key`, computing and storing it with `f` when
    /// absent. The key lock is held while `f` runs, so concurrent callers
    /// for one key (in this process or another) compute it once. The flag is
    /// true when `f` ran. A failed write after `f` succeeded is logged and
    /// the computed payload returned.
    pub fn get_or_insert_with<E, F>(&self, key: &CacheKey, f: F) -> std::result::Result<(Vec<u8>, bool), E>
    where
        F: FnOnce() -> std::result::Result<Vec<u8>, E>,
        E: From<CacheError>,
    {
        self.get_or_insert_inner(key, |bytes| Some(bytes), || {
            let payload = f()?;
            Ok((payload.clone(), payload))
        })
    }

    /// Typed [`get_or_insert_with`](CacheStore::get_or_insert_with): values
    /// are stored bincode-encoded, and a stored payload that does not decode
    /// as `T` is discarded and recomputed.
    pub fn get_or_insert_typed<T, E, F>(&self, key: &CacheKey, f: F) -> std::result::Result<(T, bool), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<CacheError>,
    {
        self.get_or_insert_inner(key, |bytes| self.decode_typed(key, &bytes), || {
            let value = f()?;
            let bytes = bincode::serialize(&value).map_err(|e| CacheError::Serialization(e.to_string()))?;
            Ok((value, bytes))
        })
    }

    fn get_or_insert_inner<T, E>(
        &self,
        key: &CacheKey,
        decode: impl Fn(Vec<u8>) -> Option<T>,
        produce: impl FnOnce() -> std::result::Result<(T, Vec<u8>), E>,
    ) -> std::result::Result<(T, bool), E>
    where
        E: From<CacheError>,
    {
        if let Some(found) = self.read_entry(key).and_then(&decode) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((found, false));
        }
        self.with_key_lock(key, || {
            if let Some(found) = self.read_entry(key).and_then(&decode) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((found, false));
            }
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            let (value, bytes) = produce()?;
            if let Err(e) = self.write_entry(key, &bytes) {
                log::warn!("Failed to store {}: {}", key, e);
            }
            Ok((value, true))
        })?
    }

    /// Serialize `value` with bincode and store it.
    pub fn put_typed<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<PutOutcome> {
        let bytes = bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.put(key, &bytes)
    }

    pub fn replace_typed<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.replace(key, &bytes)
    }

    /// Read and deserialize an entry. A payload that does not decode as `T`
    /// is treated as corrupt.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = self.get(key)?;
        self.decode_typed(key, &bytes)
    }

    fn decode_typed<T: DeserializeOwned>(&self, key: &CacheKey, bytes: &[u8]) -> Option<T> {
        match bincode::deserialize(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                let path = self.entry_path(key);
                self.discard_corrupt(key, &path, &CorruptionError::Decode(e.to_string()));
                None
            }
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.with_key_lock(key, || self.remove_locked(key))?
    }

    fn remove_locked(&self, key: &CacheKey) -> Result<bool> {
        self.lock_index().remove(key);
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Remove every entry addressed by `digest`, whatever its kind or tag.
    /// Returns the number removed.
    pub fn invalidate(&self, digest: &Digest) -> Result<usize> {
        let hex = digest.to_hex();
        let shard = self.dir.join(&hex[..2]);
        let mut keys: Vec<CacheKey> = match fs::read_dir(&shard) {
            Ok(files) => files
                .filter_map(|f| f.ok())
                .filter_map(|f| CacheKey::from_file_name(&f.file_name().to_string_lossy()))
                .filter(|k| k.digest == *digest)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CacheError::io(shard, e)),
        };
        keys.extend(self.lock_index().keys().filter(|k| k.digest == *digest).cloned());
        keys.sort();
        keys.dedup();

        let mut removed = 0;
        for key in &keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        log::debug!("Invalidated {} entries for {}", removed, &hex[..12]);
        Ok(removed)
    }

    /// Keys of all indexed entries, least recently used first.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock_index().keys().cloned().collect()
    }

    /// Drop entries, oldest first, until the configured bounds hold.
    /// `keep` and any entry being read or written are spared.
    fn evict_to_bounds(&self, keep: Option<&CacheKey>) {
        if self.config.max_bytes.is_none() && self.config.max_entries.is_none() {
            return;
        }
        let candidates = self.lock_index().victims(
            self.config.max_bytes,
            self.config.max_entries,
            |k| Some(k) == keep || self.locks.contains_key(k),
        );
        for key in candidates {
            // Skip keys a writer took since the candidates were chosen.
            match self.try_key_lock(&key, Duration::ZERO, || self.evict_idle(&key)) {
                Ok(Some(true)) => {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Evicted {}", key);
                }
                Ok(_) => log::trace!("Eviction skipped busy entry {}", key),
                Err(e) => log::warn!("Failed to evict {}: {}", key, e),
            }
        }
    }

    /// Delete `key` unless a reader has pinned it. Must be called with the
    /// key lock held. The file is removed under the index lock, so a reader
    /// either pinned the entry first or finds it gone.
    fn evict_idle(&self, key: &CacheKey) -> bool {
        let mut index = self.lock_index();
        if !index.remove_idle(key) {
            return false;
        }
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                log::warn!("Failed to evict {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let index = self.lock_index();
            (index.len(), index.total_bytes())
        };
        CacheStats {
            entries,
            bytes,
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            stores: self.stats.stores.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            corrupt: self.stats.corrupt.load(Ordering::Relaxed),
            contention: self.stats.contention.load(Ordering::Relaxed),
        }
    }

    /// Remove all entries.
    pub fn clear(&self) -> Result<()> {
        let mut index = self.lock_index();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        }
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        *index = LruIndex::default();
        log::info!("Cleared cache at {}", self.config.root.display());
        Ok(())
    }
}

fn acquire(lock: &Mutex<()>, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
    let start = Instant::now();
    let mut backoff = Duration::from_micros(50);
    loop {
        match lock.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(p)) => return Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return None;
                }
                std::thread::sleep(backoff.min(timeout - elapsed));
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EntryKind;

    fn key(name: &str, kind: EntryKind) -> CacheKey {
        CacheKey::new(Digest::of(name.as_bytes()), kind, "t").unwrap()
    }

    #[test]
    fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        let k = key("run", EntryKind::Curves);

        assert_eq!(store.get(&k), None);
        assert_eq!(store.put(&k, b"payload").unwrap(), PutOutcome::Stored);
        assert_eq!(store.put(&k, b"other").unwrap(), PutOutcome::AlreadyPresent);
        assert_eq!(store.get(&k).as_deref(), Some(&b"payload"[..]));

        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!((stats.hits, stats.misses, stats.stores), (1, 1, 1));
        assert!(dir.path().join(LAYOUT_DIR).join(k.relative_path()).is_file());
    }

    #[test]
    fn test_reopen_sees_entries() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("run", EntryKind::Fields);
        {
            let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
            store.put(&k, b"abc").unwrap();
        }
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        assert_eq!(store.stats().entries, 1);
        assert_eq!(store.keys(), vec![k.clone()]);
        assert_eq!(store.get(&k).as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_entry_bound_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path()).with_max_entries(Some(2))).unwrap();
        let keys: Vec<_> = ["a", "b", "c"].iter().map(|n| key(n, EntryKind::Metric)).collect();

        store.put(&keys[0], b"0").unwrap();
        store.put(&keys[1], b"1").unwrap();
        assert!(store.get(&keys[0]).is_some());
        store.put(&keys[2], b"2").unwrap();

        assert!(store.get(&keys[1]).is_none());
        assert!(store.get(&keys[0]).is_some());
        assert!(store.get(&keys[2]).is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        let digest = Digest::of(b"run-1");
        let a = CacheKey::new(digest, EntryKind::Curves, "p1").unwrap();
        let b = CacheKey::new(digest, EntryKind::Metric, "leakage_current-1-x").unwrap();
        let other = key("run-2", EntryKind::Curves);
        for k in [&a, &b, &other] {
            store.put(k, b"x").unwrap();
        }

        assert_eq!(store.invalidate(&digest).unwrap(), 2);
        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_none());
        assert!(store.get(&other).is_some());
        assert_eq!(store.invalidate(&digest).unwrap(), 0);
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        let k = key("run", EntryKind::Metric);

        let (v, computed) = store
            .get_or_insert_with::<CacheError, _>(&k, || Ok(b"42".to_vec()))
            .unwrap();
        assert_eq!((v.as_slice(), computed), (&b"42"[..], true));
        let (v, computed) = store
            .get_or_insert_with::<CacheError, _>(&k, || panic!("must not recompute"))
            .unwrap();
        assert_eq!((v.as_slice(), computed), (&b"42"[..], false));
    }

    #[test]
    fn test_get_or_insert_typed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        let k = key("run", EntryKind::Fields);

        let (v, computed) = store
            .get_or_insert_typed::<_, CacheError, _>(&k, || Ok(vec![1.5f64, 2.5]))
            .unwrap();
        assert_eq!((v, computed), (vec![1.5, 2.5], true));
        let (v, computed) = store
            .get_or_insert_typed::<Vec<f64>, CacheError, _>(&k, || panic!("must not recompute"))
            .unwrap();
        assert_eq!((v, computed), (vec![1.5, 2.5], false));

        // An undecodable payload is replaced.
        store.replace(&k, &[7]).unwrap();
        let (v, computed) = store
            .get_or_insert_typed::<Vec<f64>, CacheError, _>(&k, || Ok(vec![3.0]))
            .unwrap();
        assert_eq!((v, computed), (vec![3.0], true));
        assert_eq!(store.stats().corrupt, 1);
    }

    #[test]
    fn test_eviction_spares_pinned_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path()).with_max_entries(Some(1))).unwrap();
        let a = key("a", EntryKind::Curves);
        let b = key("b", EntryKind::Curves);

        store.put(&a, b"a").unwrap();
        assert!(store.lock_index().pin(&a));
        store.put(&b, b"b").unwrap();
        assert!(store.contains(&a));
        assert!(!store.evict_idle(&a));
        assert!(store.contains(&a));

        store.lock_index().unpin(&a);
        assert!(store.evict_idle(&a));
        assert!(!store.contains(&a));
        assert!(store.contains(&b));
    }

    #[test]
    fn test_eviction_skips_locked_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        let a = key("a", EntryKind::Metric);
        store.put(&a, b"a").unwrap();

        let evicted = store
            .try_key_lock(&a, Duration::ZERO, || {
                store
                    .try_key_lock(&a, Duration::ZERO, || store.evict_idle(&a))
                    .unwrap()
            })
            .unwrap()
            .unwrap();
        assert_eq!(evicted, None);
        assert!(store.contains(&a));
    }

    #[test]
    fn test_lock_file_excludes_second_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path()).with_lock_timeout(Duration::from_millis(20));
        let first = CacheStore::open(config.clone()).unwrap();
        let second = CacheStore::open(config).unwrap();
        let k = key("shared", EntryKind::Metric);

        let err = first
            .try_key_lock(&k, Duration::ZERO, || second.put(&k, b"x"))
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CacheError::Contention { .. }));
        assert_eq!(second.put(&k, b"x").unwrap(), PutOutcome::Stored);
        assert_eq!(second.stats().entries, 1);
    }

    #[test]
    fn test_typed_decode_failure_discards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        let k = key("run", EntryKind::Manifest);
        store.put(&k, &[1]).unwrap();

        assert_eq!(store.get_typed::<(u64, String)>(&k), None);
        assert!(!store.contains(&k));
        assert_eq!(store.stats().corrupt, 1);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(CacheConfig::new(dir.path())).unwrap();
        store.put(&key("a", EntryKind::Fields), b"1").unwrap();
        store.clear().unwrap();
        assert_eq!(store.stats().entries, 0);
        assert!(store.get(&key("a", EntryKind::Fields)).is_none());
    }
}

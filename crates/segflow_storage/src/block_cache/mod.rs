//! Write-once, key-addressed blob store backed by one file per key.
//!
//! The block cache maps an opaque string key to an immutable byte value.
//! Values are written at most once; a key can only be written again after
//! it has been evicted. Any number of readers may read arbitrary byte
//! ranges concurrently.
//!
//! ## Locking
//!
//! - One global mutex guards bookkeeping only: the LRU of open read
//!   handles, the LRU of live keys used for capacity eviction, and the set
//!   of files this instance created. It is never held across file I/O.
//! - A fixed array of per-key mutexes, selected by hashing the key,
//!   serializes operations on the same key without blocking unrelated keys.
//!
//! ## Failure reporting
//!
//! Public operations never return errors: failures are logged at `debug`
//! level and reported as `false` / `None`, so callers can treat them as a
//! cache miss.

mod location;
mod stats;

pub use location::CacheLocation;
pub use stats::CacheStats;

use crate::error::{StorageError, StorageResult};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of per-key locks.
pub const NUM_KEY_LOCKS: usize = 256;

/// Returns the default size of the open-handle cache: four handles per CPU.
#[must_use]
pub fn default_max_file_handles() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    4 * cpus
}

/// Tunables of a [`BlockCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCacheConfig {
    /// Maximum number of read handles kept open.
    pub max_file_handles: usize,
    /// Maximum number of live keys; 0 means unbounded.
    pub max_capacity: usize,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            max_file_handles: default_max_file_handles(),
            max_capacity: 0,
        }
    }
}

impl BlockCacheConfig {
    /// Sets the open-handle cache size.
    #[must_use]
    pub const fn max_file_handles(mut self, handles: usize) -> Self {
        self.max_file_handles = handles;
        self
    }

    /// Sets the live-key capacity (0 = unbounded).
    #[must_use]
    pub const fn max_capacity(mut self, keys: usize) -> Self {
        self.max_capacity = keys;
        self
    }
}

/// Identity of a backing file.
///
/// Another instance sharing the prefix may evict a key and write it again;
/// the path then names a different file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    volume: u64,
    index: u64,
}

impl FileId {
    #[cfg(unix)]
    fn of(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            volume: meta.dev(),
            index: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &fs::Metadata) -> Self {
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);
        Self {
            volume: meta.len(),
            index: modified,
        }
    }
}

/// An open read handle and the file it was opened on.
#[derive(Clone)]
struct OpenHandle {
    file: Arc<File>,
    id: FileId,
}

struct Bookkeeping {
    handles: LruCache<String, OpenHandle>,
    keys: LruCache<String, ()>,
    created: HashMap<PathBuf, FileId>,
    max_capacity: usize,
}

impl Bookkeeping {
    /// Pops least-recently-used keys until the capacity holds.
    fn take_over_capacity(&mut self) -> Vec<String> {
        let mut victims = Vec::new();
        if self.max_capacity == 0 {
            return victims;
        }
        while self.keys.len() > self.max_capacity {
            match self.keys.pop_lru() {
                Some((key, ())) => victims.push(key),
                None => break,
            }
        }
        victims
    }

    /// Drops everything known about `key`, returning its cached handle.
    fn forget(&mut self, key: &str, path: &Path) -> Option<OpenHandle> {
        self.keys.pop(key);
        self.created.remove(path);
        self.handles.pop(key)
    }
}

/// Where a key lives on disk and which key lock guards it.
struct KeySlot {
    path: PathBuf,
    lock: usize,
}

impl KeySlot {
    fn new(prefix: &Path, key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self {
            path: prefix.join(name),
            lock: (u64::from_le_bytes(head) % NUM_KEY_LOCKS as u64) as usize,
        }
    }
}

enum ReadTarget<'a> {
    Owned(&'a mut Vec<u8>),
    Borrowed(&'a mut [u8]),
}

/// A disk-backed write-once block cache.
///
/// # Example
///
/// ```rust
/// use segflow_storage::BlockCache;
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = BlockCache::init(dir.path().join("cache"), 8).unwrap();
///
/// assert!(cache.write("block-7", b"hello world"));
/// assert!(!cache.write("block-7", b"overwrite"));
///
/// let mut out = Vec::new();
/// assert_eq!(cache.read_range("block-7", &mut out, 6, 11), Some(5));
/// assert_eq!(out, b"world");
/// ```
pub struct BlockCache {
    prefix: PathBuf,
    owns_prefix: bool,
    state: Mutex<Bookkeeping>,
    key_locks: Box<[Mutex<()>]>,
    stats: CacheStats,
}

impl BlockCache {
    /// Creates a cache storing files under `storage_prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix directory cannot be created.
    pub fn init(storage_prefix: impl Into<PathBuf>, max_file_handles: usize) -> StorageResult<Self> {
        Self::with_config(
            storage_prefix,
            BlockCacheConfig::default().max_file_handles(max_file_handles),
        )
    }

    /// Creates a cache with explicit tunables.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix directory cannot be created.
    pub fn with_config(
        storage_prefix: impl Into<PathBuf>,
        config: BlockCacheConfig,
    ) -> StorageResult<Self> {
        Self::build(storage_prefix.into(), false, config)
    }

    /// Creates a cache at a probed location.
    ///
    /// A [`CacheLocation::Private`] directory is removed when the cache is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn from_location(location: CacheLocation, config: BlockCacheConfig) -> StorageResult<Self> {
        let owns_prefix = !location.is_shared();
        Self::build(location.path().to_path_buf(), owns_prefix, config)
    }

    fn build(prefix: PathBuf, owns_prefix: bool, config: BlockCacheConfig) -> StorageResult<Self> {
        fs::create_dir_all(&prefix)?;
        let handles = NonZeroUsize::new(config.max_file_handles).unwrap_or(NonZeroUsize::MIN);
        debug!(
            prefix = %prefix.display(),
            max_file_handles = handles.get(),
            max_capacity = config.max_capacity,
            "block cache initialized"
        );
        Ok(Self {
            prefix,
            owns_prefix,
            state: Mutex::new(Bookkeeping {
                handles: LruCache::new(handles),
                keys: LruCache::unbounded(),
                created: HashMap::new(),
                max_capacity: config.max_capacity,
            }),
            key_locks: (0..NUM_KEY_LOCKS).map(|_| Mutex::new(())).collect(),
            stats: CacheStats::default(),
        })
    }

    /// Returns the storage prefix.
    #[must_use]
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Returns the activity counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Writes `value` under `key`.
    ///
    /// Returns `false`, leaving the cache unchanged, if the key already
    /// exists or any I/O step fails. Never overwrites.
    pub fn write(&self, key: &str, value: &[u8]) -> bool {
        match self.try_write(key, value) {
            Ok(()) => true,
            Err(err) => {
                debug!(key, error = %err, "block cache write rejected");
                false
            }
        }
    }

    /// Reads the whole value of `key` into `out`, replacing its contents.
    ///
    /// Returns the number of bytes read, or `None` on failure.
    pub fn read(&self, key: &str, out: &mut Vec<u8>) -> Option<usize> {
        self.read_range(key, out, 0, u64::MAX)
    }

    /// Reads the half-open byte range `[start, end)` of `key` into `out`.
    ///
    /// `end` is clamped to the value length. Returns `Some(0)` if the range
    /// is empty or starts past the end of the value, `None` on failure.
    pub fn read_range(&self, key: &str, out: &mut Vec<u8>, start: u64, end: u64) -> Option<usize> {
        self.read_logged(key, start, end, ReadTarget::Owned(out))
    }

    /// Reads up to `buf.len()` bytes of `key` starting at `start` into `buf`.
    ///
    /// Returns the number of bytes read, or `None` on failure.
    pub fn read_into(&self, key: &str, buf: &mut [u8], start: u64) -> Option<usize> {
        let end = start.saturating_add(buf.len() as u64);
        self.read_logged(key, start, end, ReadTarget::Borrowed(buf))
    }

    /// Returns the length of the value stored under `key`.
    pub fn value_length(&self, key: &str) -> Option<u64> {
        let slot = KeySlot::new(&self.prefix, key);
        let _guard = self.key_locks[slot.lock].lock();
        match fs::metadata(&slot.path) {
            Ok(meta) => Some(meta.len()),
            Err(err) => {
                debug!(key, error = %err, "block cache length lookup failed");
                None
            }
        }
    }

    /// Returns whether `key` currently has a backing file.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let slot = KeySlot::new(&self.prefix, key);
        let _guard = self.key_locks[slot.lock].lock();
        slot.path.exists()
    }

    /// Removes `key`: drops its bookkeeping and deletes the backing file.
    ///
    /// Returns `false` if the file could not be deleted (including when it
    /// does not exist).
    pub fn evict_key(&self, key: &str) -> bool {
        let slot = KeySlot::new(&self.prefix, key);
        let _guard = self.key_locks[slot.lock].lock();
        let handle = self.state.lock().forget(key, &slot.path);
        drop(handle);
        match fs::remove_file(&slot.path) {
            Ok(()) => {
                self.stats.record_eviction();
                debug!(key, "block cache key evicted");
                true
            }
            Err(err) => {
                debug!(key, error = %err, "block cache eviction failed");
                false
            }
        }
    }

    /// Returns the number of live keys written by this instance.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// Returns the live-key capacity (0 = unbounded).
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.state.lock().max_capacity
    }

    /// Sets the live-key capacity, evicting immediately if it shrinks below
    /// the current key count. 0 means unbounded.
    pub fn set_max_capacity(&self, keys: usize) {
        let victims = {
            let mut state = self.state.lock();
            state.max_capacity = keys;
            state.take_over_capacity()
        };
        for victim in victims {
            self.evict_key(&victim);
        }
    }

    /// Returns the open-handle cache size.
    #[must_use]
    pub fn max_file_handles(&self) -> usize {
        self.state.lock().handles.cap().get()
    }

    /// Resizes the open-handle cache (minimum 1).
    pub fn set_max_file_handles(&self, handles: usize) {
        let handles = NonZeroUsize::new(handles).unwrap_or(NonZeroUsize::MIN);
        let closed: Vec<OpenHandle> = {
            let mut state = self.state.lock();
            let mut closed = Vec::new();
            while state.handles.len() > handles.get() {
                match state.handles.pop_lru() {
                    Some((_, handle)) => closed.push(handle),
                    None => break,
                }
            }
            state.handles.resize(handles);
            closed
        };
        drop(closed);
    }

    fn try_write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let slot = KeySlot::new(&self.prefix, key);
        let victims = {
            let _guard = self.key_locks[slot.lock].lock();
            // The path decides: another instance sharing the prefix may have
            // evicted a key this instance still has bookkeeping for.
            let taken = slot.path.exists();
            if taken {
                return Err(StorageError::KeyExists(key.to_string()));
            }

            let staging = self
                .prefix
                .join(format!(".staging-{}", Uuid::new_v4().simple()));
            let published = publish(&staging, &slot.path, value);
            if staging.exists() {
                if let Err(err) = fs::remove_file(&staging) {
                    warn!(path = %staging.display(), error = %err, "failed to remove staging file");
                }
            }
            let id = match published {
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(StorageError::KeyExists(key.to_string()));
                }
                Err(err) => return Err(err.into()),
                Ok(id) => id,
            };

            let mut state = self.state.lock();
            let stale = state.handles.pop(key);
            state.created.insert(slot.path.clone(), id);
            state.keys.push(key.to_string(), ());
            let victims = state.take_over_capacity();
            drop(state);
            drop(stale);
            victims
        };

        self.stats.record_write(value.len());
        debug!(key, bytes = value.len(), "block cache key written");
        for victim in victims {
            self.evict_key(&victim);
        }
        Ok(())
    }

    fn read_logged(&self, key: &str, start: u64, end: u64, target: ReadTarget<'_>) -> Option<usize> {
        match self.try_read(key, start, end, target) {
            Ok(read) => Some(read),
            Err(err) => {
                debug!(key, start, end, error = %err, "block cache read failed");
                None
            }
        }
    }

    fn try_read(
        &self,
        key: &str,
        start: u64,
        end: u64,
        mut target: ReadTarget<'_>,
    ) -> StorageResult<usize> {
        let slot = KeySlot::new(&self.prefix, key);
        let _guard = self.key_locks[slot.lock].lock();

        let current = match fs::metadata(&slot.path) {
            Ok(meta) => FileId::of(&meta),
            Err(err) => {
                let stale = self.state.lock().forget(key, &slot.path);
                if stale.is_some() {
                    debug!(key, "purging block cache handle of a removed file");
                    self.stats.record_stale_handle();
                }
                return Err(err.into());
            }
        };

        let cached = {
            let mut state = self.state.lock();
            if state.created.get(&slot.path).is_some_and(|id| *id != current) {
                // Evicted and rewritten elsewhere: no longer ours to evict.
                state.created.remove(&slot.path);
                state.keys.pop(key);
            }
            state.handles.get(key).cloned()
        };
        let handle = match cached {
            Some(handle) if handle.id == current => {
                self.stats.record_handle_hit();
                handle
            }
            Some(stale) => {
                debug!(key, "purging stale block cache handle");
                self.stats.record_stale_handle();
                drop(stale);
                let popped = self.state.lock().handles.pop(key);
                drop(popped);
                self.open_handle(key, &slot.path)?
            }
            None => {
                self.stats.record_handle_miss();
                self.open_handle(key, &slot.path)?
            }
        };
        let read = read_span(&handle.file, start, end, &mut target)?;

        self.state.lock().keys.get(key);
        self.stats.record_read(read);
        Ok(read)
    }

    /// Opens the backing file and caches the handle.
    fn open_handle(&self, key: &str, path: &Path) -> StorageResult<OpenHandle> {
        let file = File::open(path)?;
        let handle = OpenHandle {
            id: FileId::of(&file.metadata()?),
            file: Arc::new(file),
        };
        let displaced = self
            .state
            .lock()
            .handles
            .push(key.to_string(), handle.clone());
        drop(displaced);
        Ok(handle)
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.handles.clear();
        for (path, id) in state.created.drain() {
            // Leave files another instance has since written under the key.
            match fs::metadata(&path) {
                Ok(meta) if FileId::of(&meta) == id => {}
                _ => continue,
            }
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to delete block cache file");
                }
            }
        }
        if self.owns_prefix {
            if let Err(err) = fs::remove_dir_all(&self.prefix) {
                warn!(prefix = %self.prefix.display(), error = %err, "failed to remove block cache directory");
            }
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("prefix", &self.prefix)
            .field("num_keys", &self.num_keys())
            .field("max_capacity", &self.max_capacity())
            .finish_non_exhaustive()
    }
}

/// Publishes `value` under `target` without ever replacing an existing
/// file, returning the identity of the published file.
fn publish(staging: &Path, target: &Path, value: &[u8]) -> io::Result<FileId> {
    publish_with(staging, target, value, |from, to| fs::hard_link(from, to))
}

/// Writes `value` to `staging`, then links it to `target`.
///
/// Linking fails with `AlreadyExists` if `target` exists, so a value is
/// published at most once even when other processes share the prefix.
/// Filesystems without hard links get `target` created exclusively and
/// written in place instead.
fn publish_with(
    staging: &Path,
    target: &Path,
    value: &[u8],
    link: impl FnOnce(&Path, &Path) -> io::Result<()>,
) -> io::Result<FileId> {
    let id = write_new(staging, value)?;
    match link(staging, target) {
        Ok(()) => Ok(id),
        Err(err) if links_unsupported(&err) => {
            debug!(error = %err, "hard links unavailable, publishing in place");
            let written = write_new(target, value);
            if let Err(err) = &written {
                if err.kind() != io::ErrorKind::AlreadyExists {
                    let _ = fs::remove_file(target);
                }
            }
            written
        }
        Err(err) => Err(err),
    }
}

fn write_new(path: &Path, value: &[u8]) -> io::Result<FileId> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(value)?;
    file.flush()?;
    Ok(FileId::of(&file.metadata()?))
}

/// CIFS and some FUSE mounts refuse `link(2)` with EOPNOTSUPP or EPERM.
fn links_unsupported(err: &io::Error) -> bool {
    const EOPNOTSUPP: i32 = 95;
    matches!(
        err.kind(),
        io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
    ) || (cfg!(target_os = "linux") && err.raw_os_error() == Some(EOPNOTSUPP))
}

fn read_span(handle: &File, start: u64, end: u64, target: &mut ReadTarget<'_>) -> StorageResult<usize> {
    let len = handle.metadata()?.len();
    let end = end.min(len);
    if start >= end {
        if let ReadTarget::Owned(out) = target {
            out.clear();
        }
        return Ok(0);
    }

    let mut file = handle;
    file.seek(SeekFrom::Start(start))?;
    let span = (end - start) as usize;
    match target {
        ReadTarget::Owned(out) => {
            out.clear();
            out.resize(span, 0);
            file.read_exact(out.as_mut_slice())?;
            Ok(span)
        }
        ReadTarget::Borrowed(buf) => {
            let span = span.min(buf.len());
            file.read_exact(&mut buf[..span])?;
            Ok(span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn cache(dir: &tempfile::TempDir) -> BlockCache {
        BlockCache::init(dir.path().join("cache"), 4).unwrap()
    }

    #[test]
    fn write_then_read_whole_value() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);

        assert!(cache.write("a", b"segment block"));
        let mut out = Vec::new();
        assert_eq!(cache.read("a", &mut out), Some(13));
        assert_eq!(out, b"segment block");
        assert_eq!(cache.value_length("a"), Some(13));
    }

    #[test]
    fn empty_value_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);

        assert!(cache.write("empty", b""));
        let mut out = vec![1, 2, 3];
        assert_eq!(cache.read("empty", &mut out), Some(0));
        assert!(out.is_empty());
        assert_eq!(cache.value_length("empty"), Some(0));
    }

    #[test]
    fn large_value_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);
        let value: Vec<u8> = (0..17 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

        assert!(cache.write("big", &value));
        let mut out = Vec::new();
        assert_eq!(cache.read("big", &mut out), Some(value.len()));
        assert!(out == value);
    }

    #[test]
    fn second_write_is_rejected() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);

        assert!(cache.write("k", b"original"));
        assert!(!cache.write("k", b"replacement"));

        let mut out = Vec::new();
        cache.read("k", &mut out).unwrap();
        assert_eq!(out, b"original");
        assert_eq!(cache.stats().writes(), 1);
    }

    #[test]
    fn range_reads() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);
        cache.write("r", b"0123456789");

        let mut out = Vec::new();
        assert_eq!(cache.read_range("r", &mut out, 2, 5), Some(3));
        assert_eq!(out, b"234");
        assert_eq!(cache.read_range("r", &mut out, 8, 100), Some(2));
        assert_eq!(out, b"89");
        assert_eq!(cache.read_range("r", &mut out, 5, 5), Some(0));
        assert_eq!(cache.read_range("r", &mut out, 7, 3), Some(0));
        assert_eq!(cache.read_range("r", &mut out, 20, 30), Some(0));
        assert!(out.is_empty());
    }

    #[test]
    fn read_into_caller_buffer() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);
        cache.write("r", b"0123456789");

        let mut buf = [0u8; 4];
        assert_eq!(cache.read_into("r", &mut buf, 3), Some(4));
        assert_eq!(&buf, b"3456");
        assert_eq!(cache.read_into("r", &mut buf, 8), Some(2));
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn missing_key_fails() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);

        let mut out = Vec::new();
        assert_eq!(cache.read("nope", &mut out), None);
        assert_eq!(cache.value_length("nope"), None);
        assert!(!cache.evict_key("nope"));
    }

    #[test]
    fn evict_then_rewrite() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);

        assert!(cache.write("k", b"v1"));
        let mut out = Vec::new();
        cache.read("k", &mut out).unwrap();

        assert!(cache.evict_key("k"));
        assert!(!cache.contains("k"));
        assert_eq!(cache.read("k", &mut out), None);

        assert!(cache.write("k", b"v2"));
        cache.read("k", &mut out).unwrap();
        assert_eq!(out, b"v2");
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let dir = tempdir().unwrap();
        let cache = BlockCache::with_config(
            dir.path().join("cache"),
            BlockCacheConfig::default().max_capacity(3),
        )
        .unwrap();

        for key in ["k0", "k1", "k2"] {
            assert!(cache.write(key, key.as_bytes()));
        }
        let mut out = Vec::new();
        cache.read("k0", &mut out).unwrap();

        assert!(cache.write("k3", b"k3"));
        assert_eq!(cache.num_keys(), 3);
        assert!(!cache.contains("k1"));
        assert!(!KeySlot::new(cache.prefix(), "k1").path.exists());
        for key in ["k0", "k2", "k3"] {
            assert!(cache.contains(key), "{key} should survive");
        }
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn shrinking_capacity_evicts_immediately() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);
        for i in 0..5 {
            assert!(cache.write(&format!("k{i}"), b"x"));
        }

        cache.set_max_capacity(2);
        assert_eq!(cache.max_capacity(), 2);
        assert_eq!(cache.num_keys(), 2);
        assert!(cache.contains("k3"));
        assert!(cache.contains("k4"));
    }

    #[test]
    fn handle_cache_is_bounded() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);
        let mut out = Vec::new();
        for i in 0..10 {
            let key = format!("k{i}");
            cache.write(&key, b"data");
            cache.read(&key, &mut out).unwrap();
        }
        assert_eq!(cache.state.lock().handles.len(), 4);

        cache.read("k9", &mut out).unwrap();
        assert_eq!(cache.stats().handle_hits(), 1);

        cache.set_max_file_handles(2);
        assert_eq!(cache.max_file_handles(), 2);
        assert_eq!(cache.state.lock().handles.len(), 2);
    }

    #[test]
    fn stale_handle_is_purged() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir);
        cache.write("k", b"data");
        let mut out = Vec::new();
        cache.read("k", &mut out).unwrap();

        // Another process removes the file behind our back.
        fs::remove_file(KeySlot::new(cache.prefix(), "k").path).unwrap();

        assert_eq!(cache.read("k", &mut out), None);
        assert_eq!(cache.stats().stale_handles(), 1);
        assert!(cache.state.lock().handles.is_empty());
        assert_eq!(cache.num_keys(), 0);
        assert!(cache.write("k", b"again"));
    }

    #[test]
    fn replaced_file_is_reopened() {
        let dir = tempdir().unwrap();
        let first = cache(&dir);
        let second = cache(&dir);

        assert!(first.write("k", b"old-value"));
        let mut out = Vec::new();
        first.read("k", &mut out).unwrap();

        assert!(second.evict_key("k"));
        assert!(second.write("k", b"NEW"));

        assert_eq!(first.read("k", &mut out), Some(3));
        assert_eq!(out, b"NEW");
        assert_eq!(first.value_length("k"), Some(3));
        assert_eq!(first.stats().stale_handles(), 1);
        assert_eq!(first.num_keys(), 0);
        assert!(first.state.lock().created.is_empty());
    }

    #[test]
    fn publish_falls_back_without_hard_links() {
        let dir = tempdir().unwrap();
        let no_links = |_: &Path, _: &Path| Err(io::Error::from(io::ErrorKind::Unsupported));
        let target = dir.path().join("target");

        publish_with(&dir.path().join("s1"), &target, b"value", no_links).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"value");

        let err = publish_with(&dir.path().join("s2"), &target, b"other", no_links).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&target).unwrap(), b"value");
    }

    #[test]
    fn publish_reports_existing_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, b"first").unwrap();

        let err = publish(&dir.path().join("staging"), &target, b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&target).unwrap(), b"first");
    }

    #[test]
    fn shared_prefix_rejects_foreign_key() {
        let dir = tempdir().unwrap();
        let first = cache(&dir);
        let second = cache(&dir);

        assert!(first.write("shared", b"one"));
        assert!(!second.write("shared", b"two"));

        let mut out = Vec::new();
        second.read("shared", &mut out).unwrap();
        assert_eq!(out, b"one");
    }

    #[test]
    fn drop_deletes_created_files() {
        let dir = tempdir().unwrap();
        let path = {
            let cache = cache(&dir);
            cache.write("k", b"data");
            KeySlot::new(cache.prefix(), "k").path
        };
        assert!(!path.exists());
    }

    #[test]
    fn private_location_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let location = CacheLocation::Private(dir.path().join("private"));
        {
            let cache = BlockCache::from_location(location.clone(), BlockCacheConfig::default())
                .unwrap();
            cache.write("k", b"data");
            assert!(location.path().exists());
        }
        assert!(!location.path().exists());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(cache(&dir));

        std::thread::scope(|scope| {
            for t in 0..4 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    let mut out = Vec::new();
                    for i in 0..50 {
                        let key = format!("t{t}-{i}");
                        let value = key.repeat(10);
                        assert!(cache.write(&key, value.as_bytes()));
                        assert_eq!(cache.read(&key, &mut out), Some(value.len()));
                        assert_eq!(out, value.as_bytes());
                    }
                });
            }
        });
        assert_eq!(cache.num_keys(), 200);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn range_read_matches_slice(
            value in prop::collection::vec(any::<u8>(), 0..512),
            start in 0u64..600,
            len in 0u64..600,
        ) {
            let dir = tempdir().unwrap();
            let cache = cache(&dir);
            prop_assert!(cache.write("p", &value));

            let end = start + len;
            let mut out = Vec::new();
            let read = cache.read_range("p", &mut out, start, end).unwrap();

            let lo = (start as usize).min(value.len());
            let hi = (end as usize).min(value.len()).max(lo);
            prop_assert_eq!(read, hi - lo);
            prop_assert_eq!(&out[..], &value[lo..hi]);
        }
    }
}

//! The process-wide execution context.

use crate::config::Config;
use crate::error::CoreResult;
use crate::parallel::WorkerPool;
use crate::segment::{Schema, SegmentedStore};
use crate::stats::EngineStats;
use segflow_storage::{BlockCache, BlockCacheConfig, CacheLocation};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared state for running pipelines, sorts and group-bys.
///
/// An `Engine` is created by the application entry point and dropped at
/// shutdown. It owns the worker pool, the statistics counters, a scratch
/// directory for temporary stores, and the block cache, which is created
/// on first use.
///
/// Dropping the engine removes the scratch directory and, unless the cache
/// lives on a shared filesystem, the block cache files.
pub struct Engine {
    config: Config,
    pool: WorkerPool,
    stats: EngineStats,
    scratch: PathBuf,
    block_cache: OnceLock<BlockCache>,
}

impl Engine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the worker pool
    /// cannot be started, or the scratch directory cannot be created.
    pub fn new(config: Config) -> CoreResult<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.num_threads)?;
        let scratch = config
            .temp_dir
            .join(format!("segflow-scratch-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&scratch)?;
        info!(
            num_threads = config.num_threads,
            scratch = %scratch.display(),
            "engine started"
        );
        Ok(Self {
            config,
            pool,
            stats: EngineStats::new(),
            scratch,
            block_cache: OnceLock::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the worker pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Returns the scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    /// Returns the block cache, creating it on first call.
    ///
    /// The cache location is chosen by probing the configured temporary
    /// directory: a distributed filesystem gets a shared cache directory,
    /// anything else a directory private to this engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn block_cache(&self) -> CoreResult<&BlockCache> {
        if let Some(cache) = self.block_cache.get() {
            return Ok(cache);
        }
        let location = CacheLocation::probe(&self.config.temp_dir);
        debug!(location = ?location, "probing block cache location");
        let config = BlockCacheConfig::default()
            .max_file_handles(self.config.cache_max_file_handles)
            .max_capacity(self.config.cache_max_capacity);
        let cache = BlockCache::from_location(location, config)?;
        // A concurrent caller may have won; the loser's private directory is
        // removed when `cache` drops.
        Ok(self.block_cache.get_or_init(|| cache))
    }

    /// Creates an on-disk store under the scratch directory that is deleted
    /// when dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created.
    pub fn temp_store(&self, schema: Schema, num_segments: usize) -> CoreResult<SegmentedStore> {
        let dir = self
            .scratch
            .join(format!("store-{}", Uuid::new_v4().simple()));
        Ok(SegmentedStore::open_for_write(&dir, schema, num_segments)?
            .with_block_rows(self.config.block_size)
            .into_temporary())
    }

    /// Number of group-by buckets for an input of `input_segments`
    /// segments.
    #[must_use]
    pub fn num_buckets_for(&self, input_segments: usize) -> usize {
        self.config.buckets_for(input_segments)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.scratch) {
            warn!(scratch = %self.scratch.display(), error = %e, "failed to remove scratch directory");
        }
        debug!(stats = ?self.stats.snapshot(), "engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segflow_codec::row;
    use tempfile::tempdir;

    fn engine(root: &Path) -> Engine {
        Engine::new(Config::new().num_threads(2).temp_dir(root)).unwrap()
    }

    #[test]
    fn scratch_removed_on_drop() {
        let root = tempdir().unwrap();
        let engine = engine(root.path());
        let scratch = engine.scratch_dir().to_path_buf();
        assert!(scratch.exists());
        drop(engine);
        assert!(!scratch.exists());
    }

    #[test]
    fn temp_store_lives_in_scratch() {
        let root = tempdir().unwrap();
        let engine = engine(root.path());
        let store = engine.temp_store(Schema::new(["a"]), 2).unwrap();
        let dir = store.path().unwrap().to_path_buf();
        assert!(dir.starts_with(engine.scratch_dir()));
        store.append_rows(0, vec![row![1i64]]).unwrap();
        drop(store);
        assert!(!dir.exists());
    }

    #[test]
    fn block_cache_created_once() {
        let root = tempdir().unwrap();
        let engine = engine(root.path());
        assert!(std::ptr::eq(
            engine.block_cache().unwrap(),
            engine.block_cache().unwrap()
        ));
        assert!(engine.block_cache().unwrap().write("k", b"v"));
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(Engine::new(Config::new().block_size(0)).is_err());
    }
}

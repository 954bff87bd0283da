//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker threads in the pool.
    pub num_threads: usize,

    /// Rows per execution batch and per stored block.
    pub block_size: usize,

    /// Byte budget shared by concurrently sorted segments.
    pub sort_buffer_size: u64,

    /// Rows a group-by bucket buffers before flushing a sorted chunk.
    pub groupby_buffer_rows: usize,

    /// Fixed group-by bucket count; `None` derives it from the pool size.
    pub num_buckets: Option<usize>,

    /// Root directory for scratch stores and the block cache.
    pub temp_dir: PathBuf,

    /// Open read handles kept by the block cache.
    pub cache_max_file_handles: usize,

    /// Live keys kept by the block cache (0 = unbounded).
    pub cache_max_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: cpu_count(),
            block_size: 256,
            sort_buffer_size: 256 * 1024 * 1024, // 256 MB
            groupby_buffer_rows: 64 * 1024,
            num_buckets: None,
            temp_dir: std::env::temp_dir(),
            cache_max_file_handles: segflow_storage::default_max_file_handles(),
            cache_max_capacity: 0, // unbounded
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from defaults overlaid with `SEGFLOW_*`
    /// environment variables.
    ///
    /// Recognized variables: `SEGFLOW_NUM_THREADS`, `SEGFLOW_BLOCK_SIZE`,
    /// `SEGFLOW_SORT_BUFFER_SIZE`, `SEGFLOW_GROUPBY_BUFFER_ROWS`,
    /// `SEGFLOW_TEMP_DIR`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> CoreResult<Self> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        if let Some(v) = parse_var(&lookup, "SEGFLOW_NUM_THREADS")? {
            self.num_threads = v;
        }
        if let Some(v) = parse_var(&lookup, "SEGFLOW_BLOCK_SIZE")? {
            self.block_size = v;
        }
        if let Some(v) = parse_var(&lookup, "SEGFLOW_SORT_BUFFER_SIZE")? {
            self.sort_buffer_size = v;
        }
        if let Some(v) = parse_var(&lookup, "SEGFLOW_GROUPBY_BUFFER_ROWS")? {
            self.groupby_buffer_rows = v;
        }
        if let Some(dir) = lookup("SEGFLOW_TEMP_DIR") {
            self.temp_dir = PathBuf::from(dir);
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks that sizes are non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.num_threads == 0 {
            return Err(CoreError::invalid_config("num_threads must be at least 1"));
        }
        if self.block_size == 0 {
            return Err(CoreError::invalid_config("block_size must be at least 1"));
        }
        if self.groupby_buffer_rows == 0 {
            return Err(CoreError::invalid_config(
                "groupby_buffer_rows must be at least 1",
            ));
        }
        if self.num_buckets == Some(0) {
            return Err(CoreError::invalid_config("num_buckets must be at least 1"));
        }
        Ok(())
    }

    /// Sets the worker thread count.
    #[must_use]
    pub const fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Sets rows per batch and per stored block.
    #[must_use]
    pub const fn block_size(mut self, rows: usize) -> Self {
        self.block_size = rows;
        self
    }

    /// Sets the sort byte budget.
    #[must_use]
    pub const fn sort_buffer_size(mut self, bytes: u64) -> Self {
        self.sort_buffer_size = bytes;
        self
    }

    /// Sets the group-by bucket flush threshold.
    #[must_use]
    pub const fn groupby_buffer_rows(mut self, rows: usize) -> Self {
        self.groupby_buffer_rows = rows;
        self
    }

    /// Fixes the group-by bucket count.
    #[must_use]
    pub const fn num_buckets(mut self, buckets: usize) -> Self {
        self.num_buckets = Some(buckets);
        self
    }

    /// Sets the scratch root directory.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Sets the block cache handle limit.
    #[must_use]
    pub const fn cache_max_file_handles(mut self, handles: usize) -> Self {
        self.cache_max_file_handles = handles;
        self
    }

    /// Sets the block cache key capacity (0 = unbounded).
    #[must_use]
    pub const fn cache_max_capacity(mut self, keys: usize) -> Self {
        self.cache_max_capacity = keys;
        self
    }

    /// Number of group-by buckets for an input of `input_segments`
    /// segments.
    ///
    /// Without an explicit override this is `threads * max(1, log2(threads))`,
    /// and never fewer than the input segment count.
    #[must_use]
    pub fn buckets_for(&self, input_segments: usize) -> usize {
        if let Some(n) = self.num_buckets {
            return n;
        }
        let threads = self.num_threads.max(1);
        let log2 = (usize::BITS - 1 - threads.leading_zeros()) as usize;
        (threads * log2.max(1)).max(input_segments).max(1)
    }
}

/// Returns the number of CPUs available to this process.
#[must_use]
pub fn cpu_count() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> CoreResult<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::invalid_config(format!("{name}={raw:?} is not a valid number"))),
    }
}

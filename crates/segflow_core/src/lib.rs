//! # Segflow Core
//!
//! Out-of-core execution engine for segmented row stores.
//!
//! This crate provides:
//! - [`SegmentedStore`]: a schema plus N independently addressable
//!   segments of framed, checksummed row blocks
//! - Pull-based streaming pipelines ([`execution`]) built from restartable
//!   operators
//! - [`ExternalSortMerge`] and [`sort_store`] for sorting data larger than
//!   memory under a shared byte budget
//! - [`HashPartitionGroupBy`] for grouping, deduplicating and
//!   [`Aggregate`]-ing by key with bounded resident memory
//! - [`permute_store`] for scattering rows to target positions
//! - The [`Engine`] context owning the worker pool, statistics, scratch
//!   space and block cache
//!
//! ## Example
//!
//! ```rust,no_run
//! use segflow_codec::row;
//! use segflow_core::{Config, Engine, RowComparator, Schema, SegmentedStore, sort_store};
//!
//! let engine = Engine::new(Config::default()).unwrap();
//! let input = SegmentedStore::in_memory(Schema::new(["k"]), 2);
//! input.append_rows(0, [row![3i64], row![1i64]]).unwrap();
//! input.append_rows(1, [row![2i64]]).unwrap();
//! input.close().unwrap();
//!
//! let output = SegmentedStore::in_memory(Schema::new(["k"]), 2);
//! sort_store(&engine, &input, RowComparator::ascending(&[0]), None, &output).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod config;
mod engine;
mod error;
pub mod execution;
mod groupby;
pub mod parallel;
pub mod segment;
mod sort;
mod stats;

pub use config::{cpu_count, Config};
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use groupby::{aggregate_schema, Aggregate, HashPartitionGroupBy};
pub use segment::{Schema, SegmentRows, SegmentWriter, SegmentedStore};
pub use sort::{
    partition_by_key_ranges, permute_store, sort_store, ExternalSortMerge, NullOrder,
    RowComparator, SortKey, SortOrder, SortPartition,
};
pub use stats::{EngineStats, StatsSnapshot};

pub use segflow_codec::{Row, Value};
pub use segflow_storage::{BlockCache, BlockCacheConfig, CacheLocation};

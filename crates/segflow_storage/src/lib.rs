//! # Segflow Storage
//!
//! Storage primitives for the Segflow execution engine.
//!
//! This crate provides two independent pieces:
//!
//! - **Storage backends**: append-then-seal byte stores, one per segment.
//!   They do not interpret the bytes; segment framing lives in
//!   `segflow_core`.
//! - **Block cache**: a write-once key → blob store, one file per key, with
//!   an LRU of open read handles and optional capacity eviction.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For ephemeral stores
//! - [`FileBackend`] - For on-disk stores, read positionally once sealed
//!
//! ## Example
//!
//! ```rust
//! use segflow_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
pub mod block_cache;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use block_cache::{
    default_max_file_handles, BlockCache, BlockCacheConfig, CacheLocation, CacheStats,
};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

//! Segmented row storage.
//!
//! A [`SegmentedStore`] is a schema plus an array of independent segments.
//! Segments are appended to by writers and read back as lazy row streams;
//! each is stored as a sequence of checksummed blocks.

pub mod record;
mod store;

pub use store::{
    Schema, SegmentRows, SegmentWriter, SegmentedStore, DEFAULT_BLOCK_ROWS, FORMAT_VERSION,
    MANIFEST_FILE,
};

//! Test fixtures and store helpers.
//!
//! Provides engines with private scratch space and stores with known key
//! layouts for the sort and group-by scenarios.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use segflow_codec::{row, Row};
use segflow_core::{Config, Engine, Schema, SegmentedStore};
use std::ops::Range;
use std::path::Path;
use tempfile::TempDir;

/// Block size used by fixture stores, small enough that every segment spans
/// several blocks.
pub const FIXTURE_BLOCK_ROWS: usize = 16;

/// An engine whose scratch space and block cache live in a temporary
/// directory.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Engine,
    // Dropped after `engine`, which cleans up inside it.
    temp_dir: TempDir,
}

impl TestEngine {
    /// Creates an engine with four workers.
    pub fn new() -> Self {
        Self::with_config(|config| config.num_threads(4))
    }

    /// Creates an engine from a config adjusted by `configure`.
    ///
    /// The temporary directory is always set by the fixture.
    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(Config::new().block_size(FIXTURE_BLOCK_ROWS)).temp_dir(temp_dir.path());
        let engine = Engine::new(config).expect("Failed to start engine");
        Self { engine, temp_dir }
    }

    /// Returns the temporary root.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Schema of fixture stores: an integer key and an integer sequence number.
pub fn key_seq_schema() -> Schema {
    Schema::new(["key", "seq"])
}

/// A fixture row.
pub fn key_seq_row(key: i64, seq: i64) -> Row {
    row![key, seq]
}

/// Builds a closed in-memory store whose segment `i` holds the keys of
/// `ranges[i]` in shuffled order.
///
/// Each row's `seq` equals its key.
pub fn disjoint_shuffled_store(ranges: &[Range<i64>], seed: u64) -> SegmentedStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = SegmentedStore::in_memory(key_seq_schema(), ranges.len())
        .with_block_rows(FIXTURE_BLOCK_ROWS);
    for (segment, range) in ranges.iter().enumerate() {
        let mut keys: Vec<i64> = range.clone().collect();
        keys.shuffle(&mut rng);
        store
            .append_rows(segment, keys.into_iter().map(|k| key_seq_row(k, k)))
            .expect("Failed to append fixture rows");
    }
    store.close().expect("Failed to close fixture store");
    store
}

/// Builds a closed in-memory store holding `keys` round-robin across
/// `segments` segments. Row `i` has `seq = i`.
pub fn store_with_keys(keys: &[i64], segments: usize) -> SegmentedStore {
    let store =
        SegmentedStore::in_memory(key_seq_schema(), segments).with_block_rows(FIXTURE_BLOCK_ROWS);
    for (i, &key) in keys.iter().enumerate() {
        store
            .append_rows(i % segments, [key_seq_row(key, i as i64)])
            .expect("Failed to append fixture row");
    }
    store.close().expect("Failed to close fixture store");
    store
}

/// `count` keys in shuffled order where exactly `duplicates` keys appear
/// twice and the rest once.
///
/// The result has `count` entries and `count - duplicates` distinct keys.
pub fn keys_with_duplicates(count: usize, duplicates: usize, seed: u64) -> Vec<i64> {
    assert!(duplicates <= count / 2, "too many duplicates for {count} keys");
    let distinct = (count - duplicates) as i64;
    let mut keys: Vec<i64> = (0..distinct).collect();
    keys.extend(0..duplicates as i64);
    keys.shuffle(&mut StdRng::seed_from_u64(seed));
    keys
}

/// Reads every segment of `store` in order and returns column `column` as
/// integers.
pub fn concat_column(store: &SegmentedStore, column: usize) -> Vec<i64> {
    (0..store.num_segments())
        .flat_map(|s| store.read_segment(s).expect("Failed to read segment"))
        .map(|r| r[column].as_integer().expect("Fixture column is not an integer"))
        .collect()
}

/// Returns column `column` of every segment of `store`, one vector per
/// segment.
pub fn segment_columns(store: &SegmentedStore, column: usize) -> Vec<Vec<i64>> {
    (0..store.num_segments())
        .map(|s| {
            store
                .read_segment(s)
                .expect("Failed to read segment")
                .iter()
                .map(|r| r[column].as_integer().expect("Fixture column is not an integer"))
                .collect()
        })
        .collect()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// The four shuffled quarter ranges of `0..100`.
    pub fn quartered_hundred(seed: u64) -> SegmentedStore {
        disjoint_shuffled_store(&[0..25, 25..50, 50..75, 75..100], seed)
    }

    /// 1,000 rows over three segments in which ten keys appear twice.
    pub fn thousand_with_ten_duplicates(seed: u64) -> SegmentedStore {
        store_with_keys(&keys_with_duplicates(1000, 10, seed), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn shuffled_store_keeps_ranges() {
        let store = disjoint_shuffled_store(&[0..10, 10..30], 1);
        assert_eq!(store.segment_row_counts(), vec![10, 20]);
        let first = segment_columns(&store, 0);
        assert!(first[0].iter().all(|k| (0..10).contains(k)));
        assert!(first[1].iter().all(|k| (10..30).contains(k)));
        assert_ne!(first[1], (10..30).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_keys_have_expected_shape() {
        let keys = keys_with_duplicates(100, 7, 3);
        assert_eq!(keys.len(), 100);
        assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 93);
    }

    #[test]
    fn engine_lives_in_temp_root() {
        let engine = TestEngine::new();
        assert!(engine.scratch_dir().starts_with(engine.root()));
        assert_eq!(engine.config().num_threads, 4);
    }
}

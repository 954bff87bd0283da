//! Benchmark utilities.

#![warn(missing_docs)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use segflow_codec::{row, Row};
use segflow_core::{Config, Engine, Schema, SegmentedStore};
use tempfile::TempDir;

/// Fixed seed so every run measures the same data.
pub const SEED: u64 = 0xbe9c;

/// Generate pseudo-random bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(SEED);
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate rows of `(key, seq, tag)` with keys drawn from `0..keys`.
pub fn random_rows(count: usize, keys: i64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(SEED);
    (0..count)
        .map(|i| row![rng.gen_range(0..keys), i as i64, format!("tag-{}", i % 97)])
        .collect()
}

/// A closed in-memory store of `segments` segments with disjoint,
/// internally shuffled key ranges of `rows_per_segment` keys each.
pub fn shuffled_ranges_store(segments: usize, rows_per_segment: usize) -> SegmentedStore {
    let mut rng = StdRng::seed_from_u64(SEED);
    let store = SegmentedStore::in_memory(Schema::new(["key", "seq", "tag"]), segments);
    for segment in 0..segments {
        let base = (segment * rows_per_segment) as i64;
        let mut keys: Vec<i64> = (base..base + rows_per_segment as i64).collect();
        keys.shuffle(&mut rng);
        store
            .append_rows(segment, keys.into_iter().map(|k| row![k, k, "x"]))
            .expect("append");
    }
    store.close().expect("close");
    store
}

/// A closed in-memory store holding `random_rows(rows, keys)` split evenly
/// over `segments`.
pub fn random_store(segments: usize, rows: usize, keys: i64) -> SegmentedStore {
    let store = SegmentedStore::in_memory(Schema::new(["key", "seq", "tag"]), segments);
    for (i, row) in random_rows(rows, keys).into_iter().enumerate() {
        store.append_rows(i % segments, [row]).expect("append");
    }
    store.close().expect("close");
    store
}

/// An engine rooted in a temporary directory. Keep the `TempDir` alive for
/// as long as the engine.
pub fn bench_engine(threads: usize) -> (TempDir, Engine) {
    let dir = TempDir::new().expect("temp dir");
    let engine = Engine::new(Config::new().num_threads(threads).temp_dir(dir.path())).expect("engine");
    (dir, engine)
}

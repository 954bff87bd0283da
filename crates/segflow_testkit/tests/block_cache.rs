//! Block cache behaviour through the engine.

use segflow_codec::{decode_rows, encode_rows};
use segflow_storage::BlockCache;
use segflow_testkit::prelude::*;
use std::fs;
use tempfile::TempDir;

fn files_in(dir: &std::path::Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with(".staging"))
        .count()
}

#[test]
fn engine_cache_holds_encoded_blocks() {
    let engine = TestEngine::new();
    let store = scenarios::quartered_hundred(3);
    let cache = engine.block_cache().unwrap();

    for segment in 0..store.num_segments() {
        let rows = store.read_segment(segment).unwrap();
        assert!(cache.write(&format!("segment-{segment}"), &encode_rows(&rows).unwrap()));
    }

    let mut out = Vec::new();
    let len = cache.read("segment-2", &mut out).unwrap();
    assert_eq!(len as u64, cache.value_length("segment-2").unwrap());
    assert_eq!(decode_rows(&out).unwrap(), store.read_segment(2).unwrap());
    assert!(std::ptr::eq(cache, engine.block_cache().unwrap()));
}

#[test]
fn capacity_limit_evicts_one_key_and_its_file() {
    let engine = TestEngine::with_config(|c| c.num_threads(2).cache_max_capacity(3));
    let cache = engine.block_cache().unwrap();

    for key in ["a", "b", "c"] {
        assert!(cache.write(key, key.as_bytes()));
    }
    let mut out = Vec::new();
    assert_eq!(cache.read("a", &mut out), Some(1));
    assert!(cache.write("d", b"d"));

    assert_eq!(cache.num_keys(), 3);
    assert!(!cache.contains("b"));
    assert!(cache.contains("a"));
    assert_eq!(files_in(cache.prefix()), 3);
}

#[test]
fn values_of_sixteen_megabytes_and_more() {
    let engine = TestEngine::new();
    let cache = engine.block_cache().unwrap();
    let big: Vec<u8> = (0..17 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    assert!(cache.write("big", &big));
    assert!(cache.write("empty", &[]));
    let mut out = Vec::new();
    assert_eq!(cache.read("big", &mut out), Some(big.len()));
    assert!(out == big);
    assert_eq!(cache.read("empty", &mut out), Some(0));
    assert!(out.is_empty());

    let tail_start = big.len() as u64 - 10;
    assert_eq!(cache.read_range("big", &mut out, tail_start, u64::MAX), Some(10));
    assert_eq!(out, big[big.len() - 10..]);
}

#[test]
fn rejected_write_keeps_first_value() {
    let engine = TestEngine::new();
    let cache = engine.block_cache().unwrap();
    assert!(cache.write("k", b"first"));
    assert!(!cache.write("k", b"second"));
    let mut out = Vec::new();
    cache.read("k", &mut out).unwrap();
    assert_eq!(out, b"first");

    assert!(cache.evict_key("k"));
    assert_eq!(cache.read("k", &mut out), None);
    assert!(cache.write("k", b"second"));
}

#[test]
fn concurrent_stress_through_engine_cache() {
    let engine = TestEngine::with_config(|c| c.num_threads(2).cache_max_file_handles(4));
    let cache = engine.block_cache().unwrap();
    let config = StressConfig {
        operations: 64,
        threads: 6,
        value_size: 1024,
    };
    let result = stress_cache_write_read(cache, &config);
    assert_eq!(result.failed_ops, 0);
    assert!(cache.stats().handle_misses() > 0);
    assert_eq!(stress_cache_contended_writes(cache, &config), 64);
}

#[test]
fn shared_prefix_sees_keys_rewritten_elsewhere() {
    let dir = TempDir::new().unwrap();
    let first = BlockCache::init(dir.path(), 4).unwrap();
    let second = BlockCache::init(dir.path(), 4).unwrap();

    assert!(first.write("k", b"old-value"));
    let mut out = Vec::new();
    assert_eq!(first.read("k", &mut out), Some(9));

    assert!(second.evict_key("k"));
    assert!(second.write("k", b"NEW"));

    assert_eq!(first.read("k", &mut out), Some(3));
    assert_eq!(out, b"NEW");
    assert_eq!(first.value_length("k"), Some(3));
    assert_eq!(first.num_keys(), 0);

    // The key now belongs to `second`; dropping `first` must leave it.
    drop(first);
    assert!(second.contains("k"));
    assert_eq!(second.read("k", &mut out), Some(3));
    assert_eq!(out, b"NEW");
}

#[test]
fn key_evicted_elsewhere_can_be_written_again() {
    let dir = TempDir::new().unwrap();
    let first = BlockCache::init(dir.path(), 4).unwrap();
    let second = BlockCache::init(dir.path(), 4).unwrap();

    assert!(first.write("k", b"one"));
    assert!(second.evict_key("k"));
    assert!(first.write("k", b"two"));

    let mut out = Vec::new();
    assert_eq!(second.read("k", &mut out), Some(3));
    assert_eq!(out, b"two");
    assert_eq!(first.num_keys(), 1);
}

//! End-to-end sort and group-by scenarios.

use proptest::prelude::*;
use segflow_core::execution::operators::{SegmentSource, Transform};
use segflow_core::execution::{materialize_parallel, ExecutionNode};
use segflow_core::{
    permute_store, sort_store, Aggregate, ExternalSortMerge, HashPartitionGroupBy, RowComparator,
    Schema, SegmentedStore, SortPartition,
};
use segflow_testkit::prelude::*;
use segflow_codec::{row, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Checks that every key occupies one contiguous run inside one bucket.
fn assert_keys_contiguous(buckets: &[Vec<i64>]) {
    let mut seen: HashMap<i64, usize> = HashMap::new();
    for (bucket, keys) in buckets.iter().enumerate() {
        let mut previous = None;
        for &key in keys {
            if previous != Some(key) {
                assert!(
                    seen.insert(key, bucket).is_none(),
                    "key {key} appears in more than one run"
                );
            }
            previous = Some(key);
        }
    }
}

#[test]
fn group_by_dedups_thousand_rows_with_ten_duplicates() {
    let engine = TestEngine::new();
    let input = scenarios::thousand_with_ten_duplicates(5);
    let output = SegmentedStore::in_memory(input.schema().clone(), 4);

    HashPartitionGroupBy::new(&engine, 0)
        .dedup(true)
        .buffer_rows(64)
        .run(&input, &output)
        .unwrap();

    let total = output.total_rows();
    assert!((990..=999).contains(&total), "got {total} rows");
    assert_eq!(total, 990);
    assert_keys_contiguous(&segment_columns(&output, 0));
}

#[test]
fn external_sort_of_shuffled_quarters() {
    let engine = TestEngine::new();
    let input = scenarios::quartered_hundred(42);
    let output = SegmentedStore::in_memory(input.schema().clone(), 4);
    let partitions = SortPartition::from_store(&input).unwrap();

    ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
        .run(&input, &partitions, &output)
        .unwrap();

    assert_eq!(concat_column(&output, 0), (0..100).collect::<Vec<_>>());
    assert_eq!(output.segment_row_counts(), vec![25, 25, 25, 25]);
}

#[test]
fn sort_with_budget_smaller_than_any_segment() {
    let engine = TestEngine::with_config(|c| c.num_threads(4).sort_buffer_size(1));
    let input = disjoint_shuffled_store(&[0..300, 300..310, 310..1000, 1000..1001], 9);
    let output = SegmentedStore::in_memory(input.schema().clone(), 4);
    let partitions = SortPartition::from_store(&input).unwrap();

    ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
        .run(&input, &partitions, &output)
        .unwrap();

    assert_eq!(concat_column(&output, 0), (0..1001).collect::<Vec<_>>());
}

#[test]
fn group_by_then_sort_gives_global_order() {
    let engine = TestEngine::new();
    let keys: Vec<i64> = (0..2000).map(|i| (i * 31) % 257).collect();
    let input = store_with_keys(&keys, 3);

    let grouped = SegmentedStore::in_memory(input.schema().clone(), 6);
    HashPartitionGroupBy::new(&engine, 0)
        .dedup(true)
        .buffer_rows(100)
        .run(&input, &grouped)
        .unwrap();
    assert_eq!(grouped.total_rows(), 257);

    let sorted = SegmentedStore::in_memory(input.schema().clone(), 3);
    sort_store(&engine, &grouped, RowComparator::ascending(&[0]), None, &sorted).unwrap();
    assert_eq!(concat_column(&sorted, 0), (0..257).collect::<Vec<_>>());
}

#[test]
fn pipeline_output_feeds_sort() {
    let engine = TestEngine::new();
    let input = Arc::new(store_with_keys(&(0..500).rev().collect::<Vec<_>>(), 2));

    let negate = Transform::new(|r| {
        let key = r[0].as_integer().unwrap_or_default();
        Ok(row![-key, r[1].clone()])
    });
    let template = ExecutionNode::new(negate, vec![ExecutionNode::source(SegmentSource::new(input.clone()))]);
    let staged = SegmentedStore::in_memory(input.schema().clone(), 3);
    assert_eq!(materialize_parallel(&engine, &template, &staged).unwrap(), 500);

    let sorted = SegmentedStore::in_memory(input.schema().clone(), 2);
    sort_store(&engine, &staged, RowComparator::ascending(&[0]), Some(vec![1, 0]), &sorted).unwrap();
    let firsts = sorted.read_segment(0).unwrap();
    assert_eq!(firsts[0][1], Value::Integer(-499));
    assert_eq!(concat_column(&sorted, 1), (-499..=0).collect::<Vec<_>>());
}

#[test]
fn permute_by_position_matches_sort() {
    let engine = TestEngine::with_config(|c| c.num_threads(3).sort_buffer_size(64));
    let input = disjoint_shuffled_store(&[0..120, 120..130, 130..400], 3);
    let output = SegmentedStore::in_memory(Schema::new(["key"]), 3);

    // `seq` equals the key, so placing rows at `seq` sorts them.
    permute_store(&engine, &input, 1, &output).unwrap();

    assert_eq!(concat_column(&output, 0), (0..400).collect::<Vec<_>>());
    assert_eq!(output.segment_row_counts(), vec![134, 134, 132]);
}

#[test]
fn aggregate_counts_match_key_multiplicity() {
    let engine = TestEngine::new();
    let keys = keys_with_duplicates(500, 40, 8);
    let input = store_with_keys(&keys, 3);
    let group_by = HashPartitionGroupBy::new(&engine, 0)
        .aggregate(vec![Aggregate::Count, Aggregate::CountDistinct(1)])
        .buffer_rows(32);
    let output = SegmentedStore::in_memory(group_by.output_schema(input.schema()), 4);

    group_by.run(&input, &output).unwrap();

    assert_eq!(output.total_rows(), 460);
    let counts = concat_column(&output, 1);
    assert_eq!(counts.iter().sum::<i64>(), 500);
    assert_eq!(counts.iter().filter(|&&c| c == 2).count(), 40);
    // Every row has its own seq.
    assert_eq!(concat_column(&output, 2), counts);
    assert_keys_contiguous(&segment_columns(&output, 0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn sort_output_is_sorted_permutation(
        ranges in disjoint_ranges_strategy(5),
        seed in any::<u64>(),
    ) {
        let engine = TestEngine::with_config(|c| c.num_threads(2).sort_buffer_size(256));
        let input = disjoint_shuffled_store(&ranges, seed);
        let output = SegmentedStore::in_memory(input.schema().clone(), ranges.len());
        let partitions = SortPartition::from_store(&input).unwrap();
        ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .run(&input, &partitions, &output)
            .unwrap();
        let end = ranges.last().map_or(0, |r| r.end);
        prop_assert_eq!(concat_column(&output, 0), (0..end).collect::<Vec<_>>());
    }

    #[test]
    fn group_by_colocates_equal_keys(
        keys in repeated_keys_strategy(400),
        buckets in 1usize..7,
        dedup in any::<bool>(),
    ) {
        let engine = TestEngine::with_config(|c| c.num_threads(3));
        let input = store_with_keys(&keys, 2);
        let output = SegmentedStore::in_memory(input.schema().clone(), buckets);
        HashPartitionGroupBy::new(&engine, 0)
            .dedup(dedup)
            .buffer_rows(17)
            .run(&input, &output)
            .unwrap();

        let grouped = segment_columns(&output, 0);
        assert_keys_contiguous(&grouped);
        let total: usize = grouped.iter().map(Vec::len).sum();
        if dedup {
            prop_assert!(total <= keys.len());
        } else {
            prop_assert_eq!(total, keys.len());
        }
    }
}

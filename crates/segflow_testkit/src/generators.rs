//! Property-based test generators using proptest.
//!
//! Provides strategies for rows, key layouts and sort keys.

use proptest::prelude::*;
use segflow_codec::{Row, Value};
use segflow_core::SortKey;
use std::ops::Range;

/// Strategy for scalar values of every type, NaN excluded.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for rows with exactly `arity` columns.
pub fn row_strategy(arity: usize) -> impl Strategy<Value = Row> {
    prop::collection::vec(value_strategy(), arity).prop_map(Row::new)
}

/// Strategy for a list of small keys with plenty of repeats.
pub fn repeated_keys_strategy(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..64, 0..max_len)
}

/// Strategy for consecutive, disjoint, possibly empty key ranges covering
/// `0..n` for some `n`.
pub fn disjoint_ranges_strategy(max_segments: usize) -> impl Strategy<Value = Vec<Range<i64>>> {
    prop::collection::vec(0i64..60, 1..=max_segments.max(1)).prop_map(|sizes| {
        let mut start = 0;
        sizes
            .into_iter()
            .map(|size| {
                let range = start..start + size;
                start += size;
                range
            })
            .collect()
    })
}

/// Strategy for a sort key on one of `arity` columns.
pub fn sort_key_strategy(arity: usize) -> impl Strategy<Value = SortKey> {
    (0..arity.max(1), any::<bool>(), any::<bool>()).prop_map(|(column, desc, nulls_first)| {
        let key = if desc {
            SortKey::desc(column)
        } else {
            SortKey::asc(column)
        };
        if nulls_first {
            key.nulls_first()
        } else {
            key.nulls_last()
        }
    })
}

/// Strategy for a blob and a byte range over it.
///
/// Range bounds may exceed the blob length.
pub fn blob_with_range_strategy() -> impl Strategy<Value = (Vec<u8>, u64, u64)> {
    prop::collection::vec(any::<u8>(), 0..4096)
        .prop_flat_map(|blob| {
            let len = blob.len() as u64;
            (Just(blob), 0..=len + 8, 0..=len + 8)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn ranges_are_contiguous() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let ranges = disjoint_ranges_strategy(5)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert_eq!(ranges[0].start, 0);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn rows_have_requested_arity() {
        let mut runner = TestRunner::default();
        let row = row_strategy(3).new_tree(&mut runner).unwrap().current();
        assert_eq!(row.len(), 3);
    }
}

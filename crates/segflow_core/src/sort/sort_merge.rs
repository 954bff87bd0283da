//! External sort over segments with disjoint key ranges.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::parallel::ByteBudget;
use crate::segment::SegmentedStore;
use crate::sort::comparator::RowComparator;
use segflow_codec::Row;
use tracing::{debug, info};

/// An input segment of an [`ExternalSortMerge`].
///
/// The segment's rows must occupy a key range disjoint from every other
/// partition's; partitions are listed in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortPartition {
    /// Input segment index.
    pub segment: usize,
    /// Whether the segment is already sorted.
    pub presorted: bool,
    /// Estimated in-memory size of the segment.
    pub approx_bytes: u64,
}

impl SortPartition {
    /// An unsorted partition.
    #[must_use]
    pub const fn new(segment: usize, approx_bytes: u64) -> Self {
        Self {
            segment,
            presorted: false,
            approx_bytes,
        }
    }

    /// Marks the partition as already sorted.
    #[must_use]
    pub const fn presorted(mut self, presorted: bool) -> Self {
        self.presorted = presorted;
        self
    }

    /// One unsorted partition per segment of `store`, sized by the
    /// segment's encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment size cannot be read.
    pub fn from_store(store: &SegmentedStore) -> CoreResult<Vec<SortPartition>> {
        (0..store.num_segments())
            .map(|segment| Ok(SortPartition::new(segment, store.segment_byte_size(segment)?)))
            .collect()
    }
}

/// Sorts each partition independently under a shared memory budget.
///
/// Workers claim partitions one at a time. An unsorted partition is loaded
/// whole once its estimated size fits in the remaining budget, sorted,
/// optionally has its columns rearranged, and is written to the output
/// segment with the same index as the partition. Presorted partitions are
/// streamed straight through, and a loaded partition found already in
/// order is written without sorting.
///
/// Because the partitions' key ranges are disjoint and listed in key order,
/// concatenating the output segments yields a globally sorted sequence.
pub struct ExternalSortMerge<'e> {
    engine: &'e Engine,
    comparator: RowComparator,
    output_columns: Option<Vec<usize>>,
    memory_budget: u64,
}

impl<'e> ExternalSortMerge<'e> {
    /// Creates a sort using the engine's sort buffer size as the budget.
    #[must_use]
    pub fn new(engine: &'e Engine, comparator: RowComparator) -> Self {
        Self {
            engine,
            comparator,
            output_columns: None,
            memory_budget: engine.config().sort_buffer_size,
        }
    }

    /// Rearranges output rows so column `i` is input column `order[i]`.
    ///
    /// `order` must be a permutation of the input columns.
    #[must_use]
    pub fn output_columns(mut self, order: Vec<usize>) -> Self {
        self.output_columns = Some(order);
        self
    }

    /// Overrides the memory budget.
    #[must_use]
    pub fn memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Sorts `partitions` of `input` into the segments of `output`.
    ///
    /// On error the contents of the output segments are unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if the output does not have one segment per
    /// partition, the column order is not a permutation, or any read,
    /// decode or write fails.
    pub fn run(
        &self,
        input: &SegmentedStore,
        partitions: &[SortPartition],
        output: &SegmentedStore,
    ) -> CoreResult<()> {
        self.validate(input, partitions, output)?;

        info!(
            partitions = partitions.len(),
            memory_budget = self.memory_budget,
            "external sort started"
        );
        let budget = ByteBudget::new(self.memory_budget);
        self.engine.pool().run_indexed(partitions.len(), |i| {
            self.sort_partition(&budget, input, partitions[i], output, i)
        })?;
        info!(
            rows = output.total_rows(),
            "external sort finished"
        );
        Ok(())
    }

    fn validate(
        &self,
        input: &SegmentedStore,
        partitions: &[SortPartition],
        output: &SegmentedStore,
    ) -> CoreResult<()> {
        if output.num_segments() != partitions.len() {
            return Err(CoreError::invalid_operation(format!(
                "output has {} segments for {} partitions",
                output.num_segments(),
                partitions.len()
            )));
        }
        if let Some(p) = partitions.iter().find(|p| p.segment >= input.num_segments()) {
            return Err(CoreError::invalid_operation(format!(
                "partition refers to segment {} of {}",
                p.segment,
                input.num_segments()
            )));
        }
        let arity = input.schema().len();
        if output.schema().len() != arity {
            return Err(CoreError::schema_mismatch(arity, output.schema().len()));
        }
        if let Some(order) = &self.output_columns {
            let mut seen = vec![false; arity];
            let is_permutation = order.len() == arity
                && order
                    .iter()
                    .all(|&c| c < arity && !std::mem::replace(&mut seen[c], true));
            if !is_permutation {
                return Err(CoreError::invalid_operation(format!(
                    "output column order {order:?} is not a permutation of {arity} columns"
                )));
            }
        }
        Ok(())
    }

    fn sort_partition(
        &self,
        budget: &ByteBudget,
        input: &SegmentedStore,
        partition: SortPartition,
        output: &SegmentedStore,
        index: usize,
    ) -> CoreResult<()> {
        let len = input.segment_length(partition.segment)?;
        if len == 0 {
            return Ok(());
        }
        let mut writer = output.output_iterator(index)?;

        if partition.presorted {
            let block = output.block_rows();
            let mut batch = Vec::with_capacity(block);
            for row in input.segment_rows(partition.segment)? {
                let mut row = row?;
                self.rearrange(&mut row);
                batch.push(row);
                if batch.len() >= block {
                    writer.write_batch(std::mem::take(&mut batch))?;
                }
            }
            writer.write_batch(batch)?;
            writer.flush()?;
            self.engine.stats().record_copied_segment();
            debug!(segment = partition.segment, rows = len, "copied presorted segment");
            return Ok(());
        }

        let _reservation = match budget.try_acquire(partition.approx_bytes) {
            Some(reservation) => reservation,
            None => {
                debug!(
                    segment = partition.segment,
                    bytes = partition.approx_bytes,
                    in_flight = budget.in_flight(),
                    "waiting for sort budget"
                );
                budget.acquire(partition.approx_bytes)
            }
        };
        let mut rows = input.read_segment(partition.segment)?;
        let in_order = self.comparator.is_sorted(&rows);
        if !in_order {
            self.comparator.sort(&mut rows);
        }
        for row in &mut rows {
            self.rearrange(row);
        }
        let n = rows.len() as u64;
        writer.write_batch(rows)?;
        writer.flush()?;
        if in_order {
            self.engine.stats().record_copied_segment();
            debug!(segment = partition.segment, rows = n, "segment already in order");
        } else {
            self.engine.stats().record_sorted_segment(n);
            debug!(
                segment = partition.segment,
                rows = n,
                bytes = partition.approx_bytes,
                "sorted segment"
            );
        }
        Ok(())
    }

    fn rearrange(&self, row: &mut Row) {
        if let Some(order) = &self.output_columns {
            row.permute(order);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::segment::Schema;
    use crate::sort::comparator::SortKey;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use segflow_codec::{row, Value};
    use tempfile::{tempdir, TempDir};

    fn engine(threads: usize) -> (TempDir, Engine) {
        let root = tempdir().unwrap();
        let engine = Engine::new(Config::new().num_threads(threads).temp_dir(root.path())).unwrap();
        (root, engine)
    }

    fn shuffled_ranges(ranges: &[std::ops::Range<i64>], seed: u64) -> SegmentedStore {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let store = SegmentedStore::in_memory(Schema::new(["k", "v"]), ranges.len()).with_block_rows(8);
        for (i, range) in ranges.iter().enumerate() {
            let mut keys: Vec<i64> = range.clone().collect();
            keys.shuffle(&mut rng);
            store
                .append_rows(i, keys.into_iter().map(|k| row![k, format!("v{k}")]))
                .unwrap();
            store.flush_write_to_segment(i).unwrap();
        }
        store
    }

    fn concat_keys(store: &SegmentedStore, column: usize) -> Vec<i64> {
        (0..store.num_segments())
            .flat_map(|s| store.read_segment(s).unwrap())
            .map(|r| r[column].as_integer().unwrap())
            .collect()
    }

    #[test]
    fn disjoint_shuffled_segments_sort_globally() {
        let (_root, engine) = engine(3);
        let input = shuffled_ranges(&[0..25, 25..50, 50..75, 75..100], 7);
        let output = SegmentedStore::in_memory(input.schema().clone(), 4);
        let partitions = SortPartition::from_store(&input).unwrap();

        ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .run(&input, &partitions, &output)
            .unwrap();

        assert_eq!(concat_keys(&output, 0), (0..100).collect::<Vec<_>>());
        assert_eq!(engine.stats().segments_sorted(), 4);
        assert_eq!(engine.stats().rows_sorted(), 100);
    }

    #[test]
    fn oversized_segment_completes() {
        let (_root, engine) = engine(4);
        let input = shuffled_ranges(&[0..500, 500..510, 510..900], 3);
        let output = SegmentedStore::in_memory(input.schema().clone(), 3);
        let partitions = SortPartition::from_store(&input).unwrap();

        ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .memory_budget(16)
            .run(&input, &partitions, &output)
            .unwrap();

        assert_eq!(concat_keys(&output, 0), (0..900).collect::<Vec<_>>());
    }

    #[test]
    fn presorted_segment_copied_through() {
        let (_root, engine) = engine(2);
        let input = SegmentedStore::in_memory(Schema::new(["k", "v"]), 2);
        input.append_rows(0, (0..10).map(|k| row![k as i64, "a"])).unwrap();
        input.append_rows(1, (10..20).rev().map(|k| row![k as i64, "b"])).unwrap();
        input.close().unwrap();

        let partitions = vec![
            SortPartition::new(0, 100).presorted(true),
            SortPartition::new(1, 100),
        ];
        let output = SegmentedStore::in_memory(input.schema().clone(), 2);
        ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .run(&input, &partitions, &output)
            .unwrap();

        assert_eq!(concat_keys(&output, 0), (0..20).collect::<Vec<_>>());
        assert_eq!(engine.stats().segments_copied(), 1);
        assert_eq!(engine.stats().segments_sorted(), 1);
    }

    #[test]
    fn ordered_segment_skips_the_sort() {
        let (_root, engine) = engine(2);
        let input = SegmentedStore::in_memory(Schema::new(["k", "v"]), 2);
        input.append_rows(0, (0..10).map(|k| row![k as i64, "a"])).unwrap();
        input.append_rows(1, (10..20).rev().map(|k| row![k as i64, "b"])).unwrap();
        input.close().unwrap();

        let output = SegmentedStore::in_memory(Schema::new(["v", "k"]), 2);
        let partitions = SortPartition::from_store(&input).unwrap();
        ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .output_columns(vec![1, 0])
            .run(&input, &partitions, &output)
            .unwrap();

        assert_eq!(concat_keys(&output, 1), (0..20).collect::<Vec<_>>());
        assert_eq!(output.read_segment(0).unwrap()[0][0], Value::from("a"));
        assert_eq!(engine.stats().segments_copied(), 1);
        assert_eq!(engine.stats().segments_sorted(), 1);
        assert_eq!(engine.stats().rows_sorted(), 10);
    }

    #[test]
    fn descending_with_column_permutation() {
        let (_root, engine) = engine(2);
        let input = shuffled_ranges(&[50..100, 0..50], 11);
        let output = SegmentedStore::in_memory(Schema::new(["v", "k"]), 2);
        let partitions = SortPartition::from_store(&input).unwrap();

        ExternalSortMerge::new(&engine, RowComparator::new(vec![SortKey::desc(0)]))
            .output_columns(vec![1, 0])
            .run(&input, &partitions, &output)
            .unwrap();

        assert_eq!(concat_keys(&output, 1), (0..100).rev().collect::<Vec<_>>());
        let first = output.read_segment(0).unwrap().remove(0);
        assert_eq!(first[0], Value::from("v99"));
    }

    #[test]
    fn empty_segments_are_no_ops() {
        let (_root, engine) = engine(2);
        let input = shuffled_ranges(&[0..0, 0..5, 5..5], 1);
        let output = SegmentedStore::in_memory(input.schema().clone(), 3);
        let partitions = SortPartition::from_store(&input).unwrap();
        ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .run(&input, &partitions, &output)
            .unwrap();
        assert_eq!(output.segment_row_counts(), vec![0, 5, 0]);
    }

    #[test]
    fn rejects_bad_arguments() {
        let (_root, engine) = engine(1);
        let input = shuffled_ranges(&[0..5], 1);
        let partitions = SortPartition::from_store(&input).unwrap();
        let sorter = ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]));

        let two = SegmentedStore::in_memory(input.schema().clone(), 2);
        assert!(sorter.run(&input, &partitions, &two).is_err());

        let one = SegmentedStore::in_memory(input.schema().clone(), 1);
        let bad_order = ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
            .output_columns(vec![0, 0]);
        assert!(bad_order.run(&input, &partitions, &one).is_err());

        let narrow = SegmentedStore::in_memory(Schema::new(["k"]), 1);
        assert!(matches!(
            sorter.run(&input, &partitions, &narrow),
            Err(CoreError::SchemaMismatch { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn output_is_sorted_permutation(
            sizes in prop::collection::vec(0usize..40, 1..6),
            seed in any::<u64>(),
        ) {
            let (_root, engine) = engine(2);
            let mut ranges = Vec::new();
            let mut start = 0i64;
            for size in &sizes {
                ranges.push(start..start + *size as i64);
                start += *size as i64;
            }
            let input = shuffled_ranges(&ranges, seed);
            let output = SegmentedStore::in_memory(input.schema().clone(), ranges.len());
            let partitions = SortPartition::from_store(&input).unwrap();
            ExternalSortMerge::new(&engine, RowComparator::ascending(&[0]))
                .memory_budget(64)
                .run(&input, &partitions, &output)
                .unwrap();
            prop_assert_eq!(concat_keys(&output, 0), (0..start).collect::<Vec<_>>());
        }
    }
}

//! Range partitioning: prepares arbitrary input for [`ExternalSortMerge`].

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentedStore;
use crate::sort::comparator::RowComparator;
use crate::sort::sort_merge::{ExternalSortMerge, SortPartition};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use segflow_codec::Row;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Sampled rows per output partition.
const SAMPLES_PER_PARTITION: usize = 64;

/// Seed for splitter sampling, so repeated runs partition identically.
const SAMPLE_SEED: u64 = 0x5e6f_10a7;

/// Redistributes `input` into `num_partitions` segments whose key ranges
/// are disjoint and ascending under `comparator`.
///
/// Splitters are chosen from a reservoir sample of the input. Rows equal
/// to a splitter go to the partition right of it, so rows with equal keys
/// always share a partition. The result is a temporary store.
///
/// # Errors
///
/// Returns an error if `num_partitions` is zero or any read or write
/// fails.
pub fn partition_by_key_ranges(
    engine: &Engine,
    input: &SegmentedStore,
    comparator: &RowComparator,
    num_partitions: usize,
) -> CoreResult<SegmentedStore> {
    if num_partitions == 0 {
        return Err(CoreError::invalid_operation("cannot partition into zero segments"));
    }
    let splitters = choose_splitters(input, comparator, num_partitions)?;
    debug!(splitters = splitters.len(), "chose range splitters");

    let output = engine.temp_store(input.schema().clone(), num_partitions)?;
    let block = output.block_rows();
    engine.pool().run_indexed(input.num_segments(), |segment| {
        let mut staged: Vec<Vec<Row>> = vec![Vec::new(); num_partitions];
        let mut count = 0u64;
        for row in input.segment_rows(segment)? {
            let row = row?;
            let target = splitters
                .partition_point(|s| comparator.compare(s, &row) != Ordering::Greater);
            staged[target].push(row);
            count += 1;
            if staged[target].len() >= block {
                output.append_rows(target, std::mem::take(&mut staged[target]))?;
            }
        }
        for (target, rows) in staged.into_iter().enumerate() {
            if !rows.is_empty() {
                output.append_rows(target, rows)?;
            }
        }
        engine.stats().record_partitioned(count);
        Ok(())
    })?;
    for id in 0..num_partitions {
        output.flush_write_to_segment(id)?;
    }
    Ok(output)
}

fn choose_splitters(
    input: &SegmentedStore,
    comparator: &RowComparator,
    num_partitions: usize,
) -> CoreResult<Vec<Row>> {
    if num_partitions == 1 || input.total_rows() == 0 {
        return Ok(Vec::new());
    }
    let capacity = SAMPLES_PER_PARTITION * num_partitions;
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut sample: Vec<Row> = Vec::with_capacity(capacity);
    let mut seen = 0usize;
    for segment in 0..input.num_segments() {
        for row in input.segment_rows(segment)? {
            let row = row?;
            if sample.len() < capacity {
                sample.push(row);
            } else {
                let slot = rng.gen_range(0..=seen);
                if slot < capacity {
                    sample[slot] = row;
                }
            }
            seen += 1;
        }
    }
    comparator.sort(&mut sample);
    let mut splitters: Vec<Row> = (1..num_partitions)
        .map(|k| sample[k * sample.len() / num_partitions].clone())
        .collect();
    splitters.dedup_by(|a, b| comparator.keys_equal(a, b));
    Ok(splitters)
}

/// Sorts `input` into `output`, whatever the input's key distribution.
///
/// Range-partitions the input into one temporary segment per output
/// segment, then runs an [`ExternalSortMerge`] over them. Concatenating
/// the output segments yields the sorted input. With `output_columns` the
/// output rows are rearranged as by
/// [`ExternalSortMerge::output_columns`].
///
/// # Errors
///
/// Returns an error if `output` has no segments or any stage fails.
pub fn sort_store(
    engine: &Engine,
    input: &SegmentedStore,
    comparator: RowComparator,
    output_columns: Option<Vec<usize>>,
    output: &SegmentedStore,
) -> CoreResult<()> {
    info!(
        rows = input.total_rows(),
        input_segments = input.num_segments(),
        output_segments = output.num_segments(),
        "sort started"
    );
    let ranges = partition_by_key_ranges(engine, input, &comparator, output.num_segments())?;
    let partitions = SortPartition::from_store(&ranges)?;
    let mut sorter = ExternalSortMerge::new(engine, comparator);
    if let Some(order) = output_columns {
        sorter = sorter.output_columns(order);
    }
    sorter.run(&ranges, &partitions, output)
}

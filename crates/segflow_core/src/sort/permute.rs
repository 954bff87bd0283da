//! External permutation: moves every row to a target position.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::parallel::ByteBudget;
use crate::segment::SegmentedStore;
use segflow_codec::{Row, Value};
use tracing::{debug, info};

fn target_of(row: &Row, column: usize, total: u64) -> CoreResult<u64> {
    match row.get(column) {
        Some(Value::Integer(t)) if *t >= 0 && (*t as u64) < total => Ok(*t as u64),
        Some(other) => Err(CoreError::invalid_operation(format!(
            "target position {other} outside 0..{total}"
        ))),
        None => Err(CoreError::invalid_operation(format!(
            "row has no target column {column}"
        ))),
    }
}

/// Writes every row of `input` to position `row[target_column]` of
/// `output`, dropping the target column.
///
/// The target column must hold each integer of `0..input.total_rows()`
/// exactly once. Output segment `s` receives positions
/// `[s * n, (s + 1) * n)` with `n = ceil(total / output.num_segments())`,
/// so concatenating the output segments yields the permuted sequence.
///
/// Rows are first scattered by destination segment into a temporary
/// store. Each destination is then loaded whole once its size fits the
/// engine's sort buffer budget, placed by position and written out.
///
/// # Errors
///
/// Returns an error if `output` has no segments or the wrong width, a
/// target is missing, out of range or repeated, or any read or write fails.
pub fn permute_store(
    engine: &Engine,
    input: &SegmentedStore,
    target_column: usize,
    output: &SegmentedStore,
) -> CoreResult<()> {
    let arity = input.schema().len();
    if target_column >= arity {
        return Err(CoreError::invalid_operation(format!(
            "target column {target_column} out of range ({arity} columns)"
        )));
    }
    if output.num_segments() == 0 {
        return Err(CoreError::invalid_operation("permute output has no segments"));
    }
    if output.schema().len() + 1 != arity {
        return Err(CoreError::schema_mismatch(arity - 1, output.schema().len()));
    }

    let total = input.total_rows();
    let num_buckets = output.num_segments();
    let per_bucket = total.div_ceil(num_buckets as u64).max(1);
    info!(
        rows = total,
        input_segments = input.num_segments(),
        output_segments = num_buckets,
        "permute started"
    );

    let scattered = engine.temp_store(input.schema().clone(), num_buckets)?;
    let block = scattered.block_rows();
    engine.pool().run_indexed(input.num_segments(), |segment| {
        let mut staged: Vec<Vec<Row>> = vec![Vec::new(); num_buckets];
        let mut count = 0u64;
        for row in input.segment_rows(segment)? {
            let row = row?;
            // Below `num_buckets` because the target is below `total`.
            let bucket = (target_of(&row, target_column, total)? / per_bucket) as usize;
            staged[bucket].push(row);
            count += 1;
            if staged[bucket].len() >= block {
                scattered.append_rows(bucket, std::mem::take(&mut staged[bucket]))?;
            }
        }
        for (bucket, rows) in staged.into_iter().enumerate() {
            if !rows.is_empty() {
                scattered.append_rows(bucket, rows)?;
            }
        }
        engine.stats().record_partitioned(count);
        Ok(())
    })?;
    for bucket in 0..num_buckets {
        scattered.flush_write_to_segment(bucket)?;
    }
    debug!(rows = scattered.total_rows(), "scatter finished");

    let budget = ByteBudget::new(engine.config().sort_buffer_size);
    engine.pool().run_indexed(num_buckets, |bucket| {
        let first = per_bucket * bucket as u64;
        let expected = total.saturating_sub(first).min(per_bucket);
        let found = scattered.segment_length(bucket)?;
        if found != expected {
            return Err(CoreError::invalid_operation(format!(
                "targets {first}..{} received {found} rows, expected {expected}",
                first + expected
            )));
        }
        if expected == 0 {
            return Ok(());
        }

        let bytes = scattered.segment_byte_size(bucket)?;
        let _reservation = match budget.try_acquire(bytes) {
            Some(reservation) => reservation,
            None => {
                debug!(
                    bucket,
                    bytes,
                    in_flight = budget.in_flight(),
                    "waiting for permute budget"
                );
                budget.acquire(bytes)
            }
        };

        // `expected` is at most the rows of one scattered segment.
        let mut slots: Vec<Option<Row>> = vec![None; expected as usize];
        for row in scattered.read_segment(bucket)? {
            let slot = (target_of(&row, target_column, total)? - first) as usize;
            let mut values = row.into_values();
            values.remove(target_column);
            if slots[slot].replace(Row::new(values)).is_some() {
                return Err(CoreError::invalid_operation(format!(
                    "target position {} repeated",
                    first + slot as u64
                )));
            }
        }
        // Every slot is filled: the count matched and no slot was hit twice.
        let rows: Vec<Row> = slots.into_iter().flatten().collect();
        let mut writer = output.output_iterator(bucket)?;
        for chunk in rows.chunks(output.block_rows().max(1)) {
            writer.write_batch(chunk.to_vec())?;
        }
        writer.flush()?;
        debug!(bucket, rows = expected, bytes, "placed permuted segment");
        Ok(())
    })?;

    info!(rows = output.total_rows(), "permute finished");
    Ok(())
}

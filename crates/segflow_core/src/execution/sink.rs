//! Sinks draining pipelines into stores.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::execution::operator::ExecutionNode;
use crate::segment::SegmentedStore;
use tracing::debug;

/// Drains `node` into segment `segment` of `output` and flushes it.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns the first pipeline or storage error.
pub fn materialize(
    engine: &Engine,
    node: &mut ExecutionNode,
    output: &SegmentedStore,
    segment: usize,
) -> CoreResult<u64> {
    let mut writer = output.output_iterator(segment)?;
    while let Some(batch) = node.next_batch()? {
        if batch.is_skipped() {
            return Err(CoreError::invalid_operation(format!(
                "{} emitted a skipped batch without a skip request",
                node.name()
            )));
        }
        engine.stats().record_batch(batch.len() as u64);
        writer.write_batch(batch.into_rows())?;
    }
    writer.flush()?;
    debug!(segment, rows = writer.rows_written(), "segment materialized");
    Ok(writer.rows_written())
}

/// Drains one copy of `template` per output segment on the worker pool.
///
/// Copy `i` is restricted to partition `i` of `output.num_segments()` and
/// written to segment `i`, so segment order follows partition order.
///
/// Returns the total number of rows written.
///
/// # Errors
///
/// Returns the first error raised by any copy.
pub fn materialize_parallel(
    engine: &Engine,
    template: &ExecutionNode,
    output: &SegmentedStore,
) -> CoreResult<u64> {
    let partitions = output.num_segments();
    let total = std::sync::atomic::AtomicU64::new(0);
    engine.pool().run_indexed(partitions, |i| {
        let mut node = template.for_partition(i, partitions);
        let rows = materialize(engine, &mut node, output, i)?;
        total.fetch_add(rows, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    })?;
    Ok(total.into_inner())
}

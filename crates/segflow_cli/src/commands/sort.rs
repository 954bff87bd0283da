//! Sort command implementation.

use super::{ensure_distinct, resolve_column};
use segflow_core::{sort_store, Engine, RowComparator, SegmentedStore, SortKey};
use std::path::Path;

/// Runs the sort command.
///
/// Writes `partitions` output segments (default: as many as the input)
/// whose concatenation is the input ordered by `key`.
pub fn run(
    engine: &Engine,
    input: &Path,
    output: &Path,
    key: &str,
    desc: bool,
    partitions: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    ensure_distinct(input, output)?;
    let input = SegmentedStore::open(input)?;
    let column = resolve_column(input.schema(), key)?;
    let comparator = RowComparator::new(vec![if desc {
        SortKey::desc(column)
    } else {
        SortKey::asc(column)
    }]);
    let segments = partitions.unwrap_or(input.num_segments()).max(1);

    let before = engine.stats().snapshot();
    let store = SegmentedStore::open_for_write(output, input.schema().clone(), segments)?
        .with_block_rows(engine.config().block_size);
    sort_store(engine, &input, comparator, None, &store)?;
    store.close()?;

    let stats = engine.stats().snapshot().delta(&before);
    println!(
        "Sorted {} rows into {} segments ({} segments sorted in memory)",
        store.total_rows(),
        segments,
        stats.segments_sorted
    );
    Ok(())
}

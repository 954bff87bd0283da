//! Group-by command implementation.

use super::{ensure_distinct, resolve_column};
use segflow_core::{Aggregate, Engine, HashPartitionGroupBy, Schema, SegmentedStore};
use std::path::Path;

/// Parses `op` or `op:column`, e.g. `count` or `sum:seq`.
pub fn parse_aggregate(
    schema: &Schema,
    spec: &str,
) -> Result<Aggregate, Box<dyn std::error::Error>> {
    let (op, column) = match spec.split_once(':') {
        Some((op, column)) => (op, Some(resolve_column(schema, column)?)),
        None => (spec, None),
    };
    match (Aggregate::from_name(op, column.unwrap_or(0)), column) {
        (Some(Aggregate::Count), _) => Ok(Aggregate::Count),
        (Some(aggregate), Some(_)) => Ok(aggregate),
        (Some(_), None) => {
            Err(format!("aggregate {op:?} needs a column, as in {op}:<column>").into())
        }
        (None, _) => Err(format!("unknown aggregate {op:?}").into()),
    }
}

/// Runs the groupby command.
///
/// Without aggregates every row is kept (or one per key with `dedup`);
/// with aggregates one row per key is written.
pub fn run(
    engine: &Engine,
    input: &Path,
    output: &Path,
    key: &str,
    dedup: bool,
    aggregates: &[String],
    buckets: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    ensure_distinct(input, output)?;
    let input = SegmentedStore::open(input)?;
    let column = resolve_column(input.schema(), key)?;
    let aggregates = aggregates
        .iter()
        .map(|spec| parse_aggregate(input.schema(), spec))
        .collect::<Result<Vec<_>, _>>()?;
    let group_by = HashPartitionGroupBy::new(engine, column)
        .dedup(dedup)
        .aggregate(aggregates);
    let buckets = buckets.unwrap_or_else(|| group_by.recommended_buckets(&input));

    let before = engine.stats().snapshot();
    let schema = group_by.output_schema(input.schema());
    let store = SegmentedStore::open_for_write(output, schema, buckets)?
        .with_block_rows(engine.config().block_size);
    group_by.run(&input, &store)?;
    store.close()?;

    let stats = engine.stats().snapshot().delta(&before);
    println!(
        "Grouped {} rows into {} buckets ({} chunks spilled, {} duplicates dropped)",
        store.total_rows(),
        buckets,
        stats.chunks_flushed,
        stats.rows_deduplicated
    );
    Ok(())
}

//! Permute command implementation.

use super::{ensure_distinct, resolve_column};
use segflow_core::{permute_store, Engine, Schema, SegmentedStore};
use std::path::Path;

/// Runs the permute command.
///
/// Moves each row to the position held in its `target` column and drops
/// that column from the output.
pub fn run(
    engine: &Engine,
    input: &Path,
    output: &Path,
    target: &str,
    segments: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    ensure_distinct(input, output)?;
    let input = SegmentedStore::open(input)?;
    let column = resolve_column(input.schema(), target)?;
    let names: Vec<&String> = input
        .schema()
        .columns()
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != column)
        .map(|(_, name)| name)
        .collect();
    let segments = segments.unwrap_or(input.num_segments()).max(1);

    let store = SegmentedStore::open_for_write(output, Schema::new(names), segments)?
        .with_block_rows(engine.config().block_size);
    permute_store(engine, &input, column, &store)?;
    store.close()?;

    println!("Permuted {} rows into {segments} segments", store.total_rows());
    Ok(())
}

//! Generate command implementation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use segflow_codec::row;
use segflow_core::{Schema, SegmentedStore};
use std::path::Path;
use tracing::info;

/// Columns of a generated store.
pub const COLUMNS: [&str; 3] = ["key", "seq", "tag"];

/// Runs the generate command.
///
/// Rows are spread over segments in contiguous runs of `seq`; keys are
/// drawn uniformly from `0..keys`.
pub fn run(
    dir: &Path,
    rows: u64,
    segments: usize,
    keys: i64,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if segments == 0 {
        return Err("at least one segment is required".into());
    }
    if keys <= 0 {
        return Err("at least one key is required".into());
    }

    let store = SegmentedStore::open_for_write(dir, Schema::new(COLUMNS), segments)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let per_segment = rows.div_ceil(segments as u64).max(1);
    for segment in 0..segments {
        let begin = per_segment * segment as u64;
        let end = (begin + per_segment).min(rows);
        let mut writer = store.output_iterator(segment)?;
        for seq in begin..end {
            let key = rng.gen_range(0..keys);
            writer.write(row![key, seq as i64, format!("row-{seq}")])?;
        }
        writer.flush()?;
    }
    store.close()?;

    info!(rows, segments, keys, dir = %dir.display(), "generated store");
    println!("Wrote {rows} rows in {segments} segments to {}", dir.display());
    Ok(())
}

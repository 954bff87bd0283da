//! Dump command implementation.

use segflow_core::SegmentedStore;
use std::io::Write;
use std::path::Path;

/// Which rows of a store to print.
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpRange {
    /// Only this segment.
    pub segment: Option<usize>,
    /// Rows to pass over before printing, counted across segments.
    pub offset: u64,
    /// Maximum number of rows to print.
    pub limit: Option<usize>,
}

/// Runs the dump command.
///
/// Prints a header with the column names, then one tab-separated row per
/// line prefixed with its segment index.
pub fn run(dir: &Path, range: DumpRange) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    write_rows(dir, range, &mut stdout.lock())
}

pub(crate) fn write_rows(
    dir: &Path,
    range: DumpRange,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SegmentedStore::open(dir)?;
    let segments: Vec<usize> = match range.segment {
        Some(id) if id < store.num_segments() => vec![id],
        Some(id) => {
            return Err(format!(
                "segment {id} out of range (store has {})",
                store.num_segments()
            )
            .into())
        }
        None => (0..store.num_segments()).collect(),
    };

    writeln!(out, "segment\t{}", store.schema().columns().join("\t"))?;
    let mut to_skip = range.offset;
    let mut remaining = range.limit.unwrap_or(usize::MAX);
    for id in segments {
        let mut rows = store.segment_rows(id)?;
        // Whole blocks inside the offset are never decoded.
        to_skip -= rows.skip_rows(to_skip)?;
        for row in rows {
            if remaining == 0 {
                return Ok(());
            }
            writeln!(out, "{id}\t{}", row?)?;
            remaining -= 1;
        }
    }
    Ok(())
}

//! Inspect command implementation.

use super::format_size;
use segflow_core::SegmentedStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Column names.
    pub columns: Vec<String>,
    /// Total number of rows.
    pub total_rows: u64,
    /// Total encoded size in bytes.
    pub total_size: u64,
    /// Per-segment details.
    pub segments: Vec<SegmentInfo>,
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment index.
    pub id: usize,
    /// Number of rows.
    pub rows: u64,
    /// Number of blocks.
    pub blocks: usize,
    /// Encoded size in bytes.
    pub size: u64,
}

/// Collects statistics for the store at `dir`.
pub fn inspect(dir: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = SegmentedStore::open(dir)?;
    let segments = (0..store.num_segments())
        .map(|id| {
            Ok(SegmentInfo {
                id,
                rows: store.segment_length(id)?,
                blocks: store.num_blocks(id)?,
                size: store.segment_byte_size(id)?,
            })
        })
        .collect::<Result<Vec<_>, segflow_core::CoreError>>()?;
    Ok(InspectResult {
        path: dir.display().to_string(),
        columns: store.schema().columns().to_vec(),
        total_rows: store.total_rows(),
        total_size: segments.iter().map(|s| s.size).sum(),
        segments,
    })
}

/// Runs the inspect command.
pub fn run(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(dir)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Segflow Store Inspection");
    println!("========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Columns: {}", result.columns.join(", "));
    println!();
    println!("Totals:");
    println!("  Rows:     {}", result.total_rows);
    println!("  Size:     {} bytes", format_size(result.total_size));
    println!("  Segments: {}", result.segments.len());
    println!();
    println!("Segments:");
    for segment in &result.segments {
        println!(
            "  [{}] {} rows, {} blocks, {} bytes",
            segment.id,
            segment.rows,
            segment.blocks,
            format_size(segment.size)
        );
    }
}

//! Verify command implementation.

use segflow_core::SegmentedStore;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of blocks checked.
    pub blocks_checked: usize,
    /// Number of rows decoded.
    pub rows_checked: u64,
    /// Blocks that failed to read or decode.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reads and checks every block of the store at `dir`.
///
/// Opening the store already validates block framing; this additionally
/// verifies each block's checksum and payload.
pub fn verify(dir: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let store = SegmentedStore::open(dir)?;
    let mut result = VerifyResult::default();
    for segment in 0..store.num_segments() {
        for block in 0..store.num_blocks(segment)? {
            result.blocks_checked += 1;
            match store.read_block(segment, block) {
                Ok(rows) => result.rows_checked += rows.len() as u64,
                Err(e) => result
                    .errors
                    .push(format!("segment {segment} block {block}: {e}")),
            }
        }
    }
    Ok(result)
}

/// Runs the verify command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", dir.display());
    let result = verify(dir)?;
    println!(
        "  Blocks checked: {}, rows: {}",
        result.blocks_checked, result.rows_checked
    );
    for error in &result.errors {
        println!("  ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

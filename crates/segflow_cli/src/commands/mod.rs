//! CLI command implementations.

pub mod dump;
pub mod generate;
pub mod groupby;
pub mod inspect;
pub mod permute;
pub mod sort;
pub mod verify;

use segflow_core::{Config, Engine, Schema};
use std::path::{Path, PathBuf};

/// Global options that shape the engine.
pub struct EngineSettings {
    /// Worker thread override.
    pub threads: Option<usize>,
    /// Scratch directory override.
    pub temp_dir: Option<PathBuf>,
}

impl EngineSettings {
    /// Builds an engine from the environment plus command-line overrides.
    pub fn engine(&self) -> Result<Engine, Box<dyn std::error::Error>> {
        let mut config = Config::from_env()?;
        if let Some(threads) = self.threads {
            config = config.num_threads(threads);
        }
        if let Some(dir) = &self.temp_dir {
            config = config.temp_dir(dir);
        }
        Ok(Engine::new(config)?)
    }
}

/// Resolves a column given by name or by index.
pub fn resolve_column(schema: &Schema, column: &str) -> Result<usize, Box<dyn std::error::Error>> {
    if let Some(index) = schema.index_of(column) {
        return Ok(index);
    }
    match column.parse::<usize>() {
        Ok(index) if index < schema.len() => Ok(index),
        _ => Err(format!(
            "unknown column {column:?} (columns: {})",
            schema.columns().join(", ")
        )
        .into()),
    }
}

/// Rejects an output directory that resolves to the input store.
///
/// Opening the output for write clears it, so the two must differ.
pub fn ensure_distinct(input: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let input = input.canonicalize()?;
    let output = match output.canonicalize() {
        Ok(path) => path,
        // Not created yet: resolve through the parent instead.
        Err(_) => match (output.parent(), output.file_name()) {
            (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                match parent.canonicalize() {
                    Ok(parent) => parent.join(name),
                    Err(_) => return Ok(()),
                }
            }
            _ => std::env::current_dir()?.join(output),
        },
    };
    if input == output {
        return Err(format!("output {} is the input store", output.display()).into());
    }
    Ok(())
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

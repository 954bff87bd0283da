//! Segflow CLI
//!
//! Command-line tools for segmented row stores.
//!
//! # Commands
//!
//! - `generate` - Write a sample store
//! - `inspect` - Display schema and segment statistics
//! - `verify` - Check every block checksum
//! - `sort` - Externally sort a store by a key column
//! - `groupby` - Group a store by a key column, optionally aggregating
//! - `permute` - Move rows to the positions named by a column
//! - `dump` - Print rows

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Segflow command-line tools.
#[derive(Parser)]
#[command(name = "segflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Worker threads (defaults to SEGFLOW_NUM_THREADS or the CPU count)
    #[arg(global = true, short = 't', long)]
    threads: Option<usize>,

    /// Directory for scratch stores (defaults to SEGFLOW_TEMP_DIR)
    #[arg(global = true, long)]
    temp_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample store with random integer keys
    Generate {
        /// Output store directory
        dir: PathBuf,

        /// Number of rows
        #[arg(short, long, default_value = "100000")]
        rows: u64,

        /// Number of segments
        #[arg(short, long, default_value = "4")]
        segments: usize,

        /// Number of distinct keys
        #[arg(short, long, default_value = "1000")]
        keys: i64,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Display schema and segment statistics
    Inspect {
        /// Store directory
        dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every block checksum
    Verify {
        /// Store directory
        dir: PathBuf,
    },

    /// Externally sort a store by a key column
    Sort {
        /// Input store directory
        input: PathBuf,

        /// Output store directory
        output: PathBuf,

        /// Key column name or index
        #[arg(short, long)]
        key: String,

        /// Sort descending
        #[arg(short, long)]
        desc: bool,

        /// Number of output segments (defaults to the input's)
        #[arg(short, long)]
        partitions: Option<usize>,
    },

    /// Group a store by a key column
    Groupby {
        /// Input store directory
        input: PathBuf,

        /// Output store directory
        output: PathBuf,

        /// Key column name or index
        #[arg(short, long)]
        key: String,

        /// Keep one row per key
        #[arg(short, long)]
        dedup: bool,

        /// Aggregate per key, as op or op:column (count, sum, min, max,
        /// mean, variance, count_distinct, count_non_null, select_one)
        #[arg(short, long = "agg")]
        aggregates: Vec<String>,

        /// Number of buckets (defaults to a multiple of the thread count)
        #[arg(short, long)]
        buckets: Option<usize>,
    },

    /// Move rows to the positions named by a column
    Permute {
        /// Input store directory
        input: PathBuf,

        /// Output store directory
        output: PathBuf,

        /// Column holding each row's target position
        #[arg(long)]
        target: String,

        /// Number of output segments (defaults to the input's)
        #[arg(short, long)]
        segments: Option<usize>,
    },

    /// Print rows
    Dump {
        /// Store directory
        dir: PathBuf,

        /// Only this segment
        #[arg(short, long)]
        segment: Option<usize>,

        /// Rows to pass over before printing
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Maximum number of rows to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = commands::EngineSettings {
        threads: cli.threads,
        temp_dir: cli.temp_dir,
    };

    match cli.command {
        Commands::Generate {
            dir,
            rows,
            segments,
            keys,
            seed,
        } => {
            commands::generate::run(&dir, rows, segments, keys, seed)?;
        }
        Commands::Inspect { dir, format } => {
            commands::inspect::run(&dir, &format)?;
        }
        Commands::Verify { dir } => {
            commands::verify::run(&dir)?;
        }
        Commands::Sort {
            input,
            output,
            key,
            desc,
            partitions,
        } => {
            let engine = settings.engine()?;
            commands::sort::run(&engine, &input, &output, &key, desc, partitions)?;
        }
        Commands::Groupby {
            input,
            output,
            key,
            dedup,
            aggregates,
            buckets,
        } => {
            let engine = settings.engine()?;
            commands::groupby::run(
                &engine,
                &input,
                &output,
                &key,
                dedup,
                &aggregates,
                buckets,
            )?;
        }
        Commands::Permute {
            input,
            output,
            target,
            segments,
        } => {
            let engine = settings.engine()?;
            commands::permute::run(&engine, &input, &output, &target, segments)?;
        }
        Commands::Dump {
            dir,
            segment,
            offset,
            limit,
        } => {
            let range = commands::dump::DumpRange {
                segment,
                offset,
                limit,
            };
            commands::dump::run(&dir, range)?;
        }
        Commands::Version => {
            println!("Segflow CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Segflow Core v{}", segflow_core::VERSION);
        }
    }

    Ok(())
}

//! Hash-partitioned group-by and per-group aggregation.

mod aggregate;
mod hash_partition;
mod merge;

pub use aggregate::{aggregate_schema, Aggregate};
pub use hash_partition::HashPartitionGroupBy;

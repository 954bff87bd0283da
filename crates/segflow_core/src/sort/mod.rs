//! Sorting and permutation.
//!
//! [`ExternalSortMerge`] sorts segments that already hold disjoint key
//! ranges. [`sort_store`] handles arbitrary input by range-partitioning it
//! first with [`partition_by_key_ranges`]. [`permute_store`] moves rows to
//! explicit target positions.

mod comparator;
mod partition;
mod permute;
mod sort_merge;

pub use comparator::{NullOrder, RowComparator, SortKey, SortOrder};
pub use partition::{partition_by_key_ranges, sort_store};
pub use permute::permute_store;
pub use sort_merge::{ExternalSortMerge, SortPartition};

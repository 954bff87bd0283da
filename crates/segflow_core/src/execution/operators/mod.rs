//! Operators shipped with the execution framework.

mod combine;
mod filter;
mod source;
mod transform;

pub use combine::{Append, Slice};
pub use filter::LogicalFilter;
pub use source::{RangeSource, RowSource, SegmentSource};
pub use transform::{Project, RowFn, Transform};

//! Pull-based streaming execution.
//!
//! A pipeline is a tree of [`ExecutionNode`]s. Each node wraps an
//! [`Operator`], a restartable generator that produces one
//! [`ExecutionBuffer`] per call and keeps its progress in its own fields.
//! Pulling from the root resumes upstream operators on demand; everything
//! runs on the calling thread.
//!
//! ## Skipping
//!
//! A consumer that will discard rows (such as [`operators::Slice`]) can
//! pull with [`ExecutionContext::get_next_skipping`]. Producers that can
//! count rows cheaply answer with an [`ExecutionBuffer::skipped`] batch
//! instead of materializing the rows.
//!
//! ## Parallelism
//!
//! A pipeline is never shared between threads. [`materialize_parallel`]
//! clones a template pipeline once per output segment and drains the
//! clones on the worker pool.

mod buffer;
mod operator;
pub mod operators;
mod sink;

pub use buffer::ExecutionBuffer;
pub use operator::{collect_rows, ExecutionContext, ExecutionNode, Operator};
pub use sink::{materialize, materialize_parallel};

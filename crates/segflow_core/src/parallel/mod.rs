//! Worker pool and back-pressure primitives shared by the bulk algorithms.

mod budget;
mod pool;

pub use budget::{BudgetGuard, ByteBudget};
pub use pool::WorkerPool;

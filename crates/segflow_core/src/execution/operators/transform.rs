//! Row-wise operators.

use crate::error::CoreResult;
use crate::execution::operator::{ExecutionContext, Operator};
use segflow_codec::Row;
use std::sync::Arc;

/// Selects and reorders columns.
#[derive(Debug, Clone)]
pub struct Project {
    columns: Vec<usize>,
}

impl Project {
    /// Keeps `columns`, in that order. Columns may repeat.
    #[must_use]
    pub fn new(columns: Vec<usize>) -> Self {
        Self { columns }
    }
}

impl Operator for Project {
    fn name(&self) -> &'static str {
        "project"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        let limit = ctx.skip_limit();
        let Some(batch) = ctx.get_next_skipping(0, limit)? else {
            return Ok(());
        };
        if batch.is_skipped() {
            return ctx.emit(batch);
        }
        let projected: Vec<Row> = batch
            .into_iter()
            .map(|row| row.project(&self.columns))
            .collect();
        ctx.emit(projected.into())
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

/// A fallible row-to-row function.
pub type RowFn = Arc<dyn Fn(Row) -> CoreResult<Row> + Send + Sync>;

/// Applies a function to every row.
///
/// Skip requests are forwarded upstream; skipped rows are never passed to
/// the function.
#[derive(Clone)]
pub struct Transform {
    f: RowFn,
}

impl Transform {
    /// Wraps `f`.
    pub fn new(f: impl Fn(Row) -> CoreResult<Row> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl Operator for Transform {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        let limit = ctx.skip_limit();
        let Some(batch) = ctx.get_next_skipping(0, limit)? else {
            return Ok(());
        };
        if batch.is_skipped() {
            return ctx.emit(batch);
        }
        let out = batch
            .into_iter()
            .map(|row| (self.f)(row))
            .collect::<CoreResult<Vec<Row>>>()?;
        ctx.emit(out.into())
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform").finish_non_exhaustive()
    }
}

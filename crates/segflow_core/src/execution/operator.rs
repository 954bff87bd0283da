//! Operator trait, execution context and pipeline nodes.

use crate::error::{CoreError, CoreResult};
use crate::execution::buffer::ExecutionBuffer;
use crate::segment::DEFAULT_BLOCK_ROWS;

/// A pipeline operator.
///
/// An operator is a restartable generator. Each call to
/// [`execute`](Self::execute) runs until it has emitted one batch through
/// [`ExecutionContext::emit`] and then returns; all progress (cursors,
/// partial results, the current phase) lives in the operator's fields, so
/// the next call resumes where the previous one stopped. Returning without
/// emitting signals exhaustion.
///
/// Operators pull input through [`ExecutionContext::get_next`]. They must
/// not keep references into a batch after emitting it.
pub trait Operator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Number of inputs the operator consumes.
    fn num_inputs(&self) -> usize {
        0
    }

    /// Resumes the operator until it emits one batch or is exhausted.
    ///
    /// # Errors
    ///
    /// Errors propagate to the driver unchanged; the pipeline is not
    /// usable afterwards.
    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()>;

    /// Returns a copy of this operator with the same configuration, in its
    /// initial state.
    fn fresh(&self) -> Box<dyn Operator>;

    /// Restricts a source to partition `index` of `count`.
    ///
    /// Used when a pipeline is cloned once per output segment. Operators
    /// that do not produce rows of their own ignore it.
    fn set_partition(&mut self, _index: usize, _count: usize) {}
}

/// What an operator sees while it runs.
pub struct ExecutionContext<'a> {
    inputs: &'a mut [ExecutionNode],
    block_size: usize,
    skip_limit: usize,
    output: Option<ExecutionBuffer>,
}

impl ExecutionContext<'_> {
    /// Pulls the next batch from input `input`.
    ///
    /// Returns `None` once that input is exhausted, and on every later call.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` does not exist or the upstream operator
    /// fails.
    pub fn get_next(&mut self, input: usize) -> CoreResult<Option<ExecutionBuffer>> {
        self.pull(input, 0)
    }

    /// Pulls the next batch from input `input`, announcing that the caller
    /// will discard up to `max_rows` rows.
    ///
    /// The upstream operator may answer with an
    /// [`ExecutionBuffer::skipped`] batch of at most `max_rows` rows instead
    /// of materializing them.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` does not exist or the upstream operator
    /// fails.
    pub fn get_next_skipping(
        &mut self,
        input: usize,
        max_rows: usize,
    ) -> CoreResult<Option<ExecutionBuffer>> {
        self.pull(input, max_rows)
    }

    fn pull(&mut self, input: usize, skip_limit: usize) -> CoreResult<Option<ExecutionBuffer>> {
        let inputs = self.inputs.len();
        let node = self.inputs.get_mut(input).ok_or_else(|| {
            CoreError::invalid_operation(format!("input {input} out of range ({inputs} inputs)"))
        })?;
        node.pull(skip_limit)
    }

    /// Hands a finished batch downstream.
    ///
    /// The operator must return from `execute` after emitting.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch was already emitted in this call.
    pub fn emit(&mut self, batch: ExecutionBuffer) -> CoreResult<()> {
        if self.output.is_some() {
            return Err(CoreError::invalid_operation(
                "emit called twice without returning",
            ));
        }
        self.output = Some(batch);
        Ok(())
    }

    /// Preferred number of rows per emitted batch.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns whether the consumer asked to skip rows.
    #[must_use]
    pub fn should_skip(&self) -> bool {
        self.skip_limit > 0
    }

    /// Maximum number of rows a skipped batch may stand for.
    #[must_use]
    pub fn skip_limit(&self) -> usize {
        self.skip_limit
    }

    /// Number of inputs wired to the running operator.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }
}

/// An operator together with the nodes feeding it.
pub struct ExecutionNode {
    operator: Box<dyn Operator>,
    inputs: Vec<ExecutionNode>,
    block_size: usize,
    exhausted: bool,
}

impl ExecutionNode {
    /// Wires `operator` to `inputs`.
    pub fn new(operator: impl Operator + 'static, inputs: Vec<ExecutionNode>) -> Self {
        Self::from_boxed(Box::new(operator), inputs)
    }

    /// Creates a node without inputs.
    pub fn source(operator: impl Operator + 'static) -> Self {
        Self::new(operator, Vec::new())
    }

    fn from_boxed(operator: Box<dyn Operator>, inputs: Vec<ExecutionNode>) -> Self {
        Self {
            operator,
            inputs,
            block_size: DEFAULT_BLOCK_ROWS,
            exhausted: false,
        }
    }

    /// Sets the batch size for this node and everything upstream.
    #[must_use]
    pub fn with_block_size(mut self, rows: usize) -> Self {
        self.set_block_size(rows);
        self
    }

    fn set_block_size(&mut self, rows: usize) {
        self.block_size = rows.max(1);
        for input in &mut self.inputs {
            input.set_block_size(rows);
        }
    }

    /// Returns the operator name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.operator.name()
    }

    /// Returns whether the operator has signalled exhaustion.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pulls the next batch.
    ///
    /// # Errors
    ///
    /// Returns the first error raised anywhere in the pipeline.
    pub fn next_batch(&mut self) -> CoreResult<Option<ExecutionBuffer>> {
        self.pull(0)
    }

    /// Pulls the next batch, allowing up to `max_rows` rows to be skipped.
    ///
    /// # Errors
    ///
    /// Returns the first error raised anywhere in the pipeline.
    pub fn next_skipping(&mut self, max_rows: usize) -> CoreResult<Option<ExecutionBuffer>> {
        self.pull(max_rows)
    }

    fn pull(&mut self, skip_limit: usize) -> CoreResult<Option<ExecutionBuffer>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.inputs.len() != self.operator.num_inputs() {
            return Err(CoreError::invalid_operation(format!(
                "{} expects {} inputs, got {}",
                self.operator.name(),
                self.operator.num_inputs(),
                self.inputs.len()
            )));
        }

        let mut ctx = ExecutionContext {
            inputs: &mut self.inputs,
            block_size: self.block_size,
            skip_limit,
            output: None,
        };
        self.operator.execute(&mut ctx)?;

        match ctx.output.take() {
            Some(batch) => Ok(Some(batch)),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Returns a copy of the pipeline in its initial state.
    #[must_use]
    pub fn fresh_clone(&self) -> ExecutionNode {
        ExecutionNode {
            operator: self.operator.fresh(),
            inputs: self.inputs.iter().map(ExecutionNode::fresh_clone).collect(),
            block_size: self.block_size,
            exhausted: false,
        }
    }

    /// Restricts every source in the pipeline to partition `index` of
    /// `count`.
    pub fn set_partition(&mut self, index: usize, count: usize) {
        self.operator.set_partition(index, count);
        for input in &mut self.inputs {
            input.set_partition(index, count);
        }
    }

    /// Returns a fresh copy of the pipeline restricted to partition `index`
    /// of `count`.
    #[must_use]
    pub fn for_partition(&self, index: usize, count: usize) -> ExecutionNode {
        let mut node = self.fresh_clone();
        node.set_partition(index, count);
        node
    }
}

impl std::fmt::Debug for ExecutionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionNode")
            .field("operator", &self.operator.name())
            .field("inputs", &self.inputs)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Drains a pipeline into memory.
///
/// # Errors
///
/// Returns the first pipeline error.
pub fn collect_rows(node: &mut ExecutionNode) -> CoreResult<Vec<segflow_codec::Row>> {
    let mut rows = Vec::new();
    while let Some(batch) = node.next_batch()? {
        rows.extend(batch);
    }
    Ok(rows)
}

//! Mask-driven row filter.

use crate::error::{CoreError, CoreResult};
use crate::execution::operator::{ExecutionContext, Operator};
use segflow_codec::{Row, Value};
use std::collections::VecDeque;

const DATA: usize = 0;
const MASK: usize = 1;

/// Keeps the rows of input 0 whose matching row in input 1 is truthy.
///
/// The mask input must yield exactly as many rows as the data input; its
/// first column is tested. `true` and non-zero integers are truthy.
/// The two inputs may produce batches of different sizes.
#[derive(Debug, Default)]
pub struct LogicalFilter {
    data: VecDeque<Row>,
    mask: VecDeque<bool>,
    data_done: bool,
    mask_done: bool,
}

impl LogicalFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn refill(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        if self.data.is_empty() && !self.data_done {
            match ctx.get_next(DATA)? {
                Some(batch) => self.data.extend(batch),
                None => self.data_done = true,
            }
        }
        if self.mask.is_empty() && !self.mask_done {
            match ctx.get_next(MASK)? {
                Some(batch) => self.mask.extend(batch.into_iter().map(|r| is_truthy(r.get(0)))),
                None => self.mask_done = true,
            }
        }
        Ok(())
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Integer(n)) => *n != 0,
        _ => false,
    }
}

impl Operator for LogicalFilter {
    fn name(&self) -> &'static str {
        "logical_filter"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        let mut out = Vec::with_capacity(ctx.block_size());
        while out.len() < ctx.block_size() {
            self.refill(ctx)?;
            match (self.data.is_empty(), self.mask.is_empty()) {
                (true, true) if self.data_done && self.mask_done => break,
                (false, true) if self.mask_done => {
                    return Err(CoreError::invalid_operation(
                        "filter mask shorter than data",
                    ))
                }
                (true, false) if self.data_done => {
                    return Err(CoreError::invalid_operation(
                        "filter mask longer than data",
                    ))
                }
                _ => {}
            }
            let n = self
                .data
                .len()
                .min(self.mask.len())
                .min(ctx.block_size() - out.len());
            for (row, keep) in self.data.drain(..n).zip(self.mask.drain(..n)) {
                if keep {
                    out.push(row);
                }
            }
        }
        if out.is_empty() {
            return Ok(());
        }
        ctx.emit(out.into())
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operator::{collect_rows, ExecutionNode};
    use crate::execution::operators::{RangeSource, RowSource};
    use segflow_codec::row;

    fn mask(bits: &[bool]) -> ExecutionNode {
        ExecutionNode::source(RowSource::new(bits.iter().map(|b| row![*b]).collect()))
    }

    #[test]
    fn keeps_masked_rows() {
        let data = ExecutionNode::source(RangeSource::new(0..6));
        let bits = [true, false, true, false, false, true];
        let mut node =
            ExecutionNode::new(LogicalFilter::new(), vec![data, mask(&bits)]).with_block_size(4);
        assert_eq!(
            collect_rows(&mut node).unwrap(),
            vec![row![0i64], row![2i64], row![5i64]]
        );
    }

    #[test]
    fn mismatched_batch_sizes() {
        let data = ExecutionNode::source(RangeSource::new(0..10)).with_block_size(3);
        let bits: Vec<bool> = (0..10).map(|i| i % 2 == 1).collect();
        let mut node = ExecutionNode::new(LogicalFilter::new(), vec![data, mask(&bits)]);
        let kept: Vec<i64> = collect_rows(&mut node)
            .unwrap()
            .iter()
            .map(|r| r[0].as_integer().unwrap())
            .collect();
        assert_eq!(kept, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let data = ExecutionNode::source(RangeSource::new(0..5));
        let mut node = ExecutionNode::new(LogicalFilter::new(), vec![data, mask(&[true, true])]);
        assert!(matches!(
            collect_rows(&mut node),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn all_false_is_empty() {
        let data = ExecutionNode::source(RangeSource::new(0..3));
        let mut node =
            ExecutionNode::new(LogicalFilter::new(), vec![data, mask(&[false, false, false])]);
        assert!(collect_rows(&mut node).unwrap().is_empty());
        assert!(node.is_exhausted());
    }
}

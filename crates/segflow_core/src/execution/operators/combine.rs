//! Operators that concatenate or cut streams.

use crate::error::{CoreError, CoreResult};
use crate::execution::operator::{ExecutionContext, Operator};

/// Concatenates its inputs in order.
#[derive(Debug, Clone)]
pub struct Append {
    inputs: usize,
    current: usize,
}

impl Append {
    /// Creates an append over `inputs` inputs.
    #[must_use]
    pub fn new(inputs: usize) -> Self {
        Self { inputs, current: 0 }
    }
}

impl Operator for Append {
    fn name(&self) -> &'static str {
        "append"
    }

    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        let limit = ctx.skip_limit();
        while self.current < self.inputs {
            match ctx.get_next_skipping(self.current, limit)? {
                Some(batch) => return ctx.emit(batch),
                None => self.current += 1,
            }
        }
        Ok(())
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(Self::new(self.inputs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SliceState {
    Skipping,
    Taking,
    Done,
}

/// Passes rows `[begin, end)` of its input.
///
/// Rows before `begin` are requested as skips, so sources that can count
/// rows without decoding them never materialize the prefix.
#[derive(Debug, Clone)]
pub struct Slice {
    begin: u64,
    end: u64,
    pos: u64,
    state: SliceState,
}

impl Slice {
    /// Creates a slice of rows `begin..end`.
    #[must_use]
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end: end.max(begin),
            pos: 0,
            state: SliceState::Skipping,
        }
    }
}

impl Operator for Slice {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        loop {
            match self.state {
                SliceState::Skipping => {
                    if self.pos >= self.begin {
                        self.state = SliceState::Taking;
                        continue;
                    }
                    let want = self.begin - self.pos;
                    let limit = usize::try_from(want).unwrap_or(usize::MAX);
                    let Some(batch) = ctx.get_next_skipping(0, limit)? else {
                        self.state = SliceState::Done;
                        continue;
                    };
                    let n = batch.len() as u64;
                    if batch.is_skipped() && n > want {
                        return Err(CoreError::invalid_operation(format!(
                            "skipped {n} rows, at most {want} requested"
                        )));
                    }
                    if n <= want {
                        self.pos += n;
                        continue;
                    }
                    // The batch straddles `begin`.
                    let mut rows = batch.into_rows();
                    rows.drain(..limit);
                    rows.truncate(usize::try_from(self.end - self.begin).unwrap_or(usize::MAX));
                    self.pos = self.begin + rows.len() as u64;
                    self.state = SliceState::Taking;
                    if !rows.is_empty() {
                        return ctx.emit(rows.into());
                    }
                }
                SliceState::Taking => {
                    if self.pos >= self.end {
                        self.state = SliceState::Done;
                        continue;
                    }
                    let left = usize::try_from(self.end - self.pos).unwrap_or(usize::MAX);
                    let limit = ctx.skip_limit().min(left);
                    let Some(batch) = ctx.get_next_skipping(0, limit)? else {
                        self.state = SliceState::Done;
                        continue;
                    };
                    if batch.is_skipped() {
                        self.pos += batch.len() as u64;
                        return ctx.emit(batch);
                    }
                    let mut rows = batch.into_rows();
                    rows.truncate(left);
                    if rows.is_empty() {
                        continue;
                    }
                    self.pos += rows.len() as u64;
                    return ctx.emit(rows.into());
                }
                SliceState::Done => return Ok(()),
            }
        }
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(Self::new(self.begin, self.end))
    }
}

//! Source operators: rows from a range, from memory, or from a store.

use crate::error::CoreResult;
use crate::execution::buffer::ExecutionBuffer;
use crate::execution::operator::{ExecutionContext, Operator};
use crate::segment::SegmentedStore;
use segflow_codec::{Row, Value};
use std::ops::Range;
use std::sync::Arc;

/// Splits `0..total` into `count` near-equal parts and returns part `index`.
pub(crate) fn split_range(total: u64, index: usize, count: usize) -> Range<u64> {
    let count = count.max(1) as u128;
    let index = (index as u128).min(count);
    // Widened so `total * index` cannot overflow; both bounds stay <= total.
    let begin = (u128::from(total) * index / count) as u64;
    let end = (u128::from(total) * (index + 1).min(count) / count) as u64;
    begin..end
}

/// Generates single-column rows holding the integers of a range.
#[derive(Debug, Clone)]
pub struct RangeSource {
    start: i64,
    end: i64,
    next: i64,
}

impl RangeSource {
    /// Creates a source producing `start..end`.
    #[must_use]
    pub fn new(range: Range<i64>) -> Self {
        Self {
            start: range.start,
            end: range.end.max(range.start),
            next: range.start,
        }
    }
}

impl Operator for RangeSource {
    fn name(&self) -> &'static str {
        "range_source"
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        let remaining = self.end.abs_diff(self.next);
        if remaining == 0 {
            return Ok(());
        }
        if ctx.should_skip() {
            let n = remaining.min(ctx.skip_limit() as u64);
            self.next = self.next.saturating_add_unsigned(n);
            return ctx.emit(ExecutionBuffer::skipped(n as usize));
        }
        let n = remaining.min(ctx.block_size() as u64);
        let end = self.next.saturating_add_unsigned(n);
        let batch: Vec<Row> = (self.next..end)
            .map(|v| Row::new(vec![Value::Integer(v)]))
            .collect();
        self.next = end;
        ctx.emit(batch.into())
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(Self::new(self.start..self.end))
    }

    fn set_partition(&mut self, index: usize, count: usize) {
        let part = split_range(self.end.abs_diff(self.start), index, count);
        let start = self.start;
        self.start = start.saturating_add_unsigned(part.start);
        self.end = start.saturating_add_unsigned(part.end);
        self.next = self.start;
    }
}

/// Emits rows held in memory.
#[derive(Debug, Clone)]
pub struct RowSource {
    rows: Arc<Vec<Row>>,
    begin: usize,
    end: usize,
    next: usize,
}

impl RowSource {
    /// Creates a source over `rows`.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        let end = rows.len();
        Self {
            rows: Arc::new(rows),
            begin: 0,
            end,
            next: 0,
        }
    }
}

impl Operator for RowSource {
    fn name(&self) -> &'static str {
        "row_source"
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        let remaining = self.end - self.next;
        if remaining == 0 {
            return Ok(());
        }
        if ctx.should_skip() {
            let n = remaining.min(ctx.skip_limit());
            self.next += n;
            return ctx.emit(ExecutionBuffer::skipped(n));
        }
        let n = remaining.min(ctx.block_size());
        let batch = self.rows[self.next..self.next + n].to_vec();
        self.next += n;
        ctx.emit(batch.into())
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(Self {
            rows: Arc::clone(&self.rows),
            begin: self.begin,
            end: self.end,
            next: self.begin,
        })
    }

    fn set_partition(&mut self, index: usize, count: usize) {
        let part = split_range((self.end - self.begin) as u64, index, count);
        let begin = self.begin;
        self.begin = begin + part.start as usize;
        self.end = begin + part.end as usize;
        self.next = self.begin;
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    segment: usize,
    begin: u64,
    end: u64,
}

#[derive(Debug)]
struct Cursor {
    next_block: usize,
    intra_skip: u64,
    left: u64,
    current: std::vec::IntoIter<Row>,
}

/// Reads rows from a [`SegmentedStore`].
///
/// Reads every segment in order, or a row range of one segment. Skip
/// requests are answered from block row counts, so skipped blocks are
/// never read or decoded.
pub struct SegmentSource {
    store: Arc<SegmentedStore>,
    spans: Vec<Span>,
    span: usize,
    cursor: Option<Cursor>,
}

impl SegmentSource {
    /// Reads the whole store, segment by segment.
    #[must_use]
    pub fn new(store: Arc<SegmentedStore>) -> Self {
        let spans = store
            .segment_row_counts()
            .into_iter()
            .enumerate()
            .map(|(segment, len)| Span {
                segment,
                begin: 0,
                end: len,
            })
            .collect();
        Self::with_spans(store, spans)
    }

    /// Reads rows `range` of segment `segment`.
    #[must_use]
    pub fn segment_range(store: Arc<SegmentedStore>, segment: usize, range: Range<u64>) -> Self {
        let len = store.segment_length(segment).unwrap_or(0);
        let end = range.end.min(len);
        let spans = vec![Span {
            segment,
            begin: range.start.min(end),
            end,
        }];
        Self::with_spans(store, spans)
    }

    fn with_spans(store: Arc<SegmentedStore>, spans: Vec<Span>) -> Self {
        Self {
            store,
            spans,
            span: 0,
            cursor: None,
        }
    }

    fn start_span(&self, span: Span) -> CoreResult<Cursor> {
        let (next_block, intra_skip) = self.store.locate_row(span.segment, span.begin)?;
        Ok(Cursor {
            next_block,
            intra_skip,
            left: span.end - span.begin,
            current: Vec::new().into_iter(),
        })
    }

    /// Skips whole blocks (and already decoded rows) without decoding.
    fn skip_blocks(&self, segment: usize, cursor: &mut Cursor, limit: u64) -> CoreResult<u64> {
        let mut skipped = (cursor.current.len() as u64).min(limit).min(cursor.left);
        if skipped > 0 {
            // Bounded by the decoded block length.
            cursor.current.nth(skipped as usize - 1);
            cursor.left -= skipped;
        }
        while cursor.current.len() == 0 && cursor.intra_skip == 0 && cursor.left > 0 {
            let Some(rows) = self.store.block_row_count(segment, cursor.next_block)? else {
                break;
            };
            if rows > limit - skipped || rows > cursor.left {
                break;
            }
            cursor.next_block += 1;
            cursor.left -= rows;
            skipped += rows;
        }
        Ok(skipped)
    }

    fn fill(
        &self,
        segment: usize,
        cursor: &mut Cursor,
        max_rows: usize,
    ) -> CoreResult<Vec<Row>> {
        let mut batch = Vec::with_capacity(max_rows.min(cursor.left as usize));
        while batch.len() < max_rows && cursor.left > 0 {
            if let Some(row) = cursor.current.next() {
                batch.push(row);
                cursor.left -= 1;
                continue;
            }
            let mut rows = self.store.read_block(segment, cursor.next_block)?;
            cursor.next_block += 1;
            if cursor.intra_skip > 0 {
                // Only the first block of a span starts mid-block.
                rows.drain(..(cursor.intra_skip as usize).min(rows.len()));
                cursor.intra_skip = 0;
            }
            cursor.current = rows.into_iter();
        }
        Ok(batch)
    }
}

impl Operator for SegmentSource {
    fn name(&self) -> &'static str {
        "segment_source"
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> CoreResult<()> {
        loop {
            let Some(span) = self.spans.get(self.span).copied() else {
                return Ok(());
            };
            let mut cursor = match self.cursor.take() {
                Some(cursor) => cursor,
                None => self.start_span(span)?,
            };
            if cursor.left == 0 {
                self.span += 1;
                continue;
            }

            if ctx.should_skip() {
                let skipped = self.skip_blocks(span.segment, &mut cursor, ctx.skip_limit() as u64)?;
                if skipped > 0 {
                    self.cursor = Some(cursor);
                    // At most `skip_limit` rows.
                    return ctx.emit(ExecutionBuffer::skipped(skipped as usize));
                }
            }

            let batch = self.fill(span.segment, &mut cursor, ctx.block_size())?;
            self.cursor = Some(cursor);
            return ctx.emit(batch.into());
        }
    }

    fn fresh(&self) -> Box<dyn Operator> {
        Box::new(Self::with_spans(Arc::clone(&self.store), self.spans.clone()))
    }

    fn set_partition(&mut self, index: usize, count: usize) {
        self.span = 0;
        self.cursor = None;
        if count == self.spans.len() {
            self.spans = self.spans.get(index).copied().into_iter().collect();
            return;
        }

        // Split the concatenated spans by row count.
        let total: u64 = self.spans.iter().map(|s| s.end - s.begin).sum();
        let part = split_range(total, index, count);
        let mut offset = 0u64;
        let mut spans = Vec::new();
        for span in &self.spans {
            let len = span.end - span.begin;
            let lo = part.start.max(offset);
            let hi = part.end.min(offset + len);
            if lo < hi {
                spans.push(Span {
                    segment: span.segment,
                    begin: span.begin + (lo - offset),
                    end: span.begin + (hi - offset),
                });
            }
            offset += len;
        }
        self.spans = spans;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operator::{collect_rows, ExecutionNode};
    use crate::segment::Schema;
    use segflow_codec::row;

    fn ints(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r[0].as_integer().unwrap()).collect()
    }

    fn store(segments: &[std::ops::Range<i64>]) -> Arc<SegmentedStore> {
        let store = SegmentedStore::in_memory(Schema::new(["x"]), segments.len()).with_block_rows(4);
        for (i, range) in segments.iter().enumerate() {
            store
                .append_rows(i, range.clone().map(|v| row![v]))
                .unwrap();
            store.flush_write_to_segment(i).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn split_range_covers_everything() {
        let parts: Vec<_> = (0..3).map(|i| split_range(10, i, 3)).collect();
        assert_eq!(parts, vec![0..3, 3..6, 6..10]);
        assert_eq!(split_range(2, 3, 4), 1..2);
    }

    #[test]
    fn range_source_batches() {
        let mut node = ExecutionNode::source(RangeSource::new(0..10)).with_block_size(3);
        let first = node.next_batch().unwrap().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(ints(&collect_rows(&mut node).unwrap()), (3..10).collect::<Vec<_>>());
    }

    #[test]
    fn range_source_skips_without_rows() {
        let mut node = ExecutionNode::source(RangeSource::new(0..10));
        let skipped = node.next_skipping(4).unwrap().unwrap();
        assert!(skipped.is_skipped());
        assert_eq!(skipped.len(), 4);
        assert_eq!(ints(&collect_rows(&mut node).unwrap()), (4..10).collect::<Vec<_>>());
    }

    #[test]
    fn range_source_partitions() {
        let template = ExecutionNode::source(RangeSource::new(0..10));
        let mut all = Vec::new();
        for i in 0..4 {
            all.extend(ints(&collect_rows(&mut template.for_partition(i, 4)).unwrap()));
        }
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn range_source_spans_full_i64_domain() {
        let mut node =
            ExecutionNode::source(RangeSource::new(i64::MIN..i64::MAX)).with_block_size(4);
        let first = node.next_batch().unwrap().unwrap();
        assert_eq!(
            ints(first.rows()),
            vec![i64::MIN, i64::MIN + 1, i64::MIN + 2, i64::MIN + 3]
        );
        let skipped = node.next_skipping(usize::MAX).unwrap().unwrap();
        assert!(skipped.is_skipped());

        let template = ExecutionNode::source(RangeSource::new(i64::MIN..i64::MAX));
        let mut last = template.for_partition(1, 2).with_block_size(2);
        assert_eq!(ints(last.next_batch().unwrap().unwrap().rows()), vec![-1, 0]);
        assert_eq!(split_range(u64::MAX, 1, 2), u64::MAX / 2..u64::MAX);
    }

    #[test]
    fn row_source_partitions() {
        let rows: Vec<Row> = (0..7).map(|v| row![v as i64]).collect();
        let template = ExecutionNode::source(RowSource::new(rows));
        let second = collect_rows(&mut template.for_partition(1, 2)).unwrap();
        assert_eq!(ints(&second), vec![3, 4, 5, 6]);
    }

    #[test]
    fn segment_source_reads_all_segments_in_order() {
        let store = store(&[0..5, 5..5, 5..12]);
        let mut node = ExecutionNode::source(SegmentSource::new(store)).with_block_size(3);
        assert_eq!(ints(&collect_rows(&mut node).unwrap()), (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn segment_source_row_range() {
        let store = store(&[0..20]);
        let mut node = ExecutionNode::source(SegmentSource::segment_range(store, 0, 6..15));
        assert_eq!(ints(&collect_rows(&mut node).unwrap()), (6..15).collect::<Vec<_>>());
    }

    #[test]
    fn segment_source_skips_whole_blocks() {
        let store = store(&[0..20]);
        let mut node = ExecutionNode::source(SegmentSource::new(store)).with_block_size(2);
        // Blocks hold 4 rows; a limit of 9 skips two whole blocks.
        let skipped = node.next_skipping(9).unwrap().unwrap();
        assert!(skipped.is_skipped());
        assert_eq!(skipped.len(), 8);
        // A limit smaller than a block falls back to real rows.
        let real = node.next_skipping(1).unwrap().unwrap();
        assert!(!real.is_skipped());
        assert_eq!(ints(real.rows()), vec![8, 9]);
    }

    #[test]
    fn segment_source_partition_per_segment() {
        let store = store(&[0..3, 3..8]);
        let template = ExecutionNode::source(SegmentSource::new(store));
        let second = collect_rows(&mut template.for_partition(1, 2)).unwrap();
        assert_eq!(ints(&second), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn segment_source_partition_by_rows() {
        let store = store(&[0..3, 3..9]);
        let template = ExecutionNode::source(SegmentSource::new(store));
        let mut all = Vec::new();
        for i in 0..3 {
            all.extend(ints(&collect_rows(&mut template.for_partition(i, 3)).unwrap()));
        }
        assert_eq!(all, (0..9).collect::<Vec<_>>());
    }
}

//! K-way merge of sorted row streams.

use crate::error::CoreResult;
use crate::sort::RowComparator;
use segflow_codec::Row;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A boxed sorted row stream.
pub(crate) type RowStream<'a> = Box<dyn Iterator<Item = CoreResult<Row>> + 'a>;

struct HeapEntry<'c> {
    row: Row,
    source: usize,
    comparator: &'c RowComparator,
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap. Earlier sources win ties.
        self.comparator
            .compare(&other.row, &self.row)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

/// Merges streams that are each sorted under `comparator` into one sorted
/// stream. Rows comparing equal come out in source order.
pub(crate) struct KWayMerge<'a, 'c> {
    heap: BinaryHeap<HeapEntry<'c>>,
    sources: Vec<RowStream<'a>>,
    comparator: &'c RowComparator,
}

impl<'a, 'c> KWayMerge<'a, 'c> {
    /// Primes the heap with the head of every source.
    pub(crate) fn new(
        comparator: &'c RowComparator,
        mut sources: Vec<RowStream<'a>>,
    ) -> CoreResult<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, stream) in sources.iter_mut().enumerate() {
            if let Some(row) = stream.next() {
                heap.push(HeapEntry {
                    row: row?,
                    source,
                    comparator,
                });
            }
        }
        Ok(Self {
            heap,
            sources,
            comparator,
        })
    }
}

impl Iterator for KWayMerge<'_, '_> {
    type Item = CoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let HeapEntry { row, source, .. } = self.heap.pop()?;
        match self.sources[source].next() {
            Some(Ok(next)) => self.heap.push(HeapEntry {
                row: next,
                source,
                comparator: self.comparator,
            }),
            Some(Err(e)) => return Some(Err(e)),
            None => {}
        }
        Some(Ok(row))
    }
}

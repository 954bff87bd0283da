//! Row batches passed between operators.

use segflow_codec::Row;

/// A batch of rows handed from an operator to its consumer.
///
/// Emitting a batch transfers ownership to the consumer. A batch answering
/// a skip request may stand for rows that were never materialized; such a
/// batch reports its logical length through [`len`](Self::len) and carries
/// no rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionBuffer {
    rows: Vec<Row>,
    skipped: usize,
}

impl ExecutionBuffer {
    /// Creates an empty batch with room for `capacity` rows.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            skipped: 0,
        }
    }

    /// Creates a batch standing for `count` rows that were not
    /// materialized.
    #[must_use]
    pub fn skipped(count: usize) -> Self {
        Self {
            rows: Vec::new(),
            skipped: count,
        }
    }

    /// Returns whether this batch stands for unmaterialized rows.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.skipped > 0
    }

    /// Logical number of rows in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len() + self.skipped
    }

    /// Returns whether the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a row.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Returns the materialized rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the batch, returning its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Empties the batch, keeping its allocation.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.skipped = 0;
    }
}

impl From<Vec<Row>> for ExecutionBuffer {
    fn from(rows: Vec<Row>) -> Self {
        Self { rows, skipped: 0 }
    }
}

impl IntoIterator for ExecutionBuffer {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segflow_codec::row;

    #[test]
    fn skipped_batch_has_logical_length() {
        let b = ExecutionBuffer::skipped(7);
        assert!(b.is_skipped());
        assert_eq!(b.len(), 7);
        assert!(b.rows().is_empty());
    }

    #[test]
    fn clear_resets() {
        let mut b = ExecutionBuffer::with_capacity(4);
        b.push(row![1i64]);
        assert_eq!(b.len(), 1);
        b.clear();
        assert!(b.is_empty());
    }
}

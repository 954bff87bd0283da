//! Row comparators built from sort keys.

use segflow_codec::{Row, Value};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

/// Direction of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// Placement of null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrder {
    /// Nulls before every other value.
    NullsFirst,
    /// Nulls after every other value.
    NullsLast,
}

/// One column of a sort specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Column index.
    pub column: usize,
    /// Direction.
    pub order: SortOrder,
    /// Null placement.
    pub nulls: NullOrder,
}

impl SortKey {
    /// Ascending key with nulls first.
    #[must_use]
    pub const fn asc(column: usize) -> Self {
        Self {
            column,
            order: SortOrder::Ascending,
            nulls: NullOrder::NullsFirst,
        }
    }

    /// Descending key with nulls last.
    #[must_use]
    pub const fn desc(column: usize) -> Self {
        Self {
            column,
            order: SortOrder::Descending,
            nulls: NullOrder::NullsLast,
        }
    }

    /// Places nulls first.
    #[must_use]
    pub const fn nulls_first(mut self) -> Self {
        self.nulls = NullOrder::NullsFirst;
        self
    }

    /// Places nulls last.
    #[must_use]
    pub const fn nulls_last(mut self) -> Self {
        self.nulls = NullOrder::NullsLast;
        self
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match self.nulls {
                NullOrder::NullsFirst => Ordering::Less,
                NullOrder::NullsLast => Ordering::Greater,
            },
            (false, true) => match self.nulls {
                NullOrder::NullsFirst => Ordering::Greater,
                NullOrder::NullsLast => Ordering::Less,
            },
            (false, false) => match self.order {
                SortOrder::Ascending => a.cmp(b),
                SortOrder::Descending => b.cmp(a),
            },
        }
    }
}

/// Compares rows by an ordered list of sort keys.
///
/// Missing columns compare as null. Rows that tie on every key compare
/// equal, which is what deduplication treats as "same key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowComparator {
    keys: Vec<SortKey>,
}

impl RowComparator {
    /// Creates a comparator from sort keys.
    #[must_use]
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// Ascending comparator over `columns`, nulls first.
    #[must_use]
    pub fn ascending(columns: &[usize]) -> Self {
        Self::new(columns.iter().copied().map(SortKey::asc).collect())
    }

    /// Returns the sort keys.
    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Returns the key column indices.
    #[must_use]
    pub fn key_columns(&self) -> Vec<usize> {
        self.keys.iter().map(|k| k.column).collect()
    }

    /// Compares two rows.
    #[must_use]
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.keys {
            let va = a.get(key.column).unwrap_or(&NULL);
            let vb = b.get(key.column).unwrap_or(&NULL);
            let ord = key.compare(va, vb);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Returns whether two rows tie on every key.
    #[must_use]
    pub fn keys_equal(&self, a: &Row, b: &Row) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// Sorts rows in place. The sort is stable.
    pub fn sort(&self, rows: &mut [Row]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }

    /// Returns whether `rows` is sorted.
    #[must_use]
    pub fn is_sorted(&self, rows: &[Row]) -> bool {
        rows.windows(2)
            .all(|w| self.compare(&w[0], &w[1]) != Ordering::Greater)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segflow_codec::row;

    #[test]
    fn multi_key_ordering() {
        let cmp = RowComparator::new(vec![SortKey::asc(0), SortKey::desc(1)]);
        let mut rows = vec![row![2i64, 1i64], row![1i64, 1i64], row![1i64, 5i64]];
        cmp.sort(&mut rows);
        assert_eq!(rows, vec![row![1i64, 5i64], row![1i64, 1i64], row![2i64, 1i64]]);
        assert!(cmp.is_sorted(&rows));
    }

    #[test]
    fn null_placement() {
        let first = RowComparator::new(vec![SortKey::asc(0)]);
        let last = RowComparator::new(vec![SortKey::asc(0).nulls_last()]);
        let null = row![Value::Null];
        let one = row![1i64];
        assert_eq!(first.compare(&null, &one), Ordering::Less);
        assert_eq!(last.compare(&null, &one), Ordering::Greater);
        assert_eq!(first.compare(&null, &null), Ordering::Equal);

        let desc = RowComparator::new(vec![SortKey::desc(0)]);
        assert_eq!(desc.compare(&null, &one), Ordering::Greater);
        assert_eq!(desc.compare(&row![3i64], &one), Ordering::Less);
    }

    #[test]
    fn missing_column_is_null() {
        let cmp = RowComparator::ascending(&[3]);
        assert!(cmp.keys_equal(&row![1i64], &row![2i64]));
    }

    #[test]
    fn sort_is_stable() {
        let cmp = RowComparator::ascending(&[0]);
        let mut rows = vec![row![1i64, "b"], row![0i64, "x"], row![1i64, "a"]];
        cmp.sort(&mut rows);
        assert_eq!(rows[1], row![1i64, "b"]);
        assert_eq!(rows[2], row![1i64, "a"]);
        assert_eq!(cmp.key_columns(), vec![0]);
    }
}

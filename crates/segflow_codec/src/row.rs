//! Row type.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// An ordered tuple of cell values.
///
/// Rows compare lexicographically by their values. Operators that need a
/// different order (selected key columns, descending, null placement) use
/// a comparator from `segflow_core` instead of this ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<Value>);

impl Row {
    /// Creates a row from its values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value of column `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Returns all values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Consumes the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Appends a value as a new last column.
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Builds a row from the given columns, in the given order.
    ///
    /// Columns may repeat. Out-of-range indices yield [`Value::Null`].
    #[must_use]
    pub fn project(&self, columns: &[usize]) -> Row {
        Row(columns
            .iter()
            .map(|&c| self.0.get(c).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Rearranges the row in place so column `i` becomes `self[order[i]]`.
    ///
    /// `order` must be a permutation of `0..self.len()`; this moves values
    /// instead of cloning them.
    pub fn permute(&mut self, order: &[usize]) {
        let mut taken: Vec<Option<Value>> = std::mem::take(&mut self.0).into_iter().map(Some).collect();
        self.0 = order
            .iter()
            .map(|&c| taken.get_mut(c).and_then(Option::take).unwrap_or(Value::Null))
            .collect();
    }

    /// Rough number of bytes this row occupies in memory.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Row>() + self.0.iter().map(Value::approx_size).sum::<usize>()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.0[index]
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

/// Builds a [`Row`] from expressions convertible into [`Value`].
///
/// ```
/// use segflow_codec::{row, Value};
///
/// let r = row![1i64, "a", Value::Null];
/// assert_eq!(r.len(), 3);
/// ```
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::Row::new(vec![$($crate::Value::from($value)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn project_selects_and_reorders() {
        let r = row![1i64, "b", true];
        assert_eq!(r.project(&[2, 0]), row![true, 1i64]);
        assert_eq!(r.project(&[5]), Row::new(vec![Value::Null]));
    }

    #[test]
    fn permute_moves_values() {
        let mut r = row![1i64, "b", true];
        r.permute(&[1, 2, 0]);
        assert_eq!(r, row!["b", true, 1i64]);
    }

    #[test]
    fn rows_order_lexicographically() {
        assert!(row![1i64, "z"] < row![2i64, "a"]);
        assert!(row![1i64, "a"] < row![1i64, "b"]);
    }

    #[test]
    fn display_is_tab_separated() {
        assert_eq!(row![1i64, "x"].to_string(), "1\t\"x\"");
    }
}

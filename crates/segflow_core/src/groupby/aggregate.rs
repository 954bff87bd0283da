//! Per-group reductions over key-sorted rows.

use crate::error::{CoreError, CoreResult};
use crate::segment::Schema;
use crate::sort::RowComparator;
use segflow_codec::{Row, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// A reduction applied to the rows of one group.
///
/// Nulls are ignored by every aggregate except [`Aggregate::Count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of rows in the group.
    Count,
    /// Number of non-null values in a column.
    CountNonNull(usize),
    /// Sum of a numeric column. Stays an integer until a float is added or
    /// the integer sum overflows. An empty sum is `0`.
    Sum(usize),
    /// Smallest value of a column.
    Min(usize),
    /// Largest value of a column.
    Max(usize),
    /// Arithmetic mean of a numeric column.
    Mean(usize),
    /// Population variance of a numeric column; `0.0` below two values.
    Variance(usize),
    /// Number of distinct values in a column.
    CountDistinct(usize),
    /// Some value of a column from the group.
    SelectOne(usize),
}

impl Aggregate {
    /// Looks up an aggregate by name (`count`, `count_non_null`, `sum`,
    /// `min`, `max`, `mean`, `variance`, `count_distinct`, `select_one`).
    ///
    /// `count` ignores `column`.
    #[must_use]
    pub fn from_name(name: &str, column: usize) -> Option<Aggregate> {
        Some(match name {
            "count" => Aggregate::Count,
            "count_non_null" => Aggregate::CountNonNull(column),
            "sum" => Aggregate::Sum(column),
            "min" => Aggregate::Min(column),
            "max" => Aggregate::Max(column),
            "mean" | "avg" => Aggregate::Mean(column),
            "variance" | "var" => Aggregate::Variance(column),
            "count_distinct" => Aggregate::CountDistinct(column),
            "select_one" => Aggregate::SelectOne(column),
            _ => return None,
        })
    }

    /// The input column, if the aggregate reads one.
    #[must_use]
    pub fn column(&self) -> Option<usize> {
        match *self {
            Aggregate::Count => None,
            Aggregate::CountNonNull(c)
            | Aggregate::Sum(c)
            | Aggregate::Min(c)
            | Aggregate::Max(c)
            | Aggregate::Mean(c)
            | Aggregate::Variance(c)
            | Aggregate::CountDistinct(c)
            | Aggregate::SelectOne(c) => Some(c),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::CountNonNull(_) => "count_non_null",
            Aggregate::Sum(_) => "sum",
            Aggregate::Min(_) => "min",
            Aggregate::Max(_) => "max",
            Aggregate::Mean(_) => "mean",
            Aggregate::Variance(_) => "variance",
            Aggregate::CountDistinct(_) => "count_distinct",
            Aggregate::SelectOne(_) => "select_one",
        }
    }

    /// Output column name, e.g. `sum_price`.
    #[must_use]
    pub fn output_name(&self, input: &Schema) -> String {
        match self.column() {
            Some(c) => match input.columns().get(c) {
                Some(column) => format!("{}_{column}", self.name()),
                None => format!("{}_{c}", self.name()),
            },
            None => self.name().to_string(),
        }
    }

    fn start(&self) -> State {
        match self {
            Aggregate::Count | Aggregate::CountNonNull(_) => State::Count(0),
            Aggregate::Sum(_) => State::Sum(Sum::Integer(0)),
            Aggregate::Min(_) => State::Extreme(None, Ordering::Less),
            Aggregate::Max(_) => State::Extreme(None, Ordering::Greater),
            Aggregate::Mean(_) | Aggregate::Variance(_) => State::Moments {
                count: 0,
                mean: 0.0,
                m2: 0.0,
            },
            Aggregate::CountDistinct(_) => State::Distinct(HashSet::new()),
            Aggregate::SelectOne(_) => State::First(None),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Sum {
    Integer(i64),
    Float(f64),
}

#[derive(Debug)]
enum State {
    Count(u64),
    Sum(Sum),
    Extreme(Option<Value>, Ordering),
    Moments { count: u64, mean: f64, m2: f64 },
    Distinct(HashSet<Value>),
    First(Option<Value>),
}

fn numeric(value: &Value, aggregate: &Aggregate) -> CoreResult<f64> {
    match value {
        Value::Integer(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(CoreError::invalid_operation(format!(
            "{} needs numeric values, got {other}",
            aggregate.name()
        ))),
    }
}

impl State {
    fn add(&mut self, aggregate: &Aggregate, row: &Row) -> CoreResult<()> {
        let value = match aggregate.column() {
            None => {
                if let State::Count(n) = self {
                    *n += 1;
                }
                return Ok(());
            }
            Some(c) => row.get(c).unwrap_or(&Value::Null),
        };
        if value.is_null() {
            return Ok(());
        }
        match self {
            State::Count(n) => *n += 1,
            State::Sum(sum) => {
                *sum = match (*sum, value) {
                    (Sum::Integer(a), Value::Integer(b)) => match a.checked_add(*b) {
                        Some(total) => Sum::Integer(total),
                        None => Sum::Float(a as f64 + *b as f64),
                    },
                    (Sum::Integer(a), other) => Sum::Float(a as f64 + numeric(other, aggregate)?),
                    (Sum::Float(a), other) => Sum::Float(a + numeric(other, aggregate)?),
                };
            }
            State::Extreme(current, keep) => {
                let replace = match current {
                    Some(current) => value.cmp(current) == *keep,
                    None => true,
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            State::Moments { count, mean, m2 } => {
                let x = numeric(value, aggregate)?;
                *count += 1;
                let delta = x - *mean;
                *mean += delta / *count as f64;
                *m2 += delta * (x - *mean);
            }
            State::Distinct(seen) => {
                if !seen.contains(value) {
                    seen.insert(value.clone());
                }
            }
            State::First(first) => {
                if first.is_none() {
                    *first = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn emit(self, aggregate: &Aggregate) -> Value {
        match self {
            State::Count(n) => Value::Integer(i64::try_from(n).unwrap_or(i64::MAX)),
            State::Sum(Sum::Integer(n)) => Value::Integer(n),
            State::Sum(Sum::Float(f)) => Value::Float(f),
            State::Extreme(value, _) | State::First(value) => value.unwrap_or(Value::Null),
            State::Moments { count, mean, m2 } => match aggregate {
                Aggregate::Variance(_) if count <= 1 => Value::Float(0.0),
                Aggregate::Variance(_) => Value::Float(m2 / count as f64),
                _ if count == 0 => Value::Null,
                _ => Value::Float(mean),
            },
            State::Distinct(seen) => {
                Value::Integer(i64::try_from(seen.len()).unwrap_or(i64::MAX))
            }
        }
    }
}

/// Output schema of an aggregating group-by: the comparator's key columns
/// followed by one column per aggregate.
#[must_use]
pub fn aggregate_schema(input: &Schema, keys: &[usize], aggregates: &[Aggregate]) -> Schema {
    let key_names = keys
        .iter()
        .map(|&k| input.columns().get(k).cloned().unwrap_or_else(|| k.to_string()));
    let aggregate_names = aggregates.iter().map(|a| a.output_name(input));
    Schema::new(key_names.chain(aggregate_names))
}

/// Folds a key-sorted row stream into one row per group.
///
/// Rows belong to the same group when they tie under the comparator.
pub(crate) struct GroupFolder<'a> {
    comparator: &'a RowComparator,
    keys: Vec<usize>,
    aggregates: &'a [Aggregate],
    open: Option<(Row, Vec<State>)>,
}

impl<'a> GroupFolder<'a> {
    pub(crate) fn new(comparator: &'a RowComparator, aggregates: &'a [Aggregate]) -> Self {
        Self {
            comparator,
            keys: comparator.key_columns(),
            aggregates,
            open: None,
        }
    }

    /// Adds `row` to its group. Returns the previous group's output row
    /// when `row` starts a new group.
    pub(crate) fn push(&mut self, row: Row) -> CoreResult<Option<Row>> {
        let same_group = matches!(
            &self.open,
            Some((first, _)) if self.comparator.keys_equal(first, &row)
        );
        let finished = if same_group { None } else { self.finish() };
        let aggregates = self.aggregates;
        let keys = &self.keys;
        let (_, states) = self.open.get_or_insert_with(|| {
            let states = aggregates.iter().map(Aggregate::start).collect();
            (row.project(keys), states)
        });
        for (state, aggregate) in states.iter_mut().zip(aggregates) {
            state.add(aggregate, &row)?;
        }
        Ok(finished)
    }

    /// Closes the open group, if any.
    pub(crate) fn finish(&mut self) -> Option<Row> {
        let (key, states) = self.open.take()?;
        let mut out = key;
        for (state, aggregate) in states.into_iter().zip(self.aggregates) {
            out.push(state.emit(aggregate));
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segflow_codec::row;

    fn fold(rows: Vec<Row>, aggregates: &[Aggregate]) -> CoreResult<Vec<Row>> {
        let cmp = RowComparator::ascending(&[0]);
        let mut folder = GroupFolder::new(&cmp, aggregates);
        let mut out = Vec::new();
        for row in rows {
            out.extend(folder.push(row)?);
        }
        out.extend(folder.finish());
        Ok(out)
    }

    #[test]
    fn one_row_per_group() {
        let rows = vec![
            row![1i64, 10i64],
            row![1i64, 30i64],
            row![2i64, 5i64],
            row![3i64, Value::Null],
        ];
        let out = fold(
            rows,
            &[
                Aggregate::Count,
                Aggregate::CountNonNull(1),
                Aggregate::Sum(1),
                Aggregate::Min(1),
                Aggregate::Max(1),
                Aggregate::Mean(1),
            ],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                row![1i64, 2i64, 2i64, 40i64, 10i64, 30i64, 20.0],
                row![2i64, 1i64, 1i64, 5i64, 5i64, 5i64, 5.0],
                row![3i64, 1i64, 0i64, 0i64, Value::Null, Value::Null, Value::Null],
            ]
        );
    }

    #[test]
    fn variance_and_distinct() {
        let rows = vec![
            row![7i64, 2i64],
            row![7i64, 4i64],
            row![7i64, 4i64],
            row![7i64, 6i64],
        ];
        let out = fold(rows, &[Aggregate::Variance(1), Aggregate::CountDistinct(1)]).unwrap();
        assert!(matches!(out[0][1], Value::Float(v) if (v - 2.0).abs() < 1e-9));
        assert_eq!(out[0][2], Value::Integer(3));

        let single = fold(vec![row![1i64, 9i64]], &[Aggregate::Variance(1)]).unwrap();
        assert_eq!(single, vec![row![1i64, 0.0]]);
    }

    #[test]
    fn sum_promotes_to_float() {
        let mixed = fold(vec![row![1i64, 1i64], row![1i64, 0.5]], &[Aggregate::Sum(1)]).unwrap();
        assert_eq!(mixed[0][1], Value::Float(1.5));

        let overflow = fold(
            vec![row![1i64, i64::MAX], row![1i64, i64::MAX]],
            &[Aggregate::Sum(1)],
        )
        .unwrap();
        assert!(matches!(overflow[0][1], Value::Float(f) if f > 1e19));
    }

    #[test]
    fn numeric_aggregates_reject_text() {
        let err = fold(vec![row![1i64, "x"]], &[Aggregate::Mean(1)]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        // Min and max order any value.
        let out = fold(vec![row![1i64, "b"], row![1i64, "a"]], &[Aggregate::Min(1)]).unwrap();
        assert_eq!(out[0][1], Value::from("a"));
    }

    #[test]
    fn names_and_schema() {
        let input = Schema::new(["k", "price"]);
        assert_eq!(Aggregate::from_name("avg", 1), Some(Aggregate::Mean(1)));
        assert_eq!(Aggregate::from_name("median", 1), None);
        let schema = aggregate_schema(&input, &[0], &[Aggregate::Count, Aggregate::Sum(1)]);
        assert_eq!(schema.columns(), ["k", "count", "sum_price"]);
    }
}

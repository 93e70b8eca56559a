//! Query filter engine.
//!
//! Reduces a [Dataset] to the rows and columns a caller asked for.

use crate::dataset::{Column, Dataset, Row, Schema, Timestamp, Value};
use crate::error::EnergyVizError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive time range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimeRange {
    start: Timestamp,
    end: Timestamp,
}

impl TimeRange {
    /// Returns a new TimeRange, failing with [EnergyVizError::InvalidRange] if `start > end`.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, EnergyVizError> {
        if start > end {
            return Err(EnergyVizError::InvalidRange { start, end });
        }
        Ok(TimeRange { start, end })
    }

    /// A range unbounded on the sides that are `None`.
    pub fn bounded(start: Option<Timestamp>, end: Option<Timestamp>) -> Result<Self, EnergyVizError> {
        Self::new(start.unwrap_or(Timestamp::MIN), end.unwrap_or(Timestamp::MAX))
    }

    /// The range covering all time.
    pub fn all() -> Self {
        TimeRange {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// A value to compare cells against. Numbers match numeric and timestamp cells, strings match
/// category cells and (when they parse as one) timestamp cells.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl FilterValue {
    /// Whether a cell equals this value, or `None` if they cannot be compared.
    fn matches(&self, value: &Value) -> Option<bool> {
        match (self, value) {
            (FilterValue::Number(n), Value::Number(x)) => Some(x == n),
            (FilterValue::Number(n), Value::Timestamp(ts)) => Some(ts.millis() as f64 == *n),
            (FilterValue::Text(s), Value::Category(c)) => Some(c == s),
            (FilterValue::Text(s), Value::Timestamp(ts)) => {
                Timestamp::parse(s).ok().map(|parsed| parsed == *ts)
            }
            _ => None,
        }
    }

    /// Position of this value on the axis of a numeric or timestamp cell.
    fn bound_for(&self, value: &Value) -> Option<f64> {
        match (self, value) {
            (FilterValue::Number(n), Value::Number(_) | Value::Timestamp(_)) => Some(*n),
            (FilterValue::Text(s), Value::Timestamp(_)) => {
                Timestamp::parse(s).ok().map(|ts| ts.millis() as f64)
            }
            _ => None,
        }
    }
}

/// Position of a numeric or timestamp cell on a numeric axis.
fn axis_position(value: &Value) -> Option<f64> {
    match value {
        Value::Number(x) => Some(*x),
        Value::Timestamp(ts) => Some(ts.millis() as f64),
        _ => None,
    }
}

/// An allowed-value predicate over a single column.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Cell equals the value
    Equals(FilterValue),
    /// Cell equals any of the values
    OneOf(Vec<FilterValue>),
    /// Cell lies within the inclusive bounds. Missing bounds are open.
    Range {
        min: Option<FilterValue>,
        max: Option<FilterValue>,
    },
}

impl Predicate {
    /// Evaluate the predicate against a cell.
    ///
    /// Returns `None` when the predicate cannot be evaluated, for example on a missing cell or a
    /// numeric range against a category. Callers treat that as a non-match.
    pub fn evaluate(&self, value: &Value) -> Option<bool> {
        match self {
            Predicate::Equals(expected) => expected.matches(value),
            Predicate::OneOf(options) => {
                let mut evaluated = false;
                for option in options {
                    match option.matches(value) {
                        Some(true) => return Some(true),
                        Some(false) => evaluated = true,
                        None => (),
                    }
                }
                evaluated.then_some(false)
            }
            Predicate::Range { min, max } => {
                let position = axis_position(value)?;
                let above_min = match min {
                    Some(min) => position >= min.bound_for(value)?,
                    None => true,
                };
                let below_max = match max {
                    Some(max) => position <= max.bound_for(value)?,
                    None => true,
                };
                Some(above_min && below_max)
            }
        }
    }
}

/// What subset of a dataset to keep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    /// Columns to keep, in order, without duplicates
    pub variables: Vec<String>,
    /// Inclusive time range of rows to keep
    pub time_range: TimeRange,
    /// Predicates every kept row satisfies
    pub filters: BTreeMap<String, Predicate>,
}

impl QuerySpec {
    /// Returns a new QuerySpec with no filters. Repeated variables are dropped.
    pub fn new<I, S>(variables: I, time_range: TimeRange) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for variable in variables {
            let variable = variable.into();
            if !unique.contains(&variable) {
                unique.push(variable);
            }
        }
        QuerySpec {
            variables: unique,
            time_range,
            filters: BTreeMap::new(),
        }
    }

    /// Add a predicate on a column.
    pub fn with_filter(mut self, column: impl Into<String>, predicate: Predicate) -> Self {
        self.filters.insert(column.into(), predicate);
        self
    }
}

/// Apply a query to a dataset.
///
/// Keeps rows within the time range that satisfy every filter and projects them onto the
/// timestamp column plus the requested variables. The result preserves row order.
///
/// # Arguments
///
/// * `dataset`: [Dataset] to filter
/// * `spec`: [QuerySpec] describing what to keep
pub fn filter(dataset: &Dataset, spec: &QuerySpec) -> Result<Dataset, EnergyVizError> {
    let schema = dataset.schema();
    let range = TimeRange::new(spec.time_range.start, spec.time_range.end)?;
    for name in spec.variables.iter().chain(spec.filters.keys()) {
        if !schema.contains(name) {
            return Err(EnergyVizError::UnknownVariable {
                variable: name.clone(),
            });
        }
    }

    // Projection onto the requested variables. The timestamp column is always kept, first.
    let mut projection: Vec<usize> = Vec::with_capacity(spec.variables.len());
    for name in &spec.variables {
        if let Some(index) = schema.index_of(name) {
            if !projection.contains(&index) {
                projection.push(index);
            }
        }
    }
    let columns: Vec<Column> = projection
        .iter()
        .map(|index| schema.columns()[*index].clone())
        .collect();

    // `None` indexes the timestamp column.
    let filters: Vec<(Option<usize>, &Predicate)> = spec
        .filters
        .iter()
        .map(|(name, predicate)| (schema.index_of(name), predicate))
        .collect();

    let rows = dataset.rows();
    let lower = rows.partition_point(|row| row.timestamp < range.start);
    let upper = rows.partition_point(|row| row.timestamp <= range.end);
    let selected: Vec<Row> = rows[lower..upper]
        .iter()
        .filter(|row| {
            filters.iter().all(|(index, predicate)| {
                let result = match index {
                    Some(index) => predicate.evaluate(&row.values[*index]),
                    None => predicate.evaluate(&Value::Timestamp(row.timestamp)),
                };
                result == Some(true)
            })
        })
        .map(|row| {
            Row::new(
                row.timestamp,
                projection.iter().map(|index| row.values[*index].clone()).collect(),
            )
        })
        .collect();

    tracing::debug!(
        input = rows.len(),
        in_range = upper - lower,
        output = selected.len(),
        "filtered dataset"
    );
    let schema = Schema::new(schema.timestamp(), columns)?;
    Ok(Dataset::from_parts(schema, selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnKind;
    use crate::test_utils;

    use serde_test::{assert_de_tokens, Token};

    fn wind_spec(start: i64, end: i64) -> QuerySpec {
        QuerySpec::new(["wind"], TimeRange::new(Timestamp(start), Timestamp(end)).unwrap())
    }

    fn timestamps(dataset: &Dataset) -> Vec<i64> {
        dataset.rows().iter().map(|r| r.timestamp.millis()).collect()
    }

    fn all_columns(dataset: &Dataset) -> QuerySpec {
        let names: Vec<String> = dataset
            .schema()
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        QuerySpec::new(names, TimeRange::all())
    }

    #[test]
    fn time_range_rejects_inverted() {
        let err = TimeRange::new(Timestamp(2), Timestamp(1)).unwrap_err();
        assert!(matches!(err, EnergyVizError::InvalidRange { .. }));
        assert!(TimeRange::new(Timestamp(1), Timestamp(1)).is_ok());
    }

    #[test]
    fn time_range_bounded() {
        let range = TimeRange::bounded(Some(Timestamp(5)), None).unwrap();
        assert_eq!(Timestamp(5), range.start());
        assert_eq!(Timestamp::MAX, range.end());
        assert!(range.contains(Timestamp(5)));
        assert!(!range.contains(Timestamp(4)));
        assert_eq!(TimeRange::all(), TimeRange::bounded(None, None).unwrap());
    }

    #[test]
    fn filter_example() {
        let dataset = test_utils::wind_dataset();
        let result = filter(&dataset, &wind_spec(1, 2)).unwrap();
        assert_eq!(vec![1, 2], timestamps(&result));
        assert_eq!(
            vec![vec![Value::Number(10.0)], vec![Value::Number(12.0)]],
            result
                .rows()
                .iter()
                .map(|r| r.values.clone())
                .collect::<Vec<_>>()
        );
        assert_eq!("t", result.schema().timestamp());
    }

    #[test]
    fn filter_unknown_variable() {
        let dataset = test_utils::wind_dataset();
        let spec = QuerySpec::new(["solar"], TimeRange::all());
        let err = filter(&dataset, &spec).unwrap_err();
        assert_eq!("unknown variable solar", err.to_string());
    }

    #[test]
    fn filter_unknown_filter_column() {
        let dataset = test_utils::wind_dataset();
        let spec = wind_spec(1, 3).with_filter(
            "site",
            Predicate::Equals(FilterValue::Text("a".to_string())),
        );
        let err = filter(&dataset, &spec).unwrap_err();
        assert!(matches!(err, EnergyVizError::UnknownVariable { variable } if variable == "site"));
    }

    #[test]
    fn filter_inverted_range() {
        let dataset = test_utils::wind_dataset();
        let spec = QuerySpec {
            variables: vec!["wind".to_string()],
            time_range: TimeRange {
                start: Timestamp(3),
                end: Timestamp(1),
            },
            filters: BTreeMap::new(),
        };
        let err = filter(&dataset, &spec).unwrap_err();
        assert_eq!("invalid_range", err.code());
    }

    #[test]
    fn filter_outside_span_is_empty() {
        let dataset = test_utils::wind_dataset();
        for (start, end) in [(-10, 0), (4, 100), (i64::MIN, i64::MIN)] {
            let result = filter(&dataset, &wind_spec(start, end)).unwrap();
            assert!(result.is_empty());
            assert_eq!(1, result.schema().columns().len());
        }
    }

    #[test]
    fn filter_full_range_is_identity() {
        let dataset = test_utils::generation_dataset();
        let result = filter(&dataset, &all_columns(&dataset)).unwrap();
        assert_eq!(dataset, result);
    }

    #[test]
    fn filter_is_order_preserving_subsequence() {
        let dataset = test_utils::generation_dataset();
        let spec = all_columns(&dataset).with_filter(
            "nom_subsistema",
            Predicate::Equals(FilterValue::Text("SUDESTE".to_string())),
        );
        let result = filter(&dataset, &spec).unwrap();
        assert_eq!(3, result.len());
        let mut input = dataset.rows().iter();
        for row in result.rows() {
            assert!(input.any(|candidate| candidate == row));
        }
    }

    #[test]
    fn filter_is_idempotent() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all()).with_filter(
            "val_geracao",
            Predicate::Range {
                min: Some(FilterValue::Number(1.0)),
                max: None,
            },
        );
        let first = filter(&dataset, &spec).unwrap();
        let second = filter(&dataset, &spec).unwrap();
        assert_eq!(first, second);
        assert_eq!(filter(&first, &spec).unwrap(), first);
    }

    #[test]
    fn filter_projection_order() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(
            ["val_geracao", "nom_subsistema", "val_geracao", "din_instante"],
            TimeRange::all(),
        );
        let result = filter(&dataset, &spec).unwrap();
        assert_eq!("din_instante", result.schema().timestamp());
        assert_eq!(
            &[
                Column::new("val_geracao", ColumnKind::Number),
                Column::new("nom_subsistema", ColumnKind::Category),
            ],
            result.schema().columns()
        );
        assert_eq!(dataset.len(), result.len());
    }

    #[test]
    fn filter_fails_closed_on_missing() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all()).with_filter(
            "val_geracao",
            Predicate::Range {
                min: None,
                max: None,
            },
        );
        let result = filter(&dataset, &spec).unwrap();
        assert_eq!(dataset.len() - 1, result.len());
        assert!(result.rows().iter().all(|r| !r.values[0].is_missing()));
    }

    #[test]
    fn filter_fails_closed_on_kind_mismatch() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all()).with_filter(
            "nom_subsistema",
            Predicate::Range {
                min: Some(FilterValue::Number(0.0)),
                max: None,
            },
        );
        assert!(filter(&dataset, &spec).unwrap().is_empty());
    }

    #[test]
    fn filter_conjunctive() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all())
            .with_filter(
                "nom_tipocombustivel",
                Predicate::OneOf(vec![
                    FilterValue::Text("Eólica".to_string()),
                    FilterValue::Text("Hidráulica".to_string()),
                ]),
            )
            .with_filter(
                "val_geracao",
                Predicate::Range {
                    min: Some(FilterValue::Number(10.5)),
                    max: Some(FilterValue::Number(12.0)),
                },
            );
        let result = filter(&dataset, &spec).unwrap();
        let values: Vec<Value> = result.rows().iter().map(|r| r.values[0].clone()).collect();
        assert_eq!(vec![Value::Number(10.5), Value::Number(12.0)], values);
    }

    #[test]
    fn filter_on_timestamp_column() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all()).with_filter(
            "din_instante",
            Predicate::Range {
                min: Some(FilterValue::Text("2023-01-01T01:00:00Z".to_string())),
                max: Some(FilterValue::Text("2023-01-01 12:00:00".to_string())),
            },
        );
        let result = filter(&dataset, &spec).unwrap();
        assert_eq!(2, result.len());
        assert!(result
            .rows()
            .iter()
            .all(|r| r.timestamp == Timestamp(test_utils::T0 + test_utils::HOUR)));
    }

    #[test]
    fn predicate_evaluate() {
        let text = |s: &str| FilterValue::Text(s.to_string());
        let equals = Predicate::Equals(text("a"));
        assert_eq!(Some(true), equals.evaluate(&Value::Category("a".to_string())));
        assert_eq!(Some(false), equals.evaluate(&Value::Category("b".to_string())));
        assert_eq!(None, equals.evaluate(&Value::Missing));
        assert_eq!(None, equals.evaluate(&Value::Number(1.0)));

        let one_of = Predicate::OneOf(vec![FilterValue::Number(1.0), text("a")]);
        assert_eq!(Some(true), one_of.evaluate(&Value::Number(1.0)));
        assert_eq!(Some(true), one_of.evaluate(&Value::Category("a".to_string())));
        assert_eq!(Some(false), one_of.evaluate(&Value::Number(2.0)));
        assert_eq!(None, one_of.evaluate(&Value::Missing));
        assert_eq!(None, Predicate::OneOf(vec![]).evaluate(&Value::Number(1.0)));

        let range = Predicate::Range {
            min: Some(FilterValue::Number(1.0)),
            max: Some(FilterValue::Number(2.0)),
        };
        assert_eq!(Some(true), range.evaluate(&Value::Number(1.0)));
        assert_eq!(Some(true), range.evaluate(&Value::Number(2.0)));
        assert_eq!(Some(false), range.evaluate(&Value::Number(2.5)));
        assert_eq!(None, range.evaluate(&Value::Category("1.5".to_string())));
        assert_eq!(Some(true), range.evaluate(&Value::Timestamp(Timestamp(1))));
    }

    #[test]
    fn deserialize_predicates() {
        assert_de_tokens(
            &Predicate::Equals(FilterValue::Text("Eólica".to_string())),
            &[
                Token::Enum { name: "Predicate" },
                Token::Str("equals"),
                Token::Str("Eólica"),
            ],
        );
        assert_de_tokens(
            &Predicate::OneOf(vec![FilterValue::Number(1.0), FilterValue::Number(2.0)]),
            &[
                Token::Enum { name: "Predicate" },
                Token::Str("one_of"),
                Token::Seq { len: Some(2) },
                Token::F64(1.0),
                Token::F64(2.0),
                Token::SeqEnd,
            ],
        );
        assert_de_tokens(
            &Predicate::Range {
                min: Some(FilterValue::Number(0.0)),
                max: None,
            },
            &[
                Token::Enum { name: "Predicate" },
                Token::Str("range"),
                Token::Map { len: Some(1) },
                Token::Str("min"),
                Token::Some,
                Token::F64(0.0),
                Token::MapEnd,
            ],
        );
    }

    #[test]
    fn predicates_from_json() {
        let filters: BTreeMap<String, Predicate> = serde_json::from_str(
            r#"{"nom_tipocombustivel": {"one_of": ["Eólica", "Solar"]},
                "val_geracao": {"range": {"min": 10, "max": 20.5}}}"#,
        )
        .unwrap();
        assert_eq!(
            Predicate::Range {
                min: Some(FilterValue::Number(10.0)),
                max: Some(FilterValue::Number(20.5)),
            },
            filters["val_geracao"]
        );
        assert_eq!(2, filters.len());
    }
}

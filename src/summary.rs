//! Structure and descriptive statistics of a dataset.

use crate::dataset::{ColumnKind, Dataset, Timestamp, Value};
use crate::error::EnergyVizError;

use hashbrown::HashSet;
use ndarray::Array1;
use serde::Serialize;
use std::collections::BTreeMap;

/// Descriptive statistics of a numeric column, ignoring missing cells.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NumericStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation. Undefined for fewer than two values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// Quantile of sorted values, interpolating linearly between the two nearest ranks.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

impl NumericStats {
    /// Statistics of the values, or `None` if there are none.
    pub fn compute(values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let array = Array1::from_vec(values);
        let count = array.len();
        let mean = array.mean()?;
        let std = (count > 1).then(|| array.std(1.0));
        let mut sorted = array.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(NumericStats {
            count,
            mean,
            std,
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[count - 1],
        })
    }
}

/// Summary of one column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub kind: ColumnKind,
    /// Number of missing cells
    pub missing: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<NumericStats>,
    /// Number of distinct categories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct: Option<usize>,
}

/// Summary of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub timestamp_column: String,
    /// Earliest timestamp, if there are rows
    pub start: Option<Timestamp>,
    /// Latest timestamp, if there are rows
    pub end: Option<Timestamp>,
    pub columns: Vec<ColumnSummary>,
    /// Statistics per category of a grouping column, when one was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<GroupedStats>,
}

/// Numeric statistics of the rows sharing one category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub rows: usize,
    /// Statistics of each numeric column with at least one value in the group
    pub stats: BTreeMap<String, NumericStats>,
}

/// Per-category statistics of a dataset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupedStats {
    pub by: String,
    /// Groups in category order
    pub groups: Vec<GroupSummary>,
}

/// Summarise the structure and contents of a dataset.
pub fn summarize(dataset: &Dataset) -> DatasetSummary {
    let columns = dataset
        .schema()
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let cells = dataset.rows().iter().map(|row| &row.values[index]);
            let missing = cells.clone().filter(|cell| cell.is_missing()).count();
            let (stats, distinct) = match column.kind {
                ColumnKind::Number => (
                    NumericStats::compute(cells.filter_map(Value::as_f64).collect()),
                    None,
                ),
                ColumnKind::Category => {
                    let distinct: HashSet<&str> = cells
                        .filter_map(|cell| match cell {
                            Value::Category(category) => Some(category.as_str()),
                            _ => None,
                        })
                        .collect();
                    (None, Some(distinct.len()))
                }
                ColumnKind::Timestamp => (None, None),
            };
            ColumnSummary {
                name: column.name.clone(),
                kind: column.kind,
                missing,
                stats,
                distinct,
            }
        })
        .collect();
    let span = dataset.span();
    DatasetSummary {
        rows: dataset.len(),
        timestamp_column: dataset.schema().timestamp().to_string(),
        start: span.map(|(start, _)| start),
        end: span.map(|(_, end)| end),
        columns,
        groups: None,
    }
}

/// Index of a category column, for grouping.
pub(crate) fn category_index(dataset: &Dataset, name: &str) -> Result<usize, EnergyVizError> {
    let schema = dataset.schema();
    let index = schema
        .index_of(name)
        .ok_or_else(|| EnergyVizError::UnknownVariable {
            variable: name.to_string(),
        })?;
    let kind = schema.columns()[index].kind;
    if kind != ColumnKind::Category {
        return Err(EnergyVizError::NotACategory {
            column: name.to_string(),
            kind,
        });
    }
    Ok(index)
}

/// Numeric statistics of every numeric column, per category of `by`.
///
/// Rows without a category in `by` belong to no group. Missing cells are ignored, as in
/// [summarize].
pub fn group_stats(dataset: &Dataset, by: &str) -> Result<GroupedStats, EnergyVizError> {
    let by_index = category_index(dataset, by)?;
    let numeric: Vec<(usize, &str)> = dataset
        .schema()
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, column)| column.kind == ColumnKind::Number)
        .map(|(index, column)| (index, column.name.as_str()))
        .collect();

    let mut groups: BTreeMap<&str, (usize, Vec<Vec<f64>>)> = BTreeMap::new();
    for row in dataset.rows() {
        let Value::Category(category) = &row.values[by_index] else {
            continue;
        };
        let (rows, values) = groups
            .entry(category.as_str())
            .or_insert_with(|| (0, vec![Vec::new(); numeric.len()]));
        *rows += 1;
        for ((index, _), values) in numeric.iter().zip(values.iter_mut()) {
            if let Some(value) = row.values[*index].as_f64() {
                values.push(value);
            }
        }
    }

    let groups = groups
        .into_iter()
        .map(|(group, (rows, values))| GroupSummary {
            group: group.to_string(),
            rows,
            stats: numeric
                .iter()
                .zip(values)
                .filter_map(|((_, name), values)| {
                    NumericStats::compute(values).map(|stats| (name.to_string(), stats))
                })
                .collect(),
        })
        .collect();
    Ok(GroupedStats {
        by: by.to_string(),
        groups,
    })
}

/// [summarize], plus [group_stats] when a grouping column is given.
pub fn describe(dataset: &Dataset, group_by: Option<&str>) -> Result<DatasetSummary, EnergyVizError> {
    let mut summary = summarize(dataset);
    if let Some(by) = group_by {
        summary.groups = Some(group_stats(dataset, by)?);
    }
    Ok(summary)
}

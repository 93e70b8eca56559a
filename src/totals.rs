//! Totals of a variable per category.
//!
//! These back the pie, bar and map views: generation summed by fuel type, by plant or by
//! subsystem.

use crate::dataset::{Dataset, Value};
use crate::error::EnergyVizError;
use crate::query::{self, QuerySpec};
use crate::summary::category_index;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;

/// Order of totals by value.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sum of a variable over the rows of one category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
    /// Number of values summed
    pub count: usize,
}

/// A totals payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Totals {
    /// Number of rows that passed the query
    pub rows: usize,
    pub variable: String,
    pub by: String,
    pub totals: Vec<CategoryTotal>,
}

/// Sum `variable` per category of `by`.
///
/// Totals are in category order unless `sort` is given, in which case they are ordered by total
/// with ties left in category order. Rows without a category are skipped. A category whose
/// cells are all missing still appears, with a total of 0.
///
/// # Arguments
///
/// * `dataset`: Source [Dataset]
/// * `variable`: Numeric column to sum
/// * `by`: Category column to group by
/// * `sort`: Optional [SortOrder] by total
pub fn category_totals(
    dataset: &Dataset,
    variable: &str,
    by: &str,
    sort: Option<SortOrder>,
) -> Result<Vec<CategoryTotal>, EnergyVizError> {
    let by_index = category_index(dataset, by)?;
    if !dataset.schema().contains(variable) {
        return Err(EnergyVizError::UnknownVariable {
            variable: variable.to_string(),
        });
    }
    // Timestamp cells are never summed.
    let index = dataset.schema().index_of(variable);

    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for row in dataset.rows() {
        let Value::Category(category) = &row.values[by_index] else {
            continue;
        };
        let (total, count) = sums.entry(category.as_str()).or_insert((0.0, 0));
        if let Some(value) = index.and_then(|i| row.values[i].as_f64()) {
            *total += value;
            *count += 1;
        }
    }

    let mut totals: Vec<CategoryTotal> = sums
        .into_iter()
        .map(|(category, (total, count))| CategoryTotal {
            category: category.to_string(),
            total,
            count,
        })
        .collect();
    match sort {
        Some(SortOrder::Ascending) => totals.sort_by(|a, b| a.total.total_cmp(&b.total)),
        Some(SortOrder::Descending) => totals.sort_by(|a, b| b.total.total_cmp(&a.total)),
        None => (),
    }
    Ok(totals)
}

/// Filter a dataset and total a variable per category.
///
/// # Arguments
///
/// * `dataset`: Source [Dataset]
/// * `spec`: [QuerySpec] with the time range and filters. Its variables are ignored.
/// * `variable`: Numeric column to sum
/// * `by`: Category column to group by
/// * `sort`: Optional [SortOrder] by total
#[tracing::instrument(level = "DEBUG", skip(dataset, spec))]
pub fn render_totals(
    dataset: &Dataset,
    spec: &QuerySpec,
    variable: &str,
    by: &str,
    sort: Option<SortOrder>,
) -> Result<Totals, EnergyVizError> {
    let mut spec = spec.clone();
    spec.variables = vec![variable.to_string()];
    if by != variable {
        spec.variables.push(by.to_string());
    }
    let filtered = query::filter(dataset, &spec)?;
    let totals = category_totals(&filtered, variable, by, sort)?;
    Ok(Totals {
        rows: filtered.len(),
        variable: variable.to_string(),
        by: by.to_string(),
        totals,
    })
}

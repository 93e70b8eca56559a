//! Datasets that span several source objects.
//!
//! ONS publishes generation data as one object per year or per month, for example
//! `GERACAO_USINA-2_2023.parquet` or `GERACAO_USINA-2_2023_01.parquet`. A request may name one
//! object, a list of objects, or a prefix. Under a prefix only the objects whose period overlaps
//! the requested time range are read. The datasets of the chosen objects are then merged into
//! one.

use crate::dataset::{Dataset, Timestamp};
use crate::error::EnergyVizError;
use crate::object_store::{is_dataset_key, ObjectInfo};
use crate::query::TimeRange;

use std::sync::Arc;
use time::{Date, Month};

/// Where the rows of a request come from.
#[derive(Clone, Debug, PartialEq)]
pub enum DatasetSource {
    /// A single object key
    Object(String),
    /// Object keys, merged in the order given
    Objects(Vec<String>),
    /// Every dataset object under a key prefix that overlaps the time range
    Prefix(String),
}

fn is_digits(text: &str, len: usize) -> bool {
    text.len() == len && text.bytes().all(|b| b.is_ascii_digit())
}

fn month_start(year: i32, month: u8) -> Option<Timestamp> {
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(year, month, 1).ok()?;
    Timestamp::from_datetime(date.midnight().assume_utc()).ok()
}

/// Period covered by an object, from the `_YYYY` or `_YYYY_MM` suffix of its file name.
///
/// Returns the start of the period and the start of the next one, or `None` if the name carries
/// no date.
pub fn file_period(key: &str) -> Option<(Timestamp, Timestamp)> {
    let name = key.rsplit('/').next()?;
    let stem = name.split('.').next()?;
    let mut parts = stem.rsplit('_');
    let last = parts.next()?;
    let previous = parts.next();
    let (year, month) = match previous {
        Some(year) if is_digits(year, 4) && is_digits(last, 2) => (year, Some(last)),
        _ if is_digits(last, 4) => (last, None),
        _ => return None,
    };
    let year: i32 = year.parse().ok()?;
    match month {
        Some(month) => {
            let month: u8 = month.parse().ok()?;
            let start = month_start(year, month)?;
            let end = if month == 12 {
                month_start(year + 1, 1)?
            } else {
                month_start(year, month + 1)?
            };
            Some((start, end))
        }
        None => Some((month_start(year, 1)?, month_start(year + 1, 1)?)),
    }
}

/// Keys of the dataset objects that may hold rows in a time range.
///
/// Objects without a date in their name cannot be ruled out and are kept. The listing order is
/// preserved.
pub fn select_keys(objects: &[ObjectInfo], range: &TimeRange) -> Vec<String> {
    objects
        .iter()
        .filter(|object| is_dataset_key(&object.key))
        .filter(|object| match file_period(&object.key) {
            Some((start, end)) => start <= range.end() && end > range.start(),
            None => true,
        })
        .map(|object| object.key.clone())
        .collect()
}

/// Merge datasets that share a schema into one.
///
/// Rows are stably sorted by timestamp, so rows with equal timestamps keep the order of their
/// source objects. A single dataset is returned as is.
///
/// # Arguments
///
/// * `keys`: Object key of each dataset, used in error messages
/// * `datasets`: Datasets to merge, in object order
pub fn merge(keys: &[String], datasets: Vec<Arc<Dataset>>) -> Result<Arc<Dataset>, EnergyVizError> {
    let Some(first) = datasets.first() else {
        return Err(EnergyVizError::Schema {
            reason: "no datasets to merge".to_string(),
        });
    };
    if datasets.len() == 1 {
        return Ok(first.clone());
    }
    let schema = first.schema().clone();
    for (key, dataset) in keys.iter().zip(&datasets).skip(1) {
        if *dataset.schema() != schema {
            return Err(EnergyVizError::Schema {
                reason: format!(
                    "object {} has different columns from object {}",
                    key,
                    keys.first().map_or("", String::as_str)
                ),
            });
        }
    }
    let mut rows = Vec::with_capacity(datasets.iter().map(|dataset| dataset.len()).sum());
    for dataset in &datasets {
        rows.extend_from_slice(dataset.rows());
    }
    rows.sort_by_key(|row| row.timestamp);
    tracing::debug!(objects = datasets.len(), rows = rows.len(), "merged datasets");
    Ok(Arc::new(Dataset::from_parts(schema, rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnKind, Row, Schema, Value};
    use crate::test_utils::{self, DAY, T0};

    use time::macros::datetime;

    fn ts(datetime: time::OffsetDateTime) -> Timestamp {
        Timestamp::from_datetime(datetime).unwrap()
    }

    fn object(key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: 1,
            last_modified: None,
        }
    }

    #[test]
    fn yearly_and_monthly_periods() {
        assert_eq!(
            Some((
                ts(datetime!(2023-01-01 00:00 UTC)),
                ts(datetime!(2024-01-01 00:00 UTC))
            )),
            file_period("dataset/geracao_usina_2_ho/GERACAO_USINA-2_2023.parquet")
        );
        assert_eq!(
            Some((
                ts(datetime!(2023-12-01 00:00 UTC)),
                ts(datetime!(2024-01-01 00:00 UTC))
            )),
            file_period("dataset/GERACAO_USINA-2_2023_12.csv.gz")
        );
        assert_eq!(
            Some((
                ts(datetime!(2022-01-01 00:00 UTC)),
                ts(datetime!(2023-01-01 00:00 UTC))
            )),
            file_period("geracao/2022.csv")
        );
    }

    #[test]
    fn undated_names() {
        assert_eq!(None, file_period("geracao/usinas.csv"));
        assert_eq!(None, file_period("geracao/GERACAO_USINA-2_2023_13.csv"));
        assert_eq!(None, file_period("geracao/GERACAO_USINA_23.csv"));
        assert_eq!(None, file_period(""));
    }

    #[test]
    fn select_overlapping_keys() {
        let objects = [
            object("g/GERACAO_2022_12.parquet"),
            object("g/GERACAO_2023_01.parquet"),
            object("g/GERACAO_2023_02.parquet"),
            object("g/GERACAO_2023_03.parquet"),
            object("g/README.txt"),
            object("g/usinas.csv"),
        ];
        // A range starting mid-month keeps that month.
        let range = TimeRange::new(
            ts(datetime!(2023-01-15 00:00 UTC)),
            ts(datetime!(2023-02-01 00:00 UTC)),
        )
        .unwrap();
        assert_eq!(
            vec![
                "g/GERACAO_2023_01.parquet".to_string(),
                "g/GERACAO_2023_02.parquet".to_string(),
                "g/usinas.csv".to_string(),
            ],
            select_keys(&objects, &range)
        );
        assert_eq!(5, select_keys(&objects, &TimeRange::all()).len());
    }

    #[test]
    fn merge_interleaves_by_time() {
        let schema = Schema::new("t", vec![Column::new("wind", ColumnKind::Number)]).unwrap();
        let dataset = |rows: &[(i64, f64)]| {
            let rows = rows
                .iter()
                .map(|(t, wind)| Row::new(Timestamp(*t), vec![Value::Number(*wind)]))
                .collect();
            Arc::new(Dataset::new(schema.clone(), rows).unwrap())
        };
        let keys = vec!["a.csv".to_string(), "b.csv".to_string()];
        let merged = merge(
            &keys,
            vec![dataset(&[(1, 1.0), (3, 3.0)]), dataset(&[(1, 10.0), (2, 2.0)])],
        )
        .unwrap();
        let cells: Vec<(i64, Option<f64>)> = merged
            .rows()
            .iter()
            .map(|row| (row.timestamp.millis(), row.values[0].as_f64()))
            .collect();
        assert_eq!(
            vec![(1, Some(1.0)), (1, Some(10.0)), (2, Some(2.0)), (3, Some(3.0))],
            cells
        );
    }

    #[test]
    fn merge_single_dataset_is_shared() {
        let dataset = Arc::new(test_utils::generation_dataset());
        let merged = merge(&["a.csv".to_string()], vec![dataset.clone()]).unwrap();
        assert!(Arc::ptr_eq(&dataset, &merged));
        assert_eq!(Some((Timestamp(T0), Timestamp(T0 + DAY))), merged.span());
    }

    #[test]
    fn merge_schema_mismatch() {
        let keys = vec!["a.csv".to_string(), "b.csv".to_string()];
        let err = merge(
            &keys,
            vec![
                Arc::new(test_utils::generation_dataset()),
                Arc::new(test_utils::wind_dataset()),
            ],
        )
        .unwrap_err();
        assert_eq!("schema_error", err.code());
        assert_eq!(
            "source data does not match the expected schema: object b.csv has different columns from object a.csv",
            err.to_string()
        );
    }
}

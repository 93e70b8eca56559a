//! Chart adapter.
//!
//! Converts a filtered [Dataset] into the named point series a charting front end consumes.

use crate::dataset::{Dataset, Timestamp, Value};
use crate::error::EnergyVizError;
use crate::query::{self, QuerySpec};
use crate::resample::{self, Resample};

use serde::Serialize;
use std::collections::BTreeMap;

/// A single chart point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Point {
    pub x: Timestamp,
    pub y: f64,
}

/// One named sequence of points, ordered by x ascending.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<Point>,
}

/// What to do with series that have no points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SeriesPolicy {
    /// Fail with [EnergyVizError::EmptySeries] rather than return an empty series
    pub fail_on_empty: bool,
}

impl SeriesPolicy {
    fn check(&self, series: &[ChartSeries]) -> Result<(), EnergyVizError> {
        if self.fail_on_empty {
            if let Some(empty) = series.iter().find(|s| s.points.is_empty()) {
                return Err(EnergyVizError::EmptySeries {
                    variable: empty.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// A split variable with no categories at all has no series to report as empty.
    fn check_split<S: AsRef<str>>(
        &self,
        series: &[ChartSeries],
        variables: &[S],
    ) -> Result<(), EnergyVizError> {
        if self.fail_on_empty {
            for variable in variables {
                let prefix = format!("{} [", variable.as_ref());
                if !series.iter().any(|s| s.name.starts_with(&prefix)) {
                    return Err(EnergyVizError::EmptySeries {
                        variable: variable.as_ref().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Index of a variable's cells in each row, or `None` for the timestamp column.
fn variable_index(dataset: &Dataset, name: &str) -> Result<Option<usize>, EnergyVizError> {
    let schema = dataset.schema();
    if !schema.contains(name) {
        return Err(EnergyVizError::UnknownVariable {
            variable: name.to_string(),
        });
    }
    Ok(schema.index_of(name))
}

fn point(timestamp: Timestamp, value: &Value) -> Option<Point> {
    value.as_f64().map(|y| Point { x: timestamp, y })
}

fn build_series<S: AsRef<str>>(
    dataset: &Dataset,
    variables: &[S],
) -> Result<Vec<ChartSeries>, EnergyVizError> {
    variables
        .iter()
        .map(|variable| {
            let name = variable.as_ref();
            // Timestamp cells are never plotted as values.
            let points = match variable_index(dataset, name)? {
                Some(index) => dataset
                    .rows()
                    .iter()
                    .filter_map(|row| point(row.timestamp, &row.values[index]))
                    .collect(),
                None => Vec::new(),
            };
            Ok(ChartSeries {
                name: name.to_string(),
                points,
            })
        })
        .collect()
}

fn build_split_series<S: AsRef<str>>(
    dataset: &Dataset,
    variables: &[S],
    split_by: &str,
) -> Result<Vec<ChartSeries>, EnergyVizError> {
    let split_index = variable_index(dataset, split_by)?;
    let mut series = Vec::new();
    for variable in variables {
        let name = variable.as_ref();
        let index = variable_index(dataset, name)?;
        let mut groups: BTreeMap<&str, Vec<Point>> = BTreeMap::new();
        for row in dataset.rows() {
            let category = match split_index.map(|i| &row.values[i]) {
                Some(Value::Category(category)) => category.as_str(),
                _ => continue,
            };
            let points = groups.entry(category).or_default();
            if let Some(point) = index.and_then(|i| point(row.timestamp, &row.values[i])) {
                points.push(point);
            }
        }
        series.extend(groups.into_iter().map(|(category, points)| ChartSeries {
            name: format!("{} [{}]", name, category),
            points,
        }));
    }
    Ok(series)
}

/// Build one series per variable from a dataset.
///
/// Rows whose cell is not a finite number are skipped for that series only, so series may
/// differ in length.
///
/// # Arguments
///
/// * `dataset`: Filtered [Dataset]
/// * `variables`: Column names, in the order the series are returned
/// * `policy`: [SeriesPolicy] for series without points
pub fn to_series<S: AsRef<str>>(
    dataset: &Dataset,
    variables: &[S],
    policy: SeriesPolicy,
) -> Result<Vec<ChartSeries>, EnergyVizError> {
    let series = build_series(dataset, variables)?;
    policy.check(&series)?;
    Ok(series)
}

/// Build one series per variable and distinct value of a category column.
///
/// Series are named `"{variable} [{category}]"` and ordered by variable, then category. Rows
/// without a category in `split_by` are excluded.
pub fn to_split_series<S: AsRef<str>>(
    dataset: &Dataset,
    variables: &[S],
    split_by: &str,
    policy: SeriesPolicy,
) -> Result<Vec<ChartSeries>, EnergyVizError> {
    let series = build_split_series(dataset, variables, split_by)?;
    policy.check_split(&series, variables)?;
    policy.check(&series)?;
    Ok(series)
}

/// Shaping applied after filtering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartOptions {
    /// Category column to split series by
    pub split_by: Option<String>,
    /// Calendar resampling of each series
    pub resample: Option<Resample>,
    pub policy: SeriesPolicy,
}

/// A chart payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Chart {
    /// Number of rows that passed the query
    pub rows: usize,
    pub series: Vec<ChartSeries>,
}

/// Filter a dataset and shape the result into chart series.
///
/// # Arguments
///
/// * `dataset`: Source [Dataset]
/// * `spec`: [QuerySpec] to filter with. Its variables become the series.
/// * `options`: [ChartOptions]
#[tracing::instrument(level = "DEBUG", skip_all, fields(variables = ?spec.variables))]
pub fn render(
    dataset: &Dataset,
    spec: &QuerySpec,
    options: &ChartOptions,
) -> Result<Chart, EnergyVizError> {
    let filtered = match &options.split_by {
        Some(split_by) if !spec.variables.contains(split_by) => {
            let mut spec = spec.clone();
            spec.variables.push(split_by.clone());
            query::filter(dataset, &spec)?
        }
        _ => query::filter(dataset, spec)?,
    };
    let series = match &options.split_by {
        Some(split_by) => build_split_series(&filtered, &spec.variables, split_by)?,
        None => build_series(&filtered, &spec.variables)?,
    };
    let series = match &options.resample {
        Some(request) => series
            .iter()
            .map(|s| resample::resample(s, request))
            .collect::<Result<Vec<_>, _>>()?,
        None => series,
    };
    if options.split_by.is_some() {
        options.policy.check_split(&series, &spec.variables)?;
    }
    options.policy.check(&series)?;
    Ok(Chart {
        rows: filtered.len(),
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterValue, Predicate, TimeRange};
    use crate::resample::{Aggregation, Frequency};
    use crate::test_utils::{self, DAY, HOUR, T0};

    fn points(series: &ChartSeries) -> Vec<(i64, f64)> {
        series.points.iter().map(|p| (p.x.millis(), p.y)).collect()
    }

    #[test]
    fn series_example() {
        let dataset = test_utils::wind_dataset();
        let spec = QuerySpec::new(["wind"], TimeRange::new(Timestamp(1), Timestamp(2)).unwrap());
        let filtered = query::filter(&dataset, &spec).unwrap();
        let series = to_series(&filtered, &["wind"], SeriesPolicy::default()).unwrap();
        assert_eq!(
            vec![ChartSeries {
                name: "wind".to_string(),
                points: vec![
                    Point {
                        x: Timestamp(1),
                        y: 10.0
                    },
                    Point {
                        x: Timestamp(2),
                        y: 12.0
                    },
                ],
            }],
            series
        );
    }

    #[test]
    fn series_skip_missing() {
        let dataset = test_utils::generation_dataset();
        let series = to_series(
            &dataset,
            &["val_geracao", "nom_usina"],
            SeriesPolicy::default(),
        )
        .unwrap();
        assert_eq!(2, series.len());
        assert_eq!("val_geracao", series[0].name);
        assert_eq!(dataset.len() - 1, series[0].points.len());
        // Categories are not plotted.
        assert_eq!("nom_usina", series[1].name);
        assert!(series[1].points.is_empty());
    }

    #[test]
    fn series_length_matches_rows_without_missing() {
        let dataset = test_utils::wind_dataset();
        let series = to_series(&dataset, &["wind"], SeriesPolicy::default()).unwrap();
        assert_eq!(dataset.len(), series[0].points.len());
        assert!(series[0].points.windows(2).all(|w| w[0].x <= w[1].x));
    }

    #[test]
    fn series_unknown_variable() {
        let dataset = test_utils::wind_dataset();
        let err = to_series(&dataset, &["solar"], SeriesPolicy::default()).unwrap_err();
        assert_eq!("unknown_variable", err.code());
    }

    #[test]
    fn series_empty_policy() {
        let dataset = test_utils::wind_dataset();
        let spec = QuerySpec::new(["wind"], TimeRange::new(Timestamp(10), Timestamp(20)).unwrap());
        let filtered = query::filter(&dataset, &spec).unwrap();
        let series = to_series(&filtered, &["wind"], SeriesPolicy::default()).unwrap();
        assert!(series[0].points.is_empty());
        let policy = SeriesPolicy {
            fail_on_empty: true,
        };
        let err = to_series(&filtered, &["wind"], policy).unwrap_err();
        assert_eq!("no data points for variable wind", err.to_string());
    }

    #[test]
    fn series_idempotent() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all());
        let options = ChartOptions::default();
        assert_eq!(
            render(&dataset, &spec, &options).unwrap(),
            render(&dataset, &spec, &options).unwrap()
        );
    }

    #[test]
    fn split_by_category() {
        let dataset = test_utils::generation_dataset();
        let series = to_split_series(
            &dataset,
            &["val_geracao"],
            "nom_tipocombustivel",
            SeriesPolicy::default(),
        )
        .unwrap();
        let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            vec!["val_geracao [Eólica]", "val_geracao [Fotovoltaica]"],
            names
        );
        assert_eq!(
            vec![(T0, 10.5), (T0 + HOUR, 12.0), (T0 + DAY, 8.0)],
            points(&series[0])
        );
        assert_eq!(vec![(T0 + HOUR, 3.25), (T0 + DAY, 0.0)], points(&series[1]));
    }

    #[test]
    fn split_by_unknown_column() {
        let dataset = test_utils::generation_dataset();
        let err = to_split_series(&dataset, &["val_geracao"], "fonte", SeriesPolicy::default())
            .unwrap_err();
        assert_eq!("unknown variable fonte", err.to_string());
    }

    #[test]
    fn split_by_numeric_column_is_empty() {
        let dataset = test_utils::generation_dataset();
        let series = to_split_series(
            &dataset,
            &["val_geracao"],
            "val_geracao",
            SeriesPolicy::default(),
        )
        .unwrap();
        assert!(series.is_empty());
        let policy = SeriesPolicy {
            fail_on_empty: true,
        };
        let err = to_split_series(&dataset, &["val_geracao"], "val_geracao", policy).unwrap_err();
        assert_eq!("empty_series", err.code());
    }

    #[test]
    fn render_filters_and_splits() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all()).with_filter(
            "nom_subsistema",
            Predicate::Equals(FilterValue::Text("SUDESTE".to_string())),
        );
        let options = ChartOptions {
            split_by: Some("nom_usina".to_string()),
            ..Default::default()
        };
        let chart = render(&dataset, &spec, &options).unwrap();
        assert_eq!(3, chart.rows);
        assert_eq!(1, chart.series.len());
        assert_eq!("val_geracao [USINA SOLAR B]", chart.series[0].name);
        assert_eq!(2, chart.series[0].points.len());
    }

    #[test]
    fn render_resampled() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all());
        let options = ChartOptions {
            resample: Some(Resample {
                frequency: Frequency::Day,
                aggregation: Aggregation::Sum,
            }),
            ..Default::default()
        };
        let chart = render(&dataset, &spec, &options).unwrap();
        assert_eq!(dataset.len(), chart.rows);
        assert_eq!(
            vec![(T0, 10.5 + 12.0 + 3.25), (T0 + DAY, 8.0)],
            points(&chart.series[0])
        );
    }

    #[test]
    fn render_empty_with_policy() {
        let dataset = test_utils::generation_dataset();
        let spec = QuerySpec::new(["val_geracao"], TimeRange::all()).with_filter(
            "nom_subsistema",
            Predicate::Equals(FilterValue::Text("SUL".to_string())),
        );
        let mut options = ChartOptions {
            split_by: Some("nom_usina".to_string()),
            ..Default::default()
        };
        let chart = render(&dataset, &spec, &options).unwrap();
        assert_eq!(0, chart.rows);
        assert!(chart.series.is_empty());
        options.policy.fail_on_empty = true;
        let err = render(&dataset, &spec, &options).unwrap_err();
        assert!(matches!(err, EnergyVizError::EmptySeries { variable } if variable == "val_geracao"));
    }

    #[test]
    fn chart_json() {
        let chart = Chart {
            rows: 1,
            series: vec![ChartSeries {
                name: "wind".to_string(),
                points: vec![Point {
                    x: Timestamp(1),
                    y: 10.0,
                }],
            }],
        };
        assert_eq!(
            r#"{"rows":1,"series":[{"name":"wind","points":[{"x":1,"y":10.0}]}]}"#,
            serde_json::to_string(&chart).unwrap()
        );
    }
}

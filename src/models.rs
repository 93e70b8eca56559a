//! Request bodies of the HTTP API and their conversion into queries.

use crate::chart::{ChartOptions, SeriesPolicy};
use crate::dataset::Timestamp;
use crate::error::EnergyVizError;
use crate::query::{Predicate, QuerySpec, TimeRange};
use crate::resample::Resample;
use crate::sources::DatasetSource;
use crate::totals::SortOrder;

use serde::Deserialize;
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

/// Request data for describing a dataset
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct DescribeRequest {
    /// Object store key of the source file
    #[validate(custom = "validate_object_key")]
    pub object: String,
    /// Category column to compute per-group statistics for
    #[validate(length(min = 1, message = "group_by must not be empty"))]
    pub group_by: Option<String>,
}

/// Request data for chart series
///
/// Rows come from exactly one of `object`, `objects` or `prefix`.
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_series_source"))]
pub struct SeriesRequest {
    /// Object store key of the source file
    #[validate(custom = "validate_object_key")]
    pub object: Option<String>,
    /// Object store keys of source files to merge
    #[validate(
        length(min = 1, message = "objects must not be empty"),
        custom = "validate_object_keys"
    )]
    pub objects: Option<Vec<String>>,
    /// Key prefix of source files, chosen by the date in their names
    #[validate(custom = "validate_prefix")]
    pub prefix: Option<String>,
    /// Columns to chart, in order
    #[validate(
        length(min = 1, message = "variables must not be empty"),
        custom = "validate_variables"
    )]
    pub variables: Vec<String>,
    /// Inclusive start of the time range. Unbounded if absent.
    pub start: Option<Timestamp>,
    /// Inclusive end of the time range. Unbounded if absent.
    pub end: Option<Timestamp>,
    /// Predicates on columns, all of which a row must satisfy
    pub filters: Option<BTreeMap<String, Predicate>>,
    /// Category column to split each series by
    pub split_by: Option<String>,
    /// Calendar resampling of each series
    pub resample: Option<Resample>,
    /// Whether a series without points fails the request. Defaults to the server setting.
    pub fail_on_empty: Option<bool>,
}

impl SeriesRequest {
    /// Where the rows come from.
    pub fn source(&self) -> Result<DatasetSource, EnergyVizError> {
        Ok(dataset_source(&self.object, &self.objects, &self.prefix)?)
    }

    /// Build the [QuerySpec] for this request.
    ///
    /// Fails with [EnergyVizError::InvalidRange] if `start` is after `end`.
    pub fn to_query_spec(&self) -> Result<QuerySpec, EnergyVizError> {
        query_spec(&self.variables, self.start, self.end, &self.filters)
    }

    /// Build the [ChartOptions] for this request.
    ///
    /// # Arguments
    ///
    /// * `default_fail_on_empty`: Policy used when the request does not set one
    pub fn chart_options(&self, default_fail_on_empty: bool) -> ChartOptions {
        ChartOptions {
            split_by: self.split_by.clone(),
            resample: self.resample,
            policy: SeriesPolicy {
                fail_on_empty: self.fail_on_empty.unwrap_or(default_fail_on_empty),
            },
        }
    }
}

/// Request data for per-category totals
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_totals_source"))]
pub struct TotalsRequest {
    #[validate(custom = "validate_object_key")]
    pub object: Option<String>,
    #[validate(
        length(min = 1, message = "objects must not be empty"),
        custom = "validate_object_keys"
    )]
    pub objects: Option<Vec<String>>,
    #[validate(custom = "validate_prefix")]
    pub prefix: Option<String>,
    /// Numeric column to sum
    #[validate(length(min = 1, message = "variable must not be empty"))]
    pub variable: String,
    /// Category column to group by
    #[validate(length(min = 1, message = "by must not be empty"))]
    pub by: String,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub filters: Option<BTreeMap<String, Predicate>>,
    /// Order by total. Category order if absent.
    pub sort: Option<SortOrder>,
}

impl TotalsRequest {
    /// Where the rows come from.
    pub fn source(&self) -> Result<DatasetSource, EnergyVizError> {
        Ok(dataset_source(&self.object, &self.objects, &self.prefix)?)
    }

    /// Build the [QuerySpec] holding this request's time range and filters.
    pub fn to_query_spec(&self) -> Result<QuerySpec, EnergyVizError> {
        query_spec(&[], self.start, self.end, &self.filters)
    }
}

fn query_spec(
    variables: &[String],
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    filters: &Option<BTreeMap<String, Predicate>>,
) -> Result<QuerySpec, EnergyVizError> {
    let time_range = TimeRange::bounded(start, end)?;
    let mut spec = QuerySpec::new(variables.iter().cloned(), time_range);
    if let Some(filters) = filters {
        spec.filters = filters.clone();
    }
    Ok(spec)
}

fn dataset_source(
    object: &Option<String>,
    objects: &Option<Vec<String>>,
    prefix: &Option<String>,
) -> Result<DatasetSource, ValidationError> {
    match (object, objects, prefix) {
        (Some(object), None, None) => Ok(DatasetSource::Object(object.clone())),
        (None, Some(objects), None) => Ok(DatasetSource::Objects(objects.clone())),
        (None, None, Some(prefix)) => Ok(DatasetSource::Prefix(prefix.clone())),
        _ => Err(ValidationError::new(
            "exactly one of object, objects or prefix is required",
        )),
    }
}

fn validate_series_source(request: &SeriesRequest) -> Result<(), ValidationError> {
    dataset_source(&request.object, &request.objects, &request.prefix).map(|_| ())
}

fn validate_totals_source(request: &TotalsRequest) -> Result<(), ValidationError> {
    dataset_source(&request.object, &request.objects, &request.prefix).map(|_| ())
}

fn has_parent_segment(key: &str) -> bool {
    key.split('/').any(|segment| segment == "..")
}

/// Validate an object key
fn validate_object_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::new("object must not be empty"));
    }
    if has_parent_segment(key) {
        let mut error = ValidationError::new("object must not contain a '..' segment");
        error.add_param("object".into(), &key);
        return Err(error);
    }
    Ok(())
}

fn validate_object_keys(keys: &[String]) -> Result<(), ValidationError> {
    keys.iter().try_for_each(|key| validate_object_key(key))
}

/// An empty prefix selects every object.
fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if has_parent_segment(prefix) {
        return Err(ValidationError::new("prefix must not contain a '..' segment"));
    }
    Ok(())
}

/// Validate variable names
fn validate_variables(variables: &[String]) -> Result<(), ValidationError> {
    if variables.iter().any(|variable| variable.is_empty()) {
        return Err(ValidationError::new("variable names must not be empty"));
    }
    Ok(())
}

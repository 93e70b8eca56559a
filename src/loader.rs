//! Dataset loader.
//!
//! Parses the raw bytes of a source object into a [Dataset]. Sources may be delimited text (ONS
//! publishes `;`-separated CSV) or Parquet, optionally gzip-compressed. The format is detected
//! from the content.

use crate::compression;
use crate::dataset::{Column, ColumnKind, Dataset, Row, Schema, Timestamp, Value};
use crate::error::EnergyVizError;

use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Options controlling how a source is interpreted.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Name of the timestamp column. Detected from the column names if not set.
    pub timestamp_column: Option<String>,
    /// Columns that must be present.
    pub required_columns: Vec<String>,
    /// CSV field delimiter. Detected from the header line if not set.
    pub delimiter: Option<u8>,
    /// Largest decompressed size accepted for gzip sources, in bytes.
    pub max_inflated_size: Option<usize>,
}

/// Supported source encodings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceFormat {
    Csv,
    Parquet,
}

impl SourceFormat {
    /// Detect the format of (uncompressed) data from its leading bytes.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(b"PAR1") {
            SourceFormat::Parquet
        } else {
            SourceFormat::Csv
        }
    }
}

/// Parse raw bytes into a [Dataset].
///
/// Timestamps are normalised to UTC milliseconds and rows are stably sorted by time.
///
/// # Arguments
///
/// * `raw`: Object data, possibly gzip-compressed
/// * `options`: [LoadOptions] for the source
#[tracing::instrument(level = "DEBUG", skip(raw, options), fields(size = raw.len()))]
pub fn load(raw: Bytes, options: &LoadOptions) -> Result<Dataset, EnergyVizError> {
    let raw = compression::maybe_decompress(raw, options.max_inflated_size)?;
    let dataset = match SourceFormat::detect(&raw) {
        SourceFormat::Parquet => load_parquet(raw, options)?,
        SourceFormat::Csv => load_csv(&raw, options)?,
    };
    tracing::debug!(
        rows = dataset.len(),
        columns = dataset.schema().columns().len() + 1,
        "loaded dataset"
    );
    Ok(dataset)
}

/// Whether a column name looks like a date/time column.
///
/// ONS extracts name their time column `din_instante`, older extracts use `DATA`.
fn looks_like_timestamp(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper.contains("DATA")
        || upper.contains("INSTANTE")
        || matches!(upper.as_str(), "TIMESTAMP" | "DATE" | "DATETIME" | "TIME")
}

/// Locate the timestamp column and check the required columns are present.
fn resolve_columns(names: &[String], options: &LoadOptions) -> Result<usize, EnergyVizError> {
    for required in &options.required_columns {
        if !names.contains(required) {
            return Err(EnergyVizError::Schema {
                reason: format!("missing column {}", required),
            });
        }
    }
    match &options.timestamp_column {
        Some(name) => names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| EnergyVizError::Schema {
                reason: format!("missing timestamp column {}", name),
            }),
        None => names
            .iter()
            .position(|n| looks_like_timestamp(n))
            .ok_or_else(|| EnergyVizError::Schema {
                reason: "no timestamp column found".to_string(),
            }),
    }
}

fn parse_timestamp_cell(text: &str, row: usize) -> Result<Timestamp, EnergyVizError> {
    if text.is_empty() {
        return Err(EnergyVizError::Parse {
            reason: format!("row {} has no timestamp", row),
        });
    }
    Timestamp::parse(text).map_err(|_| EnergyVizError::Parse {
        reason: format!("row {} has unrecognised timestamp '{}'", row, text),
    })
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Pick `;` or `,` depending on which occurs more in the header line.
fn sniff_delimiter(data: &[u8]) -> u8 {
    let header = data.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = header.iter().filter(|b| **b == b';').count();
    let commas = header.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Parse a numeric cell. With a `;` delimiter a decimal comma is accepted.
fn parse_number(text: &str, decimal_comma: bool) -> Option<f64> {
    match text.parse::<f64>() {
        Ok(value) => Some(value),
        Err(_) if decimal_comma && !text.contains('.') && text.matches(',').count() == 1 => {
            text.replacen(',', ".", 1).parse().ok()
        }
        Err(_) => None,
    }
}

fn load_csv(data: &[u8], options: &LoadOptions) -> Result<Dataset, EnergyVizError> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    let delimiter = options.delimiter.unwrap_or_else(|| sniff_delimiter(data));
    let decimal_comma = delimiter == b';';
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(data);

    let names: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect();
    let ts_index = resolve_columns(&names, options)?;

    let mut records = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let cells: Vec<String> = record
            .iter()
            .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
            .collect();
        records.push(cells);
    }

    // A column is numeric if every non-empty cell parses as a number.
    let columns: Vec<(usize, Column)> = names
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_index)
        .map(|(i, name)| {
            let numeric = records
                .iter()
                .map(|cells| cells[i].as_str())
                .filter(|cell| !cell.is_empty())
                .all(|cell| parse_number(cell, decimal_comma).is_some());
            let kind = if numeric {
                ColumnKind::Number
            } else {
                ColumnKind::Category
            };
            (i, Column::new(name.clone(), kind))
        })
        .collect();

    let mut rows = Vec::with_capacity(records.len());
    for (n, cells) in records.iter().enumerate() {
        // Header is line 1.
        let timestamp = parse_timestamp_cell(&cells[ts_index], n + 2)?;
        let values = columns
            .iter()
            .map(|(i, column)| {
                let cell = cells[*i].as_str();
                if cell.is_empty() {
                    return Value::Missing;
                }
                match column.kind {
                    ColumnKind::Number => parse_number(cell, decimal_comma)
                        .map(Value::number)
                        .unwrap_or(Value::Missing),
                    _ => Value::Category(cell.to_string()),
                }
            })
            .collect();
        rows.push(Row::new(timestamp, values));
    }

    let schema = Schema::new(
        names[ts_index].clone(),
        columns.into_iter().map(|(_, column)| column).collect(),
    )?;
    Dataset::new(schema, rows)
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Column kind for an Arrow data type.
fn kind_of(data_type: &DataType) -> ColumnKind {
    match data_type {
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => ColumnKind::Timestamp,
        data_type if data_type.is_numeric() => ColumnKind::Number,
        _ => ColumnKind::Category,
    }
}

/// Millisecond timestamps of a temporal or string column.
///
/// Zoned timestamps are already UTC. Naive timestamps are taken to be UTC.
fn timestamp_values(array: &dyn Array) -> Result<Vec<Option<i64>>, EnergyVizError> {
    let values = match array.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => array
            .as_primitive::<TimestampSecondType>()
            .iter()
            .map(|v| v.map(|s| s.saturating_mul(1_000)))
            .collect(),
        DataType::Timestamp(TimeUnit::Millisecond, _) => array
            .as_primitive::<TimestampMillisecondType>()
            .iter()
            .collect(),
        DataType::Timestamp(TimeUnit::Microsecond, _) => array
            .as_primitive::<TimestampMicrosecondType>()
            .iter()
            .map(|v| v.map(|us| us.div_euclid(1_000)))
            .collect(),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => array
            .as_primitive::<TimestampNanosecondType>()
            .iter()
            .map(|v| v.map(|ns| ns.div_euclid(1_000_000)))
            .collect(),
        DataType::Date32 => array
            .as_primitive::<Date32Type>()
            .iter()
            .map(|v| v.map(|days| i64::from(days) * MILLIS_PER_DAY))
            .collect(),
        DataType::Date64 => array.as_primitive::<Date64Type>().iter().collect(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Dictionary(_, _) => {
            let strings = cast(array, &DataType::Utf8)?;
            strings
                .as_string::<i32>()
                .iter()
                .map(|v| match v {
                    Some(text) if !text.trim().is_empty() => {
                        Timestamp::parse(text).map(|ts| Some(ts.millis()))
                    }
                    _ => Ok(None),
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        other => {
            return Err(EnergyVizError::Schema {
                reason: format!("timestamp column has unsupported type {}", other),
            })
        }
    };
    Ok(values)
}

/// Cells of a column as [Value]s of the given kind.
fn column_values(array: &dyn Array, kind: ColumnKind) -> Result<Vec<Value>, EnergyVizError> {
    let values = match kind {
        ColumnKind::Timestamp => timestamp_values(array)?
            .into_iter()
            .map(|v| v.map_or(Value::Missing, |ms| Value::Timestamp(Timestamp(ms))))
            .collect(),
        ColumnKind::Number => {
            let floats = cast(array, &DataType::Float64)?;
            floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| v.map_or(Value::Missing, Value::number))
                .collect()
        }
        ColumnKind::Category => {
            let strings = cast(array, &DataType::Utf8)?;
            strings
                .as_string::<i32>()
                .iter()
                .map(|v| v.map_or(Value::Missing, |s| Value::Category(s.to_string())))
                .collect()
        }
    };
    Ok(values)
}

fn load_parquet(data: Bytes, options: &LoadOptions) -> Result<Dataset, EnergyVizError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let fields = builder.schema().fields().clone();
    let names: Vec<String> = fields.iter().map(|f| f.name().clone()).collect();
    let ts_index = resolve_columns(&names, options)?;
    let columns: Vec<(usize, Column)> = fields
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_index)
        .map(|(i, field)| (i, Column::new(field.name().clone(), kind_of(field.data_type()))))
        .collect();

    let mut rows = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let timestamps = timestamp_values(batch.column(ts_index).as_ref())?;
        let mut cells = columns
            .iter()
            .map(|(i, column)| {
                column_values(batch.column(*i).as_ref(), column.kind).map(Vec::into_iter)
            })
            .collect::<Result<Vec<_>, _>>()?;
        for timestamp in timestamps {
            let row = rows.len() + 1;
            let timestamp = timestamp.ok_or_else(|| EnergyVizError::Parse {
                reason: format!("row {} has no timestamp", row),
            })?;
            let values = cells
                .iter_mut()
                .map(|column| column.next().unwrap_or(Value::Missing))
                .collect();
            rows.push(Row::new(Timestamp(timestamp), values));
        }
    }

    let schema = Schema::new(
        names[ts_index].clone(),
        columns.into_iter().map(|(_, column)| column).collect(),
    )?;
    Dataset::new(schema, rows)
}

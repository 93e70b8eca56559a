//! In-memory tabular data model.
//!
//! A [Dataset] is an immutable table of energy-generation records. Its [Schema] is declared once
//! and checked when the dataset is built, so every [Row] is known to match it. Each cell is a
//! tagged [Value], and rows are held in ascending timestamp order.

use crate::error::EnergyVizError;

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// A point in time, in milliseconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Earliest representable timestamp.
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    /// Latest representable timestamp.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Milliseconds since the Unix epoch.
    pub fn millis(self) -> i64 {
        self.0
    }

    /// Convert from a UTC date-time, truncating to millisecond precision.
    pub fn from_datetime(datetime: OffsetDateTime) -> Result<Self, EnergyVizError> {
        let millis = datetime.unix_timestamp_nanos() / 1_000_000;
        Ok(Timestamp(i64::try_from(millis)?))
    }

    /// Convert to a UTC date-time.
    pub fn to_datetime(self) -> Result<OffsetDateTime, EnergyVizError> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000).map_err(|err| {
            EnergyVizError::Parse {
                reason: format!("timestamp {} out of range: {}", self.0, err),
            }
        })
    }

    /// Parse a textual timestamp.
    ///
    /// Accepted forms, tried in order:
    ///
    /// * an integer number of milliseconds since the epoch
    /// * RFC 3339, e.g. `2023-01-01T03:00:00-03:00`
    /// * `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DDTHH:MM:SS`, optionally with fractional seconds,
    ///   interpreted as UTC
    /// * `YYYY-MM-DD`, interpreted as midnight UTC
    pub fn parse(text: &str) -> Result<Self, EnergyVizError> {
        let text = text.trim();
        if let Ok(millis) = text.parse::<i64>() {
            return Ok(Timestamp(millis));
        }
        if let Ok(datetime) = OffsetDateTime::parse(text, &Rfc3339) {
            return Self::from_datetime(datetime);
        }
        let naive = PrimitiveDateTime::parse(
            text,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
        .or_else(|_| {
            PrimitiveDateTime::parse(
                text,
                format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
            )
        })
        .or_else(|_| {
            PrimitiveDateTime::parse(
                text,
                format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
            )
        })
        .or_else(|_| {
            PrimitiveDateTime::parse(
                text,
                format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
            )
        })
        .or_else(|_| {
            Date::parse(text, format_description!("[year]-[month]-[day]")).map(Date::midnight)
        });
        match naive {
            Ok(naive) => Self::from_datetime(naive.assume_utc()),
            Err(_) => Err(EnergyVizError::Parse {
                reason: format!("unrecognised timestamp '{}'", text),
            }),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = EnergyVizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

// Timestamps arrive in requests either as integer milliseconds or as text.
impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TimestampVisitor;

        impl<'de> de::Visitor<'de> for TimestampVisitor {
            type Value = Timestamp;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("milliseconds since the epoch or a date-time string")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Timestamp, E> {
                Ok(Timestamp(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Timestamp, E> {
                i64::try_from(value)
                    .map(Timestamp)
                    .map_err(|_| E::custom(format!("timestamp {} out of range", value)))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Timestamp, E> {
                Timestamp::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// Kind of data held by a column.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColumnKind {
    Timestamp,
    Number,
    Category,
}

/// A single cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Timestamp(Timestamp),
    Category(String),
    Missing,
}

impl Value {
    /// Build a numeric cell, mapping NaN to [Value::Missing].
    pub fn number(value: f64) -> Self {
        if value.is_nan() {
            Value::Missing
        } else {
            Value::Number(value)
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Kind of the cell, or `None` if it is missing.
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Value::Number(_) => Some(ColumnKind::Number),
            Value::Timestamp(_) => Some(ColumnKind::Timestamp),
            Value::Category(_) => Some(ColumnKind::Category),
            Value::Missing => None,
        }
    }

    /// Finite numeric value of the cell, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) if value.is_finite() => Some(*value),
            _ => None,
        }
    }
}

/// A named, typed column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Column {
            name: name.into(),
            kind,
        }
    }
}

/// Column layout shared by every row of a [Dataset].
///
/// The timestamp column is held separately from the remaining `columns`.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    timestamp: String,
    columns: Vec<Column>,
}

impl Schema {
    /// Returns a new Schema, failing if any column name is repeated.
    pub fn new(timestamp: impl Into<String>, columns: Vec<Column>) -> Result<Self, EnergyVizError> {
        let timestamp = timestamp.into();
        for (i, column) in columns.iter().enumerate() {
            if column.name == timestamp || columns[..i].iter().any(|c| c.name == column.name) {
                return Err(EnergyVizError::Schema {
                    reason: format!("duplicate column '{}'", column.name),
                });
            }
        }
        Ok(Schema { timestamp, columns })
    }

    /// Name of the timestamp column.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Non-timestamp columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Index into [Row::values] of the named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Whether `name` is the timestamp column or one of the other columns.
    pub fn contains(&self, name: &str) -> bool {
        name == self.timestamp || self.index_of(name).is_some()
    }
}

/// A single record.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub timestamp: Timestamp,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(timestamp: Timestamp, values: Vec<Value>) -> Self {
        Row { timestamp, values }
    }
}

/// Immutable table of rows sorted by timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    schema: Schema,
    rows: Vec<Row>,
}

impl Dataset {
    /// Build a dataset, checking every row against the schema.
    ///
    /// Rows are stably sorted by timestamp, so rows sharing a timestamp keep their order.
    pub fn new(schema: Schema, mut rows: Vec<Row>) -> Result<Self, EnergyVizError> {
        let columns = schema.columns();
        for (n, row) in rows.iter().enumerate() {
            if row.values.len() != columns.len() {
                return Err(EnergyVizError::Schema {
                    reason: format!(
                        "row {} has {} values but the schema has {} columns",
                        n,
                        row.values.len(),
                        columns.len()
                    ),
                });
            }
            for (value, column) in row.values.iter().zip(columns) {
                if let Some(kind) = value.kind() {
                    if kind != column.kind {
                        return Err(EnergyVizError::Schema {
                            reason: format!(
                                "row {} column '{}' holds a {} but the column is {}",
                                n, column.name, kind, column.kind
                            ),
                        });
                    }
                }
            }
        }
        if !rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp) {
            rows.sort_by_key(|row| row.timestamp);
        }
        Ok(Dataset { schema, rows })
    }

    /// Build a dataset from rows already known to satisfy the invariants.
    pub(crate) fn from_parts(schema: Schema, rows: Vec<Row>) -> Self {
        Dataset { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First and last timestamps, if there are any rows.
    pub fn span(&self) -> Option<(Timestamp, Timestamp)> {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Cell of the named column in a row. The timestamp column yields [Value::Timestamp].
    pub fn value(&self, row: &Row, name: &str) -> Option<Value> {
        if name == self.schema.timestamp {
            return Some(Value::Timestamp(row.timestamp));
        }
        self.schema
            .index_of(name)
            .and_then(|index| row.values.get(index))
            .cloned()
    }
}

//! Calendar resampling of chart series.

use crate::chart::{ChartSeries, Point};
use crate::dataset::Timestamp;
use crate::error::EnergyVizError;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use time::{Date, Month};

const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Bucket width for resampling. Buckets are aligned to the UTC calendar.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Frequency {
    Hour,
    Day,
    /// ISO week, starting on Monday
    Week,
    Month,
    Year,
}

impl Frequency {
    /// Start of the bucket containing `timestamp`.
    ///
    /// Fails with [EnergyVizError::Parse] when the bucket start is not representable, which only
    /// happens for timestamps at the far ends of the `i64` range.
    pub fn bucket_start(self, timestamp: Timestamp) -> Result<Timestamp, EnergyVizError> {
        let millis = timestamp.millis();
        let start = match self {
            Frequency::Hour => millis.div_euclid(MILLIS_PER_HOUR).checked_mul(MILLIS_PER_HOUR),
            Frequency::Day => millis.div_euclid(MILLIS_PER_DAY).checked_mul(MILLIS_PER_DAY),
            Frequency::Week => {
                // The epoch was a Thursday, three days after a Monday.
                let days = millis.div_euclid(MILLIS_PER_DAY);
                days.checked_add(3)
                    .and_then(|shifted| days.checked_sub(shifted.rem_euclid(7)))
                    .and_then(|monday| monday.checked_mul(MILLIS_PER_DAY))
            }
            Frequency::Month | Frequency::Year => {
                let date = timestamp.to_datetime()?.date();
                let month = if self == Frequency::Month {
                    date.month()
                } else {
                    Month::January
                };
                let first = Date::from_calendar_date(date.year(), month, 1).map_err(|err| {
                    EnergyVizError::Parse {
                        reason: format!("timestamp {} out of range: {}", timestamp, err),
                    }
                })?;
                return Timestamp::from_datetime(first.midnight().assume_utc());
            }
        };
        start.map(Timestamp).ok_or_else(|| EnergyVizError::Parse {
            reason: format!("timestamp {} out of range", timestamp),
        })
    }
}

/// How the points of a bucket are combined.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

/// A resampling request.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Resample {
    pub frequency: Frequency,
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// Running aggregate of one bucket.
struct Bucket {
    start: Timestamp,
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Bucket {
    fn new(start: Timestamp, y: f64) -> Self {
        Bucket {
            start,
            count: 1,
            sum: y,
            min: y,
            max: y,
        }
    }

    fn push(&mut self, y: f64) {
        self.count += 1;
        self.sum += y;
        self.min = self.min.min(y);
        self.max = self.max.max(y);
    }

    fn finish(&self, aggregation: Aggregation) -> Point {
        let y = match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Mean => self.sum / self.count as f64,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::Count => self.count as f64,
        };
        Point { x: self.start, y }
    }
}

/// Resample a series into calendar buckets.
///
/// Each point of the result is placed at the start of its bucket. Buckets without points are
/// not emitted.
///
/// # Arguments
///
/// * `series`: [ChartSeries] with points in ascending x order
/// * `resample`: Bucket [Frequency] and [Aggregation]
pub fn resample(series: &ChartSeries, resample: &Resample) -> Result<ChartSeries, EnergyVizError> {
    let mut points = Vec::new();
    let mut current: Option<Bucket> = None;
    for point in &series.points {
        let start = resample.frequency.bucket_start(point.x)?;
        match current.as_mut() {
            Some(bucket) if bucket.start == start => bucket.push(point.y),
            _ => {
                if let Some(bucket) = current.replace(Bucket::new(start, point.y)) {
                    points.push(bucket.finish(resample.aggregation));
                }
            }
        }
    }
    if let Some(bucket) = current {
        points.push(bucket.finish(resample.aggregation));
    }
    Ok(ChartSeries {
        name: series.name.clone(),
        points,
    })
}

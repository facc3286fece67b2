//! Core data types: stations, the city/date-range filter, and the raw dataset
//! a source hands back to the aggregator.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::PulseError;

/// Operational status of a station as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    Online,
    Offline,
    Maintenance,
}

/// A battery-swap / charging point. Rows from the `stations` table decode
/// straight into this; unknown columns are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub city: String,
    pub longitude: f64,
    pub latitude: f64,
    pub status: StationStatus,
    /// Percent, 0-100.
    pub utilization: f64,
}

/// Inclusive calendar range. `end` covers the whole of its day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PulseError> {
        if start > end {
            return Err(PulseError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Lower timestamp bound, `YYYY-MM-DDT00:00:00Z`.
    pub fn start_bound(&self) -> String {
        self.start
            .and_time(NaiveTime::MIN)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    }

    /// Upper timestamp bound, last second of `end`.
    pub fn end_bound(&self) -> String {
        self.end
            .and_hms_opt(23, 59, 59)
            .unwrap_or_else(|| self.end.and_time(NaiveTime::MIN))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    }
}

/// The selection that scopes every backend query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub city: String,
    pub range: DateRange,
}

impl Filter {
    pub fn new(city: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Result<Self, PulseError> {
        Ok(Self {
            city: city.into(),
            range: DateRange::new(start, end)?,
        })
    }
}

/// What a single load returns: the city's stations and the number of swap
/// events inside the range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub stations: Vec<Station>,
    pub swap_count: u64,
}

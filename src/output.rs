//! Output formatting and persistence for KPI snapshots.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregator::{DashboardState, LoadStatus};
use crate::kpi::Trend;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One flat CSV row per published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiRecord {
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub stations: usize,
    pub total_evs: u64,
    pub total_swaps: u64,
    pub avg_util: u64,
    pub co2_saved: u64,
    pub trend: Trend,
    pub status: String,
    pub error_message: Option<String>,
}

impl KpiRecord {
    /// `None` until a filter has been applied.
    pub fn from_state(state: &DashboardState) -> Option<Self> {
        let filter = state.filter.as_ref()?;
        let (status, error_message) = match &state.status {
            LoadStatus::Idle => ("idle", None),
            LoadStatus::Loading => ("loading", None),
            LoadStatus::Loaded => ("loaded", None),
            LoadStatus::Stale { error } => ("stale", Some(error.clone())),
            LoadStatus::Disconnected => ("disconnected", None),
        };

        Some(KpiRecord {
            timestamp: state.last_updated.unwrap_or_else(Utc::now),
            city: filter.city.clone(),
            start: filter.range.start,
            end: filter.range.end,
            stations: state.stations.len(),
            total_evs: state.kpis.total_evs,
            total_swaps: state.kpis.total_swaps,
            avg_util: state.kpis.avg_util,
            co2_saved: state.kpis.co2_saved,
            trend: state.kpis.trend,
            status: status.to_string(),
            error_message,
        })
    }
}

/// Logs a dashboard state using Rust's debug pretty-print format.
pub fn print_pretty(state: &DashboardState) {
    debug!("{:#?}", state);
}

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a [`KpiRecord`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, record: &KpiRecord) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Filter;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn loaded_state() -> DashboardState {
        let mut state = DashboardState::default();
        state.filter = Some(
            Filter::new(
                "Indore",
                NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 7, 10).unwrap(),
            )
            .unwrap(),
        );
        state.kpis.total_evs = 3000;
        state.kpis.avg_util = 45;
        state.status = LoadStatus::Loaded;
        state
    }

    fn record() -> KpiRecord {
        KpiRecord::from_state(&loaded_state()).unwrap()
    }

    #[test]
    fn test_record_requires_filter() {
        assert!(KpiRecord::from_state(&DashboardState::default()).is_none());
    }

    #[test]
    fn test_record_carries_stale_error() {
        let mut state = loaded_state();
        state.status = LoadStatus::Stale {
            error: "HTTP error: timeout".to_string(),
        };
        let record = KpiRecord::from_state(&state).unwrap();
        assert_eq!(record.status, "stale");
        assert_eq!(record.error_message.as_deref(), Some("HTTP error: timeout"));
        assert_eq!(record.total_evs, 3000);
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&loaded_state());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&loaded_state()).unwrap();
    }

    #[test]
    fn test_append_record_creates_file() {
        let path = temp_path("emobility_pulse_test_create.csv");
        let _ = fs::remove_file(&path); // clean up any prior run

        append_record(&path, &record()).unwrap();

        assert!(Path::new(&path).exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Indore"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let path = temp_path("emobility_pulse_test_header.csv");
        let _ = fs::remove_file(&path);

        append_record(&path, &record()).unwrap();
        append_record(&path, &record()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp,")).count(), 1);

        fs::remove_file(&path).unwrap();
    }
}

//! KPI derivation for the e-mobility dashboard.
//!
//! Every snapshot is derived purely from the current station set and swap
//! count; nothing is carried between snapshots except the previous swap
//! count used for the trend arrow.

use serde::{Deserialize, Serialize};

use crate::model::Station;

/// Estimated active vehicles served per station.
pub const UNITS_PER_STATION: u64 = 1500;

/// Estimated CO2 saved per swap event.
pub const CO2_PER_SWAP: f64 = 4.82;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub total_evs: u64,
    pub total_swaps: u64,
    pub avg_util: u64,
    pub co2_saved: u64,
    pub trend: Trend,
}

impl KpiSnapshot {
    /// Derives a snapshot. `previous` is the snapshot this one replaces for
    /// the same filter, if any.
    pub fn derive(stations: &[Station], swap_count: u64, previous: Option<&KpiSnapshot>) -> Self {
        KpiSnapshot {
            total_evs: active_units(stations.len()),
            total_swaps: swap_count,
            avg_util: average_utilization(stations),
            co2_saved: emissions_saved(swap_count),
            trend: previous
                .map(|p| trend(p.total_swaps, swap_count))
                .unwrap_or_default(),
        }
    }
}

pub fn active_units(station_count: usize) -> u64 {
    station_count as u64 * UNITS_PER_STATION
}

/// Rounded mean utilization, 0 for an empty set.
pub fn average_utilization(stations: &[Station]) -> u64 {
    let values: Vec<f64> = stations.iter().map(|s| s.utilization).collect();
    mean(&values).round().max(0.0) as u64
}

pub fn emissions_saved(swap_count: u64) -> u64 {
    (swap_count as f64 * CO2_PER_SWAP).round() as u64
}

pub fn trend(previous: u64, current: u64) -> Trend {
    match current.cmp(&previous) {
        std::cmp::Ordering::Greater => Trend::Up,
        std::cmp::Ordering::Less => Trend::Down,
        std::cmp::Ordering::Equal => Trend::Neutral,
    }
}

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

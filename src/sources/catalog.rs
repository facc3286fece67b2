//! Built-in station catalog used by the simulation.

use crate::model::{Station, StationStatus};

const STATIONS: &[(&str, &str, &str, f64, f64, StationStatus, f64)] = &[
    ("bpl-1", "Bhopal Central", "Bhopal", 77.4126, 23.2599, StationStatus::Online, 82.0),
    ("bpl-2", "Bhopal North", "Bhopal", 77.45, 23.30, StationStatus::Maintenance, 60.0),
    ("ind-1", "Indore Main", "Indore", 75.8577, 22.7196, StationStatus::Online, 90.0),
    ("ind-2", "Indore South", "Indore", 75.90, 22.70, StationStatus::Offline, 0.0),
    ("gwl-1", "Gwalior Central", "Gwalior", 78.1689, 26.2183, StationStatus::Online, 75.0),
    ("gwl-2", "Gwalior East", "Gwalior", 78.20, 26.25, StationStatus::Online, 68.0),
    ("jbp-1", "Jabalpur Main", "Jabalpur", 79.9864, 23.1815, StationStatus::Maintenance, 55.0),
    ("jbp-2", "Jabalpur West", "Jabalpur", 80.00, 23.20, StationStatus::Online, 88.0),
];

pub fn all_stations() -> Vec<Station> {
    STATIONS
        .iter()
        .map(|&(id, name, city, longitude, latitude, status, utilization)| Station {
            id: id.to_string(),
            name: name.to_string(),
            city: city.to_string(),
            longitude,
            latitude,
            status,
            utilization,
        })
        .collect()
}

pub fn stations_for_city(city: &str) -> Vec<Station> {
    all_stations()
        .into_iter()
        .filter(|s| s.city == city)
        .collect()
}

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::catalog;
use super::{MetricsSource, Subscription, Update};
use crate::error::PulseError;
use crate::model::{Dataset, Filter, Station, StationStatus};

/// Largest utilization change applied to a station in one tick.
pub const MAX_UTILIZATION_DELTA: f64 = 10.0;

/// Largest number of swaps added in one tick.
pub const MAX_SWAPS_PER_TICK: u64 = 5;

/// Local stand-in for the backend. Loads come from the station catalog; the
/// subscription perturbs those stations on a fixed interval.
pub struct SimulatedSource {
    tick: Duration,
    seed: Option<u64>,
}

impl SimulatedSource {
    pub fn new(tick: Duration) -> Self {
        Self { tick, seed: None }
    }

    /// Deterministic variant for tests and demos.
    pub fn seeded(tick: Duration, seed: u64) -> Self {
        Self {
            tick,
            seed: Some(seed),
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Moves utilization by a bounded random delta (clamped to 0-100) and
/// redraws the status.
pub fn perturb<R: Rng>(station: &mut Station, rng: &mut R) {
    let delta = rng.gen_range(-MAX_UTILIZATION_DELTA..=MAX_UTILIZATION_DELTA).round();
    station.utilization = (station.utilization + delta).clamp(0.0, 100.0);
    station.status = draw_status(rng);
}

/// 85% online, 10% maintenance, 5% offline.
pub fn draw_status<R: Rng>(rng: &mut R) -> StationStatus {
    match rng.gen_range(0..100u32) {
        0..=84 => StationStatus::Online,
        85..=94 => StationStatus::Maintenance,
        _ => StationStatus::Offline,
    }
}

#[async_trait]
impl MetricsSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulation"
    }

    async fn load(&self, filter: &Filter) -> Result<Dataset, PulseError> {
        Ok(Dataset {
            stations: catalog::stations_for_city(&filter.city),
            swap_count: 0,
        })
    }

    fn subscribe(&self, filter: &Filter) -> Subscription {
        let mut stations = catalog::stations_for_city(&filter.city);
        let mut rng = self.rng();
        let tick = self.tick;
        let city = filter.city.clone();
        let (tx, rx) = mpsc::channel(4);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;

                for station in stations.iter_mut() {
                    perturb(station, &mut rng);
                }
                let swap_increment = rng.gen_range(0..=MAX_SWAPS_PER_TICK);
                debug!(city = %city, swap_increment, "Simulation tick");

                let update = Update::Patch {
                    stations: stations.clone(),
                    swap_increment,
                };
                if tx.send(update).await.is_err() {
                    break;
                }
            }
        });

        Subscription::new(rx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn filter(city: &str) -> Filter {
        Filter::new(
            city,
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, 10).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_utilization_stays_clamped() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut stations = catalog::all_stations();

        for _ in 0..10_000 {
            for station in stations.iter_mut() {
                perturb(station, &mut rng);
                assert!((0.0..=100.0).contains(&station.utilization));
            }
        }
    }

    #[test]
    fn test_perturb_delta_is_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut station = catalog::stations_for_city("Gwalior").remove(0);

        for _ in 0..1_000 {
            let before = station.utilization;
            perturb(&mut station, &mut rng);
            assert!((station.utilization - before).abs() <= MAX_UTILIZATION_DELTA);
        }
    }

    #[test]
    fn test_status_distribution() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 100_000;
        let mut online = 0;
        let mut maintenance = 0;
        let mut offline = 0;

        for _ in 0..draws {
            match draw_status(&mut rng) {
                StationStatus::Online => online += 1,
                StationStatus::Maintenance => maintenance += 1,
                StationStatus::Offline => offline += 1,
            }
        }

        let pct = |n: i32| n as f64 / draws as f64 * 100.0;
        assert!((pct(online) - 85.0).abs() < 1.0);
        assert!((pct(maintenance) - 10.0).abs() < 1.0);
        assert!((pct(offline) - 5.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_load_returns_catalog_city() {
        let source = SimulatedSource::new(Duration::from_secs(3));
        let dataset = source.load(&filter("Indore")).await.unwrap();

        assert_eq!(dataset.stations.len(), 2);
        assert_eq!(dataset.swap_count, 0);
        assert!(dataset.stations.iter().all(|s| s.city == "Indore"));
    }

    #[tokio::test]
    async fn test_subscription_patches_city_stations() {
        let source = SimulatedSource::seeded(Duration::from_millis(10), 3);
        let mut subscription = source.subscribe(&filter("Bhopal"));

        let update = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();

        match update {
            Update::Patch {
                stations,
                swap_increment,
            } => {
                let ids: Vec<&str> = stations.iter().map(|s| s.id.as_str()).collect();
                assert_eq!(ids, vec!["bpl-1", "bpl-2"]);
                assert!(swap_increment <= MAX_SWAPS_PER_TICK);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }
}

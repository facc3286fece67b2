//! Where dashboard data comes from.
//!
//! [`MetricsSource`] is the strategy the aggregator drives. [`BackendSource`]
//! reads the table store and refetches on change notifications;
//! [`SimulatedSource`] replays the built-in station catalog with random
//! perturbations when no backend is configured.

mod backend;
pub mod catalog;
mod simulation;

pub use backend::BackendSource;
pub use simulation::{SimulatedSource, draw_status, perturb};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Settings;
use crate::error::PulseError;
use crate::fetch::{BasicClient, auth};
use crate::hub::ChangeHub;
use crate::model::{Dataset, Filter, Station};

/// What a subscription tells the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Something changed upstream; reload everything.
    Refetch,
    /// Replace these stations by id and add to the swap counter.
    Patch {
        stations: Vec<Station>,
        swap_increment: u64,
    },
}

/// A live feed of [`Update`]s. Dropping it aborts the producing task and
/// closes the channel.
pub struct Subscription {
    rx: mpsc::Receiver<Update>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Update>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// A subscription fed by a channel the caller owns.
    pub fn from_channel(rx: mpsc::Receiver<Update>) -> Self {
        Self { rx, task: None }
    }

    /// Next update, or `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<Update> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads the stations and swap count for `filter`.
    async fn load(&self, filter: &Filter) -> Result<Dataset, PulseError>;

    /// Opens an update feed for `filter`. Must be called from within a Tokio
    /// runtime.
    fn subscribe(&self, filter: &Filter) -> Subscription;
}

/// Picks the backend when it is fully configured, the simulation otherwise.
pub fn from_settings(settings: &Settings, hub: ChangeHub) -> Result<Arc<dyn MetricsSource>, PulseError> {
    match &settings.backend {
        Some(backend) => {
            info!(url = %backend.url, "Using backend table store");
            let client = auth::supabase(BasicClient::new(), &backend.anon_key)?;
            Ok(Arc::new(BackendSource::new(client, &backend.url, hub)?))
        }
        None => {
            info!(
                tick_ms = settings.sim_tick.as_millis() as u64,
                "Backend not configured, running simulation"
            );
            Ok(Arc::new(SimulatedSource::new(settings.sim_tick)))
        }
    }
}

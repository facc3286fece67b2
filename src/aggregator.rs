//! The realtime metrics aggregator.
//!
//! One driver task owns the current filter session: its subscription and its
//! in-flight fetch. Fetches run in their own tasks and report back tagged with
//! the generation of the filter they were started for; the driver drops any
//! outcome whose generation is no longer current, so a superseded fetch can
//! never write state. Changing the filter drops the old session, which aborts
//! its fetch and releases its subscription before the new one is opened.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PulseError;
use crate::kpi::KpiSnapshot;
use crate::model::{Dataset, Filter, Station};
use crate::retry::RetryPolicy;
use crate::sources::{MetricsSource, Subscription, Update};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Loading,
    Loaded,
    /// The last fetch failed after retries; stations and KPIs are from the
    /// previous successful load.
    Stale { error: String },
    /// The change feed ended; data is no longer refreshed.
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub filter: Option<Filter>,
    pub generation: u64,
    pub stations: Vec<Station>,
    pub kpis: KpiSnapshot,
    pub status: LoadStatus,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            filter: None,
            generation: 0,
            stations: Vec::new(),
            kpis: KpiSnapshot::default(),
            status: LoadStatus::Idle,
            last_updated: None,
        }
    }
}

enum Command {
    SetFilter(Filter),
    Stop,
}

struct FetchOutcome {
    generation: u64,
    result: Result<Dataset, PulseError>,
}

struct Session {
    filter: Filter,
    generation: u64,
    subscription: Option<Subscription>,
    fetch: Option<JoinHandle<()>>,
    /// A notification arrived while `fetch` was running.
    pending_refetch: bool,
    swap_count: u64,
    loaded: bool,
    disconnected: bool,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        if self.subscription.take().is_some() {
            debug!(city = %self.filter.city, generation = self.generation, "Subscription released");
        }
    }
}

pub struct Aggregator {
    source: Arc<dyn MetricsSource>,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Starts the driver task on `filter`.
    pub fn spawn(self, filter: Filter) -> AggregatorHandle {
        let (commands, command_rx) = mpsc::channel(8);
        let (state_tx, state) = watch::channel(DashboardState::default());

        let driver = Driver {
            source: self.source,
            retry: self.retry,
            state: state_tx,
            generation: 0,
        };
        let task = tokio::spawn(driver.run(filter, command_rx));

        AggregatorHandle {
            commands,
            state,
            task,
        }
    }
}

pub struct AggregatorHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<DashboardState>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Switches to a new filter. The previous subscription is released before
    /// the new one is opened.
    pub async fn set_filter(&self, filter: Filter) -> Result<(), PulseError> {
        self.commands
            .send(Command::SetFilter(filter))
            .await
            .map_err(|_| PulseError::Subscription("aggregator has stopped".to_string()))
    }

    pub fn state(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DashboardState> {
        self.state.clone()
    }

    /// Waits until the published state satisfies `predicate`.
    pub async fn wait_until<F>(&self, predicate: F) -> Result<DashboardState, PulseError>
    where
        F: FnMut(&DashboardState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| PulseError::Subscription("aggregator has stopped".to_string()))?;
        Ok(state.clone())
    }

    /// Stops the driver and waits for it to release everything.
    pub async fn stop(self) {
        let _ = self.commands.send(Command::Stop).await;
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Aggregator task ended abnormally");
            }
        }
    }
}

struct Driver {
    source: Arc<dyn MetricsSource>,
    retry: RetryPolicy,
    state: watch::Sender<DashboardState>,
    generation: u64,
}

impl Driver {
    async fn run(mut self, initial: Filter, mut commands: mpsc::Receiver<Command>) {
        let (outcome_tx, mut outcomes) = mpsc::channel::<FetchOutcome>(8);
        let mut session = self.start(initial, &outcome_tx);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetFilter(filter)) => {
                        // Release the old session before opening the new one.
                        drop(session);
                        session = self.start(filter, &outcome_tx);
                    }
                    Some(Command::Stop) | None => break,
                },
                Some(outcome) = outcomes.recv() => {
                    if outcome.generation != session.generation {
                        debug!(
                            stale = outcome.generation,
                            current = session.generation,
                            "Dropping superseded fetch result"
                        );
                        continue;
                    }
                    session.fetch = None;
                    self.apply_fetch(&mut session, outcome.result);
                    if std::mem::take(&mut session.pending_refetch) {
                        self.spawn_fetch(&mut session, &outcome_tx);
                    }
                }
                update = next_update(&mut session.subscription) => match update {
                    Some(Update::Refetch) => {
                        if session.fetch.is_some() {
                            // Coalesced into one more load once this one lands.
                            session.pending_refetch = true;
                        } else {
                            if !session.loaded {
                                self.state.send_modify(|s| s.status = LoadStatus::Loading);
                            }
                            self.spawn_fetch(&mut session, &outcome_tx);
                        }
                    }
                    Some(Update::Patch { stations, swap_increment }) => {
                        self.apply_patch(&mut session, stations, swap_increment);
                    }
                    None => {
                        warn!(city = %session.filter.city, "Change feed lost");
                        session.subscription = None;
                        session.disconnected = true;
                        self.state.send_modify(|s| s.status = LoadStatus::Disconnected);
                    }
                },
            }
        }

        info!(city = %session.filter.city, "Aggregator stopped");
    }

    fn start(&mut self, filter: Filter, outcome_tx: &mpsc::Sender<FetchOutcome>) -> Session {
        self.generation += 1;
        info!(
            city = %filter.city,
            start = %filter.range.start,
            end = %filter.range.end,
            generation = self.generation,
            source = self.source.name(),
            "Starting dashboard session"
        );

        let generation = self.generation;
        let published = filter.clone();
        self.state.send_modify(|s| {
            *s = DashboardState {
                filter: Some(published),
                generation,
                status: LoadStatus::Loading,
                ..Default::default()
            };
        });

        let subscription = self.source.subscribe(&filter);
        let mut session = Session {
            filter,
            generation,
            subscription: Some(subscription),
            fetch: None,
            pending_refetch: false,
            swap_count: 0,
            loaded: false,
            disconnected: false,
        };
        self.spawn_fetch(&mut session, outcome_tx);
        session
    }

    /// Starts a full load for the session. Only one load runs per session;
    /// callers queue further refetches through `pending_refetch`.
    fn spawn_fetch(&self, session: &mut Session, outcome_tx: &mpsc::Sender<FetchOutcome>) {
        let source = self.source.clone();
        let retry = self.retry;
        let filter = session.filter.clone();
        let generation = session.generation;
        let outcome_tx = outcome_tx.clone();

        session.fetch = Some(tokio::spawn(async move {
            let result = retry
                .execute(|| {
                    let source = source.clone();
                    let filter = filter.clone();
                    async move { source.load(&filter).await }
                })
                .await;
            let _ = outcome_tx.send(FetchOutcome { generation, result }).await;
        }));
    }

    fn apply_fetch(&self, session: &mut Session, result: Result<Dataset, PulseError>) {
        match result {
            Ok(dataset) => {
                let previous = session.loaded.then(|| self.state.borrow().kpis.clone());
                let kpis = KpiSnapshot::derive(&dataset.stations, dataset.swap_count, previous.as_ref());
                let status = if session.disconnected {
                    LoadStatus::Disconnected
                } else {
                    LoadStatus::Loaded
                };

                info!(
                    city = %session.filter.city,
                    stations = dataset.stations.len(),
                    swaps = dataset.swap_count,
                    avg_util = kpis.avg_util,
                    "KPIs refreshed"
                );

                session.swap_count = dataset.swap_count;
                session.loaded = true;
                self.state.send_modify(|s| {
                    s.stations = dataset.stations;
                    s.kpis = kpis;
                    s.status = status;
                    s.last_updated = Some(Utc::now());
                });
            }
            Err(e) => {
                warn!(city = %session.filter.city, error = %e, "Fetch failed, keeping previous data");
                // A lost feed outranks a failed load.
                if !session.disconnected {
                    self.state.send_modify(|s| {
                        s.status = LoadStatus::Stale {
                            error: e.to_string(),
                        };
                    });
                }
            }
        }
    }

    fn apply_patch(&self, session: &mut Session, patched: Vec<Station>, swap_increment: u64) {
        if !session.loaded {
            debug!(city = %session.filter.city, "Ignoring patch before first load");
            return;
        }

        session.swap_count += swap_increment;
        let swap_count = session.swap_count;

        self.state.send_modify(|s| {
            for update in patched {
                if let Some(station) = s.stations.iter_mut().find(|st| st.id == update.id) {
                    *station = update;
                }
            }
            s.kpis = KpiSnapshot::derive(&s.stations, swap_count, Some(&s.kpis));
            s.last_updated = Some(Utc::now());
        });
    }
}

async fn next_update(subscription: &mut Option<Subscription>) -> Option<Update> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::{MetricsSource, Subscription, Update};
use crate::error::PulseError;
use crate::fetch::{HttpClient, fetch_rows};
use crate::hub::{ChangeHub, Table};
use crate::model::{Dataset, Filter, Station};

/// Reads `stations` and `swaps_log` from a PostgREST-style table store and
/// turns change notifications into full refetches.
pub struct BackendSource<C> {
    client: C,
    base_url: Url,
    hub: ChangeHub,
}

impl<C: HttpClient> BackendSource<C> {
    pub fn new(client: C, base_url: &str, hub: ChangeHub) -> Result<Self, PulseError> {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| PulseError::Config(format!("invalid backend url '{base_url}': {e}")))?;

        Ok(Self {
            client,
            base_url,
            hub,
        })
    }

    fn table_url(&self, table: Table) -> Result<Url, PulseError> {
        self.base_url
            .join(&format!("rest/v1/{}", table.as_str()))
            .map_err(|e| PulseError::Config(format!("invalid table url: {e}")))
    }

    pub fn stations_url(&self, filter: &Filter) -> Result<Url, PulseError> {
        let mut url = self.table_url(Table::Stations)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("city", &format!("eq.{}", filter.city));
        Ok(url)
    }

    pub fn swaps_url(&self, filter: &Filter) -> Result<Url, PulseError> {
        let mut url = self.table_url(Table::SwapsLog)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("city", &format!("eq.{}", filter.city))
            .append_pair("timestamp", &format!("gte.{}", filter.range.start_bound()))
            .append_pair("timestamp", &format!("lte.{}", filter.range.end_bound()));
        Ok(url)
    }
}

#[async_trait]
impl<C: HttpClient + 'static> MetricsSource for BackendSource<C> {
    fn name(&self) -> &'static str {
        "backend"
    }

    #[tracing::instrument(skip(self), fields(city = %filter.city))]
    async fn load(&self, filter: &Filter) -> Result<Dataset, PulseError> {
        let stations_url = self.stations_url(filter)?;
        let swaps_url = self.swaps_url(filter)?;

        let (mut stations, swaps) = tokio::try_join!(
            fetch_rows::<_, Station>(&self.client, Table::Stations.as_str(), stations_url),
            fetch_rows::<_, Value>(&self.client, Table::SwapsLog.as_str(), swaps_url),
        )?;

        let fetched = stations.len();
        stations.retain(|s| s.city == filter.city);
        if stations.len() != fetched {
            warn!(
                dropped = fetched - stations.len(),
                "Backend returned stations outside the selected city"
            );
        }

        Ok(Dataset {
            stations,
            swap_count: swaps.len() as u64,
        })
    }

    fn subscribe(&self, filter: &Filter) -> Subscription {
        let mut changes = self.hub.subscribe();
        let city = filter.city.clone();
        let (tx, rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        debug!(city = %city, table = event.table.as_str(), kind = ?event.kind, "Change notification");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(city = %city, missed, "Change notifications lagged, refetching");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(city = %city, "Change hub closed");
                        break;
                    }
                }

                // A full channel already holds a pending refetch.
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(Update::Refetch) {
                    break;
                }
            }
        });

        Subscription::new(rx, task)
    }
}

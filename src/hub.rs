//! Change notifications for the `stations` and `swaps_log` tables.
//!
//! Events arrive as database-webhook payloads and are fanned out over a
//! broadcast channel to every live backend subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Stations,
    SwapsLog,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Stations => "stations",
            Table::SwapsLog => "swaps_log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change, in the shape database webhooks post it:
/// `{"type": "UPDATE", "table": "stations", "schema": "public", "record": {..}, "old_record": {..}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: Table,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, table: Table) -> Self {
        Self {
            kind,
            table,
            schema: Some("public".to_string()),
            record: None,
            old_record: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event; returns how many subscriptions received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let table = event.table.as_str();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(table, receivers, "Change event published");
                receivers
            }
            Err(_) => {
                debug!(table, "Change event dropped, no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(64)
    }
}

mod client;
mod basic;
pub mod auth;

pub use client::HttpClient;
pub use basic::BasicClient;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PulseError;

/// GETs `url` and decodes the body as a JSON array of rows.
///
/// `table` only labels errors and log lines.
pub async fn fetch_rows<C, T>(client: &C, table: &str, url: Url) -> Result<Vec<T>, PulseError>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(PulseError::Status {
            table: table.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let bytes = resp.bytes().await?;
    let rows: Vec<T> = serde_json::from_slice(&bytes)?;
    debug!(table, rows = rows.len(), "Rows fetched");

    Ok(rows)
}

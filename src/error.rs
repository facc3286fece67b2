use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {status} for {table}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Subscription error: {0}")]
    Subscription(String),
}

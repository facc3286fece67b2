pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod hub;
pub mod kpi;
pub mod model;
pub mod output;
pub mod retry;
pub mod sources;

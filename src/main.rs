//! CLI entry point for the e-mobility KPI pulse service.
//!
//! Provides subcommands for serving the guarded dashboard API, watching a
//! city's KPIs from the terminal, and taking a one-off snapshot.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use emobility_pulse::aggregator::{Aggregator, LoadStatus};
use emobility_pulse::api::{self, AppState};
use emobility_pulse::config::Settings;
use emobility_pulse::hub::ChangeHub;
use emobility_pulse::kpi::KpiSnapshot;
use emobility_pulse::model::Filter;
use emobility_pulse::output::{KpiRecord, append_record, print_json, print_pretty};
use emobility_pulse::sources;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "emobility_pulse")]
#[command(about = "Realtime KPI aggregation for the e-mobility dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct FilterArgs {
    /// City whose stations are aggregated
    #[arg(short, long, default_value = "Bhopal")]
    city: String,

    /// First day of the swap window (YYYY-MM-DD)
    #[arg(long, default_value = "2024-07-01")]
    start: NaiveDate,

    /// Last day of the swap window, inclusive (YYYY-MM-DD)
    #[arg(long, default_value = "2024-07-10")]
    end: NaiveDate,
}

impl FilterArgs {
    fn filter(&self) -> Result<Filter> {
        Ok(Filter::new(self.city.clone(), self.start, self.end)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard API behind the session-cookie guard
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        addr: String,

        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Follow a city's KPIs and log every refresh
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// CSV file to append each snapshot to
        #[arg(short, long)]
        output: Option<String>,

        /// Number of snapshots to collect (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        updates: usize,

        /// Also serve the API (and the change webhook) on this address
        #[arg(long)]
        listen: Option<String>,
    },
    /// Load once and print the KPIs as JSON
    Snapshot {
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let settings = Settings::from_env().context("Failed to read settings")?;

    // Logging setup: colored stderr + JSON rolling log file
    let log_dir = Path::new(&settings.log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&settings.log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("emobility_pulse.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let hub = ChangeHub::default();
    let source = sources::from_settings(&settings, hub.clone())?;

    match cli.command {
        Commands::Serve { addr, filter } => {
            let dashboard = Aggregator::new(source)
                .with_retry(settings.retry)
                .spawn(filter.filter()?);
            let state = AppState {
                dashboard: Arc::new(dashboard),
                hub,
                webhook_secret: settings.webhook_secret.as_deref().map(Arc::from),
            };
            api::serve(&addr, state).await?;
        }
        Commands::Watch {
            filter,
            output,
            updates,
            listen,
        } => {
            let dashboard = Arc::new(
                Aggregator::new(source)
                    .with_retry(settings.retry)
                    .spawn(filter.filter()?),
            );

            if let Some(addr) = listen {
                let state = AppState {
                    dashboard: dashboard.clone(),
                    hub: hub.clone(),
                    webhook_secret: settings.webhook_secret.as_deref().map(Arc::from),
                };
                tokio::spawn(async move {
                    if let Err(e) = api::serve(&addr, state).await {
                        error!(error = %e, "API server stopped");
                    }
                });
            }

            tokio::select! {
                result = watch(&dashboard, output.as_deref(), updates) => result?,
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }

            if let Ok(dashboard) = Arc::try_unwrap(dashboard) {
                dashboard.stop().await;
            }
        }
        Commands::Snapshot { filter } => {
            let filter = filter.filter()?;
            let dataset = settings
                .retry
                .execute(|| source.load(&filter))
                .await
                .with_context(|| format!("Failed to load data for {}", filter.city))?;
            let kpis = KpiSnapshot::derive(&dataset.stations, dataset.swap_count, None);

            print_json(&serde_json::json!({
                "source": source.name(),
                "filter": filter,
                "stations": dataset.stations,
                "kpis": kpis,
            }))?;
        }
    }

    Ok(())
}

/// Logs (and optionally records) every state change until `updates`
/// refreshed snapshots have been seen.
#[tracing::instrument(skip(dashboard))]
async fn watch(
    dashboard: &emobility_pulse::aggregator::AggregatorHandle,
    output: Option<&str>,
    updates: usize,
) -> Result<()> {
    let mut rx = dashboard.watch();
    let mut seen = 0;
    let mut last_refresh = None;

    if updates == 0 {
        info!("Watching indefinitely. Press Ctrl+C to stop.");
    }

    let mut first = true;

    loop {
        // The current value may already be a finished load.
        if !first {
            rx.changed()
                .await
                .context("Aggregator stopped unexpectedly")?;
        }
        first = false;
        let state = rx.borrow_and_update().clone();

        match &state.status {
            LoadStatus::Idle | LoadStatus::Loading => continue,
            LoadStatus::Stale { error } => {
                warn!(error = %error, "KPIs are stale");
            }
            LoadStatus::Disconnected => {
                warn!("Change feed disconnected; KPIs will no longer refresh");
            }
            LoadStatus::Loaded => {}
        }

        // Status flips without new data are not new snapshots.
        if state.last_updated.is_none() || state.last_updated == last_refresh {
            continue;
        }
        last_refresh = state.last_updated;
        seen += 1;

        print_pretty(&state);
        info!(
            city = state.filter.as_ref().map(|f| f.city.as_str()).unwrap_or_default(),
            total_evs = state.kpis.total_evs,
            total_swaps = state.kpis.total_swaps,
            avg_util = state.kpis.avg_util,
            co2_saved = state.kpis.co2_saved,
            trend = ?state.kpis.trend,
            "KPI snapshot"
        );

        if let (Some(path), Some(record)) = (output, KpiRecord::from_state(&state)) {
            append_record(path, &record)?;
        }

        if updates > 0 && seen >= updates {
            break;
        }
    }

    Ok(())
}

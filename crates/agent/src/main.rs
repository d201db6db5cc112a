//! airq-agent - air-quality forecasting agent
//!
//! Reads JSON-lines sensor readings from stdin, keeps per-horizon
//! forecasts up to date and serves health, metrics and queries over HTTP.

use airq_agent::{api, config::AgentConfig, source::JsonLinesSource};
use anyhow::{Context, Result};
use forecast_lib::{store::SqliteStore, ForecastRuntime};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting airq-agent");

    let config = AgentConfig::load()?;
    info!(
        station = %config.station,
        database = %config.database_path.display(),
        horizons = ?config.horizons,
        "Agent configured"
    );

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SqliteStore::open(&config.database_path)?);

    let runtime = ForecastRuntime::new(config.forecast_config(), store)
        .start(Box::new(JsonLinesSource::stdin()))
        .await?;

    let app_state = Arc::new(api::AppState::new(
        runtime.health.clone(),
        runtime.service.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            runtime.shutdown("SIGINT received").await;
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => runtime.shutdown("API server stopped").await,
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    runtime.shutdown("API server failed").await;
                    return Err(e);
                }
                Err(e) => {
                    runtime.shutdown("API server panicked").await;
                    return Err(e.into());
                }
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

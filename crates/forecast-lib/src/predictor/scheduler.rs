//! Prediction scheduling loop
//!
//! Runs a prediction round for every configured horizon on a fixed cadence
//! and prunes predictions that fell out of the retention period.

use super::{PredictionBatch, PredictionEngine};
use crate::error::ForecastResult;
use crate::health::{components, HealthRegistry};
use crate::ingest::ReadingHistory;
use crate::store::TabularStore;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default prediction interval (5 minutes)
pub const DEFAULT_PREDICTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Predictions older than this are dropped
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

pub const DEFAULT_HORIZONS: [u32; 3] = [1, 3, 6];

#[derive(Debug, Clone)]
pub struct PredictionConfig {
    /// Forecast horizons in hours
    pub horizons: Vec<u32>,
    pub prediction_interval: Duration,
    pub retention: Duration,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            horizons: DEFAULT_HORIZONS.to_vec(),
            prediction_interval: DEFAULT_PREDICTION_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }
}

pub struct PredictionScheduler {
    engine: Arc<PredictionEngine>,
    history: ReadingHistory,
    store: Arc<dyn TabularStore>,
    health: Arc<HealthRegistry>,
    config: PredictionConfig,
}

impl PredictionScheduler {
    pub fn new(
        engine: Arc<PredictionEngine>,
        history: ReadingHistory,
        store: Arc<dyn TabularStore>,
        health: Arc<HealthRegistry>,
        config: PredictionConfig,
    ) -> Self {
        Self {
            engine,
            history,
            store,
            health,
            config,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.prediction_interval.as_secs(),
            horizons = ?self.config.horizons,
            "Starting prediction scheduler"
        );

        let mut ticker = interval(self.config.prediction_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(batch) => debug!(
                            generated = batch.predictions.len(),
                            unavailable = batch.unavailable.len(),
                            "Prediction round complete"
                        ),
                        Err(e) if e.is_insufficient_history() => {
                            debug!(reason = %e, "Skipping prediction round");
                        }
                        Err(e) => warn!(error = %e, "Prediction round failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down prediction scheduler");
                    break;
                }
            }
        }
    }

    /// One prediction round over the newest window, then retention pruning
    pub async fn run_once(&self) -> ForecastResult<PredictionBatch> {
        let recent = self.history.tail(self.engine.context_len()).await;
        let batch = self.engine.predict_latest(&recent, &self.config.horizons)?;

        if batch.predictions.is_empty() && !batch.unavailable.is_empty() {
            self.health
                .set_degraded(components::PREDICTOR, batch.unavailable[0].to_string())
                .await;
        } else {
            self.health.set_healthy(components::PREDICTOR).await;
        }

        if let Some(newest) = recent.last() {
            let retention = ChronoDuration::from_std(self.config.retention)
                .unwrap_or_else(|_| ChronoDuration::days(7));
            let cutoff = newest.timestamp - retention;
            match self.store.prune_predictions(cutoff) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, %cutoff, "Pruned expired predictions"),
                Err(e) => warn!(error = %e, "Failed to prune predictions"),
            }
        }
        Ok(batch)
    }
}

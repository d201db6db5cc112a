//! Ingestion loop

use super::{IngestConfig, ReadingHistory, ReadingSource};
use crate::accuracy::AccuracyTracker;
use crate::error::ForecastResult;
use crate::health::{components, HealthRegistry};
use crate::models::{RawReading, SensorReading};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::store::TabularStore;
use crate::validator::ReadingValidator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Single writer of the reading history
pub struct IngestionLoop {
    source: Box<dyn ReadingSource>,
    validator: ReadingValidator,
    history: ReadingHistory,
    store: Arc<dyn TabularStore>,
    tracker: Arc<AccuracyTracker>,
    health: Arc<HealthRegistry>,
    config: IngestConfig,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
    store_failures: u32,
    source_failures: u32,
}

impl IngestionLoop {
    pub fn new(
        source: Box<dyn ReadingSource>,
        validator: ReadingValidator,
        history: ReadingHistory,
        store: Arc<dyn TabularStore>,
        tracker: Arc<AccuracyTracker>,
        health: Arc<HealthRegistry>,
        config: IngestConfig,
    ) -> Self {
        Self {
            source,
            validator,
            history,
            store,
            tracker,
            health,
            config,
            metrics: ForecastMetrics::new(),
            logger: StructuredLogger::new("default"),
            store_failures: 0,
            source_failures: 0,
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting ingestion loop");
        let mut accepted = 0u64;

        loop {
            tokio::select! {
                next = self.source.next_reading() => match next {
                    Ok(Some(raw)) => {
                        self.source_failures = 0;
                        if self.process(raw).await.is_ok() {
                            accepted += 1;
                            if accepted % 720 == 0 {
                                debug!(accepted, "Ingestion progress");
                            }
                        }
                    }
                    Ok(None) => {
                        info!(accepted, "Reading source exhausted");
                        break;
                    }
                    Err(e) => {
                        self.source_failures += 1;
                        warn!(error = %e, failures = self.source_failures, "Reading source failed");
                        self.health
                            .report_failures(
                                components::INGESTION,
                                self.source_failures,
                                self.config.failure_threshold,
                                &e.to_string(),
                            )
                            .await;
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                },
                _ = shutdown.recv() => {
                    info!(accepted, "Shutting down ingestion loop");
                    break;
                }
            }
        }
    }

    /// Validate, store and publish one reading.
    ///
    /// Only validation errors are returned; store and tracker failures are
    /// reported through health and do not drop the reading.
    pub async fn process(&mut self, raw: RawReading) -> ForecastResult<SensorReading> {
        let validated = match self.validator.validate(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.metrics.inc_readings_rejected();
                self.logger
                    .log_reading_rejected(&raw.timestamp.to_rfc3339(), &e.to_string());
                return Err(e);
            }
        };
        if !validated.is_clean() {
            self.metrics.inc_readings_repaired();
            self.logger.log_reading_repaired(
                &validated.reading.timestamp.to_rfc3339(),
                &validated.flags,
            );
        }
        let reading = validated.reading;

        match self.store.append_reading(&reading) {
            Ok(()) if self.store_failures > 0 => {
                info!(after = self.store_failures, "Store writes recovered");
                self.store_failures = 0;
                self.health.set_healthy(components::INGESTION).await;
                self.health.set_healthy(components::STORE).await;
            }
            Ok(()) => {}
            Err(e) => {
                self.store_failures += 1;
                warn!(error = %e, failures = self.store_failures, "Failed to store reading");
                self.health
                    .report_failures(
                        components::INGESTION,
                        self.store_failures,
                        self.config.failure_threshold,
                        &e.to_string(),
                    )
                    .await;
                self.health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
            }
        }

        self.history.push(reading).await;
        self.metrics.inc_readings_ingested();
        self.metrics.set_history_length(self.history.len().await);

        if let Err(e) = self.tracker.on_reading(&reading) {
            warn!(error = %e, "Accuracy reconciliation failed");
            self.health
                .set_degraded(components::TRACKER, e.to_string())
                .await;
        }
        Ok(reading)
    }
}

//! Runtime wiring and the read-only query façade
//!
//! [`ForecastRuntime::start`] restores state from the store, then spawns
//! the ingestion, prediction and training loops. The presentation layer
//! only ever sees [`ForecastService`], which cannot mutate core state.

use crate::accuracy::AccuracyTracker;
use crate::config::ForecastConfig;
use crate::error::ForecastResult;
use crate::health::HealthRegistry;
use crate::ingest::{IngestionLoop, ReadingHistory, ReadingSource};
use crate::models::{AccuracyRecord, Field, Prediction, SensorReading};
use crate::observability::StructuredLogger;
use crate::orchestrator::{
    ArtifactRegistry, CycleReport, HorizonArtifacts, OrchestratorHandle, OrchestratorState,
    TrainingOrchestrator,
};
use crate::predictor::{PredictionEngine, PredictionScheduler};
use crate::store::{ArtifactStore, TabularStore};
use crate::validator::ReadingValidator;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Readings held in memory
    pub history_len: usize,
    /// Validated readings ever ingested
    pub total_readings: usize,
    pub last_reading: Option<DateTime<Utc>>,
    pub orchestrator_state: OrchestratorState,
    pub artifacts: Vec<HorizonArtifacts>,
    pub sequence_disabled: bool,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStatistics {
    pub field: Field,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingStatistics {
    pub count: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub fields: Vec<FieldStatistics>,
}

impl ReadingStatistics {
    pub fn compute(readings: &[SensorReading]) -> Self {
        let fields = if readings.is_empty() {
            Vec::new()
        } else {
            Field::ALL
                .iter()
                .map(|&field| {
                    let n = readings.len() as f64;
                    let mean = readings.iter().map(|r| r.get(field)).sum::<f64>() / n;
                    let var = readings
                        .iter()
                        .map(|r| (r.get(field) - mean).powi(2))
                        .sum::<f64>()
                        / n;
                    FieldStatistics {
                        field,
                        mean,
                        min: readings.iter().map(|r| r.get(field)).fold(f64::INFINITY, f64::min),
                        max: readings
                            .iter()
                            .map(|r| r.get(field))
                            .fold(f64::NEG_INFINITY, f64::max),
                        std: var.sqrt(),
                    }
                })
                .collect()
        };
        Self {
            count: readings.len(),
            first: readings.first().map(|r| r.timestamp),
            last: readings.last().map(|r| r.timestamp),
            fields,
        }
    }
}

/// Read-only queries for the presentation layer
#[derive(Clone)]
pub struct ForecastService {
    store: Arc<dyn TabularStore>,
    history: ReadingHistory,
    registry: Arc<ArtifactRegistry>,
    orchestrator: OrchestratorHandle,
}

impl ForecastService {
    pub fn new(
        store: Arc<dyn TabularStore>,
        history: ReadingHistory,
        registry: Arc<ArtifactRegistry>,
        orchestrator: OrchestratorHandle,
    ) -> Self {
        Self {
            store,
            history,
            registry,
            orchestrator,
        }
    }

    /// Newest `n` stored readings, oldest first
    pub fn latest_readings(&self, n: usize) -> Result<Vec<SensorReading>> {
        self.store.latest_readings(n)
    }

    /// Newest prediction per horizon
    pub fn latest_predictions(&self) -> Result<Vec<Prediction>> {
        self.store.latest_predictions()
    }

    pub fn accuracy_summary(&self) -> Result<Vec<AccuracyRecord>> {
        self.store.accuracy_records()
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            history_len: self.history.len().await,
            total_readings: self.history.total().await,
            last_reading: self.history.last().await.map(|r| r.timestamp),
            orchestrator_state: self.orchestrator.state(),
            artifacts: self.registry.summary(),
            sequence_disabled: self.orchestrator.sequence_disabled(),
            last_cycle: self.orchestrator.last_report().map(|r| (*r).clone()),
        }
    }

    /// Summary statistics over the in-memory history
    pub async fn reading_statistics(&self) -> ReadingStatistics {
        ReadingStatistics::compute(&self.history.snapshot().await)
    }
}

/// Handles to a started runtime
pub struct RuntimeHandles {
    pub service: ForecastService,
    pub orchestrator: OrchestratorHandle,
    pub health: Arc<HealthRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    logger: StructuredLogger,
}

impl RuntimeHandles {
    /// Stop every loop and wait for them to finish
    pub async fn shutdown(self, reason: &str) {
        self.health.set_ready(false).await;
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Runtime task ended abnormally");
            }
        }
        self.logger.log_shutdown(reason);
    }
}

pub struct ForecastRuntime {
    config: ForecastConfig,
    store: Arc<dyn TabularStore>,
}

impl ForecastRuntime {
    pub fn new(config: ForecastConfig, store: Arc<dyn TabularStore>) -> Self {
        Self { config, store }
    }

    /// Restore state and spawn the ingestion, prediction and training loops
    pub async fn start(self, source: Box<dyn ReadingSource>) -> ForecastResult<RuntimeHandles> {
        let config = self.config;
        config.validate()?;
        let store = self.store;
        let logger = StructuredLogger::new(config.station.clone());
        let health = Arc::new(HealthRegistry::with_runtime_components().await);

        let total = store.reading_count()?;
        let seed = store.latest_readings(config.ingest.history_capacity)?;
        let validator = ReadingValidator::with_history(config.validator, seed.last());
        let history = ReadingHistory::with_total(seed, config.ingest.history_capacity, total);
        info!(stored_readings = total, "Reading history restored");

        let registry = Arc::new(ArtifactRegistry::new(&config.horizons()));
        let artifacts = config
            .orchestrator
            .artifact_dir
            .clone()
            .map(ArtifactStore::new)
            .transpose()?;
        let (orchestrator, handle, trigger_rx) =
            TrainingOrchestrator::new(&config, registry.clone(), history.clone(), artifacts, health.clone());
        match orchestrator.restore_artifacts() {
            Ok(restored) => info!(restored, "Artifacts restored"),
            Err(e) => warn!(error = %e, "Failed to restore artifacts"),
        }

        let tracker = Arc::new(AccuracyTracker::new(
            store.clone(),
            config.accuracy.clone(),
            Some(handle.trigger_sender()),
            logger.clone(),
        ));
        if let Err(e) = tracker.restore() {
            warn!(error = %e, "Failed to restore accuracy state");
        }

        let engine = Arc::new(PredictionEngine::new(
            config.window.clone(),
            registry.clone(),
            store.clone(),
            config.validator,
            logger.clone(),
        ));
        let scheduler = Arc::new(PredictionScheduler::new(
            engine,
            history.clone(),
            store.clone(),
            health.clone(),
            config.prediction.clone(),
        ));
        let ingestion = IngestionLoop::new(
            source,
            validator,
            history.clone(),
            store.clone(),
            tracker,
            health.clone(),
            config.ingest.clone(),
        )
        .with_logger(logger.clone());

        let (shutdown_tx, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(ingestion.run(shutdown_tx.subscribe())),
            tokio::spawn(scheduler.run(shutdown_tx.subscribe())),
            tokio::spawn(Arc::new(orchestrator).run(trigger_rx, shutdown_tx.subscribe())),
        ];

        health.set_ready(true).await;
        logger.log_startup(env!("CARGO_PKG_VERSION"), total);

        Ok(RuntimeHandles {
            service: ForecastService::new(store, history, registry, handle.clone()),
            orchestrator: handle,
            health,
            shutdown_tx,
            tasks,
            logger,
        })
    }
}

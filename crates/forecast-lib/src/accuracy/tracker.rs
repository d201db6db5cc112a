//! Accuracy Tracker
//!
//! Joins outstanding predictions to the readings that later arrive at their
//! target timestamps and keeps the rolling error per (horizon, family).
//! This is the only writer of accuracy records.

use super::rolling::{RollingErrors, DEFAULT_ACCURACY_WINDOW};
use crate::error::ForecastResult;
use crate::models::{AccuracyRecord, ModelFamily, Prediction, SensorReading, TargetValues};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::orchestrator::TrainTrigger;
use crate::store::TabularStore;
use anyhow::anyhow;
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Readings this close to a target timestamp reconcile it
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(60);

/// Consecutive breaching updates before retraining is forced
pub const DEFAULT_SUSTAINED_BREACHES: u32 = 30;

#[derive(Debug, Clone)]
pub struct AccuracyConfig {
    /// Reconciled predictions per rolling window
    pub window: usize,
    pub tolerance: Duration,
    /// Rolling MAE above which an update counts as a breach
    pub mae_thresholds: TargetValues,
    pub sustained_breaches: u32,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_ACCURACY_WINDOW,
            tolerance: DEFAULT_TOLERANCE,
            mae_thresholds: TargetValues::from_array([15.0, 25.0, 3.0, 10.0]),
            sustained_breaches: DEFAULT_SUSTAINED_BREACHES,
        }
    }
}

impl AccuracyConfig {
    /// Whether any target's rolling MAE exceeds its threshold
    pub fn is_breach(&self, mae: &TargetValues) -> bool {
        mae.to_array()
            .iter()
            .zip(self.mae_thresholds.to_array())
            .any(|(m, limit)| *m > limit)
    }
}

#[derive(Debug)]
struct Series {
    rolling: RollingErrors,
    /// Samples recorded before this process started
    base_count: u64,
    breaches: u32,
}

impl Series {
    fn new(window: usize, base_count: u64) -> Self {
        Self {
            rolling: RollingErrors::new(window),
            base_count,
            breaches: 0,
        }
    }
}

pub struct AccuracyTracker {
    store: Arc<dyn TabularStore>,
    config: AccuracyConfig,
    series: Mutex<HashMap<(u32, ModelFamily), Series>>,
    trigger_tx: Option<mpsc::Sender<TrainTrigger>>,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
}

impl AccuracyTracker {
    pub fn new(
        store: Arc<dyn TabularStore>,
        config: AccuracyConfig,
        trigger_tx: Option<mpsc::Sender<TrainTrigger>>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            config,
            series: Mutex::new(HashMap::new()),
            trigger_tx,
            metrics: ForecastMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &AccuracyConfig {
        &self.config
    }

    /// Carry stored sample counts over a restart; returns the series seeded
    pub fn restore(&self) -> ForecastResult<usize> {
        let records = self.store.accuracy_records()?;
        let mut series = self.lock()?;
        for record in &records {
            series.insert(
                (record.horizon_hours, record.model_family),
                Series::new(self.config.window, record.sample_count),
            );
        }
        Ok(records.len())
    }

    /// Reconcile every outstanding prediction whose target lies within
    /// tolerance of `reading`
    pub fn on_reading(&self, reading: &SensorReading) -> ForecastResult<Vec<AccuracyRecord>> {
        let tolerance =
            ChronoDuration::from_std(self.config.tolerance).unwrap_or_else(|_| ChronoDuration::seconds(60));
        let outstanding = self
            .store
            .outstanding_predictions(reading.timestamp - tolerance, reading.timestamp + tolerance)?;

        let mut updated = Vec::with_capacity(outstanding.len());
        for prediction in &outstanding {
            if let Some(record) = self.reconcile(prediction, reading)? {
                updated.push(record);
            }
        }
        Ok(updated)
    }

    /// Annotate `prediction` with `actual` and fold the error into the
    /// rolling record. Returns `None` if it was already reconciled.
    pub fn reconcile(&self, prediction: &Prediction, actual: &SensorReading) -> ForecastResult<Option<AccuracyRecord>> {
        let observed = actual.targets();
        if !self
            .store
            .annotate_actual(prediction.issue_timestamp, prediction.horizon_hours, &observed)?
        {
            return Ok(None);
        }

        let key = (prediction.horizon_hours, prediction.model_family);
        let (record, signal) = {
            let mut series = self.lock()?;
            let s = series
                .entry(key)
                .or_insert_with(|| Series::new(self.config.window, 0));
            s.rolling.push(&prediction.predicted, &observed);

            let mae = s.rolling.mae();
            s.breaches = if self.config.is_breach(&mae) { s.breaches + 1 } else { 0 };
            let signal = (s.breaches >= self.config.sustained_breaches).then_some(s.breaches);
            if signal.is_some() {
                s.breaches = 0;
            }
            let record = AccuracyRecord {
                horizon_hours: key.0,
                model_family: key.1,
                mae,
                rmse: s.rolling.rmse(),
                sample_count: s.base_count + s.rolling.count(),
                last_updated: actual.timestamp,
            };
            (record, signal)
        };

        self.store.upsert_accuracy(&record)?;
        for (field, mae) in record.mae.iter() {
            self.metrics.set_rolling_mae(key.0, key.1, field, mae);
        }
        debug!(
            horizon_hours = key.0,
            family = %key.1,
            samples = record.sample_count,
            "Prediction reconciled"
        );

        if let Some(breaches) = signal {
            self.signal_degraded(key.0, key.1, breaches);
        }
        Ok(Some(record))
    }

    fn signal_degraded(&self, horizon_hours: u32, family: ModelFamily, breaches: u32) {
        self.metrics.inc_degradation_signals();
        self.logger.log_accuracy_degraded(horizon_hours, family, breaches);
        let Some(tx) = &self.trigger_tx else {
            return;
        };
        match tx.try_send(TrainTrigger::Degraded {
            horizon_hours,
            family,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(horizon_hours, "Retrain trigger already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(horizon_hours, "Orchestrator is gone, degradation signal dropped");
            }
        }
    }

    fn lock(&self) -> ForecastResult<MutexGuard<'_, HashMap<(u32, ModelFamily), Series>>> {
        Ok(self
            .series
            .lock()
            .map_err(|_| anyhow!("accuracy state lock poisoned"))?)
    }
}

//! Observability for the forecasting runtime
//!
//! Provides:
//! - Prometheus metrics (ingestion counters, prediction/training latency, artifact versions, rolling MAE)
//! - Structured JSON logging with tracing

use crate::models::{Field, ModelFamily, Prediction, QualityFlag};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, GaugeVec, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Latency buckets for inference (seconds)
const PREDICTION_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Training runs from sub-second forests up to long sequence fits
const TRAINING_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0,
];

/// How a training attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    Success,
    Failure,
    Cancelled,
}

impl TrainingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingOutcome::Success => "success",
            TrainingOutcome::Failure => "failure",
            TrainingOutcome::Cancelled => "cancelled",
        }
    }
}

static GLOBAL_METRICS: OnceLock<ForecastMetricsInner> = OnceLock::new();

struct ForecastMetricsInner {
    readings_ingested: IntCounter,
    readings_repaired: IntCounter,
    readings_rejected: IntCounter,
    history_length: IntGauge,
    prediction_latency_seconds: Histogram,
    predictions_generated: IntCounter,
    predictions_unavailable: IntCounter,
    training_duration_seconds: Histogram,
    training_runs: IntCounterVec,
    artifact_version: IntGaugeVec,
    rolling_mae: GaugeVec,
    degradation_signals: IntCounter,
}

impl ForecastMetricsInner {
    fn new() -> Self {
        Self {
            readings_ingested: register_int_counter!(
                "airq_readings_ingested_total",
                "Validated readings appended to history"
            )
            .expect("Failed to register readings_ingested"),

            readings_repaired: register_int_counter!(
                "airq_readings_repaired_total",
                "Readings with at least one field replaced by the last good value"
            )
            .expect("Failed to register readings_repaired"),

            readings_rejected: register_int_counter!(
                "airq_readings_rejected_total",
                "Readings rejected by the validator"
            )
            .expect("Failed to register readings_rejected"),

            history_length: register_int_gauge!(
                "airq_history_length",
                "Number of validated readings held in memory"
            )
            .expect("Failed to register history_length"),

            prediction_latency_seconds: register_histogram!(
                "airq_prediction_latency_seconds",
                "Time spent running inference for one horizon",
                PREDICTION_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_generated: register_int_counter!(
                "airq_predictions_generated_total",
                "Predictions recorded"
            )
            .expect("Failed to register predictions_generated"),

            predictions_unavailable: register_int_counter!(
                "airq_predictions_unavailable_total",
                "Horizons for which no artifact could produce a prediction"
            )
            .expect("Failed to register predictions_unavailable"),

            training_duration_seconds: register_histogram!(
                "airq_training_duration_seconds",
                "Wall time of a single training attempt",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            training_runs: register_int_counter_vec!(
                "airq_training_runs_total",
                "Training attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register training_runs"),

            artifact_version: register_int_gauge_vec!(
                "airq_artifact_version",
                "Version of the current artifact",
                &["horizon_hours", "family"]
            )
            .expect("Failed to register artifact_version"),

            rolling_mae: register_gauge_vec!(
                "airq_rolling_mae",
                "Rolling mean absolute error",
                &["horizon_hours", "family", "field"]
            )
            .expect("Failed to register rolling_mae"),

            degradation_signals: register_int_counter!(
                "airq_degradation_signals_total",
                "Sustained accuracy breaches that forced a retrain"
            )
            .expect("Failed to register degradation_signals"),
        }
    }
}

/// Handle to the process-wide metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct ForecastMetrics {
    _private: (),
}

impl Default for ForecastMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ForecastMetricsInner {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new)
    }

    pub fn inc_readings_ingested(&self) {
        self.inner().readings_ingested.inc();
    }

    pub fn inc_readings_repaired(&self) {
        self.inner().readings_repaired.inc();
    }

    pub fn inc_readings_rejected(&self) {
        self.inner().readings_rejected.inc();
    }

    pub fn set_history_length(&self, len: usize) {
        self.inner().history_length.set(len as i64);
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_predictions_generated(&self) {
        self.inner().predictions_generated.inc();
    }

    pub fn inc_predictions_unavailable(&self) {
        self.inner().predictions_unavailable.inc();
    }

    pub fn observe_training(&self, duration_secs: f64, outcome: TrainingOutcome) {
        self.inner().training_duration_seconds.observe(duration_secs);
        self.inner()
            .training_runs
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn training_runs(&self, outcome: TrainingOutcome) -> u64 {
        self.inner()
            .training_runs
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn set_artifact_version(&self, horizon_hours: u32, family: ModelFamily, version: u64) {
        let horizon = horizon_hours.to_string();
        // One family per horizon is current at a time
        for other in [ModelFamily::Ensemble, ModelFamily::Sequence] {
            if other != family {
                let _ = self
                    .inner()
                    .artifact_version
                    .remove_label_values(&[&horizon, other.as_str()]);
            }
        }
        self.inner()
            .artifact_version
            .with_label_values(&[&horizon, family.as_str()])
            .set(version as i64);
    }

    pub fn set_rolling_mae(&self, horizon_hours: u32, family: ModelFamily, field: Field, mae: f64) {
        self.inner()
            .rolling_mae
            .with_label_values(&[&horizon_hours.to_string(), family.as_str(), field.name()])
            .set(mae);
    }

    pub fn inc_degradation_signals(&self) {
        self.inner().degradation_signals.inc();
    }
}

/// Structured logger for forecasting events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    station: String,
}

impl StructuredLogger {
    pub fn new(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
        }
    }

    pub fn log_reading_repaired(&self, timestamp: &str, flags: &[QualityFlag]) {
        let fields: Vec<&str> = flags.iter().map(|f| f.field.name()).collect();
        info!(
            event = "reading_repaired",
            station = %self.station,
            timestamp = %timestamp,
            fields = ?fields,
            flag_count = flags.len(),
            "Replaced invalid fields with last good values"
        );
    }

    pub fn log_reading_rejected(&self, timestamp: &str, reason: &str) {
        warn!(
            event = "reading_rejected",
            station = %self.station,
            timestamp = %timestamp,
            reason = %reason,
            "Reading rejected"
        );
    }

    pub fn log_prediction(&self, prediction: &Prediction, artifact_version: u64, fallback: bool) {
        info!(
            event = "prediction_generated",
            station = %self.station,
            horizon_hours = prediction.horizon_hours,
            model_family = %prediction.model_family,
            artifact_version = artifact_version,
            fallback = fallback,
            target_timestamp = %prediction.target_timestamp.to_rfc3339(),
            pm2_5 = prediction.predicted.pm2_5,
            pm10 = prediction.predicted.pm10,
            temperature = prediction.predicted.temperature,
            humidity = prediction.predicted.humidity,
            "Generated forecast"
        );
    }

    pub fn log_prediction_unavailable(&self, horizon_hours: u32, reason: &str) {
        warn!(
            event = "prediction_unavailable",
            station = %self.station,
            horizon_hours = horizon_hours,
            reason = %reason,
            "No artifact could serve this horizon"
        );
    }

    pub fn log_training_started(&self, horizon_hours: u32, family: ModelFamily, samples: usize, trigger: &str) {
        info!(
            event = "training_started",
            station = %self.station,
            horizon_hours = horizon_hours,
            model_family = %family,
            samples = samples,
            trigger = %trigger,
            "Training started"
        );
    }

    pub fn log_training_completed(
        &self,
        horizon_hours: u32,
        family: ModelFamily,
        version: u64,
        validation_mae: f64,
        duration_secs: f64,
    ) {
        info!(
            event = "training_completed",
            station = %self.station,
            horizon_hours = horizon_hours,
            model_family = %family,
            version = version,
            validation_mae = validation_mae,
            duration_secs = duration_secs,
            "Training completed"
        );
    }

    pub fn log_training_failed(&self, horizon_hours: u32, family: ModelFamily, reason: &str) {
        warn!(
            event = "training_failed",
            station = %self.station,
            horizon_hours = horizon_hours,
            model_family = %family,
            reason = %reason,
            "Training failed, keeping current artifact"
        );
    }

    pub fn log_artifact_swapped(&self, horizon_hours: u32, old_version: Option<u64>, new_version: u64, family: ModelFamily) {
        info!(
            event = "artifact_swapped",
            station = %self.station,
            horizon_hours = horizon_hours,
            old_version = ?old_version,
            new_version = new_version,
            model_family = %family,
            "Serving artifact swapped"
        );
    }

    pub fn log_accuracy_degraded(&self, horizon_hours: u32, family: ModelFamily, breaches: u32) {
        warn!(
            event = "accuracy_degraded",
            station = %self.station,
            horizon_hours = horizon_hours,
            model_family = %family,
            consecutive_breaches = breaches,
            "Sustained accuracy degradation, forcing retrain"
        );
    }

    pub fn log_startup(&self, version: &str, history_len: usize) {
        info!(
            event = "agent_started",
            station = %self.station,
            agent_version = %version,
            history_len = history_len,
            "Forecast agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            station = %self.station,
            reason = %reason,
            "Forecast agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = ForecastMetrics::new();
        let b = a.clone();
        a.inc_readings_ingested();
        b.inc_readings_ingested();
        a.set_artifact_version(1, ModelFamily::Ensemble, 3);
        a.set_artifact_version(1, ModelFamily::Sequence, 4);
        b.set_rolling_mae(3, ModelFamily::Ensemble, Field::Pm2_5, 4.2);
        b.observe_training(1.5, TrainingOutcome::Success);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "airq_readings_ingested_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("station-1");
        assert_eq!(logger.station, "station-1");
    }
}

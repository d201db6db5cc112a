//! Multi-horizon inference with per-horizon fallback

use crate::error::{ForecastError, ForecastResult};
use crate::features::{FeatureBuilder, TrainingWindow, WindowConfig};
use crate::model::ModelArtifact;
use crate::models::{Field, Prediction, SensorReading, TargetValues};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::orchestrator::ArtifactRegistry;
use crate::store::TabularStore;
use crate::validator::ValidatorConfig;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Outcome of one prediction round
#[derive(Debug, Default)]
pub struct PredictionBatch {
    /// Recorded predictions, in horizon order
    pub predictions: Vec<Prediction>,
    /// One `PredictionUnavailable` (or storage error) per failed horizon
    pub unavailable: Vec<ForecastError>,
}

pub struct PredictionEngine {
    builder: FeatureBuilder,
    registry: Arc<ArtifactRegistry>,
    store: Arc<dyn TabularStore>,
    ranges: ValidatorConfig,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
}

impl PredictionEngine {
    pub fn new(
        window: WindowConfig,
        registry: Arc<ArtifactRegistry>,
        store: Arc<dyn TabularStore>,
        ranges: ValidatorConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            builder: FeatureBuilder::new(window),
            registry,
            store,
            ranges,
            metrics: ForecastMetrics::new(),
            logger,
        }
    }

    pub fn window_length(&self) -> usize {
        self.builder.window_length()
    }

    /// Readings [`predict_latest`](Self::predict_latest) should be given
    pub fn context_len(&self) -> usize {
        self.builder.context_len()
    }

    /// Predict every horizon from the newest window of `history`
    pub fn predict_latest(&self, history: &[SensorReading], horizons: &[u32]) -> ForecastResult<PredictionBatch> {
        let window = self.builder.latest_window(history)?;
        Ok(self.predict(&window, horizons))
    }

    /// Predict each horizon independently.
    ///
    /// A failure on one horizon never prevents the others. Every returned
    /// prediction has already been written to the store.
    pub fn predict(&self, window: &TrainingWindow, horizons: &[u32]) -> PredictionBatch {
        let mut batch = PredictionBatch::default();
        for &h in horizons {
            let start = Instant::now();
            match self.predict_horizon(window, h) {
                Ok(prediction) => {
                    self.metrics.observe_prediction_latency(start.elapsed().as_secs_f64());
                    self.metrics.inc_predictions_generated();
                    batch.predictions.push(prediction);
                }
                Err(e) => {
                    self.metrics.inc_predictions_unavailable();
                    self.logger.log_prediction_unavailable(h, &e.to_string());
                    batch.unavailable.push(e);
                }
            }
        }
        batch
    }

    fn predict_horizon(&self, window: &TrainingWindow, horizon_hours: u32) -> ForecastResult<Prediction> {
        let slot = self
            .registry
            .slot(horizon_hours)
            .ok_or_else(|| unavailable(horizon_hours, "horizon not configured".to_string()))?;
        // Held for the whole call; a concurrent swap does not affect it
        let pair = slot.snapshot();
        let current = pair
            .current
            .as_ref()
            .ok_or_else(|| unavailable(horizon_hours, "no trained artifact".to_string()))?;

        let (artifact, values, fallback): (&Arc<ModelArtifact>, TargetValues, bool) = match current.infer(window) {
            Ok(values) => (current, values, false),
            Err(primary) => {
                warn!(
                    horizon_hours,
                    version = current.version,
                    error = %primary,
                    "Inference failed on current artifact, trying previous"
                );
                let previous = pair.previous.as_ref().ok_or_else(|| {
                    unavailable(horizon_hours, format!("current failed ({}), no previous artifact", primary))
                })?;
                match previous.infer(window) {
                    Ok(values) => (previous, values, true),
                    Err(e) => {
                        return Err(unavailable(
                            horizon_hours,
                            format!("current failed ({}), previous failed ({})", primary, e),
                        ))
                    }
                }
            }
        };

        let issue = window.end_timestamp();
        let prediction = Prediction {
            issue_timestamp: issue,
            target_timestamp: issue + ChronoDuration::hours(horizon_hours as i64),
            horizon_hours,
            model_family: artifact.family(),
            predicted: self.clamp(values),
            actual: None,
        };
        self.store.record_prediction(&prediction)?;
        self.logger.log_prediction(&prediction, artifact.version, fallback);
        Ok(prediction)
    }

    /// Keep outputs inside the physically admissible ranges
    fn clamp(&self, values: TargetValues) -> TargetValues {
        let mut out = values.to_array();
        for (v, field) in out.iter_mut().zip(Field::TARGETS) {
            *v = self.ranges.range(field).clamp(*v);
        }
        TargetValues::from_array(out)
    }
}

fn unavailable(horizon_hours: u32, reason: String) -> ForecastError {
    ForecastError::PredictionUnavailable {
        horizon_hours,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{broken_artifact, hourly_history, hourly_window, trained_artifact};

    fn engine(horizons: &[u32]) -> (PredictionEngine, Arc<ArtifactRegistry>, Arc<MemoryStore>) {
        let registry = Arc::new(ArtifactRegistry::new(horizons));
        let store = Arc::new(MemoryStore::new());
        let engine = PredictionEngine::new(
            hourly_window(),
            registry.clone(),
            store.clone(),
            ValidatorConfig::default(),
            StructuredLogger::new("test"),
        );
        (engine, registry, store)
    }

    #[test]
    fn test_one_prediction_per_horizon_with_exact_targets() {
        let (engine, registry, store) = engine(&[1, 3, 6]);
        for h in [1, 3, 6] {
            registry.slot(h).unwrap().install(Arc::new(trained_artifact(h as u64, h)));
        }
        let history = hourly_history(40);
        let batch = engine.predict_latest(&history, &[1, 3, 6]).unwrap();

        assert!(batch.unavailable.is_empty());
        assert_eq!(batch.predictions.len(), 3);
        for (p, h) in batch.predictions.iter().zip([1, 3, 6]) {
            assert_eq!(p.horizon_hours, h);
            assert_eq!(p.issue_timestamp, history[39].timestamp);
            assert_eq!(p.target_timestamp - p.issue_timestamp, ChronoDuration::hours(h as i64));
            assert!(p.actual.is_none());
        }
        // recorded before return
        assert_eq!(store.latest_predictions().unwrap().len(), 3);
    }

    #[test]
    fn test_falls_back_to_previous_artifact() {
        let (engine, registry, _) = engine(&[1]);
        let slot = registry.slot(1).unwrap();
        slot.install(Arc::new(trained_artifact(1, 1)));
        slot.install(Arc::new(broken_artifact(2, 1)));

        let batch = engine.predict_latest(&hourly_history(40), &[1]).unwrap();
        assert_eq!(batch.predictions.len(), 1);
        assert!(batch.predictions[0].predicted.is_finite());
    }

    #[test]
    fn test_horizons_fail_independently() {
        let (engine, registry, store) = engine(&[1, 3, 6]);
        registry.slot(1).unwrap().install(Arc::new(trained_artifact(1, 1)));
        registry.slot(3).unwrap().install(Arc::new(broken_artifact(2, 3)));

        let batch = engine.predict_latest(&hourly_history(40), &[1, 3, 6]).unwrap();
        assert_eq!(batch.predictions.len(), 1);
        assert_eq!(batch.predictions[0].horizon_hours, 1);
        assert_eq!(batch.unavailable.len(), 2);
        assert!(batch.unavailable.iter().all(|e| matches!(
            e,
            ForecastError::PredictionUnavailable { horizon_hours: 3 | 6, .. }
        )));
        assert_eq!(store.latest_predictions().unwrap().len(), 1);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let (engine, _, _) = engine(&[1]);
        let err = engine.predict_latest(&hourly_history(10), &[1]).unwrap_err();
        assert!(err.is_insufficient_history());
    }

    #[test]
    fn test_outputs_clamped_to_ranges() {
        let (engine, _, _) = engine(&[1]);
        let clamped = engine.clamp(TargetValues::from_array([-3.0, 2000.0, 20.0, 120.0]));
        assert_eq!(clamped.to_array(), [0.0, 1000.0, 20.0, 100.0]);
    }
}

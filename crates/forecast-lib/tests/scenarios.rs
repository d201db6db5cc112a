//! End-to-end scenarios across validator, features, selector, training,
//! prediction, accuracy tracking and orchestration

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use forecast_lib::{
    accuracy::{AccuracyConfig, AccuracyTracker},
    features::{FeatureBuilder, WindowConfig},
    health::HealthRegistry,
    ingest::ReadingHistory,
    model::{select_family, BudgetCaps, ResourceProfile, SelectionInput, SelectorConfig},
    orchestrator::{
        ArtifactRegistry, CycleReport, OrchestratorState, TrainTrigger, TrainingOrchestrator,
    },
    predictor::PredictionEngine,
    store::{MemoryStore, TabularStore},
    validator::{ReadingValidator, ValidatorConfig},
    Field, FlagKind, ForecastConfig, ModelFamily, Prediction, RawReading, SensorReading,
    StructuredLogger, TargetValues,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const HORIZONS: [u32; 3] = [1, 3, 6];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// W = 60 over hourly readings so a 6h horizon is six steps
fn hourly_config() -> ForecastConfig {
    let mut config = ForecastConfig::default();
    config.window = WindowConfig {
        length: 60,
        reading_interval: Duration::from_secs(3600),
    };
    config.prediction.horizons = HORIZONS.to_vec();
    config.caps = BudgetCaps {
        max_trees: 5,
        max_depth: 4,
        ..Default::default()
    };
    config.profile = ResourceProfile {
        max_memory_mb: 4096,
        max_cores: 2,
        gpu_available: false,
    };
    config
}

fn hourly_readings(n: usize) -> Vec<SensorReading> {
    (0..n)
        .map(|i| {
            let phase = i as f64 * std::f64::consts::TAU / 24.0;
            SensorReading {
                timestamp: t0() + ChronoDuration::hours(i as i64),
                pm2_5: 25.0 + 10.0 * phase.sin(),
                pm10: 45.0 + 12.0 * phase.sin(),
                temperature: 18.0 + 6.0 * phase.cos(),
                humidity: 55.0 - 15.0 * phase.cos(),
                gas_level: 300.0 + (i % 7) as f64,
            }
        })
        .collect()
}

async fn trained_orchestrator(
    config: &ForecastConfig,
    history: ReadingHistory,
) -> (TrainingOrchestrator, Arc<ArtifactRegistry>) {
    let registry = Arc::new(ArtifactRegistry::new(&config.horizons()));
    let health = Arc::new(HealthRegistry::with_runtime_components().await);
    let (orchestrator, _handle, _rx) =
        TrainingOrchestrator::new(config, registry.clone(), history, None, health);
    let report = orchestrator
        .run_cycle(TrainTrigger::Manual)
        .await
        .expect("cycle should run");
    assert_eq!(report.swapped(), HORIZONS.len());
    (orchestrator, registry)
}

#[tokio::test]
async fn test_hundred_readings_yield_three_forecasts() {
    let config = hourly_config();
    let builder = FeatureBuilder::new(config.window.clone());
    let recent = hourly_readings(100);

    assert_eq!(builder.windows(&recent).count(), 41);

    let family = select_family(
        &SelectionInput {
            sample_count: recent.len(),
            profile: &config.profile,
            sequence_runtime_available: true,
            sequence_failed: false,
        },
        &SelectorConfig::default(),
    );
    assert_eq!(family, ModelFamily::Ensemble);

    let history = ReadingHistory::from_readings(hourly_readings(140), 1_000);
    let (_orchestrator, registry) = trained_orchestrator(&config, history).await;
    assert!(registry.is_complete());

    let store = Arc::new(MemoryStore::new());
    let engine = PredictionEngine::new(
        config.window.clone(),
        registry,
        store.clone(),
        config.validator,
        StructuredLogger::new("scenario"),
    );
    let batch = engine.predict_latest(&recent, &HORIZONS).unwrap();
    assert!(batch.unavailable.is_empty());
    assert_eq!(batch.predictions.len(), 3);

    let issue = recent[recent.len() - 1].timestamp;
    let mut targets: Vec<_> = batch.predictions.iter().map(|p| p.target_timestamp).collect();
    targets.dedup();
    assert_eq!(targets.len(), 3);
    for p in &batch.predictions {
        assert_eq!(p.issue_timestamp, issue);
        assert_eq!(
            p.target_timestamp,
            issue + ChronoDuration::hours(p.horizon_hours as i64)
        );
        for (field, value) in p.predicted.iter() {
            assert!(config.validator.range(field).contains(value));
        }
    }
    assert_eq!(store.latest_predictions().unwrap().len(), 3);
}

#[tokio::test]
async fn test_failed_retrain_keeps_serving_artifact() {
    let config = hourly_config();
    let history = ReadingHistory::from_readings(hourly_readings(140), 1_000);
    let (orchestrator, registry) = trained_orchestrator(&config, history.clone()).await;
    let before: Vec<_> = HORIZONS
        .iter()
        .map(|&h| registry.slot(h).unwrap().current().unwrap())
        .collect();

    let mut corrupt = hourly_readings(141)[140];
    corrupt.pm2_5 = f64::NAN;
    history.push(corrupt).await;

    let report = orchestrator.run_cycle(TrainTrigger::Manual).await.unwrap();
    assert_eq!(report.swapped(), 0);
    assert!(report.outcomes.iter().all(|o| o.error.is_some()));
    for (h, old) in HORIZONS.iter().zip(&before) {
        let now = registry.slot(*h).unwrap().current().unwrap();
        assert!(Arc::ptr_eq(old, &now));
    }
    assert_eq!(orchestrator.state(), OrchestratorState::Idle);
}

#[test]
fn test_spike_replaced_by_prior_value() {
    let mut validator = ReadingValidator::new(ValidatorConfig::default());
    let first = hourly_readings(2);
    let accepted = validator.validate(&RawReading::from(first[0])).unwrap();
    assert!(accepted.is_clean());

    let mut spike = RawReading::from(first[1]);
    spike.pm2_5 = Some(9999.0);
    let repaired = validator.validate(&spike).unwrap();
    assert_eq!(repaired.reading.pm2_5, first[0].pm2_5);
    assert!(repaired
        .flags
        .iter()
        .any(|f| f.field == Field::Pm2_5 && f.kind == FlagKind::OutOfRange { value: 9999.0 }));

    // already valid readings come back unchanged
    let mut again = ReadingValidator::new(ValidatorConfig::default());
    let clean = again.validate(&RawReading::from(first[1])).unwrap();
    assert_eq!(clean.reading, first[1]);
}

#[tokio::test]
async fn test_unmatched_prediction_stays_unreconciled() {
    let store = Arc::new(MemoryStore::new());
    let tracker = AccuracyTracker::new(
        store.clone(),
        AccuracyConfig::default(),
        None,
        StructuredLogger::new("scenario"),
    );
    store
        .record_prediction(&Prediction {
            issue_timestamp: t0(),
            target_timestamp: t0() + ChronoDuration::hours(1),
            horizon_hours: 1,
            model_family: ModelFamily::Ensemble,
            predicted: TargetValues {
                pm2_5: 20.0,
                pm10: 40.0,
                temperature: 18.0,
                humidity: 50.0,
            },
            actual: None,
        })
        .unwrap();

    // readings on either side of the tolerance band never match
    for offset in [-3600i64, -61, 61, 3600] {
        let mut reading = hourly_readings(1)[0];
        reading.timestamp = t0() + ChronoDuration::hours(1) + ChronoDuration::seconds(offset);
        assert!(tracker.on_reading(&reading).unwrap().is_empty());
    }
    let latest = store.latest_predictions().unwrap();
    assert!(latest[0].actual.is_none());
    assert!(store.accuracy_records().unwrap().is_empty());
}

#[tokio::test]
async fn test_sustained_breaches_retrain_through_loop() {
    let mut config = hourly_config();
    config.orchestrator.retrain_interval = Duration::from_secs(24 * 3600);
    // no data-growth cycles; only the tracker and the operator start one
    config.orchestrator.min_training_readings = usize::MAX;

    let registry = Arc::new(ArtifactRegistry::new(&config.horizons()));
    let health = Arc::new(HealthRegistry::with_runtime_components().await);
    let history = ReadingHistory::from_readings(hourly_readings(140), 1_000);
    let (orchestrator, handle, triggers) =
        TrainingOrchestrator::new(&config, registry.clone(), history, None, health);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut reports = handle.subscribe_reports();
    let task = tokio::spawn(Arc::new(orchestrator).run(triggers, shutdown_rx));

    let store = Arc::new(MemoryStore::new());
    let tracker = AccuracyTracker::new(
        store.clone(),
        config.accuracy.clone(),
        Some(handle.trigger_sender()),
        StructuredLogger::new("scenario"),
    );

    let predicted = TargetValues {
        pm2_5: 10.0,
        pm10: 20.0,
        temperature: 15.0,
        humidity: 40.0,
    };
    for actual in hourly_readings(31).iter().skip(1) {
        let mut actual = *actual;
        actual.pm2_5 = 90.0;
        let prediction = Prediction {
            issue_timestamp: actual.timestamp - ChronoDuration::hours(1),
            target_timestamp: actual.timestamp,
            horizon_hours: 1,
            model_family: ModelFamily::Ensemble,
            predicted,
            actual: None,
        };
        store.record_prediction(&prediction).unwrap();
        tracker.reconcile(&prediction, &actual).unwrap().unwrap();
    }

    let first = wait_for_report(&mut reports, |r| {
        matches!(r.trigger, TrainTrigger::Degraded { horizon_hours: 1, .. })
    })
    .await;
    assert_eq!(first.swapped(), HORIZONS.len());
    assert!(registry.is_complete());
    assert_eq!(handle.state(), OrchestratorState::Idle);

    // the loop keeps accepting triggers once a cycle has finished
    assert!(handle.trigger(TrainTrigger::Manual));
    let second = wait_for_report(&mut reports, |r| r.trigger == TrainTrigger::Manual).await;
    assert_eq!(second.swapped(), HORIZONS.len());
    assert_eq!(handle.state(), OrchestratorState::Idle);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(30), task)
        .await
        .unwrap()
        .unwrap();
}

async fn wait_for_report(
    reports: &mut watch::Receiver<Option<Arc<CycleReport>>>,
    accept: impl Fn(&CycleReport) -> bool,
) -> Arc<CycleReport> {
    let seen = tokio::time::timeout(
        Duration::from_secs(60),
        reports.wait_for(|r| r.as_deref().is_some_and(&accept)),
    )
    .await
    .expect("no cycle report in time")
    .unwrap();
    seen.clone().unwrap()
}

//! Shared fixtures for unit tests

use crate::features::{FeatureBuilder, WindowConfig};
use crate::model::{
    train, BudgetCaps, CancelToken, ForestSet, ModelArtifact, ModelParams, ResourceBudget,
    ResourceProfile, TrainRequest, TrainingGuard, ValidationSnapshot,
};
use crate::models::{ModelFamily, SensorReading, TargetValues};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::time::Duration;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

/// Short hourly windows keep multi-hour horizons cheap in tests
pub fn hourly_window() -> WindowConfig {
    WindowConfig {
        length: 30,
        reading_interval: Duration::from_secs(3600),
    }
}

/// Smooth daily cycle sampled hourly from `t0`
pub fn hourly_history(n: usize) -> Vec<SensorReading> {
    (0..n)
        .map(|i| {
            let phase = (i as f64) * std::f64::consts::TAU / 24.0;
            SensorReading {
                timestamp: t0() + ChronoDuration::hours(i as i64),
                pm2_5: 20.0 + 8.0 * phase.sin(),
                pm10: 40.0 + 10.0 * phase.sin(),
                temperature: 15.0 + 5.0 * phase.cos(),
                humidity: 60.0 - 10.0 * phase.cos(),
                gas_level: 200.0 + (i % 5) as f64,
            }
        })
        .collect()
}

pub fn small_profile() -> ResourceProfile {
    ResourceProfile {
        max_memory_mb: 4096,
        max_cores: 2,
        gpu_available: false,
    }
}

pub fn small_caps() -> BudgetCaps {
    BudgetCaps {
        max_trees: 5,
        max_depth: 4,
        ..Default::default()
    }
}

/// Ensemble artifact trained on [`hourly_history`]
pub fn trained_artifact(version: u64, horizon_hours: u32) -> ModelArtifact {
    let config = hourly_window();
    let builder = FeatureBuilder::new(config.clone());
    let history = hourly_history(80);
    let set = builder
        .training_set(&history, config.horizon_steps(horizon_hours), None)
        .unwrap();
    let budget = ResourceBudget::for_profile(&small_profile(), &small_caps());
    let req = TrainRequest {
        family: ModelFamily::Ensemble,
        set: &set,
        horizon_hours,
        version,
        budget: &budget,
        validation_fraction: 0.15,
        seed: 7,
    };
    train(&req, &TrainingGuard::new(CancelToken::new(), Duration::from_secs(60))).unwrap()
}

/// Artifact that fails every inference (no forests, zero window length)
pub fn broken_artifact(version: u64, horizon_hours: u32) -> ModelArtifact {
    let forests: ForestSet = serde_json::from_str(r#"{"feature_len":0,"forests":[]}"#).unwrap();
    ModelArtifact {
        version,
        horizon_hours,
        window_length: 0,
        params: ModelParams::Ensemble(forests),
        training_samples: 0,
        created_at: Utc::now(),
        validation: ValidationSnapshot {
            mae: TargetValues::default(),
            rmse: TargetValues::default(),
            samples: 0,
        },
    }
}

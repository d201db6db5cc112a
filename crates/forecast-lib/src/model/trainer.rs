//! Model training
//!
//! Single dispatch point from [`ModelFamily`] to the family fitters. Every
//! failure surfaces as `TrainingFailed` (or `Cancelled`); callers keep
//! serving whatever artifact they already hold.

use super::forest::{fit_forest_set, ForestParams, Matrix};
use super::{sequence, ModelArtifact, ModelParams, ResourceBudget, TrainingGuard, ValidationSnapshot};
use crate::error::{ForecastError, ForecastResult};
use crate::features::{TrainingSet, TrainingWindow, STEP_FEATURES, SUMMARY_FEATURES};
use crate::models::{Field, ModelFamily, TargetValues, NUM_TARGETS};
use std::mem::size_of;
use chrono::Utc;
use tracing::debug;

/// Smallest labelled set worth fitting
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Default share of samples held out for validation
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct TrainRequest<'a> {
    pub family: ModelFamily,
    pub set: &'a TrainingSet,
    pub horizon_hours: u32,
    pub version: u64,
    pub budget: &'a ResourceBudget,
    /// Newest share of samples used for validation and early stopping
    pub validation_fraction: f64,
    pub seed: u64,
}

pub fn train(req: &TrainRequest<'_>, guard: &TrainingGuard) -> ForecastResult<ModelArtifact> {
    let set = req.set;
    if set.len() < MIN_TRAINING_SAMPLES {
        return Err(ForecastError::InsufficientHistory {
            needed: MIN_TRAINING_SAMPLES,
            available: set.len(),
        });
    }
    if !set.targets().iter().all(TargetValues::is_finite) {
        return Err(ForecastError::TrainingFailed(
            "non-finite training target".to_string(),
        ));
    }

    let split = set.validation_start(req.validation_fraction);
    let window_length = set.windows()[0].len();

    let estimate = check_memory_budget(req.family, set.len(), window_length, req.budget)?;
    debug!(
        family = %req.family,
        horizon_hours = req.horizon_hours,
        train_samples = split,
        validation_samples = set.len() - split,
        estimated_mb = estimate,
        "Fitting model"
    );

    guard.check()?;
    let params = match req.family {
        ModelFamily::Ensemble => ModelParams::Ensemble(fit_ensemble(set, split, req, guard)?),
        ModelFamily::Sequence => ModelParams::Sequence(sequence::fit(set, split, req.budget, req.seed, guard)?),
    };

    let mut artifact = ModelArtifact {
        version: req.version,
        horizon_hours: req.horizon_hours,
        window_length,
        params,
        training_samples: split,
        created_at: Utc::now(),
        validation: ValidationSnapshot {
            mae: TargetValues::default(),
            rmse: TargetValues::default(),
            samples: 0,
        },
    };
    artifact.validation = validate(&artifact, set, split)?;
    Ok(artifact)
}

fn fit_ensemble(
    set: &TrainingSet,
    split: usize,
    req: &TrainRequest<'_>,
    guard: &TrainingGuard,
) -> ForecastResult<super::ForestSet> {
    let width = set.windows()[0].flatten().len();
    let mut data = Vec::with_capacity(split * width);
    for window in &set.windows()[..split] {
        data.extend(window.flatten());
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::TrainingFailed(
            "non-finite feature value".to_string(),
        ));
    }

    let params = ForestParams {
        n_trees: req.budget.max_trees,
        max_depth: req.budget.max_depth,
        seed: req.seed,
        ..Default::default()
    };
    fit_forest_set(
        Matrix::new(&data, width),
        &set.targets()[..split],
        &params,
        req.budget.max_cores,
        guard,
    )
}

/// Held-out MAE and RMSE per target over `set[split..]`
fn validate(artifact: &ModelArtifact, set: &TrainingSet, split: usize) -> ForecastResult<ValidationSnapshot> {
    let mut abs = [0.0; NUM_TARGETS];
    let mut sq = [0.0; NUM_TARGETS];
    let samples = set.len() - split;

    for (window, actual) in set.windows()[split..].iter().zip(&set.targets()[split..]) {
        let predicted = artifact
            .infer(window)
            .map_err(|e| ForecastError::TrainingFailed(format!("validation inference: {}", e)))?;
        for (i, (p, a)) in predicted.to_array().iter().zip(actual.to_array()).enumerate() {
            let err = p - a;
            abs[i] += err.abs();
            sq[i] += err * err;
        }
    }

    let n = samples.max(1) as f64;
    let mae = TargetValues::from_array(abs.map(|s| s / n));
    let rmse = TargetValues::from_array(sq.map(|s| (s / n).sqrt()));
    if !mae.is_finite() || !rmse.is_finite() {
        return Err(ForecastError::TrainingFailed(
            "non-finite validation error".to_string(),
        ));
    }
    Ok(ValidationSnapshot { mae, rmse, samples })
}

/// Fail with `TrainingFailed` when fitting `samples` windows of
/// `window_length` readings would not fit the memory budget.
///
/// Cheap enough to call before any window is built. Returns the estimate.
pub fn check_memory_budget(
    family: ModelFamily,
    samples: usize,
    window_length: usize,
    budget: &ResourceBudget,
) -> ForecastResult<u64> {
    let estimate = estimate_memory_mb(family, samples, window_length, budget);
    if estimate > budget.memory_limit_mb {
        return Err(ForecastError::TrainingFailed(format!(
            "estimated {} MB for {} windows exceeds training budget of {} MB",
            estimate, samples, budget.memory_limit_mb
        )));
    }
    Ok(estimate)
}

/// Rough peak memory of a fit, in MB, including the labelled windows
fn estimate_memory_mb(
    family: ModelFamily,
    samples: usize,
    window_length: usize,
    budget: &ResourceBudget,
) -> u64 {
    let flat_len = SUMMARY_FEATURES + window_length * Field::ALL.len();
    let per_window = size_of::<TrainingWindow>()
        + window_length * STEP_FEATURES * 8
        + SUMMARY_FEATURES * 8
        + NUM_TARGETS * 8;
    let windows = samples * per_window;
    let fit = match family {
        ModelFamily::Ensemble => {
            let matrix = samples * flat_len * 8;
            // bootstrap row indices plus nodes, per concurrently grown tree
            let per_tree = samples * 16 + (1usize << budget.max_depth.min(16)) * 40;
            matrix + per_tree * budget.max_cores
        }
        ModelFamily::Sequence => {
            let inputs = samples * window_length * STEP_FEATURES * 4;
            // activations and gradients of one batch through both recurrent layers
            let batch = budget.max_batch_size * window_length * (64 + 32) * 4 * 8;
            inputs + batch
        }
    };
    ((windows + fit) / (1024 * 1024)) as u64
}

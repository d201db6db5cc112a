//! Model artifacts, resource budgets and the training entry points
//!
//! Family-specific parameters live behind [`ModelParams`]; inference and
//! training each dispatch on it in exactly one place.

pub mod forest;
pub mod selector;
pub mod sequence;
pub mod trainer;

pub use forest::{ForestParams, ForestSet, RegressionTree};
pub use selector::{select_family, SelectionInput, SelectorConfig, SequenceGate};
pub use sequence::SequenceModel;
pub use trainer::{check_memory_budget, train, TrainRequest, DEFAULT_VALIDATION_FRACTION, MIN_TRAINING_SAMPLES};

use crate::error::{ForecastError, ForecastResult};
use crate::features::TrainingWindow;
use crate::models::{ModelFamily, TargetValues};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Memory below which the tighter ensemble caps apply
pub const LOW_MEMORY_MB: u64 = 2048;

/// Default hard ceiling on a single training attempt
pub const DEFAULT_TRAINING_CEILING: Duration = Duration::from_secs(30 * 60);

/// Hardware available to the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub max_memory_mb: u64,
    pub max_cores: usize,
    pub gpu_available: bool,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self::detect()
    }
}

impl ResourceProfile {
    /// Probe cores and total memory of the host
    pub fn detect() -> Self {
        let max_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_memory_mb = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| parse_mem_total_mb(&s))
            .unwrap_or(LOW_MEMORY_MB);
        Self {
            max_memory_mb,
            max_cores,
            gpu_available: false,
        }
    }

    pub fn is_low_memory(&self) -> bool {
        self.max_memory_mb < LOW_MEMORY_MB
    }
}

fn parse_mem_total_mb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

/// Configured upper bounds for training effort
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCaps {
    pub max_trees: usize,
    pub max_depth: usize,
    pub max_epochs: usize,
    pub max_batch_size: usize,
    /// Newest labelled windows used per training run
    pub max_samples: usize,
    /// Concurrent training threads; `None` means every available core
    pub max_cores: Option<usize>,
    pub time_ceiling: Duration,
}

impl Default for BudgetCaps {
    fn default() -> Self {
        Self {
            max_trees: 100,
            max_depth: 20,
            max_epochs: 50,
            max_batch_size: 32,
            max_samples: 50_000,
            max_cores: None,
            time_ceiling: DEFAULT_TRAINING_CEILING,
        }
    }
}

/// Effective limits for one training attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBudget {
    pub max_trees: usize,
    pub max_depth: usize,
    pub max_epochs: usize,
    pub max_batch_size: usize,
    pub max_samples: usize,
    pub max_cores: usize,
    pub memory_limit_mb: u64,
    pub time_ceiling: Duration,
}

impl ResourceBudget {
    /// Tighten the configured caps to what the host can afford
    pub fn for_profile(profile: &ResourceProfile, caps: &BudgetCaps) -> Self {
        let cores = caps
            .max_cores
            .unwrap_or(profile.max_cores)
            .min(profile.max_cores)
            .max(1);
        let mut budget = Self {
            max_trees: caps.max_trees.max(1),
            max_depth: caps.max_depth.max(1),
            max_epochs: caps.max_epochs.max(1),
            max_batch_size: caps.max_batch_size.max(1),
            max_samples: caps.max_samples.max(1),
            max_cores: cores,
            // Training may use at most half of the host memory
            memory_limit_mb: (profile.max_memory_mb / 2).max(64),
            time_ceiling: caps.time_ceiling,
        };
        if profile.is_low_memory() {
            budget.max_trees = budget.max_trees.min(50);
            budget.max_depth = budget.max_depth.min(15);
            budget.max_batch_size = budget.max_batch_size.min(16);
            budget.max_samples = budget.max_samples.min(10_000);
        }
        budget
    }
}

/// Cooperative cancellation flag shared with in-flight training
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Checked between tree fits and epochs
#[derive(Debug, Clone)]
pub struct TrainingGuard {
    cancel: CancelToken,
    deadline: Instant,
}

impl TrainingGuard {
    pub fn new(cancel: CancelToken, ceiling: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + ceiling,
        }
    }

    pub fn check(&self) -> ForecastResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(ForecastError::TrainingFailed(
                "training time ceiling exceeded".to_string(),
            ));
        }
        Ok(())
    }
}

/// Family-specific trained parameters
#[derive(Debug)]
pub enum ModelParams {
    Ensemble(ForestSet),
    Sequence(SequenceModel),
}

impl ModelParams {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelParams::Ensemble(_) => ModelFamily::Ensemble,
            ModelParams::Sequence(_) => ModelFamily::Sequence,
        }
    }
}

/// Held-out error measured right after training
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationSnapshot {
    pub mae: TargetValues,
    pub rmse: TargetValues,
    pub samples: usize,
}

impl ValidationSnapshot {
    pub fn mean_mae(&self) -> f64 {
        self.mae.to_array().iter().sum::<f64>() / self.mae.to_array().len() as f64
    }
}

/// Trained, immutable model for one horizon
#[derive(Debug)]
pub struct ModelArtifact {
    pub version: u64,
    pub horizon_hours: u32,
    pub window_length: usize,
    pub params: ModelParams,
    pub training_samples: usize,
    pub created_at: DateTime<Utc>,
    pub validation: ValidationSnapshot,
}

impl ModelArtifact {
    pub fn family(&self) -> ModelFamily {
        self.params.family()
    }

    /// Forecast the targets for the window's horizon
    pub fn infer(&self, window: &TrainingWindow) -> Result<TargetValues> {
        if window.len() != self.window_length {
            return Err(anyhow!(
                "artifact v{} expects windows of {} readings, got {}",
                self.version,
                self.window_length,
                window.len()
            ));
        }
        let values = match &self.params {
            ModelParams::Ensemble(forests) => forests.predict(&window.flatten())?,
            ModelParams::Sequence(model) => model.predict(window)?,
        };
        if !values.is_finite() {
            return Err(anyhow!("artifact v{} produced non-finite output", self.version));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(memory_mb: u64, cores: usize) -> ResourceProfile {
        ResourceProfile {
            max_memory_mb: memory_mb,
            max_cores: cores,
            gpu_available: false,
        }
    }

    #[test]
    fn test_low_memory_budget_is_tighter() {
        let caps = BudgetCaps::default();
        let small = ResourceBudget::for_profile(&profile(1024, 4), &caps);
        let large = ResourceBudget::for_profile(&profile(16_384, 8), &caps);

        assert_eq!(small.max_trees, 50);
        assert_eq!(small.max_depth, 15);
        assert_eq!(small.max_samples, 10_000);
        assert_eq!(large.max_trees, 100);
        assert_eq!(large.max_depth, 20);
        assert!(small.memory_limit_mb < large.memory_limit_mb);
    }

    #[test]
    fn test_core_cap() {
        let caps = BudgetCaps {
            max_cores: Some(2),
            ..Default::default()
        };
        assert_eq!(ResourceBudget::for_profile(&profile(8192, 8), &caps).max_cores, 2);

        let caps = BudgetCaps {
            max_cores: Some(16),
            ..Default::default()
        };
        assert_eq!(ResourceBudget::for_profile(&profile(8192, 4), &caps).max_cores, 4);
    }

    #[test]
    fn test_meminfo_parse() {
        let meminfo = "MemTotal:        4045348 kB\nMemFree:          512000 kB\n";
        assert_eq!(parse_mem_total_mb(meminfo), Some(3950));
        assert_eq!(parse_mem_total_mb("garbage"), None);
    }

    #[test]
    fn test_guard_cancel_and_deadline() {
        let token = CancelToken::new();
        let guard = TrainingGuard::new(token.clone(), Duration::from_secs(60));
        assert!(guard.check().is_ok());
        token.cancel();
        assert!(matches!(guard.check(), Err(ForecastError::Cancelled)));

        let expired = TrainingGuard::new(CancelToken::new(), Duration::ZERO);
        assert!(matches!(
            expired.check(),
            Err(ForecastError::TrainingFailed(_))
        ));
    }
}

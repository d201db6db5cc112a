//! Training Orchestrator
//!
//! Owns the serving artifact slots. Triggers move it from `Idle` to
//! `Scheduled`; a cycle then trains every horizon and swaps each new
//! artifact in atomically. Prediction keeps reading the snapshot it took,
//! so a swap never hands it a half-updated artifact.

mod cycle;
mod slot;
mod state;

pub use cycle::{CycleReport, HorizonOutcome, OrchestratorHandle, TrainingOrchestrator};
pub use slot::{ArtifactPair, ArtifactRegistry, ArtifactSlot, HorizonArtifacts};
pub use state::{FamilyLocks, OrchestratorState, TrainTrigger};

use crate::model::DEFAULT_VALIDATION_FRACTION;
use std::path::PathBuf;
use std::time::Duration;

/// Default retraining cadence (24 hours)
pub const DEFAULT_RETRAIN_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// How often history growth is checked
pub const DEFAULT_GROWTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retrain_interval: Duration,
    pub growth_check_interval: Duration,
    /// Newest share of windows held out for validation
    pub validation_fraction: f64,
    /// No data-growth trigger below this many readings
    pub min_training_readings: usize,
    /// Growth since the last attempt that retries while a horizon has no model
    pub growth_step: usize,
    /// Growth factor since the last success that triggers a retrain
    pub growth_ratio: f64,
    /// Where ensemble artifacts are persisted; `None` keeps them in memory
    pub artifact_dir: Option<PathBuf>,
    pub seed: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retrain_interval: DEFAULT_RETRAIN_INTERVAL,
            growth_check_interval: DEFAULT_GROWTH_CHECK_INTERVAL,
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
            min_training_readings: 100,
            growth_step: 50,
            growth_ratio: 2.0,
            artifact_dir: None,
            seed: 42,
        }
    }
}

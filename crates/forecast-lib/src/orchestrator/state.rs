//! Orchestrator state machine and training locks

use crate::models::ModelFamily;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// `Idle → Scheduled → Training → Swapping → Idle`; a failed training goes
/// straight back to `Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Scheduled,
    Training,
    Swapping,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Scheduled => "scheduled",
            OrchestratorState::Training => "training",
            OrchestratorState::Swapping => "swapping",
        }
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition(&self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self, next),
            (Idle, Scheduled)
                | (Scheduled, Training)
                | (Scheduled, Idle)
                | (Training, Swapping)
                | (Training, Idle)
                | (Swapping, Idle)
                | (Swapping, Training)
        )
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a training cycle was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainTrigger {
    /// Fixed retraining cadence elapsed
    Timer,
    /// History grew enough to train a first or better model
    DataGrowth,
    /// Rolling accuracy breached its thresholds for too long
    Degraded {
        horizon_hours: u32,
        family: ModelFamily,
    },
    /// Operator request
    Manual,
}

impl TrainTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainTrigger::Timer => "timer",
            TrainTrigger::DataGrowth => "data_growth",
            TrainTrigger::Degraded { .. } => "degraded",
            TrainTrigger::Manual => "manual",
        }
    }
}

/// Mutual exclusion per model family around `Scheduled → Training`
#[derive(Debug, Default)]
pub struct FamilyLocks {
    locks: DashMap<ModelFamily, Arc<Mutex<()>>>,
}

impl FamilyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the family lock without waiting; `None` if a training of this
    /// family is already running
    pub fn try_acquire(&self, family: ModelFamily) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(family)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().ok()
    }
}

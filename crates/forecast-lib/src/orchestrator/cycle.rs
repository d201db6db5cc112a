//! Training Orchestrator
//!
//! Turns triggers into training cycles. A cycle trains one artifact per
//! horizon on a blocking thread and swaps it into the serving slot only on
//! success. Triggers that arrive while a cycle runs are dropped.

use super::slot::ArtifactRegistry;
use super::state::{FamilyLocks, OrchestratorState, TrainTrigger};
use super::OrchestratorConfig;
use crate::config::ForecastConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::features::{FeatureBuilder, WindowConfig};
use crate::health::{components, HealthRegistry};
use crate::ingest::ReadingHistory;
use crate::model::{
    check_memory_budget, select_family, sequence, train, BudgetCaps, CancelToken, ModelArtifact, ResourceBudget,
    ResourceProfile, SelectionInput, SelectorConfig, SequenceGate, TrainRequest, TrainingGuard,
    MIN_TRAINING_SAMPLES,
};
use crate::models::{ModelFamily, SensorReading};
use crate::observability::{ForecastMetrics, StructuredLogger, TrainingOutcome};
use crate::store::ArtifactStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pending triggers beyond this are dropped
const TRIGGER_BUFFER: usize = 4;

async fn join_running(task: &mut Option<JoinHandle<()>>) {
    match task {
        Some(handle) => {
            if let Err(e) = handle.await {
                warn!(error = %e, "Training cycle task failed");
            }
        }
        None => std::future::pending().await,
    }
}

/// Result of training one horizon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonOutcome {
    pub horizon_hours: u32,
    /// Family of the last attempt
    pub family: Option<ModelFamily>,
    /// Version installed as current, if training succeeded
    pub version: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub trigger: TrainTrigger,
    pub started_at: DateTime<Utc>,
    pub history_len: usize,
    pub outcomes: Vec<HorizonOutcome>,
}

impl CycleReport {
    pub fn swapped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.version.is_some()).count()
    }
}

/// Operator and feedback controls for a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    trigger_tx: mpsc::Sender<TrainTrigger>,
    cancel: CancelToken,
    gate: Arc<SequenceGate>,
    state_rx: watch::Receiver<OrchestratorState>,
    report_rx: watch::Receiver<Option<Arc<CycleReport>>>,
}

impl OrchestratorHandle {
    /// Request a cycle; false if the request could not be queued
    pub fn trigger(&self, trigger: TrainTrigger) -> bool {
        self.trigger_tx.try_send(trigger).is_ok()
    }

    /// Sender for components that raise triggers themselves
    pub fn trigger_sender(&self) -> mpsc::Sender<TrainTrigger> {
        self.trigger_tx.clone()
    }

    /// Stop the in-flight training at its next tree fit or epoch
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Re-allow the sequence family after a failure
    pub fn reset_sequence_gate(&self) {
        self.gate.reset();
    }

    pub fn sequence_disabled(&self) -> bool {
        self.gate.has_failed()
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state_rx.clone()
    }

    pub fn last_report(&self) -> Option<Arc<CycleReport>> {
        self.report_rx.borrow().clone()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Option<Arc<CycleReport>>> {
        self.report_rx.clone()
    }
}

pub struct TrainingOrchestrator {
    config: OrchestratorConfig,
    window: WindowConfig,
    selector: SelectorConfig,
    caps: BudgetCaps,
    profile: ResourceProfile,
    horizons: Vec<u32>,
    registry: Arc<ArtifactRegistry>,
    history: ReadingHistory,
    artifacts: Option<ArtifactStore>,
    gate: Arc<SequenceGate>,
    locks: FamilyLocks,
    cancel: CancelToken,
    cycle_lock: Mutex<()>,
    sequence_runtime: bool,
    /// History total at the last attempt and the last success
    last_attempt: AtomicUsize,
    last_success: AtomicUsize,
    state_tx: watch::Sender<OrchestratorState>,
    report_tx: watch::Sender<Option<Arc<CycleReport>>>,
    health: Arc<HealthRegistry>,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
}

impl TrainingOrchestrator {
    pub fn new(
        config: &ForecastConfig,
        registry: Arc<ArtifactRegistry>,
        history: ReadingHistory,
        artifacts: Option<ArtifactStore>,
        health: Arc<HealthRegistry>,
    ) -> (Self, OrchestratorHandle, mpsc::Receiver<TrainTrigger>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER);
        let (state_tx, state_rx) = watch::channel(OrchestratorState::Idle);
        let (report_tx, report_rx) = watch::channel(None);
        let gate = Arc::new(SequenceGate::new());
        let cancel = CancelToken::new();

        let orchestrator = Self {
            config: config.orchestrator.clone(),
            window: config.window.clone(),
            selector: config.selector.clone(),
            caps: config.caps.clone(),
            profile: config.profile.clone(),
            horizons: config.horizons(),
            registry,
            history,
            artifacts,
            gate: gate.clone(),
            locks: FamilyLocks::new(),
            cancel: cancel.clone(),
            cycle_lock: Mutex::new(()),
            sequence_runtime: sequence::runtime_available(),
            last_attempt: AtomicUsize::new(0),
            last_success: AtomicUsize::new(0),
            state_tx,
            report_tx,
            health,
            metrics: ForecastMetrics::new(),
            logger: StructuredLogger::new(config.station.clone()),
        };
        let handle = OrchestratorHandle {
            trigger_tx,
            cancel,
            gate,
            state_rx,
            report_rx,
        };
        (orchestrator, handle, trigger_rx)
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state_tx.borrow()
    }

    /// Install artifacts persisted by an earlier run; returns horizons restored
    pub fn restore_artifacts(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.artifacts else {
            return Ok(0);
        };
        let mut loaded = store.load_all()?;
        let mut restored = 0;
        for h in self.registry.horizons() {
            let Some(entry) = loaded.remove(&h) else {
                continue;
            };
            let Some(slot) = self.registry.slot(h) else {
                continue;
            };
            let current = entry.current.map(Arc::new);
            let previous = entry.previous.map(Arc::new);
            for artifact in current.iter().chain(previous.iter()) {
                self.registry.observe_version(artifact.version);
            }
            if let Some(artifact) = &current {
                self.metrics
                    .set_artifact_version(h, artifact.family(), artifact.version);
                info!(
                    horizon_hours = h,
                    version = artifact.version,
                    "Restored artifact from disk"
                );
                restored += 1;
            }
            slot.restore(current, previous);
        }
        Ok(restored)
    }

    /// `Idle → Scheduled`; false if a cycle is already pending or running
    pub fn submit(&self, trigger: TrainTrigger) -> bool {
        let scheduled = self.state_tx.send_if_modified(|state| {
            if *state == OrchestratorState::Idle {
                *state = OrchestratorState::Scheduled;
                true
            } else {
                false
            }
        });
        if scheduled {
            info!(trigger = trigger.as_str(), "Training cycle scheduled");
        } else {
            debug!(
                trigger = trigger.as_str(),
                state = %self.state(),
                "Trigger ignored, training already in progress"
            );
        }
        scheduled
    }

    /// Drive the state machine until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<TrainTrigger>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            retrain_interval_secs = self.config.retrain_interval.as_secs(),
            horizons = ?self.horizons,
            "Starting training orchestrator"
        );
        if self.registry.has_any() {
            self.last_success
                .store(self.history.total().await, Ordering::SeqCst);
        }

        let period = self.config.retrain_interval;
        let mut retrain = interval_at(tokio::time::Instant::now() + period, period);
        retrain.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut growth = interval(self.config.growth_check_interval);
        growth.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut running: Option<JoinHandle<()>> = None;

        loop {
            let trigger = tokio::select! {
                _ = retrain.tick() => TrainTrigger::Timer,
                _ = growth.tick() => match self.growth_trigger().await {
                    Some(t) => t,
                    None => continue,
                },
                Some(t) = triggers.recv() => t,
                _ = join_running(&mut running), if running.is_some() => {
                    running = None;
                    retrain.reset();
                    continue;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down training orchestrator");
                    self.cancel.cancel();
                    if let Some(task) = running.take() {
                        let _ = task.await;
                    }
                    break;
                }
            };

            // Idle with a task still held means the cycle is only winding down
            if self.state() == OrchestratorState::Idle {
                if let Some(task) = running.take() {
                    if let Err(e) = task.await {
                        warn!(error = %e, "Training cycle task failed");
                    }
                    retrain.reset();
                }
            }
            if !self.submit(trigger) {
                continue;
            }
            let this = self.clone();
            running = Some(tokio::spawn(async move {
                this.run_cycle(trigger).await;
            }));
        }
    }

    /// Data-growth trigger, if the history warrants one
    async fn growth_trigger(&self) -> Option<TrainTrigger> {
        let total = self.history.total().await;
        if !self.growth_due(total) {
            return None;
        }
        if !self.registry.is_complete() {
            let len = self.history.len().await;
            let trainable = self
                .missing_horizons()
                .into_iter()
                .any(|h| len >= self.readings_needed(h));
            if !trainable {
                return None;
            }
        }
        Some(TrainTrigger::DataGrowth)
    }

    /// Horizons with no current artifact
    fn missing_horizons(&self) -> Vec<u32> {
        self.horizons
            .iter()
            .copied()
            .filter(|&h| self.registry.slot(h).is_some_and(|slot| slot.current().is_none()))
            .collect()
    }

    /// Readings a horizon needs before it yields enough labelled windows
    fn readings_needed(&self, horizon_hours: u32) -> usize {
        self.window.length + self.window.horizon_steps(horizon_hours).max(1) + MIN_TRAINING_SAMPLES
    }

    fn growth_due(&self, total: usize) -> bool {
        if total < self.min_training_readings() {
            return false;
        }
        if !self.registry.is_complete() {
            let last = self.last_attempt.load(Ordering::SeqCst);
            return last == 0 || total >= last + self.config.growth_step;
        }
        let base = self.last_success.load(Ordering::SeqCst);
        base > 0 && total as f64 >= base as f64 * self.config.growth_ratio
    }

    /// Readings needed before the shortest horizon can train
    fn min_training_readings(&self) -> usize {
        let shortest = self.horizons.first().copied().unwrap_or(1);
        self.config.min_training_readings.max(self.readings_needed(shortest))
    }

    /// Run one cycle.
    ///
    /// `DataGrowth` trains only horizons still missing an artifact while the
    /// registry is incomplete; every other trigger retrains every horizon.
    /// Returns `None` without doing anything if another cycle holds the
    /// orchestrator, and a pending schedule is released back to `Idle`.
    pub async fn run_cycle(&self, trigger: TrainTrigger) -> Option<CycleReport> {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            debug!(trigger = trigger.as_str(), "Cycle already running");
            self.unschedule();
            return None;
        };
        if self.state() == OrchestratorState::Idle {
            self.submit(trigger);
        }
        self.set_state(OrchestratorState::Training);

        let history: Arc<Vec<SensorReading>> = Arc::new(self.history.snapshot().await);
        let total = self.history.total().await;
        self.last_attempt.store(total, Ordering::SeqCst);

        let horizons = if trigger == TrainTrigger::DataGrowth && !self.registry.is_complete() {
            self.missing_horizons()
        } else {
            self.horizons.clone()
        };
        let mut report = CycleReport {
            trigger,
            started_at: Utc::now(),
            history_len: history.len(),
            outcomes: Vec::with_capacity(horizons.len()),
        };
        let budget = ResourceBudget::for_profile(&self.profile, &self.caps);

        for h in horizons {
            let needed = self.readings_needed(h);
            if history.len() < needed {
                let reason = ForecastError::InsufficientHistory {
                    needed,
                    available: history.len(),
                };
                debug!(horizon_hours = h, reason = %reason, "Not enough history to train");
                report.outcomes.push(HorizonOutcome {
                    horizon_hours: h,
                    family: None,
                    version: None,
                    error: Some(reason.to_string()),
                });
                continue;
            }
            let outcome = self.train_horizon(h, trigger, &history, total, &budget).await;
            let cancelled = self.cancel.is_cancelled();
            report.outcomes.push(outcome);
            if cancelled {
                info!("Training cycle cancelled");
                break;
            }
        }

        self.cancel.reset();
        self.set_state(OrchestratorState::Idle);
        if report.swapped() > 0 {
            self.last_success.store(total, Ordering::SeqCst);
        }
        let report = Arc::new(report);
        self.report_tx.send_replace(Some(report.clone()));
        Some((*report).clone())
    }

    async fn train_horizon(
        &self,
        horizon_hours: u32,
        trigger: TrainTrigger,
        history: &Arc<Vec<SensorReading>>,
        total: usize,
        budget: &ResourceBudget,
    ) -> HorizonOutcome {
        let mut outcome = HorizonOutcome {
            horizon_hours,
            family: None,
            version: None,
            error: None,
        };

        loop {
            let family = select_family(
                &SelectionInput {
                    sample_count: total,
                    profile: &self.profile,
                    sequence_runtime_available: self.sequence_runtime,
                    sequence_failed: self.gate.has_failed(),
                },
                &self.selector,
            );
            outcome.family = Some(family);

            let Some(_family_lock) = self.locks.try_acquire(family) else {
                outcome.error = Some(format!("{} training already in progress", family));
                return outcome;
            };
            self.set_state(OrchestratorState::Training);

            let start = Instant::now();
            let result = self
                .fit_blocking(family, horizon_hours, trigger, history.clone(), budget.clone())
                .await;
            let elapsed = start.elapsed().as_secs_f64();

            match result {
                Ok(artifact) => {
                    self.metrics.observe_training(elapsed, TrainingOutcome::Success);
                    self.logger.log_training_completed(
                        horizon_hours,
                        family,
                        artifact.version,
                        artifact.validation.mean_mae(),
                        elapsed,
                    );
                    outcome.version = Some(artifact.version);
                    self.swap(horizon_hours, artifact);
                    self.health.set_healthy(components::TRAINER).await;
                    return outcome;
                }
                Err(e) if e.is_insufficient_history() => {
                    debug!(horizon_hours, reason = %e, "Not enough history to train");
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
                Err(ForecastError::Cancelled) => {
                    self.metrics.observe_training(elapsed, TrainingOutcome::Cancelled);
                    self.logger
                        .log_training_failed(horizon_hours, family, "cancelled");
                    outcome.error = Some(ForecastError::Cancelled.to_string());
                    return outcome;
                }
                Err(e) => {
                    self.metrics.observe_training(elapsed, TrainingOutcome::Failure);
                    self.logger
                        .log_training_failed(horizon_hours, family, &e.to_string());
                    self.health
                        .set_degraded(components::TRAINER, e.to_string())
                        .await;
                    outcome.error = Some(e.to_string());
                    if family == ModelFamily::Sequence {
                        // Sticky until reset; the next iteration selects the ensemble
                        self.gate.record_failure();
                        continue;
                    }
                    return outcome;
                }
            }
        }
    }

    async fn fit_blocking(
        &self,
        family: ModelFamily,
        horizon_hours: u32,
        trigger: TrainTrigger,
        history: Arc<Vec<SensorReading>>,
        budget: ResourceBudget,
    ) -> ForecastResult<ModelArtifact> {
        let builder = FeatureBuilder::new(self.window.clone());
        let steps = self.window.horizon_steps(horizon_hours);
        let version = self.registry.next_version();
        let seed = self.config.seed.wrapping_add(version);
        let fraction = self.config.validation_fraction;
        let guard = TrainingGuard::new(self.cancel.clone(), budget.time_ceiling);
        let logger = self.logger.clone();

        // Checked before any window is materialized
        let windows = history
            .len()
            .saturating_sub(self.window.length + steps.max(1) - 1)
            .min(budget.max_samples);
        if windows > 0 {
            check_memory_budget(family, windows, self.window.length, &budget)?;
        }

        tokio::task::spawn_blocking(move || {
            let set = builder.training_set(&history, steps, Some(budget.max_samples))?;
            logger.log_training_started(horizon_hours, family, set.len(), trigger.as_str());
            let req = TrainRequest {
                family,
                set: &set,
                horizon_hours,
                version,
                budget: &budget,
                validation_fraction: fraction,
                seed,
            };
            train(&req, &guard)
        })
        .await
        .map_err(|e| ForecastError::TrainingFailed(format!("training task aborted: {}", e)))?
    }

    /// `Training → Swapping → Training`: persist, then promote the artifact
    fn swap(&self, horizon_hours: u32, artifact: ModelArtifact) {
        let Some(slot) = self.registry.slot(horizon_hours) else {
            return;
        };
        self.set_state(OrchestratorState::Swapping);
        if let Some(store) = &self.artifacts {
            if let Err(e) = store.save(&artifact) {
                warn!(horizon_hours, error = %e, "Failed to persist artifact");
            }
        }
        let family = artifact.family();
        let version = artifact.version;
        let old = slot.install(Arc::new(artifact));
        self.metrics.set_artifact_version(horizon_hours, family, version);
        self.logger
            .log_artifact_swapped(horizon_hours, old, version, family);
    }

    /// `Scheduled → Idle` for a cycle that never started
    fn unschedule(&self) {
        let released = self.state_tx.send_if_modified(|state| {
            if *state == OrchestratorState::Scheduled {
                *state = OrchestratorState::Idle;
                true
            } else {
                false
            }
        });
        if released {
            debug!("Released pending training schedule");
        }
    }

    fn set_state(&self, next: OrchestratorState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next && !prev.can_transition(next) {
            warn!(from = %prev, to = %next, "Unexpected orchestrator transition");
        }
    }

    #[cfg(test)]
    pub(crate) fn force_sequence_runtime(&mut self) {
        self.sequence_runtime = true;
    }
}

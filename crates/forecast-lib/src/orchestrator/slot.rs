//! Serving artifact slots
//!
//! One slot per horizon holds an immutable (current, previous) pair behind
//! an `ArcSwap`. Readers take a snapshot and keep using it even if a swap
//! happens meanwhile; the orchestrator is the only writer.

use crate::model::ModelArtifact;
use crate::models::ModelFamily;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable view of a slot at one instant
#[derive(Debug, Default)]
pub struct ArtifactPair {
    pub current: Option<Arc<ModelArtifact>>,
    pub previous: Option<Arc<ModelArtifact>>,
}

#[derive(Debug, Default)]
pub struct ArtifactSlot {
    pair: ArcSwap<ArtifactPair>,
}

impl ArtifactSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ArtifactPair> {
        self.pair.load_full()
    }

    pub fn current(&self) -> Option<Arc<ModelArtifact>> {
        self.pair.load().current.clone()
    }

    /// Promote `artifact` to current, demoting the old current.
    ///
    /// Returns the version that was replaced.
    pub(crate) fn install(&self, artifact: Arc<ModelArtifact>) -> Option<u64> {
        let old = self.pair.load_full();
        let replaced = old.current.as_ref().map(|a| a.version);
        self.pair.store(Arc::new(ArtifactPair {
            current: Some(artifact),
            previous: old.current.clone(),
        }));
        replaced
    }

    pub(crate) fn restore(&self, current: Option<Arc<ModelArtifact>>, previous: Option<Arc<ModelArtifact>>) {
        self.pair.store(Arc::new(ArtifactPair { current, previous }));
    }
}

/// Versions and families serving one horizon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonArtifacts {
    pub horizon_hours: u32,
    pub current_version: Option<u64>,
    pub current_family: Option<ModelFamily>,
    pub previous_version: Option<u64>,
    pub previous_family: Option<ModelFamily>,
}

/// Artifact slots for every configured horizon
#[derive(Debug)]
pub struct ArtifactRegistry {
    slots: BTreeMap<u32, ArtifactSlot>,
    next_version: AtomicU64,
}

impl ArtifactRegistry {
    pub fn new(horizons: &[u32]) -> Self {
        Self {
            slots: horizons.iter().map(|&h| (h, ArtifactSlot::new())).collect(),
            next_version: AtomicU64::new(1),
        }
    }

    pub fn slot(&self, horizon_hours: u32) -> Option<&ArtifactSlot> {
        self.slots.get(&horizon_hours)
    }

    /// Configured horizons, ascending
    pub fn horizons(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    /// Whether every horizon has a current artifact
    pub fn is_complete(&self) -> bool {
        self.slots.values().all(|s| s.current().is_some())
    }

    pub fn has_any(&self) -> bool {
        self.slots.values().any(|s| s.current().is_some())
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Keep future versions above one recovered from disk
    pub(crate) fn observe_version(&self, version: u64) {
        self.next_version.fetch_max(version + 1, Ordering::SeqCst);
    }

    pub fn summary(&self) -> Vec<HorizonArtifacts> {
        self.slots
            .iter()
            .map(|(&h, slot)| {
                let pair = slot.snapshot();
                HorizonArtifacts {
                    horizon_hours: h,
                    current_version: pair.current.as_ref().map(|a| a.version),
                    current_family: pair.current.as_ref().map(|a| a.family()),
                    previous_version: pair.previous.as_ref().map(|a| a.version),
                    previous_family: pair.previous.as_ref().map(|a| a.family()),
                }
            })
            .collect()
    }
}

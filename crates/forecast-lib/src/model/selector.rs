//! Model family selection
//!
//! [`select_family`] is a pure function of its inputs. The sticky
//! sequence-failure flag it consults is kept by [`SequenceGate`], which
//! only the orchestrator writes.

use super::ResourceProfile;
use crate::models::ModelFamily;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sample count at which the sequence model becomes eligible
pub const DEFAULT_LARGE_DATA_THRESHOLD: usize = 50_000;

/// Minimum host memory for a sequence fit
pub const DEFAULT_SEQUENCE_MIN_MEMORY_MB: u64 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    pub large_data_threshold: usize,
    pub sequence_min_memory_mb: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            large_data_threshold: DEFAULT_LARGE_DATA_THRESHOLD,
            sequence_min_memory_mb: DEFAULT_SEQUENCE_MIN_MEMORY_MB,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    /// Total validated readings
    pub sample_count: usize,
    pub profile: &'a ResourceProfile,
    pub sequence_runtime_available: bool,
    /// A previous sequence attempt failed and the gate was not reset
    pub sequence_failed: bool,
}

pub fn select_family(input: &SelectionInput<'_>, config: &SelectorConfig) -> ModelFamily {
    let eligible = input.sample_count >= config.large_data_threshold
        && input.sequence_runtime_available
        && !input.sequence_failed
        && input.profile.max_memory_mb >= config.sequence_min_memory_mb;

    if eligible {
        ModelFamily::Sequence
    } else {
        ModelFamily::Ensemble
    }
}

/// Sticky record of a failed sequence attempt
#[derive(Debug, Default)]
pub struct SequenceGate {
    failed: AtomicBool,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Re-enable the sequence path; operator action only
    pub fn reset(&self) {
        self.failed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles() -> Vec<ResourceProfile> {
        vec![
            ResourceProfile {
                max_memory_mb: 512,
                max_cores: 1,
                gpu_available: false,
            },
            ResourceProfile {
                max_memory_mb: 4096,
                max_cores: 4,
                gpu_available: false,
            },
            ResourceProfile {
                max_memory_mb: 65_536,
                max_cores: 64,
                gpu_available: true,
            },
        ]
    }

    #[test]
    fn test_small_data_always_ensemble() {
        let config = SelectorConfig::default();
        for profile in profiles() {
            for n in [0, 100, 49_999] {
                for runtime in [true, false] {
                    let input = SelectionInput {
                        sample_count: n,
                        profile: &profile,
                        sequence_runtime_available: runtime,
                        sequence_failed: false,
                    };
                    assert_eq!(select_family(&input, &config), ModelFamily::Ensemble);
                }
            }
        }
    }

    #[test]
    fn test_large_data_selects_sequence() {
        let config = SelectorConfig::default();
        let all = profiles();
        let profile = &all[1];
        let input = SelectionInput {
            sample_count: 50_000,
            profile,
            sequence_runtime_available: true,
            sequence_failed: false,
        };
        assert_eq!(select_family(&input, &config), ModelFamily::Sequence);

        let no_runtime = SelectionInput {
            sequence_runtime_available: false,
            ..input
        };
        assert_eq!(select_family(&no_runtime, &config), ModelFamily::Ensemble);

        let small_host = SelectionInput {
            profile: &all[0],
            ..input
        };
        assert_eq!(select_family(&small_host, &config), ModelFamily::Ensemble);
    }

    #[test]
    fn test_failure_is_sticky_until_reset() {
        let config = SelectorConfig::default();
        let all = profiles();
        let profile = &all[2];
        let gate = SequenceGate::new();
        gate.record_failure();

        for _ in 0..3 {
            let input = SelectionInput {
                sample_count: 1_000_000,
                profile,
                sequence_runtime_available: true,
                sequence_failed: gate.has_failed(),
            };
            assert_eq!(select_family(&input, &config), ModelFamily::Ensemble);
        }

        gate.reset();
        let input = SelectionInput {
            sample_count: 1_000_000,
            profile,
            sequence_runtime_available: true,
            sequence_failed: gate.has_failed(),
        };
        assert_eq!(select_family(&input, &config), ModelFamily::Sequence);
    }
}

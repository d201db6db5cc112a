//! Fixed-window forecast error statistics

use crate::models::{TargetValues, NUM_TARGETS};
use std::collections::VecDeque;

/// Default number of reconciled predictions kept per (horizon, family)
pub const DEFAULT_ACCURACY_WINDOW: usize = 100;

/// Errors of the last `capacity` reconciled predictions.
///
/// MAE and RMSE are recomputed from the retained samples, so an evicted
/// sample leaves no residue in the statistics.
#[derive(Debug, Clone)]
pub struct RollingErrors {
    capacity: usize,
    /// Signed error (actual - predicted) per target
    samples: VecDeque<[f64; NUM_TARGETS]>,
    /// Samples ever added
    count: u64,
}

impl RollingErrors {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            count: 0,
        }
    }

    pub fn push(&mut self, predicted: &TargetValues, actual: &TargetValues) {
        let p = predicted.to_array();
        let a = actual.to_array();
        let err: [f64; NUM_TARGETS] = std::array::from_fn(|i| a[i] - p[i]);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(err);
        self.count += 1;
    }

    /// Samples currently in the window
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mae(&self) -> TargetValues {
        self.mean_of(|e| e.abs())
    }

    pub fn rmse(&self) -> TargetValues {
        let mse = self.mean_of(|e| e * e).to_array();
        TargetValues::from_array(mse.map(f64::sqrt))
    }

    fn mean_of(&self, f: impl Fn(f64) -> f64) -> TargetValues {
        if self.samples.is_empty() {
            return TargetValues::default();
        }
        let mut sums = [0.0; NUM_TARGETS];
        for sample in &self.samples {
            for (sum, e) in sums.iter_mut().zip(sample) {
                *sum += f(*e);
            }
        }
        let n = self.samples.len() as f64;
        TargetValues::from_array(sums.map(|s| s / n))
    }
}

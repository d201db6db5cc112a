//! Closed-loop accuracy tracking
//!
//! Rolling accuracy is a fixed window of the most recent reconciled
//! predictions per (horizon, family). A sustained run of updates whose MAE
//! exceeds the configured thresholds forces an out-of-cadence retrain.

mod rolling;
mod tracker;

pub use rolling::{RollingErrors, DEFAULT_ACCURACY_WINDOW};
pub use tracker::{AccuracyConfig, AccuracyTracker, DEFAULT_SUSTAINED_BREACHES, DEFAULT_TOLERANCE};

//! Prediction Engine
//!
//! Runs inference for each configured horizon against the serving artifact
//! snapshot, falling back to the previous artifact once before giving up on
//! that horizon.

mod engine;
mod scheduler;

pub use engine::{PredictionBatch, PredictionEngine};
pub use scheduler::{
    PredictionConfig, PredictionScheduler, DEFAULT_HORIZONS, DEFAULT_PREDICTION_INTERVAL,
    DEFAULT_RETENTION,
};

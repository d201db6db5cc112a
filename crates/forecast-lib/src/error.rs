//! Error kinds surfaced by the forecasting core
//!
//! None of these is fatal: callers either wait for more data, keep the
//! last good artifact, or skip the current cycle.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type ForecastResult<T> = Result<T, ForecastError>;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Not enough validated readings yet
    #[error("insufficient history: need {needed} readings, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    /// Training aborted; the serving artifact is left untouched
    #[error("training failed: {0}")]
    TrainingFailed(String),

    /// Both current and previous artifacts failed for one horizon
    #[error("prediction unavailable for {horizon_hours}h horizon: {reason}")]
    PredictionUnavailable { horizon_hours: u32, reason: String },

    #[error("reading at {timestamp} is not after last accepted reading at {last}")]
    NonMonotonicTimestamp {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ForecastError {
    /// Whether the caller should simply wait for more data
    pub fn is_insufficient_history(&self) -> bool {
        matches!(self, ForecastError::InsufficientHistory { .. })
    }
}

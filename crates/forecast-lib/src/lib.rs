//! Forecasting core for air-quality sensor stations
//!
//! This crate provides the core functionality for:
//! - Reading validation and repair
//! - Window feature engineering
//! - Model family selection, training and hot-swapping
//! - Multi-horizon prediction with fallback
//! - Closed-loop accuracy tracking and retraining triggers
//! - Health checks and observability

pub mod accuracy;
pub mod config;
pub mod error;
pub mod features;
pub mod health;
pub mod ingest;
pub mod model;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod predictor;
pub mod service;
pub mod store;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ForecastConfig;
pub use error::{ForecastError, ForecastResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ForecastMetrics, StructuredLogger, TrainingOutcome};
pub use service::{ForecastRuntime, ForecastService, RuntimeHandles};

//! Aggregate runtime configuration

use crate::accuracy::AccuracyConfig;
use crate::error::{ForecastError, ForecastResult};
use crate::features::WindowConfig;
use crate::ingest::IngestConfig;
use crate::model::{BudgetCaps, ResourceProfile, SelectorConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::predictor::PredictionConfig;
use crate::validator::ValidatorConfig;

/// Every per-module configuration of the forecasting core
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// Station identifier attached to log events
    pub station: String,
    pub validator: ValidatorConfig,
    pub window: WindowConfig,
    pub selector: SelectorConfig,
    pub caps: BudgetCaps,
    pub profile: ResourceProfile,
    pub ingest: IngestConfig,
    pub prediction: PredictionConfig,
    pub accuracy: AccuracyConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            station: "default".to_string(),
            validator: ValidatorConfig::default(),
            window: WindowConfig::default(),
            selector: SelectorConfig::default(),
            caps: BudgetCaps::default(),
            profile: ResourceProfile::detect(),
            ingest: IngestConfig::default(),
            prediction: PredictionConfig::default(),
            accuracy: AccuracyConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> ForecastResult<()> {
        self.validator.validate()?;
        self.window.validate()?;

        if self.prediction.horizons.is_empty() {
            return Err(invalid("at least one horizon must be configured"));
        }
        let interval = self.window.reading_interval.as_secs();
        for &h in &self.prediction.horizons {
            if h == 0 {
                return Err(invalid("horizons must be at least one hour"));
            }
            if (h as u64 * 3600) % interval != 0 {
                return Err(invalid(format!(
                    "{}h horizon is not a whole number of {}s reading intervals",
                    h, interval
                )));
            }
        }
        let mut sorted = self.prediction.horizons.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.prediction.horizons.len() {
            return Err(invalid("horizons must be distinct"));
        }

        let fraction = self.orchestrator.validation_fraction;
        if !(fraction > 0.0 && fraction <= 0.5) {
            return Err(invalid(format!(
                "validation fraction {} must lie in (0, 0.5]",
                fraction
            )));
        }
        if self.accuracy.window == 0 {
            return Err(invalid("accuracy window must hold at least one record"));
        }
        if self.accuracy.sustained_breaches == 0 {
            return Err(invalid("sustained breach count must be positive"));
        }
        if self.orchestrator.retrain_interval.is_zero() || self.prediction.prediction_interval.is_zero() {
            return Err(invalid("loop intervals must be non-zero"));
        }
        if self.caps.time_ceiling.is_zero() {
            return Err(invalid("training time ceiling must be non-zero"));
        }
        Ok(())
    }

    /// Horizons in ascending order
    pub fn horizons(&self) -> Vec<u32> {
        let mut horizons = self.prediction.horizons.clone();
        horizons.sort_unstable();
        horizons
    }
}

fn invalid(msg: impl Into<String>) -> ForecastError {
    ForecastError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = ForecastConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.length, 60);
        assert_eq!(config.horizons(), vec![1, 3, 6]);
    }

    #[test]
    fn test_horizon_must_align_with_interval() {
        let mut config = ForecastConfig::default();
        config.window.reading_interval = Duration::from_secs(7);
        assert!(matches!(
            config.validate(),
            Err(ForecastError::InvalidConfig(_))
        ));

        config.window.reading_interval = Duration::from_secs(900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        let mut config = ForecastConfig::default();
        config.prediction.horizons.clear();
        assert!(config.validate().is_err());

        let mut config = ForecastConfig::default();
        config.prediction.horizons = vec![1, 1];
        assert!(config.validate().is_err());

        let mut config = ForecastConfig::default();
        config.orchestrator.validation_fraction = 0.6;
        assert!(config.validate().is_err());

        let mut config = ForecastConfig::default();
        config.window.length = 20;
        assert!(config.validate().is_err());

        let mut config = ForecastConfig::default();
        config.window.reading_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}

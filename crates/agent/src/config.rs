//! Agent configuration

use anyhow::{Context, Result};
use forecast_lib::{
    accuracy::AccuracyConfig,
    features::WindowConfig,
    ingest::IngestConfig,
    model::{BudgetCaps, ResourceProfile, SelectorConfig},
    orchestrator::OrchestratorConfig,
    predictor::PredictionConfig,
    validator::ValidatorConfig,
    ForecastConfig, TargetValues,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Optional configuration file read from the working directory
pub const CONFIG_FILE: &str = "airq.toml";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Station identifier attached to log events
    #[serde(default = "default_station")]
    pub station: String,

    /// API server port for health/metrics/queries
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// SQLite database holding readings, predictions and accuracy
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory for persisted ensemble artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Validity range per field
    #[serde(default)]
    pub ranges: ValidatorConfig,

    /// Readings per window (W)
    #[serde(default = "default_window_length")]
    pub window_length: usize,

    #[serde(default = "default_reading_interval")]
    pub reading_interval_secs: u64,

    /// Forecast horizons in hours
    #[serde(default = "default_horizons")]
    pub horizons: Vec<u32>,

    /// Readings above which the sequence model becomes eligible
    #[serde(default = "default_large_data_threshold")]
    pub large_data_threshold: usize,

    #[serde(default = "default_max_trees")]
    pub max_trees: usize,

    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Cores a training run may use; detected when unset
    #[serde(default)]
    pub max_cores: Option<usize>,

    #[serde(default = "default_retrain_interval")]
    pub retrain_interval_secs: u64,

    #[serde(default = "default_prediction_interval")]
    pub prediction_interval_secs: u64,

    /// Rolling MAE per target field above which a record counts as a breach
    #[serde(default = "default_mae_thresholds")]
    pub mae_thresholds: TargetValues,

    #[serde(default = "default_sustained_breaches")]
    pub sustained_breaches: u32,

    #[serde(default = "default_retention")]
    pub prediction_retention_secs: u64,
}

fn default_station() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "default".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/airq/airq.db")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(forecast_lib::store::DEFAULT_ARTIFACT_DIR)
}

fn default_window_length() -> usize {
    WindowConfig::default().length
}

fn default_reading_interval() -> u64 {
    WindowConfig::default().reading_interval.as_secs()
}

fn default_horizons() -> Vec<u32> {
    PredictionConfig::default().horizons
}

fn default_large_data_threshold() -> usize {
    SelectorConfig::default().large_data_threshold
}

fn default_max_trees() -> usize {
    BudgetCaps::default().max_trees
}

fn default_max_epochs() -> usize {
    BudgetCaps::default().max_epochs
}

fn default_max_batch_size() -> usize {
    BudgetCaps::default().max_batch_size
}

fn default_retrain_interval() -> u64 {
    OrchestratorConfig::default().retrain_interval.as_secs()
}

fn default_prediction_interval() -> u64 {
    PredictionConfig::default().prediction_interval.as_secs()
}

fn default_mae_thresholds() -> TargetValues {
    AccuracyConfig::default().mae_thresholds
}

fn default_sustained_breaches() -> u32 {
    AccuracyConfig::default().sustained_breaches
}

fn default_retention() -> u64 {
    PredictionConfig::default().retention.as_secs()
}

impl AgentConfig {
    /// Load configuration from `airq.toml` and `AIRQ__*` environment variables
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(file: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix("AIRQ")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("horizons")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Library configuration for these settings
    pub fn forecast_config(&self) -> ForecastConfig {
        let selector = SelectorConfig {
            large_data_threshold: self.large_data_threshold,
            ..Default::default()
        };
        let caps = BudgetCaps {
            max_trees: self.max_trees,
            max_epochs: self.max_epochs,
            max_batch_size: self.max_batch_size,
            max_cores: self.max_cores,
            ..Default::default()
        };
        ForecastConfig {
            station: self.station.clone(),
            validator: self.ranges,
            window: WindowConfig {
                length: self.window_length,
                reading_interval: Duration::from_secs(self.reading_interval_secs),
            },
            selector,
            caps,
            profile: ResourceProfile::detect(),
            ingest: IngestConfig::default(),
            prediction: PredictionConfig {
                horizons: self.horizons.clone(),
                prediction_interval: Duration::from_secs(self.prediction_interval_secs),
                retention: Duration::from_secs(self.prediction_retention_secs),
            },
            accuracy: AccuracyConfig {
                mae_thresholds: self.mae_thresholds,
                sustained_breaches: self.sustained_breaches,
                ..Default::default()
            },
            orchestrator: OrchestratorConfig {
                retrain_interval: Duration::from_secs(self.retrain_interval_secs),
                artifact_dir: Some(self.artifact_dir.clone()),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = AgentConfig::load_from(Path::new("/nonexistent/airq.toml")).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.window_length, 60);
        assert_eq!(config.horizons, vec![1, 3, 6]);
        assert_eq!(config.sustained_breaches, 30);

        let forecast = config.forecast_config();
        assert!(forecast.validate().is_ok());
        assert_eq!(forecast.prediction.retention, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airq.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "api_port = 9000\nwindow_length = 30\nhorizons = [2, 4]\n\n[ranges.pm2_5]\nmin = 0.0\nmax = 300.0"
        )
        .unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.horizons, vec![2, 4]);
        assert_eq!(config.ranges.pm2_5.max, 300.0);
        assert_eq!(config.ranges.pm10.max, 1000.0);
        assert_eq!(config.forecast_config().window.length, 30);
    }
}

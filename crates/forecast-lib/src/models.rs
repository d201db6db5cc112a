//! Core data models for the forecasting core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of forecast target fields (gas level is an input only)
pub const NUM_TARGETS: usize = 4;

/// A measured quantity of a sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Pm2_5,
    Pm10,
    Temperature,
    Humidity,
    GasLevel,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Pm2_5,
        Field::Pm10,
        Field::Temperature,
        Field::Humidity,
        Field::GasLevel,
    ];

    /// Fields that are forecast, in `TargetValues` order
    pub const TARGETS: [Field; NUM_TARGETS] =
        [Field::Pm2_5, Field::Pm10, Field::Temperature, Field::Humidity];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Pm2_5 => "pm2_5",
            Field::Pm10 => "pm10",
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::GasLevel => "gas_level",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub pm2_5: f64,
    pub pm10: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub gas_level: f64,
}

impl SensorReading {
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Pm2_5 => self.pm2_5,
            Field::Pm10 => self.pm10,
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::GasLevel => self.gas_level,
        }
    }

    pub fn set(&mut self, field: Field, value: f64) {
        match field {
            Field::Pm2_5 => self.pm2_5 = value,
            Field::Pm10 => self.pm10 = value,
            Field::Temperature => self.temperature = value,
            Field::Humidity => self.humidity = value,
            Field::GasLevel => self.gas_level = value,
        }
    }

    /// Forecast targets observed by this reading
    pub fn targets(&self) -> TargetValues {
        TargetValues {
            pm2_5: self.pm2_5,
            pm10: self.pm10,
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

/// Reading as delivered by the acquisition layer; any field may be missing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pm2_5: Option<f64>,
    #[serde(default)]
    pub pm10: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub gas_level: Option<f64>,
}

impl RawReading {
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Pm2_5 => self.pm2_5,
            Field::Pm10 => self.pm10,
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::GasLevel => self.gas_level,
        }
    }
}

impl From<SensorReading> for RawReading {
    fn from(r: SensorReading) -> Self {
        Self {
            timestamp: r.timestamp,
            pm2_5: Some(r.pm2_5),
            pm10: Some(r.pm10),
            temperature: Some(r.temperature),
            humidity: Some(r.humidity),
            gas_level: Some(r.gas_level),
        }
    }
}

/// Why a field value was replaced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagKind {
    OutOfRange { value: f64 },
    NonFinite,
    Missing,
}

/// Record of a field repaired by the validator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub field: Field,
    pub kind: FlagKind,
    pub replacement: f64,
}

/// One value per forecast target field
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetValues {
    pub pm2_5: f64,
    pub pm10: f64,
    pub temperature: f64,
    pub humidity: f64,
}

impl TargetValues {
    pub fn from_array(values: [f64; NUM_TARGETS]) -> Self {
        Self {
            pm2_5: values[0],
            pm10: values[1],
            temperature: values[2],
            humidity: values[3],
        }
    }

    pub fn to_array(&self) -> [f64; NUM_TARGETS] {
        [self.pm2_5, self.pm10, self.temperature, self.humidity]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Pairs each target field with its value
    pub fn iter(&self) -> impl Iterator<Item = (Field, f64)> {
        Field::TARGETS.into_iter().zip(self.to_array())
    }
}

/// Model family tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Ensemble,
    Sequence,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Ensemble => "ensemble",
            ModelFamily::Sequence => "sequence",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ensemble" => Ok(ModelFamily::Ensemble),
            "sequence" => Ok(ModelFamily::Sequence),
            other => Err(format!("unknown model family '{}'", other)),
        }
    }
}

/// Forecast for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub issue_timestamp: DateTime<Utc>,
    pub target_timestamp: DateTime<Utc>,
    pub horizon_hours: u32,
    pub model_family: ModelFamily,
    pub predicted: TargetValues,
    /// Filled once the reading at `target_timestamp` arrives
    pub actual: Option<TargetValues>,
}

impl Prediction {
    pub fn is_reconciled(&self) -> bool {
        self.actual.is_some()
    }
}

/// Rolling forecast error for one (horizon, family) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub horizon_hours: u32,
    pub model_family: ModelFamily,
    pub mae: TargetValues,
    pub rmse: TargetValues,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

//! Reading validation
//!
//! Screens each incoming reading against static admissible ranges. Bad or
//! missing fields are replaced by the last accepted value of that field and
//! the repair is reported as a [`QualityFlag`].

use crate::error::{ForecastError, ForecastResult};
use crate::models::{Field, FlagKind, QualityFlag, RawReading, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed admissible interval for one field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Admissible range per field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub pm2_5: ValidRange,
    pub pm10: ValidRange,
    pub temperature: ValidRange,
    pub humidity: ValidRange,
    pub gas_level: ValidRange,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            pm2_5: ValidRange::new(0.0, 500.0),
            pm10: ValidRange::new(0.0, 1000.0),
            temperature: ValidRange::new(-40.0, 80.0),
            humidity: ValidRange::new(0.0, 100.0),
            gas_level: ValidRange::new(0.0, 10_000.0),
        }
    }
}

impl ValidatorConfig {
    pub fn range(&self, field: Field) -> ValidRange {
        match field {
            Field::Pm2_5 => self.pm2_5,
            Field::Pm10 => self.pm10,
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::GasLevel => self.gas_level,
        }
    }

    pub fn validate(&self) -> ForecastResult<()> {
        for field in Field::ALL {
            let r = self.range(field);
            if !(r.min.is_finite() && r.max.is_finite() && r.min <= r.max) {
                return Err(ForecastError::InvalidConfig(format!(
                    "invalid range for {}: [{}, {}]",
                    field, r.min, r.max
                )));
            }
        }
        Ok(())
    }
}

/// Output of a successful validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReading {
    pub reading: SensorReading,
    pub flags: Vec<QualityFlag>,
}

impl ValidatedReading {
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Stateful validator holding the last accepted value of every field
#[derive(Debug, Clone)]
pub struct ReadingValidator {
    config: ValidatorConfig,
    last_good: [Option<f64>; 5],
    last_timestamp: Option<DateTime<Utc>>,
}

impl ReadingValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            last_good: [None; 5],
            last_timestamp: None,
        }
    }

    /// Seed last-known-good values from already stored history
    pub fn with_history(config: ValidatorConfig, last: Option<&SensorReading>) -> Self {
        let mut validator = Self::new(config);
        if let Some(reading) = last {
            validator.commit(reading);
        }
        validator
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Clean a reading, repairing bad fields from history.
    ///
    /// Fails with `InsufficientHistory` when a field needs repair but no
    /// value for it has ever been accepted. A rejected reading leaves the
    /// validator state untouched.
    pub fn validate(&mut self, raw: &RawReading) -> ForecastResult<ValidatedReading> {
        if let Some(last) = self.last_timestamp {
            if raw.timestamp <= last {
                return Err(ForecastError::NonMonotonicTimestamp {
                    timestamp: raw.timestamp,
                    last,
                });
            }
        }

        let mut reading = SensorReading {
            timestamp: raw.timestamp,
            pm2_5: 0.0,
            pm10: 0.0,
            temperature: 0.0,
            humidity: 0.0,
            gas_level: 0.0,
        };
        let mut flags = Vec::new();

        for field in Field::ALL {
            let range = self.config.range(field);
            match raw.get(field) {
                Some(value) if range.contains(value) => reading.set(field, value),
                observed => {
                    let replacement = self.last_good[field.index()].ok_or(
                        ForecastError::InsufficientHistory {
                            needed: 1,
                            available: 0,
                        },
                    )?;
                    let kind = match observed {
                        None => FlagKind::Missing,
                        Some(v) if !v.is_finite() => FlagKind::NonFinite,
                        Some(v) => FlagKind::OutOfRange { value: v },
                    };
                    reading.set(field, replacement);
                    flags.push(QualityFlag {
                        field,
                        kind,
                        replacement,
                    });
                }
            }
        }

        self.commit(&reading);
        Ok(ValidatedReading { reading, flags })
    }

    fn commit(&mut self, reading: &SensorReading) {
        for field in Field::ALL {
            self.last_good[field.index()] = Some(reading.get(field));
        }
        self.last_timestamp = Some(reading.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn raw(ts: DateTime<Utc>, pm2_5: f64) -> RawReading {
        RawReading {
            timestamp: ts,
            pm2_5: Some(pm2_5),
            pm10: Some(40.0),
            temperature: Some(21.0),
            humidity: Some(55.0),
            gas_level: Some(180.0),
        }
    }

    #[test]
    fn test_valid_reading_unchanged() {
        let mut v = ReadingValidator::new(ValidatorConfig::default());
        let input = raw(Utc::now(), 12.0);
        let out = v.validate(&input).unwrap();
        assert!(out.is_clean());
        assert_eq!(RawReading::from(out.reading), input);
    }

    #[test]
    fn test_out_of_range_replaced_with_last_good() {
        let mut v = ReadingValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        v.validate(&raw(t0, 18.0)).unwrap();

        let out = v.validate(&raw(t0 + Duration::seconds(5), 9999.0)).unwrap();
        assert_eq!(out.reading.pm2_5, 18.0);
        assert_eq!(out.flags.len(), 1);
        assert_eq!(out.flags[0].field, Field::Pm2_5);
        assert_eq!(out.flags[0].kind, FlagKind::OutOfRange { value: 9999.0 });
        assert_eq!(out.flags[0].replacement, 18.0);
    }

    #[test]
    fn test_replacement_never_zero_after_consecutive_bad() {
        let mut v = ReadingValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        v.validate(&raw(t0, 18.0)).unwrap();
        for i in 1..5 {
            let out = v
                .validate(&raw(t0 + Duration::seconds(5 * i), -3.0))
                .unwrap();
            assert_eq!(out.reading.pm2_5, 18.0);
        }
    }

    #[test]
    fn test_missing_and_non_finite_flagged() {
        let mut v = ReadingValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        v.validate(&raw(t0, 10.0)).unwrap();

        let mut input = raw(t0 + Duration::seconds(5), f64::NAN);
        input.humidity = None;
        let out = v.validate(&input).unwrap();
        assert_eq!(out.flags.len(), 2);
        assert!(out
            .flags
            .iter()
            .any(|f| f.field == Field::Pm2_5 && f.kind == FlagKind::NonFinite));
        assert!(out
            .flags
            .iter()
            .any(|f| f.field == Field::Humidity && f.kind == FlagKind::Missing));
        assert_eq!(out.reading.humidity, 55.0);
    }

    #[test]
    fn test_rejected_without_prior_value() {
        let mut v = ReadingValidator::new(ValidatorConfig::default());
        let err = v.validate(&raw(Utc::now(), 9999.0)).unwrap_err();
        assert!(err.is_insufficient_history());

        // State untouched: a later good reading is accepted cleanly
        let out = v.validate(&raw(Utc::now(), 15.0)).unwrap();
        assert!(out.is_clean());
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let mut v = ReadingValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        v.validate(&raw(t0, 10.0)).unwrap();
        let err = v.validate(&raw(t0, 11.0)).unwrap_err();
        assert!(matches!(err, ForecastError::NonMonotonicTimestamp { .. }));
    }

    #[test]
    fn test_output_always_within_ranges() {
        let config = ValidatorConfig::default();
        let mut v = ReadingValidator::new(config);
        let t0 = Utc::now();
        v.validate(&raw(t0, 10.0)).unwrap();
        let wild = [-1e9, -41.0, 0.0, 250.0, 501.0, 1e12, f64::INFINITY];
        for (i, value) in wild.iter().enumerate() {
            let input = RawReading {
                timestamp: t0 + Duration::seconds(i as i64 + 1),
                pm2_5: Some(*value),
                pm10: Some(*value),
                temperature: Some(*value),
                humidity: Some(*value),
                gas_level: Some(*value),
            };
            let out = v.validate(&input).unwrap();
            for field in Field::ALL {
                assert!(config.range(field).contains(out.reading.get(field)));
            }
        }
    }

    #[test]
    fn test_seeded_from_history() {
        let t0 = Utc::now();
        let seed = SensorReading {
            timestamp: t0,
            pm2_5: 7.0,
            pm10: 9.0,
            temperature: 20.0,
            humidity: 40.0,
            gas_level: 100.0,
        };
        let mut v = ReadingValidator::with_history(ValidatorConfig::default(), Some(&seed));
        let mut input = raw(t0 + Duration::seconds(5), 9999.0);
        input.gas_level = None;
        let out = v.validate(&input).unwrap();
        assert_eq!(out.reading.pm2_5, 7.0);
        assert_eq!(out.reading.gas_level, 100.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(ValidatorConfig::default().validate().is_ok());
        let bad = ValidatorConfig {
            humidity: ValidRange::new(100.0, 0.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}

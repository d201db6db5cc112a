//! Window feature engineering
//!
//! Turns validated history into fixed-length windows. Each window keeps a
//! per-step feature matrix (for the sequence model) and a summary vector
//! of rolling means, first differences and calendar features (for the
//! ensemble model).

mod scaler;
mod window;

pub use scaler::Scaler;
pub use window::{TrainingSet, TrainingWindow, Windows};

use crate::error::{ForecastError, ForecastResult};
use crate::models::{Field, SensorReading};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::TAU;
use std::time::Duration;

/// Rolling-mean sub-window lengths, in readings
pub const SUB_WINDOWS: [usize; 3] = [5, 15, 30];

/// Default window length W
pub const DEFAULT_WINDOW_LENGTH: usize = 60;

/// Default spacing between readings
pub const DEFAULT_READING_INTERVAL: Duration = Duration::from_secs(5);

/// Calendar features: hour sin, hour cos, day of week
pub const CALENDAR_FEATURES: usize = 3;

/// Per-step features: raw value and first difference of every field, plus calendar
pub const STEP_FEATURES: usize = Field::ALL.len() * 2 + CALENDAR_FEATURES;

/// Summary features: per field raw, three rolling means, first difference; plus calendar
pub const SUMMARY_FEATURES: usize = Field::ALL.len() * (2 + SUB_WINDOWS.len()) + CALENDAR_FEATURES;

#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    /// Readings per window (W)
    pub length: usize,
    /// Nominal spacing between consecutive readings
    pub reading_interval: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_WINDOW_LENGTH,
            reading_interval: DEFAULT_READING_INTERVAL,
        }
    }
}

impl WindowConfig {
    /// Number of readings covering `hours`
    pub fn horizon_steps(&self, hours: u32) -> usize {
        let interval = self.reading_interval.as_secs().max(1);
        (hours as u64 * 3600 / interval) as usize
    }

    /// Length of the flattened ensemble feature vector
    pub fn flat_len(&self) -> usize {
        SUMMARY_FEATURES + self.length * Field::ALL.len()
    }

    pub fn validate(&self) -> ForecastResult<()> {
        let largest = SUB_WINDOWS[SUB_WINDOWS.len() - 1];
        if self.length < largest {
            return Err(ForecastError::InvalidConfig(format!(
                "window length {} is shorter than the largest sub-window {}",
                self.length, largest
            )));
        }
        if self.reading_interval.as_secs() == 0 {
            return Err(ForecastError::InvalidConfig(
                "reading interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds windows over validated history
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    config: WindowConfig,
}

impl FeatureBuilder {
    pub fn new(config: WindowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn window_length(&self) -> usize {
        self.config.length
    }

    /// Readings needed so the newest window gets the same leading
    /// difference a training window ending there would get
    pub fn context_len(&self) -> usize {
        self.config.length + 1
    }

    /// Build the window whose newest reading is `history[end_index]`
    pub fn build_window(
        &self,
        history: &[SensorReading],
        end_index: usize,
    ) -> ForecastResult<TrainingWindow> {
        let w = self.config.length;
        let available = if end_index < history.len() {
            end_index + 1
        } else {
            history.len()
        };
        if end_index >= history.len() || available < w {
            return Err(ForecastError::InsufficientHistory {
                needed: w,
                available,
            });
        }
        Ok(self.window_unchecked(history, end_index))
    }

    /// Window over the newest W readings
    pub fn latest_window(&self, history: &[SensorReading]) -> ForecastResult<TrainingWindow> {
        if history.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                needed: self.config.length,
                available: 0,
            });
        }
        self.build_window(history, history.len() - 1)
    }

    /// Lazy sequence of every window over `history`, oldest first
    pub fn windows<'a>(&'a self, history: &'a [SensorReading]) -> Windows<'a> {
        let first = self.config.length.saturating_sub(1);
        Windows::new(self, history, first, history.len())
    }

    /// Labelled windows for one horizon.
    ///
    /// The target of the window ending at `e` is the reading at
    /// `e + horizon_steps`. When `max_samples` is set only the newest
    /// windows are kept.
    pub fn training_set(
        &self,
        history: &[SensorReading],
        horizon_steps: usize,
        max_samples: Option<usize>,
    ) -> ForecastResult<TrainingSet> {
        let w = self.config.length;
        let needed = w + horizon_steps.max(1);
        if history.len() < needed {
            return Err(ForecastError::InsufficientHistory {
                needed,
                available: history.len(),
            });
        }

        let steps = horizon_steps.max(1);
        let last_end = history.len() - 1 - steps;
        let mut first_end = w - 1;
        if let Some(cap) = max_samples {
            let count = last_end + 1 - first_end;
            if count > cap {
                first_end = last_end + 1 - cap;
            }
        }

        let windows: Vec<TrainingWindow> =
            Windows::new(self, history, first_end, last_end + 1).collect();
        let targets = (first_end..=last_end)
            .map(|e| history[e + steps].targets())
            .collect();
        Ok(TrainingSet::new(windows, targets, steps))
    }

    pub(crate) fn window_unchecked(&self, history: &[SensorReading], end_index: usize) -> TrainingWindow {
        let w = self.config.length;
        let start = end_index + 1 - w;
        let slice = &history[start..=end_index];

        let mut steps = Vec::with_capacity(w);
        for (i, reading) in slice.iter().enumerate() {
            let prev = if i > 0 {
                Some(&slice[i - 1])
            } else if start > 0 {
                Some(&history[start - 1])
            } else {
                None
            };
            let mut row = [0.0; STEP_FEATURES];
            for field in Field::ALL {
                let value = reading.get(field);
                row[field.index()] = value;
                row[Field::ALL.len() + field.index()] =
                    prev.map(|p| value - p.get(field)).unwrap_or(0.0);
            }
            let calendar = calendar_features(reading.timestamp);
            row[Field::ALL.len() * 2..].copy_from_slice(&calendar);
            steps.push(row);
        }

        let newest = slice[w - 1];
        let mut summary = Vec::with_capacity(SUMMARY_FEATURES);
        for field in Field::ALL {
            let values: Vec<f64> = slice.iter().map(|r| r.get(field)).collect();
            summary.push(newest.get(field));
            for k in SUB_WINDOWS {
                summary.push(rolling_mean(&values, k));
            }
            summary.push(steps[w - 1][Field::ALL.len() + field.index()]);
        }
        summary.extend_from_slice(&calendar_features(newest.timestamp));

        TrainingWindow::new(newest, steps, summary)
    }
}

/// Mean of the trailing `k` values (all values if fewer)
pub fn rolling_mean(values: &[f64], k: usize) -> f64 {
    if values.is_empty() || k == 0 {
        return 0.0;
    }
    let n = k.min(values.len());
    values[values.len() - n..].iter().sum::<f64>() / n as f64
}

/// Hour of day as a point on the unit circle, plus day of week in [0, 1)
pub fn calendar_features(ts: DateTime<Utc>) -> [f64; CALENDAR_FEATURES] {
    let hour = (ts.hour() as f64 + ts.minute() as f64 / 60.0) / 24.0;
    [
        (TAU * hour).sin(),
        (TAU * hour).cos(),
        ts.weekday().num_days_from_monday() as f64 / 7.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn history(n: usize) -> Vec<SensorReading> {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| SensorReading {
                timestamp: t0 + ChronoDuration::seconds(5 * i as i64),
                pm2_5: 10.0 + i as f64,
                pm10: 20.0 + i as f64 * 0.5,
                temperature: 20.0,
                humidity: 50.0,
                gas_level: 100.0,
            })
            .collect()
    }

    #[test]
    fn test_insufficient_history() {
        let builder = FeatureBuilder::new(WindowConfig::default());
        let h = history(59);
        let err = builder.build_window(&h, 58).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientHistory {
                needed: 60,
                available: 59
            }
        ));
        assert!(builder.build_window(&h, 100).is_err());
    }

    #[test]
    fn test_window_features() {
        let builder = FeatureBuilder::new(WindowConfig::default());
        let h = history(80);
        let window = builder.build_window(&h, 79).unwrap();

        assert_eq!(window.len(), 60);
        assert_eq!(window.end_timestamp(), h[79].timestamp);
        let summary = window.summary();
        assert_eq!(summary.len(), SUMMARY_FEATURES);
        // pm2_5: raw, mean5, mean15, mean30, diff
        assert_eq!(summary[0], 89.0);
        assert_eq!(summary[1], 87.0);
        assert_eq!(summary[2], 82.0);
        assert_eq!(summary[3], 74.5);
        assert_eq!(summary[4], 1.0);
        // first step diff uses the reading just before the window
        assert_eq!(window.steps()[0][Field::Pm2_5.index() + Field::ALL.len()], 1.0);
    }

    #[test]
    fn test_first_window_has_zero_leading_diff() {
        let builder = FeatureBuilder::new(WindowConfig::default());
        let h = history(60);
        let window = builder.build_window(&h, 59).unwrap();
        assert_eq!(window.steps()[0][Field::ALL.len()], 0.0);
    }

    #[test]
    fn test_latest_window_over_context_matches_training_window() {
        let builder = FeatureBuilder::new(WindowConfig::default());
        let h = history(100);
        let recent = &h[h.len() - builder.context_len()..];
        assert_eq!(
            builder.latest_window(recent).unwrap(),
            builder.build_window(&h, h.len() - 1).unwrap()
        );

        // the same window over exactly W readings loses the leading diff
        let short = builder.latest_window(&h[h.len() - 60..]).unwrap();
        assert_eq!(short.steps()[0][Field::ALL.len()], 0.0);
    }

    #[test]
    fn test_windows_count_and_restart() {
        let builder = FeatureBuilder::new(WindowConfig::default());
        let h = history(100);
        let windows = builder.windows(&h);
        assert_eq!(windows.len(), 41);

        let again = windows.clone();
        let ends: Vec<_> = windows.map(|w| w.end_timestamp()).collect();
        assert_eq!(ends.len(), 41);
        assert_eq!(ends[0], h[59].timestamp);
        assert_eq!(ends[40], h[99].timestamp);
        assert_eq!(again.count(), 41);

        assert_eq!(builder.windows(&h[..30]).count(), 0);
    }

    #[test]
    fn test_training_set_labels_and_cap() {
        let builder = FeatureBuilder::new(WindowConfig::default());
        let h = history(100);
        let set = builder.training_set(&h, 10, None).unwrap();
        assert_eq!(set.len(), 31);
        assert_eq!(set.targets()[0].pm2_5, h[69].pm2_5);
        assert_eq!(set.windows()[30].end_timestamp(), h[89].timestamp);

        let capped = builder.training_set(&h, 10, Some(5)).unwrap();
        assert_eq!(capped.len(), 5);
        assert_eq!(capped.windows()[0].end_timestamp(), h[85].timestamp);

        assert!(builder
            .training_set(&h, 50, None)
            .unwrap_err()
            .is_insufficient_history());
    }

    #[test]
    fn test_horizon_steps() {
        let config = WindowConfig::default();
        assert_eq!(config.horizon_steps(1), 720);
        assert_eq!(config.horizon_steps(6), 4320);

        let hourly = WindowConfig {
            length: 60,
            reading_interval: Duration::from_secs(3600),
        };
        assert_eq!(hourly.horizon_steps(3), 3);
    }

    #[test]
    fn test_calendar_encoding() {
        let noon_monday = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let c = calendar_features(noon_monday);
        assert!(c[0].abs() < 1e-9);
        assert!((c[1] + 1.0).abs() < 1e-9);
        assert_eq!(c[2], 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(WindowConfig::default().validate().is_ok());
        let short = WindowConfig {
            length: 20,
            ..Default::default()
        };
        assert!(short.validate().is_err());
    }
}

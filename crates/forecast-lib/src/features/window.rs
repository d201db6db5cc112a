use super::{FeatureBuilder, STEP_FEATURES};
use crate::models::{Field, SensorReading, TargetValues};
use chrono::{DateTime, Utc};

/// W consecutive validated readings with derived features.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingWindow {
    newest: SensorReading,
    steps: Vec<[f64; STEP_FEATURES]>,
    summary: Vec<f64>,
}

impl TrainingWindow {
    pub(super) fn new(newest: SensorReading, steps: Vec<[f64; STEP_FEATURES]>, summary: Vec<f64>) -> Self {
        Self {
            newest,
            steps,
            summary,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Timestamp of the newest reading; used as the issue timestamp
    pub fn end_timestamp(&self) -> DateTime<Utc> {
        self.newest.timestamp
    }

    pub fn newest(&self) -> &SensorReading {
        &self.newest
    }

    /// Ordered per-step feature matrix
    pub fn steps(&self) -> &[[f64; STEP_FEATURES]] {
        &self.steps
    }

    pub fn summary(&self) -> &[f64] {
        &self.summary
    }

    /// Fixed-length vector for the ensemble: summary then raw values of every step
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.summary.len() + self.steps.len() * Field::ALL.len());
        out.extend_from_slice(&self.summary);
        for row in &self.steps {
            out.extend_from_slice(&row[..Field::ALL.len()]);
        }
        out
    }
}

/// Lazy, restartable iterator of windows over a history slice
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    builder: &'a FeatureBuilder,
    history: &'a [SensorReading],
    next_end: usize,
    stop: usize,
}

impl<'a> Windows<'a> {
    pub(super) fn new(
        builder: &'a FeatureBuilder,
        history: &'a [SensorReading],
        first_end: usize,
        stop: usize,
    ) -> Self {
        Self {
            builder,
            history,
            next_end: first_end,
            stop: stop.min(history.len()),
        }
    }
}

impl Iterator for Windows<'_> {
    type Item = TrainingWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_end >= self.stop {
            return None;
        }
        let window = self.builder.window_unchecked(self.history, self.next_end);
        self.next_end += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.stop.saturating_sub(self.next_end);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Windows<'_> {}

/// Windows paired with their horizon targets, in time order
#[derive(Debug, Clone)]
pub struct TrainingSet {
    windows: Vec<TrainingWindow>,
    targets: Vec<TargetValues>,
    horizon_steps: usize,
}

impl TrainingSet {
    pub fn new(windows: Vec<TrainingWindow>, targets: Vec<TargetValues>, horizon_steps: usize) -> Self {
        debug_assert_eq!(windows.len(), targets.len());
        Self {
            windows,
            targets,
            horizon_steps,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn windows(&self) -> &[TrainingWindow] {
        &self.windows
    }

    pub fn targets(&self) -> &[TargetValues] {
        &self.targets
    }

    pub fn horizon_steps(&self) -> usize {
        self.horizon_steps
    }

    /// Index where the validation tail starts.
    ///
    /// The tail is the newest `fraction` of samples, at least one sample,
    /// and never the whole set.
    pub fn validation_start(&self, fraction: f64) -> usize {
        let n = self.len();
        if n < 2 {
            return n;
        }
        let tail = ((n as f64 * fraction).round() as usize).clamp(1, n - 1);
        n - tail
    }
}

#[cfg(test)]
mod tests {
    use super::super::{FeatureBuilder, WindowConfig, SUMMARY_FEATURES};
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_flatten_layout() {
        let t0 = Utc::now();
        let history: Vec<SensorReading> = (0..60)
            .map(|i| SensorReading {
                timestamp: t0 + Duration::seconds(5 * i),
                pm2_5: i as f64,
                pm10: 1.0,
                temperature: 2.0,
                humidity: 3.0,
                gas_level: 4.0,
            })
            .collect();
        let builder = FeatureBuilder::new(WindowConfig::default());
        let window = builder.build_window(&history, 59).unwrap();
        let flat = window.flatten();

        assert_eq!(flat.len(), builder.config().flat_len());
        assert_eq!(flat[SUMMARY_FEATURES], 0.0);
        assert_eq!(flat[SUMMARY_FEATURES + 4], 4.0);
        assert_eq!(flat[flat.len() - 5], 59.0);
    }

    #[test]
    fn test_validation_split_is_chronological_tail() {
        let set = TrainingSet::new(Vec::new(), Vec::new(), 1);
        assert_eq!(set.validation_start(0.15), 0);

        let t0 = Utc::now();
        let history: Vec<SensorReading> = (0..100)
            .map(|i| SensorReading {
                timestamp: t0 + Duration::seconds(5 * i),
                pm2_5: 1.0,
                pm10: 1.0,
                temperature: 1.0,
                humidity: 1.0,
                gas_level: 1.0,
            })
            .collect();
        let builder = FeatureBuilder::new(WindowConfig::default());
        let set = builder.training_set(&history, 1, None).unwrap();
        assert_eq!(set.len(), 40);
        assert_eq!(set.validation_start(0.15), 34);
        assert_eq!(set.validation_start(0.01), 39);
    }
}

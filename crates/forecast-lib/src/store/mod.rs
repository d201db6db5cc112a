//! Tabular storage contract
//!
//! Three tables: append-only readings, predictions whose actual columns
//! stay null until reconciled, and one accuracy row per (horizon, family).
//! Implementations are synchronous; async callers run them inline since
//! every call is a short local operation.

mod artifacts;
mod memory;
mod sqlite;

pub use artifacts::{compute_checksum, ArtifactStore, LoadedArtifacts, DEFAULT_ARTIFACT_DIR};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::models::{AccuracyRecord, Prediction, SensorReading, TargetValues};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait TabularStore: Send + Sync {
    /// Append a validated reading; timestamps must be strictly increasing
    fn append_reading(&self, reading: &SensorReading) -> Result<()>;

    /// Newest `n` readings, oldest first
    fn latest_readings(&self, n: usize) -> Result<Vec<SensorReading>>;

    fn reading_count(&self) -> Result<usize>;

    /// Insert a prediction, replacing an unreconciled one with the same
    /// issue timestamp and horizon
    fn record_prediction(&self, prediction: &Prediction) -> Result<()>;

    /// Unreconciled predictions with a target timestamp in `[from, to]`,
    /// ordered by target timestamp
    fn outstanding_predictions(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Prediction>>;

    /// Fill the actual columns; returns false if the prediction does not
    /// exist or was already reconciled
    fn annotate_actual(
        &self,
        issue_timestamp: DateTime<Utc>,
        horizon_hours: u32,
        actual: &TargetValues,
    ) -> Result<bool>;

    /// Newest prediction per horizon, ordered by horizon
    fn latest_predictions(&self) -> Result<Vec<Prediction>>;

    /// Drop predictions issued before `cutoff`; returns the number removed
    fn prune_predictions(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn upsert_accuracy(&self, record: &AccuracyRecord) -> Result<()>;

    /// All accuracy rows, ordered by horizon then family
    fn accuracy_records(&self) -> Result<Vec<AccuracyRecord>>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store must share

    use super::*;
    use crate::models::ModelFamily;
    use chrono::{Duration, TimeZone};

    pub fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    pub fn reading(secs: i64, pm2_5: f64) -> SensorReading {
        SensorReading {
            timestamp: t(secs),
            pm2_5,
            pm10: 30.0,
            temperature: 21.5,
            humidity: 48.0,
            gas_level: 210.0,
        }
    }

    pub fn prediction(issue: i64, horizon: u32) -> Prediction {
        Prediction {
            issue_timestamp: t(issue),
            target_timestamp: t(issue) + Duration::hours(horizon as i64),
            horizon_hours: horizon,
            model_family: ModelFamily::Ensemble,
            predicted: TargetValues::from_array([12.0, 30.0, 20.0, 55.0]),
            actual: None,
        }
    }

    pub fn readings(store: &dyn TabularStore) {
        for i in 0..10 {
            store.append_reading(&reading(i * 5, i as f64)).unwrap();
        }
        assert_eq!(store.reading_count().unwrap(), 10);

        let latest = store.latest_readings(3).unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].pm2_5, 7.0);
        assert_eq!(latest[2].pm2_5, 9.0);
        assert_eq!(latest[2].timestamp, t(45));
        assert_eq!(store.latest_readings(100).unwrap().len(), 10);

        assert!(store.append_reading(&reading(45, 1.0)).is_err());
    }

    pub fn predictions(store: &dyn TabularStore) {
        store.record_prediction(&prediction(0, 1)).unwrap();
        store.record_prediction(&prediction(0, 3)).unwrap();
        store.record_prediction(&prediction(600, 1)).unwrap();

        let outstanding = store.outstanding_predictions(t(3600 - 60), t(3600 + 60)).unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].horizon_hours, 1);
        assert_eq!(outstanding[0].issue_timestamp, t(0));

        let actual = TargetValues::from_array([14.0, 31.0, 19.0, 50.0]);
        assert!(store.annotate_actual(t(0), 1, &actual).unwrap());
        // never reconciled twice
        assert!(!store.annotate_actual(t(0), 1, &actual).unwrap());
        assert!(!store.annotate_actual(t(1), 1, &actual).unwrap());
        assert!(store
            .outstanding_predictions(t(3600 - 60), t(3600 + 60))
            .unwrap()
            .is_empty());

        let latest = store.latest_predictions().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].horizon_hours, 1);
        assert_eq!(latest[0].issue_timestamp, t(600));
        assert_eq!(latest[1].horizon_hours, 3);
        assert!(latest[1].actual.is_none());

        assert_eq!(store.prune_predictions(t(300)).unwrap(), 2);
        assert_eq!(store.latest_predictions().unwrap().len(), 1);
    }

    pub fn accuracy(store: &dyn TabularStore) {
        let mut record = AccuracyRecord {
            horizon_hours: 3,
            model_family: ModelFamily::Ensemble,
            mae: TargetValues::from_array([1.0, 2.0, 0.5, 3.0]),
            rmse: TargetValues::from_array([1.5, 2.5, 0.7, 3.5]),
            sample_count: 1,
            last_updated: t(0),
        };
        store.upsert_accuracy(&record).unwrap();
        record.sample_count = 2;
        record.mae.pm2_5 = 4.0;
        store.upsert_accuracy(&record).unwrap();
        store
            .upsert_accuracy(&AccuracyRecord {
                horizon_hours: 1,
                ..record.clone()
            })
            .unwrap();

        let records = store.accuracy_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].horizon_hours, 1);
        assert_eq!(records[1], record);
    }
}

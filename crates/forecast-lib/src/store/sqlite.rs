//! SQLite-backed tabular store
//!
//! Timestamps are stored as Unix milliseconds.

use super::TabularStore;
use crate::models::{AccuracyRecord, ModelFamily, Prediction, SensorReading, TargetValues};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS readings (
    timestamp INTEGER PRIMARY KEY,
    pm2_5 REAL NOT NULL,
    pm10 REAL NOT NULL,
    temperature REAL NOT NULL,
    humidity REAL NOT NULL,
    gas_level REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS predictions (
    issue_timestamp INTEGER NOT NULL,
    target_timestamp INTEGER NOT NULL,
    horizon_hours INTEGER NOT NULL,
    model_family TEXT NOT NULL,
    predicted_pm2_5 REAL NOT NULL,
    predicted_pm10 REAL NOT NULL,
    predicted_temperature REAL NOT NULL,
    predicted_humidity REAL NOT NULL,
    actual_pm2_5 REAL,
    actual_pm10 REAL,
    actual_temperature REAL,
    actual_humidity REAL,
    PRIMARY KEY (issue_timestamp, horizon_hours)
);

CREATE INDEX IF NOT EXISTS idx_predictions_outstanding
    ON predictions(target_timestamp) WHERE actual_pm2_5 IS NULL;

CREATE TABLE IF NOT EXISTS accuracy (
    horizon_hours INTEGER NOT NULL,
    model_family TEXT NOT NULL,
    mae_pm2_5 REAL NOT NULL,
    mae_pm10 REAL NOT NULL,
    mae_temperature REAL NOT NULL,
    mae_humidity REAL NOT NULL,
    rmse_pm2_5 REAL NOT NULL,
    rmse_pm10 REAL NOT NULL,
    rmse_temperature REAL NOT NULL,
    rmse_humidity REAL NOT NULL,
    sample_count INTEGER NOT NULL,
    last_updated INTEGER NOT NULL,
    PRIMARY KEY (horizon_hours, model_family)
);
"#;

const PREDICTION_COLUMNS: &str = "issue_timestamp, target_timestamp, horizon_hours, model_family, \
     predicted_pm2_5, predicted_pm10, predicted_temperature, predicted_humidity, \
     actual_pm2_5, actual_pm10, actual_temperature, actual_humidity";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), readings = store.reading_count()?, "Opened SQLite store");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("Failed to open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn family_from_sql(value: String) -> rusqlite::Result<ModelFamily> {
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<SensorReading> {
    Ok(SensorReading {
        timestamp: from_millis(row.get(0)?)?,
        pm2_5: row.get(1)?,
        pm10: row.get(2)?,
        temperature: row.get(3)?,
        humidity: row.get(4)?,
        gas_level: row.get(5)?,
    })
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    let actual: [Option<f64>; 4] = [row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?];
    let actual = match actual {
        [Some(a), Some(b), Some(c), Some(d)] => Some(TargetValues::from_array([a, b, c, d])),
        _ => None,
    };
    Ok(Prediction {
        issue_timestamp: from_millis(row.get(0)?)?,
        target_timestamp: from_millis(row.get(1)?)?,
        horizon_hours: row.get(2)?,
        model_family: family_from_sql(row.get(3)?)?,
        predicted: TargetValues::from_array([row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?]),
        actual,
    })
}

fn accuracy_from_row(row: &Row<'_>) -> rusqlite::Result<AccuracyRecord> {
    Ok(AccuracyRecord {
        horizon_hours: row.get(0)?,
        model_family: family_from_sql(row.get(1)?)?,
        mae: TargetValues::from_array([row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?]),
        rmse: TargetValues::from_array([row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?]),
        sample_count: row.get::<_, i64>(10)? as u64,
        last_updated: from_millis(row.get(11)?)?,
    })
}

impl TabularStore for SqliteStore {
    fn append_reading(&self, reading: &SensorReading) -> Result<()> {
        let conn = self.conn()?;
        let ts = to_millis(reading.timestamp);
        let last: Option<i64> = conn
            .query_row("SELECT MAX(timestamp) FROM readings", [], |row| row.get(0))
            .context("Failed to read last reading timestamp")?;
        if let Some(last) = last {
            if ts <= last {
                bail!("reading at {} is not after last stored reading", reading.timestamp);
            }
        }
        conn.execute(
            "INSERT INTO readings (timestamp, pm2_5, pm10, temperature, humidity, gas_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ts,
                reading.pm2_5,
                reading.pm10,
                reading.temperature,
                reading.humidity,
                reading.gas_level
            ],
        )
        .context("Failed to insert reading")?;
        Ok(())
    }

    fn latest_readings(&self, n: usize) -> Result<Vec<SensorReading>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, pm2_5, pm10, temperature, humidity, gas_level FROM readings
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut readings = stmt
            .query_map(params![limit], reading_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load readings")?;
        readings.reverse();
        Ok(readings)
    }

    fn reading_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn record_prediction(&self, p: &Prediction) -> Result<()> {
        let actual = p.actual.map(|a| a.to_array());
        self.conn()?
            .execute(
                "INSERT INTO predictions (issue_timestamp, target_timestamp, horizon_hours, model_family,
                     predicted_pm2_5, predicted_pm10, predicted_temperature, predicted_humidity,
                     actual_pm2_5, actual_pm10, actual_temperature, actual_humidity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(issue_timestamp, horizon_hours) DO UPDATE SET
                     target_timestamp = excluded.target_timestamp,
                     model_family = excluded.model_family,
                     predicted_pm2_5 = excluded.predicted_pm2_5,
                     predicted_pm10 = excluded.predicted_pm10,
                     predicted_temperature = excluded.predicted_temperature,
                     predicted_humidity = excluded.predicted_humidity
                 WHERE predictions.actual_pm2_5 IS NULL",
                params![
                    to_millis(p.issue_timestamp),
                    to_millis(p.target_timestamp),
                    p.horizon_hours,
                    p.model_family.as_str(),
                    p.predicted.pm2_5,
                    p.predicted.pm10,
                    p.predicted.temperature,
                    p.predicted.humidity,
                    actual.map(|a| a[0]),
                    actual.map(|a| a[1]),
                    actual.map(|a| a[2]),
                    actual.map(|a| a[3]),
                ],
            )
            .context("Failed to record prediction")?;
        Ok(())
    }

    fn outstanding_predictions(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Prediction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM predictions
             WHERE actual_pm2_5 IS NULL AND target_timestamp BETWEEN ?1 AND ?2
             ORDER BY target_timestamp, horizon_hours",
            PREDICTION_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![to_millis(from), to_millis(to)], prediction_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load outstanding predictions")?;
        Ok(rows)
    }

    fn annotate_actual(
        &self,
        issue_timestamp: DateTime<Utc>,
        horizon_hours: u32,
        actual: &TargetValues,
    ) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE predictions
                 SET actual_pm2_5 = ?3, actual_pm10 = ?4, actual_temperature = ?5, actual_humidity = ?6
                 WHERE issue_timestamp = ?1 AND horizon_hours = ?2 AND actual_pm2_5 IS NULL",
                params![
                    to_millis(issue_timestamp),
                    horizon_hours,
                    actual.pm2_5,
                    actual.pm10,
                    actual.temperature,
                    actual.humidity
                ],
            )
            .context("Failed to annotate prediction")?;
        Ok(changed == 1)
    }

    fn latest_predictions(&self) -> Result<Vec<Prediction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {cols} FROM predictions p
             WHERE p.issue_timestamp = (
                 SELECT MAX(issue_timestamp) FROM predictions q WHERE q.horizon_hours = p.horizon_hours
             )
             ORDER BY horizon_hours",
            cols = PREDICTION_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], prediction_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load latest predictions")?;
        Ok(rows)
    }

    fn prune_predictions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM predictions WHERE issue_timestamp < ?1",
                params![to_millis(cutoff)],
            )
            .context("Failed to prune predictions")?;
        Ok(removed)
    }

    fn upsert_accuracy(&self, r: &AccuracyRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO accuracy (horizon_hours, model_family,
                     mae_pm2_5, mae_pm10, mae_temperature, mae_humidity,
                     rmse_pm2_5, rmse_pm10, rmse_temperature, rmse_humidity,
                     sample_count, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    r.horizon_hours,
                    r.model_family.as_str(),
                    r.mae.pm2_5,
                    r.mae.pm10,
                    r.mae.temperature,
                    r.mae.humidity,
                    r.rmse.pm2_5,
                    r.rmse.pm10,
                    r.rmse.temperature,
                    r.rmse.humidity,
                    r.sample_count as i64,
                    to_millis(r.last_updated)
                ],
            )
            .context("Failed to upsert accuracy record")?;
        Ok(())
    }

    fn accuracy_records(&self) -> Result<Vec<AccuracyRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT horizon_hours, model_family,
                    mae_pm2_5, mae_pm10, mae_temperature, mae_humidity,
                    rmse_pm2_5, rmse_pm10, rmse_temperature, rmse_humidity,
                    sample_count, last_updated
             FROM accuracy ORDER BY horizon_hours, model_family",
        )?;
        let rows = stmt
            .query_map([], accuracy_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load accuracy records")?;
        Ok(rows)
    }
}

impl SqliteStore {
    /// Timestamp of the newest stored reading
    pub fn last_reading_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = self
            .conn()?
            .query_row("SELECT MAX(timestamp) FROM readings", [], |row| row.get(0))
            .optional()?
            .flatten();
        ms.map(|ms| from_millis(ms).map_err(anyhow::Error::from))
            .transpose()
    }
}

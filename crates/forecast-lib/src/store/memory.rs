use super::TabularStore;
use crate::models::{AccuracyRecord, ModelFamily, Prediction, SensorReading, TargetValues};
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    readings: Vec<SensorReading>,
    predictions: BTreeMap<(DateTime<Utc>, u32), Prediction>,
    accuracy: BTreeMap<(u32, ModelFamily), AccuracyRecord>,
}

/// Volatile store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl TabularStore for MemoryStore {
    fn append_reading(&self, reading: &SensorReading) -> Result<()> {
        let mut tables = self.write()?;
        if let Some(last) = tables.readings.last() {
            if reading.timestamp <= last.timestamp {
                bail!(
                    "reading at {} is not after {}",
                    reading.timestamp,
                    last.timestamp
                );
            }
        }
        tables.readings.push(*reading);
        Ok(())
    }

    fn latest_readings(&self, n: usize) -> Result<Vec<SensorReading>> {
        let tables = self.read()?;
        let start = tables.readings.len().saturating_sub(n);
        Ok(tables.readings[start..].to_vec())
    }

    fn reading_count(&self) -> Result<usize> {
        Ok(self.read()?.readings.len())
    }

    fn record_prediction(&self, prediction: &Prediction) -> Result<()> {
        let mut tables = self.write()?;
        let key = (prediction.issue_timestamp, prediction.horizon_hours);
        match tables.predictions.get(&key) {
            Some(existing) if existing.is_reconciled() => {}
            _ => {
                tables.predictions.insert(key, prediction.clone());
            }
        }
        Ok(())
    }

    fn outstanding_predictions(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Prediction>> {
        let tables = self.read()?;
        let mut out: Vec<Prediction> = tables
            .predictions
            .values()
            .filter(|p| !p.is_reconciled() && p.target_timestamp >= from && p.target_timestamp <= to)
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.target_timestamp, p.horizon_hours));
        Ok(out)
    }

    fn annotate_actual(
        &self,
        issue_timestamp: DateTime<Utc>,
        horizon_hours: u32,
        actual: &TargetValues,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.predictions.get_mut(&(issue_timestamp, horizon_hours)) {
            Some(p) if !p.is_reconciled() => {
                p.actual = Some(*actual);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn latest_predictions(&self) -> Result<Vec<Prediction>> {
        let tables = self.read()?;
        let mut newest: BTreeMap<u32, &Prediction> = BTreeMap::new();
        for p in tables.predictions.values() {
            let entry = newest.entry(p.horizon_hours).or_insert(p);
            if p.issue_timestamp > entry.issue_timestamp {
                *entry = p;
            }
        }
        Ok(newest.into_values().cloned().collect())
    }

    fn prune_predictions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.write()?;
        let before = tables.predictions.len();
        tables.predictions.retain(|(issue, _), _| *issue >= cutoff);
        Ok(before - tables.predictions.len())
    }

    fn upsert_accuracy(&self, record: &AccuracyRecord) -> Result<()> {
        self.write()?
            .accuracy
            .insert((record.horizon_hours, record.model_family), record.clone());
        Ok(())
    }

    fn accuracy_records(&self) -> Result<Vec<AccuracyRecord>> {
        Ok(self.read()?.accuracy.values().cloned().collect())
    }
}

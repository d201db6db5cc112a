use crate::models::SensorReading;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    readings: Vec<SensorReading>,
    /// Readings ever appended, including those already evicted
    total: usize,
}

/// Shared in-memory tail of validated history.
///
/// Only the ingestion loop appends; every other component reads copies.
/// The oldest readings are evicted once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct ReadingHistory {
    inner: Arc<RwLock<Inner>>,
    capacity: usize,
}

impl ReadingHistory {
    pub fn new(capacity: usize) -> Self {
        Self::from_readings(Vec::new(), capacity)
    }

    /// Seed from stored readings (oldest first)
    pub fn from_readings(readings: Vec<SensorReading>, capacity: usize) -> Self {
        Self::with_total(readings, capacity, 0)
    }

    /// Seed from stored readings when the store holds more than fit in
    /// memory; `total` is the full stored count
    pub fn with_total(mut readings: Vec<SensorReading>, capacity: usize, total: usize) -> Self {
        let capacity = capacity.max(1);
        let total = total.max(readings.len());
        if readings.len() > capacity {
            readings.drain(..readings.len() - capacity);
        }
        Self {
            inner: Arc::new(RwLock::new(Inner { readings, total })),
            capacity,
        }
    }

    pub async fn push(&self, reading: SensorReading) {
        let mut inner = self.inner.write().await;
        inner.readings.push(reading);
        inner.total += 1;
        if inner.readings.len() > self.capacity {
            let excess = inner.readings.len() - self.capacity;
            inner.readings.drain(..excess);
        }
    }

    /// Readings currently held in memory
    pub async fn len(&self) -> usize {
        self.inner.read().await.readings.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.readings.is_empty()
    }

    /// Validated readings ever seen
    pub async fn total(&self) -> usize {
        self.inner.read().await.total
    }

    /// Newest `n` readings, oldest first
    pub async fn tail(&self, n: usize) -> Vec<SensorReading> {
        let inner = self.inner.read().await;
        let start = inner.readings.len().saturating_sub(n);
        inner.readings[start..].to_vec()
    }

    pub async fn snapshot(&self) -> Vec<SensorReading> {
        self.inner.read().await.readings.clone()
    }

    pub async fn last(&self) -> Option<SensorReading> {
        self.inner.read().await.readings.last().copied()
    }
}

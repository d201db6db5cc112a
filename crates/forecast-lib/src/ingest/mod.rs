//! Reading ingestion
//!
//! The acquisition layer hands over already-parsed readings through
//! [`ReadingSource`]. The ingestion loop validates each one, stores it,
//! appends it to the shared history and lets the accuracy tracker
//! reconcile predictions that were waiting for it.

mod history;
mod r#loop;

pub use history::ReadingHistory;
pub use r#loop::IngestionLoop;

use crate::models::RawReading;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;

use async_trait::async_trait;

/// Consecutive failures after which ingestion reports itself unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Source of timestamped numeric readings
#[async_trait]
pub trait ReadingSource: Send {
    /// Next reading; `Ok(None)` once the source is exhausted
    async fn next_reading(&mut self) -> Result<Option<RawReading>>;
}

/// Source fed through a channel by an acquisition task
pub struct ChannelSource {
    rx: mpsc::Receiver<RawReading>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<RawReading>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl ReadingSource for ChannelSource {
    async fn next_reading(&mut self) -> Result<Option<RawReading>> {
        Ok(self.rx.recv().await)
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Readings kept in memory for prediction and training
    pub history_capacity: usize,
    pub failure_threshold: u32,
    /// Pause after a source error
    pub retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            // A week of 5-second readings
            history_capacity: 120_960,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            retry_delay: Duration::from_secs(5),
        }
    }
}

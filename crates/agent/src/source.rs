//! JSON-lines reading source

use anyhow::{Context, Result};
use async_trait::async_trait;
use forecast_lib::ingest::ReadingSource;
use forecast_lib::RawReading;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

/// One JSON reading per line, e.g. `{"timestamp":"2024-06-01T00:00:00Z","pm2_5":12.0}`
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    skipped: u64,
}

impl JsonLinesSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            skipped: 0,
        }
    }

    /// Lines that could not be parsed
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ReadingSource for JsonLinesSource<R> {
    async fn next_reading(&mut self) -> Result<Option<RawReading>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context("Failed to read input line")?
            else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawReading>(line) {
                Ok(reading) => return Ok(Some(reading)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(error = %e, skipped = self.skipped, "Skipping malformed reading line");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parses_lines_and_skips_garbage() {
        let input = b"{\"timestamp\":\"2024-06-01T00:00:00Z\",\"pm2_5\":12.5,\"humidity\":40}\n\nnot json\n{\"timestamp\":\"2024-06-01T00:00:05Z\"}\n";
        let mut source = JsonLinesSource::new(&input[..]);

        let first = source.next_reading().await.unwrap().unwrap();
        assert_eq!(first.pm2_5, Some(12.5));
        assert_eq!(first.pm10, None);

        let second = source.next_reading().await.unwrap().unwrap();
        assert_eq!(second.pm2_5, None);
        assert_eq!(source.skipped(), 1);

        assert!(source.next_reading().await.unwrap().is_none());
    }
}

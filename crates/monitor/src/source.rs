//! Bundled event-source adapter
//!
//! Production deployments plug a message-bus consumer into the
//! `EventSource` trait; the bundled adapter reads newline-delimited JSON
//! from a file or stdin, which also covers local development and replay.

use anyhow::Result;
use async_trait::async_trait;
use monitor_lib::{EventSource, TelemetryEvent};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

/// NDJSON event source over any buffered reader
pub struct JsonLinesSource<R> {
    reader: R,
    line: String,
}

impl JsonLinesSource<BufReader<File>> {
    /// Open an NDJSON file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    /// Read events from stdin
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> Result<Option<TelemetryEvent>> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                return Ok(None);
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<TelemetryEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    // Undecodable lines are skipped just like schema-invalid
                    // events further in; the stream keeps flowing.
                    warn!(error = %e, "Skipping undecodable event line");
                }
            }
        }
    }
}

//! Ingestion and scheduling around the engine
//!
//! The transport that delivers events and the channel that carries findings
//! onward are external collaborators, modelled as traits here. `IngestLoop`
//! is the single writer: it consumes events in arrival order, validates,
//! ingests, detects and forwards findings. `AnalysisLoop` drives the
//! periodic pass on a ticker with a broadcast shutdown; a long scan is
//! cancelled cooperatively rather than awaited to completion.

use crate::engine::Engine;
use crate::models::{Anomaly, TelemetryEvent};
use crate::observability::{MonitorMetrics, StructuredLogger};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Source of normalized telemetry events (message-bus consumer, file, ...)
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is exhausted
    async fn next_event(&mut self) -> Result<Option<TelemetryEvent>>;
}

/// Downstream consumer of findings (alert router, durable store, ...)
#[async_trait]
pub trait AnomalySink: Send + Sync {
    async fn publish(&self, anomaly: &Anomaly) -> Result<()>;
}

/// A sink that records findings to the structured log
pub struct LogSink {
    logger: StructuredLogger,
}

impl LogSink {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl AnomalySink for LogSink {
    async fn publish(&self, anomaly: &Anomaly) -> Result<()> {
        self.logger.log_anomaly(
            anomaly.anomaly_type.as_str(),
            &anomaly.entity.to_string(),
            &anomaly.severity.to_string(),
            anomaly.value,
            anomaly.expected,
            &anomaly.description,
        );
        Ok(())
    }
}

/// Single-writer ingestion loop
pub struct IngestLoop {
    engine: Arc<Engine>,
    sink: Arc<dyn AnomalySink>,
    logger: StructuredLogger,
    metrics: MonitorMetrics,
}

impl IngestLoop {
    pub fn new(engine: Arc<Engine>, sink: Arc<dyn AnomalySink>, logger: StructuredLogger) -> Self {
        let metrics = engine.metrics();
        Self {
            engine,
            sink,
            logger,
            metrics,
        }
    }

    /// Consume the source until it is exhausted or shutdown is signalled
    pub async fn run<S: EventSource>(
        self,
        mut source: S,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting ingestion loop");
        let mut processed = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(processed, "Shutting down ingestion loop");
                    break;
                }
                next = source.next_event() => {
                    match next {
                        Ok(Some(event)) => {
                            self.process(event).await;
                            processed += 1;
                        }
                        Ok(None) => {
                            info!(processed, "Event source exhausted");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Event source failed; stopping ingestion");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Validate, ingest and detect for one event
    ///
    /// A malformed event is logged and skipped; a sink failure is logged
    /// and the already-updated in-memory state is kept.
    async fn process(&self, event: TelemetryEvent) {
        let snapshot = match self.engine.ingest_event(&event) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.metrics.inc_malformed_events();
                self.logger.log_malformed_event(&err.to_string());
                return;
            }
        };

        for anomaly in self.engine.detect_anomalies(&snapshot) {
            if let Err(e) = self.sink.publish(&anomaly).await {
                self.metrics.inc_sink_errors();
                warn!(
                    anomaly_type = %anomaly.anomaly_type,
                    entity = %anomaly.entity,
                    error = %e,
                    "Failed to publish finding; retry is the sink's concern"
                );
            }
        }
    }
}

/// Ticker-driven scheduler for the periodic analyzer
pub struct AnalysisLoop {
    engine: Arc<Engine>,
    sink: Arc<dyn AnomalySink>,
    /// Tick interval; the engine applies its own cadence guard on top
    tick: Duration,
}

impl AnalysisLoop {
    pub fn new(engine: Arc<Engine>, sink: Arc<dyn AnomalySink>, tick: Duration) -> Self {
        Self { engine, sink, tick }
    }

    /// Run until shutdown; an in-flight scan is cancelled, not awaited
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(tick_secs = self.tick.as_secs(), "Starting periodic analysis loop");
        let mut ticker = interval(self.tick);
        // The first tick fires immediately; skip it so analysis starts one
        // interval after boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.engine.periodic_cancel_flag().cancel();
                    info!("Shutting down periodic analysis loop");
                    break;
                }
                _ = ticker.tick() => {
                    let engine = self.engine.clone();
                    let scan = tokio::task::spawn_blocking(move || {
                        engine.perform_periodic_analysis()
                    });

                    tokio::select! {
                        _ = shutdown.recv() => {
                            self.engine.periodic_cancel_flag().cancel();
                            info!("Shutdown during periodic scan; cancelling");
                            break;
                        }
                        result = scan => {
                            match result {
                                Ok(findings) => {
                                    debug!(findings = findings.len(), "Periodic scan finished");
                                    for anomaly in &findings {
                                        if let Err(e) = self.sink.publish(anomaly).await {
                                            warn!(error = %e, "Failed to publish periodic finding");
                                        }
                                    }
                                }
                                Err(e) => warn!(error = %e, "Periodic scan task failed"),
                            }
                        }
                    }
                }
            }
        }
    }
}

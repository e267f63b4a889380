//! Telemetry Monitor - streaming anomaly detection for LLM usage
//!
//! This binary consumes normalized per-call telemetry events, runs the
//! detection engine over them and forwards findings downstream, while a
//! periodic analyzer looks for longer-horizon trends.

use anyhow::Result;
use monitor_lib::{
    health::components, AnalysisLoop, Engine, HealthRegistry, IngestLoop, LogSink,
    StructuredLogger,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod source;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the analysis loop wakes; the engine applies its cadence guard
const ANALYSIS_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting telemetry-monitor");

    // Load configuration
    let config = config::MonitorConfig::load()?;
    info!(service = %config.service_name, source = %config.event_source, "Monitor configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::INGEST).await;
    health_registry.register(components::DETECTORS).await;
    health_registry.register(components::PERIODIC).await;
    health_registry.register(components::SINK).await;

    // Initialize structured logger and the engine
    let logger = StructuredLogger::new(&config.service_name);
    logger.log_startup(MONITOR_VERSION);

    let engine = Arc::new(Engine::new(config.engine_config()));
    let sink = Arc::new(LogSink::new(logger.clone()));

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), engine.metrics()));

    // Shutdown broadcast shared by every loop
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);

    // Start the ingestion loop on the configured source
    let ingest = IngestLoop::new(engine.clone(), sink.clone(), logger.clone());
    let ingest_handle = {
        let shutdown = shutdown_tx.subscribe();
        let event_source = config.event_source.clone();
        tokio::spawn(async move {
            if event_source == "-" {
                ingest.run(source::JsonLinesSource::stdin(), shutdown).await;
            } else {
                match source::JsonLinesSource::open(&event_source).await {
                    Ok(file_source) => ingest.run(file_source, shutdown).await,
                    Err(e) => tracing::error!(error = %e, path = %event_source, "Failed to open event source"),
                }
            }
        })
    };

    // Start the periodic analysis loop
    let analysis = AnalysisLoop::new(engine.clone(), sink, ANALYSIS_TICK);
    let analysis_handle = tokio::spawn(analysis.run(shutdown_tx.subscribe()));

    // Mark monitor as ready after initialization
    health_registry.set_ready(true).await;

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    let _ = ingest_handle.await;
    let _ = analysis_handle.await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}

//! Engine library for LLM telemetry monitoring
//!
//! This crate provides the core functionality for:
//! - Bounded rolling per-entity metric history
//! - Statistical, seasonal, correlation and cost-pattern detection
//! - Deduplication of findings and recurring-error tracking
//! - Periodic cross-entity analysis
//! - Health checks and observability

pub mod cost;
pub mod dedup;
pub mod detect;
pub mod engine;
pub mod health;
pub mod models;
pub mod observability;
pub mod periodic;
pub mod pipeline;
pub mod store;

pub use engine::{Engine, EngineConfig};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use pipeline::{AnalysisLoop, AnomalySink, EventSource, IngestLoop, LogSink};

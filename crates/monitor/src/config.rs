//! Monitor configuration

use anyhow::Result;
use monitor_lib::EngineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Service name used in structured log records
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Path to an NDJSON event file, or "-" for stdin
    #[serde(default = "default_event_source")]
    pub event_source: String,

    /// Detection threshold in standard deviations
    #[serde(default = "default_sensitivity")]
    pub alert_sensitivity: f64,

    /// Recent points evaluated by the synchronous detectors
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Points retained per metric series
    #[serde(default = "default_lookback")]
    pub lookback_period: usize,

    /// Points required before statistical checks run
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,

    /// Season length in hours for the time-series detector
    #[serde(default = "default_seasonal_period")]
    pub seasonal_period: usize,

    /// Minimum interval between periodic analysis passes, in seconds
    #[serde(default = "default_periodic_cadence")]
    pub periodic_cadence_secs: u64,
}

fn default_service_name() -> String {
    "telemetry-monitor".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_event_source() -> String {
    "-".to_string()
}

fn default_sensitivity() -> f64 {
    3.0
}

fn default_window_size() -> usize {
    100
}

fn default_lookback() -> usize {
    1000
}

fn default_min_data_points() -> usize {
    30
}

fn default_seasonal_period() -> usize {
    24
}

fn default_periodic_cadence() -> u64 {
    30 * 60
}

impl MonitorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITOR"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| MonitorConfig {
            service_name: default_service_name(),
            api_port: default_api_port(),
            event_source: default_event_source(),
            alert_sensitivity: default_sensitivity(),
            window_size: default_window_size(),
            lookback_period: default_lookback(),
            min_data_points: default_min_data_points(),
            seasonal_period: default_seasonal_period(),
            periodic_cadence_secs: default_periodic_cadence(),
        }))
    }

    /// Engine configuration derived from this monitor configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            window_size: self.window_size,
            lookback_period: self.lookback_period,
            alert_sensitivity: self.alert_sensitivity,
            min_data_points: self.min_data_points,
            seasonal_period: self.seasonal_period,
            periodic_cadence: Duration::from_secs(self.periodic_cadence_secs),
            ..Default::default()
        }
    }
}

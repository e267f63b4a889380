//! Replay a telemetry capture through the engine

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use monitor_lib::{Anomaly, Engine, EngineConfig, TelemetryEvent};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Engine knobs exposed on the command line
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub sensitivity: f64,
    pub window_size: usize,
    pub min_data_points: usize,
    pub lookback: usize,
    pub include_periodic: bool,
}

/// Counters accumulated over one replay
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub events: u64,
    pub undecodable: u64,
    pub malformed: u64,
    pub findings: usize,
}

/// Feed the capture through a fresh engine and print the findings
pub fn run(file: &Path, options: ReplayOptions, format: OutputFormat) -> Result<()> {
    let engine = Engine::new(EngineConfig {
        alert_sensitivity: options.sensitivity,
        window_size: options.window_size,
        min_data_points: options.min_data_points,
        lookback_period: options.lookback,
        // Replay is offline; the cadence guard would only hide findings
        periodic_cadence: std::time::Duration::from_secs(0),
        ..Default::default()
    });

    let reader = BufReader::new(
        File::open(file).with_context(|| format!("opening capture {}", file.display()))?,
    );

    let mut summary = ReplaySummary::default();
    let mut findings: Vec<Anomaly> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: TelemetryEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(_) => {
                summary.undecodable += 1;
                continue;
            }
        };

        match engine.ingest_event(&event) {
            Ok(snapshot) => {
                summary.events += 1;
                findings.extend(engine.detect_anomalies(&snapshot));
            }
            Err(_) => summary.malformed += 1,
        }
    }

    if options.include_periodic {
        findings.extend(engine.perform_periodic_analysis());
    }
    summary.findings = findings.len();

    output::print_findings(&findings, format);

    if matches!(format, OutputFormat::Table) {
        if summary.undecodable + summary.malformed > 0 {
            output::print_warning(&format!(
                "{} undecodable and {} malformed lines skipped",
                summary.undecodable, summary.malformed
            ));
        }
        output::print_success(&format!(
            "Replayed {} events, {} findings",
            summary.events, summary.findings
        ));
    }

    Ok(())
}

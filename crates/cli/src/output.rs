//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use monitor_lib::Anomaly;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the findings table
#[derive(Tabled, Serialize)]
pub struct AnomalyRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    anomaly_type: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Expected")]
    expected: String,
}

impl From<&Anomaly> for AnomalyRow {
    fn from(anomaly: &Anomaly) -> Self {
        let anomaly_type = match anomaly.subtype {
            Some(subtype) => format!("{}/{}", anomaly.anomaly_type, subtype),
            None => anomaly.anomaly_type.to_string(),
        };
        Self {
            time: anomaly.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            anomaly_type,
            entity: anomaly.entity.to_string(),
            metric: anomaly
                .metric
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string()),
            severity: color_severity(&anomaly.severity.to_string()),
            value: format!("{:.4}", anomaly.value),
            expected: format!("{:.4}", anomaly.expected),
        }
    }
}

/// Print findings in the selected format
pub fn print_findings(findings: &[Anomaly], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if findings.is_empty() {
                println!("{}", "No findings".yellow());
                return;
            }
            let rows: Vec<AnomalyRow> = findings.iter().map(AnomalyRow::from).collect();
            let table = Table::new(&rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&findings) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Color severity based on value
pub fn color_severity(severity: &str) -> String {
    match severity {
        "critical" => severity.red().to_string(),
        "high" => severity.yellow().to_string(),
        _ => severity.to_string(),
    }
}

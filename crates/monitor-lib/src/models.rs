//! Core data models for the telemetry monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifies one independent metric-family instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub provider: String,
    pub model: String,
    pub application: String,
}

impl EntityKey {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            application: application.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.model, self.application)
    }
}

/// Metric families tracked per entity
///
/// `TokenRatio` is derived at ingestion (completion/prompt) and never arrives
/// on the wire; everything else maps 1:1 to an input event field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    InferenceTime,
    TotalTokens,
    EstimatedCost,
    MemoryUsed,
    PromptTokens,
    CompletionTokens,
    TokenRatio,
}

impl MetricType {
    /// All metric types, in the order detectors iterate them
    pub const ALL: [MetricType; 7] = [
        MetricType::InferenceTime,
        MetricType::TotalTokens,
        MetricType::EstimatedCost,
        MetricType::MemoryUsed,
        MetricType::PromptTokens,
        MetricType::CompletionTokens,
        MetricType::TokenRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::InferenceTime => "inference_time",
            MetricType::TotalTokens => "total_tokens",
            MetricType::EstimatedCost => "estimated_cost",
            MetricType::MemoryUsed => "memory_used",
            MetricType::PromptTokens => "prompt_tokens",
            MetricType::CompletionTokens => "completion_tokens",
            MetricType::TokenRatio => "token_ratio",
        }
    }
}

impl FromStr for MetricType {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inference_time" => Ok(MetricType::InferenceTime),
            "total_tokens" => Ok(MetricType::TotalTokens),
            "estimated_cost" => Ok(MetricType::EstimatedCost),
            "memory_used" => Ok(MetricType::MemoryUsed),
            "prompt_tokens" => Ok(MetricType::PromptTokens),
            "completion_tokens" => Ok(MetricType::CompletionTokens),
            "token_ratio" => Ok(MetricType::TokenRatio),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a metric name does not parse; callers treat it as a no-op
#[derive(Debug, Clone, Error)]
#[error("unknown metric type `{0}`")]
pub struct UnknownMetric(pub String);

/// One observation in a metric series. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl MetricPoint {
    pub fn new(value: f64, timestamp: DateTime<Utc>, request_id: Option<Uuid>) -> Self {
        Self {
            value,
            timestamp,
            request_id,
        }
    }
}

/// One normalized per-call telemetry event from the ingestion transport
///
/// Field-level requirements are conditional on `success`; `validate` is the
/// single place they are enforced, before anything downstream trusts the
/// event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub application: String,
    /// Wall-clock inference time in seconds
    pub inference_time: f64,
    pub success: bool,
    pub prompt_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used: Option<f64>,
}

impl TelemetryEvent {
    /// Entity this event belongs to
    pub fn entity(&self) -> EntityKey {
        EntityKey::new(&self.provider, &self.model, &self.application)
    }

    /// Enforce the conditional schema requirements
    pub fn validate(&self) -> Result<(), EventError> {
        for (field, value) in [
            ("provider", &self.provider),
            ("model", &self.model),
            ("application", &self.application),
        ] {
            if value.trim().is_empty() {
                return Err(EventError::MissingField { field });
            }
        }

        if !self.inference_time.is_finite() || self.inference_time < 0.0 {
            return Err(EventError::InvalidField {
                field: "inference_time",
                reason: "must be a finite, non-negative number of seconds".to_string(),
            });
        }

        if self.success {
            if self.completion_tokens.is_none() {
                return Err(EventError::MissingField {
                    field: "completion_tokens",
                });
            }
            if self.total_tokens.is_none() {
                return Err(EventError::MissingField {
                    field: "total_tokens",
                });
            }
            match self.estimated_cost {
                None => {
                    return Err(EventError::MissingField {
                        field: "estimated_cost",
                    })
                }
                Some(cost) if !cost.is_finite() || cost < 0.0 => {
                    return Err(EventError::InvalidField {
                        field: "estimated_cost",
                        reason: "must be a finite, non-negative amount".to_string(),
                    })
                }
                Some(_) => {}
            }
        } else if self.error.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(EventError::MissingField { field: "error" });
        }

        if let Some(mem) = self.memory_used {
            if !mem.is_finite() || mem < 0.0 {
                return Err(EventError::InvalidField {
                    field: "memory_used",
                    reason: "must be a finite, non-negative number".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Schema violations detected at the ingestion boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// The per-call view handed to `detect_anomalies` after ingestion
///
/// Carries exactly the values of the event that produced it, in the order
/// detectors will visit them.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub entity: EntityKey,
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub values: Vec<(MetricType, f64)>,
    pub prompt_tokens: u64,
    pub total_tokens: Option<u64>,
    pub error: Option<String>,
}

impl MetricSnapshot {
    /// Build the snapshot for a validated event
    pub fn from_event(event: &TelemetryEvent) -> Self {
        let mut values = vec![
            (MetricType::InferenceTime, event.inference_time),
            (MetricType::PromptTokens, event.prompt_tokens as f64),
        ];

        if event.success {
            if let Some(completion) = event.completion_tokens {
                values.push((MetricType::CompletionTokens, completion as f64));
                if event.prompt_tokens > 0 {
                    values.push((
                        MetricType::TokenRatio,
                        completion as f64 / event.prompt_tokens as f64,
                    ));
                }
            }
            if let Some(total) = event.total_tokens {
                values.push((MetricType::TotalTokens, total as f64));
            }
            if let Some(cost) = event.estimated_cost {
                values.push((MetricType::EstimatedCost, cost));
            }
        }

        if let Some(memory) = event.memory_used {
            values.push((MetricType::MemoryUsed, memory));
        }

        Self {
            entity: event.entity(),
            timestamp: event.timestamp,
            request_id: event.request_id,
            values,
            prompt_tokens: event.prompt_tokens,
            total_tokens: event.total_tokens,
            error: event.error.clone(),
        }
    }

    /// Value of one metric in this snapshot, if the event carried it
    pub fn value(&self, metric: MetricType) -> Option<f64> {
        self.values
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }
}

/// Closed set of finding types surfaced to the alerting collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    StatisticalSpike,
    StatisticalOutlier,
    TimeSeriesAnomaly,
    CorrelationDivergence,
    CostOptimization,
    ErrorRateSpike,
    InferenceTimeTrend,
    CrossApplicationOutlier,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::StatisticalSpike => "statistical_spike",
            AnomalyType::StatisticalOutlier => "statistical_outlier",
            AnomalyType::TimeSeriesAnomaly => "time_series_anomaly",
            AnomalyType::CorrelationDivergence => "correlation_divergence",
            AnomalyType::CostOptimization => "cost_optimization",
            AnomalyType::ErrorRateSpike => "error_rate_spike",
            AnomalyType::InferenceTimeTrend => "inference_time_trend",
            AnomalyType::CrossApplicationOutlier => "cross_application_outlier",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost-optimization finding subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostInsight {
    HighPromptRatio,
    ModelAlternative,
    UnderutilizedContext,
    PeakHourUsage,
}

impl CostInsight {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostInsight::HighPromptRatio => "high_prompt_ratio",
            CostInsight::ModelAlternative => "model_alternative",
            CostInsight::UnderutilizedContext => "underutilized_context",
            CostInsight::PeakHourUsage => "peak_hour_usage",
        }
    }
}

impl std::fmt::Display for CostInsight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity levels for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Map a deviation measured in standard deviations onto a severity
    pub fn from_sigma(sigma: f64) -> Self {
        if sigma >= 5.0 {
            Severity::Critical
        } else if sigma >= 4.0 {
            Severity::High
        } else {
            Severity::Warning
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Which side of the expectation a finding sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    High,
    Low,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::High => write!(f, "high"),
            Direction::Low => write!(f, "low"),
        }
    }
}

/// Statistical context carried by a finding; fields are per-detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iqr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_z_score: Option<f64>,
    pub sample_count: usize,
}

/// A structured finding returned to the caller
///
/// Immutable once built; the engine retains only its dedup signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub entity: EntityKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricType>,
    pub severity: Severity,
    pub value: f64,
    pub expected: f64,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<CostInsight>,
    pub context: AnomalyContext,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl Anomaly {
    /// Signature used for deduplication: type + entity + discriminant
    pub fn signature(&self) -> Signature {
        let discriminant = match self.subtype {
            Some(insight) => insight.as_str().to_string(),
            None => match self.metric {
                Some(metric) => format!("{}:{}", metric, self.direction),
                None => self.direction.to_string(),
            },
        };
        Signature {
            anomaly_type: self.anomaly_type,
            entity: self.entity.clone(),
            discriminant,
        }
    }
}

/// Dedup signature for a finding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub anomaly_type: AnomalyType,
    pub entity: EntityKey,
    pub discriminant: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_event() -> TelemetryEvent {
        TelemetryEvent {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            application: "chat-frontend".to_string(),
            inference_time: 1.2,
            success: true,
            prompt_tokens: 200,
            completion_tokens: Some(120),
            total_tokens: Some(320),
            estimated_cost: Some(0.012),
            error: None,
            memory_used: Some(512.0),
        }
    }

    #[test]
    fn test_valid_success_event() {
        assert!(base_event().validate().is_ok());
    }

    #[test]
    fn test_success_event_requires_usage_fields() {
        let mut event = base_event();
        event.completion_tokens = None;
        assert_eq!(
            event.validate(),
            Err(EventError::MissingField {
                field: "completion_tokens"
            })
        );

        let mut event = base_event();
        event.estimated_cost = None;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_failure_event_requires_error() {
        let mut event = base_event();
        event.success = false;
        event.error = None;
        assert_eq!(
            event.validate(),
            Err(EventError::MissingField { field: "error" })
        );

        event.error = Some("rate limited".to_string());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_invalid_inference_time_rejected() {
        let mut event = base_event();
        event.inference_time = f64::NAN;
        assert!(event.validate().is_err());

        event.inference_time = -1.0;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_snapshot_carries_derived_token_ratio() {
        let event = base_event();
        let snapshot = MetricSnapshot::from_event(&event);

        assert_eq!(snapshot.value(MetricType::InferenceTime), Some(1.2));
        assert_eq!(snapshot.value(MetricType::TokenRatio), Some(120.0 / 200.0));
        assert_eq!(snapshot.value(MetricType::MemoryUsed), Some(512.0));
    }

    #[test]
    fn test_snapshot_for_failure_omits_usage_metrics() {
        let mut event = base_event();
        event.success = false;
        event.error = Some("timeout".to_string());
        event.completion_tokens = None;
        event.total_tokens = None;
        event.estimated_cost = None;

        let snapshot = MetricSnapshot::from_event(&event);
        assert!(snapshot.value(MetricType::TotalTokens).is_none());
        assert!(snapshot.value(MetricType::EstimatedCost).is_none());
        assert!(snapshot.value(MetricType::InferenceTime).is_some());
    }

    #[test]
    fn test_metric_type_round_trip() {
        for metric in MetricType::ALL {
            assert_eq!(metric.as_str().parse::<MetricType>().unwrap(), metric);
        }
        assert!("wall_clock".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_signature_separates_subtypes() {
        let mut anomaly = Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::CostOptimization,
            entity: EntityKey::new("openai", "gpt-4", "chat"),
            metric: None,
            severity: Severity::Warning,
            value: 0.9,
            expected: 0.8,
            direction: Direction::High,
            subtype: Some(CostInsight::HighPromptRatio),
            context: AnomalyContext::default(),
            timestamp: Utc::now(),
            description: String::new(),
        };
        let first = anomaly.signature();
        anomaly.subtype = Some(CostInsight::ModelAlternative);
        assert_ne!(first, anomaly.signature());
    }
}

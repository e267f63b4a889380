//! Engine facade composing the store, detectors and analyzers
//!
//! One ingestion writer drives `ingest_event`/`add_metric` and
//! `detect_anomalies` in arrival order per entity; the periodic analyzer
//! reads the same state concurrently through per-entry snapshots. Detectors
//! are isolated from each other: an unmet precondition or a degenerate
//! input in one never stops the rest from running for the same event.

use crate::cost::{CostConfig, CostFinding, CostPatternAnalyzer, ModelCatalog};
use crate::dedup::{AnomalyDeduplicator, DedupConfig, ErrorSpike, RecurringErrorTracker};
use crate::detect::{
    CorrelationConfig, CorrelationDetector, DivergenceFinding, SeasonalConfig, SeasonalFinding,
    SeasonalTrendDetector, StatisticalConfig, StatisticalDetector, StatisticalKind,
};
use crate::models::{
    Anomaly, AnomalyContext, AnomalyType, Direction, EntityKey, EventError, MetricPoint,
    MetricSnapshot, MetricType, Severity, TelemetryEvent,
};
use crate::observability::MonitorMetrics;
use crate::periodic::{CancelFlag, CrossEntityFinding, PeriodicAnalyzer, PeriodicConfig, TrendFinding};
use crate::store::{MetricStore, StoreConfig};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Constructor-time configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Recent points the synchronous detectors evaluate
    pub window_size: usize,
    /// Points retained per metric series
    pub lookback_period: usize,
    /// Detection threshold in standard deviations
    pub alert_sensitivity: f64,
    /// Points required before statistical checks run
    pub min_data_points: usize,
    /// Season length in hours for the time-series detector
    pub seasonal_period: usize,
    /// Minimum interval between periodic analysis passes
    pub periodic_cadence: Duration,
    /// Entity count past which store growth is logged
    pub entity_soft_limit: usize,
    /// The metric pair watched for correlation divergence
    pub watched_pair: (MetricType, MetricType),
    /// Deduplication and recurring-error settings
    pub dedup: DedupConfig,
    /// Cost insight thresholds
    pub cost: CostConfig,
    /// Static model knowledge for cost insights
    pub catalog: ModelCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            lookback_period: 1000,
            alert_sensitivity: 3.0,
            min_data_points: 30,
            seasonal_period: 24,
            periodic_cadence: Duration::from_secs(30 * 60),
            entity_soft_limit: 10_000,
            watched_pair: (MetricType::InferenceTime, MetricType::MemoryUsed),
            dedup: DedupConfig::default(),
            cost: CostConfig::default(),
            catalog: ModelCatalog::builtin(),
        }
    }
}

/// Streaming anomaly-detection and metrics-aggregation engine
pub struct Engine {
    config: EngineConfig,
    store: MetricStore,
    statistical: StatisticalDetector,
    seasonal: SeasonalTrendDetector,
    correlation: CorrelationDetector,
    cost: CostPatternAnalyzer,
    dedup: AnomalyDeduplicator,
    errors: RecurringErrorTracker,
    periodic: PeriodicAnalyzer,
    metrics: MonitorMetrics,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let store = MetricStore::new(StoreConfig {
            lookback_period: config.lookback_period,
            entity_soft_limit: config.entity_soft_limit,
        });
        let statistical = StatisticalDetector::new(StatisticalConfig {
            window_size: config.window_size,
            min_data_points: config.min_data_points,
            sensitivity: config.alert_sensitivity,
            ..Default::default()
        });
        let seasonal = SeasonalTrendDetector::new(SeasonalConfig {
            period: config.seasonal_period,
            sensitivity: config.alert_sensitivity,
            ..Default::default()
        });
        let correlation = CorrelationDetector::new(CorrelationConfig {
            min_data_points: config.min_data_points,
            sensitivity: config.alert_sensitivity,
            window_size: config.window_size,
            watched_pair: config.watched_pair,
            ..Default::default()
        });
        let cost = CostPatternAnalyzer::new(config.cost.clone(), config.catalog.clone());
        let dedup = AnomalyDeduplicator::new(config.dedup.clone());
        let errors = RecurringErrorTracker::new(config.dedup.clone());
        let periodic = PeriodicAnalyzer::new(PeriodicConfig {
            cadence: config.periodic_cadence,
            sensitivity: config.alert_sensitivity,
            min_data_points: config.min_data_points,
            window_size: config.window_size,
            ..Default::default()
        });

        Self {
            config,
            store,
            statistical,
            seasonal,
            correlation,
            cost,
            dedup,
            errors,
            periodic,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Validate an event and fan its metrics into the rolling store
    ///
    /// Returns the snapshot to hand to `detect_anomalies`. A schema
    /// violation leaves the engine untouched.
    pub fn ingest_event(&self, event: &TelemetryEvent) -> Result<MetricSnapshot, EventError> {
        event.validate()?;

        let snapshot = MetricSnapshot::from_event(event);
        for (metric, value) in &snapshot.values {
            self.record(
                *metric,
                &snapshot.entity,
                *value,
                snapshot.timestamp,
                Some(snapshot.request_id),
            );
        }

        if event.success {
            if let (Some(total), Some(cost)) = (event.total_tokens, event.estimated_cost) {
                self.cost.observe(
                    &snapshot.entity,
                    event.timestamp,
                    event.prompt_tokens,
                    total,
                    cost,
                );
            }
        }

        self.metrics.inc_events_ingested();
        self.metrics.set_tracked(
            self.store.series_count() as i64,
            self.store.entity_count() as i64,
        );

        Ok(snapshot)
    }

    /// Append a single metric by name; unknown names are a logged no-op
    pub fn add_metric(
        &self,
        metric_type: &str,
        entity: &EntityKey,
        value: f64,
        timestamp: DateTime<Utc>,
        request_id: Option<Uuid>,
    ) {
        match MetricType::from_str(metric_type) {
            Ok(metric) => self.record(metric, entity, value, timestamp, request_id),
            Err(err) => debug!(entity = %entity, "{err}; dropping point"),
        }
    }

    fn record(
        &self,
        metric: MetricType,
        entity: &EntityKey,
        value: f64,
        timestamp: DateTime<Utc>,
        request_id: Option<Uuid>,
    ) {
        self.store
            .add(metric, entity, MetricPoint::new(value, timestamp, request_id));
        self.correlation.on_append(entity, &self.store);
    }

    /// Run every applicable detector for one ingested event
    ///
    /// Findings are deduplicated and returned in deterministic detector
    /// order: statistical, seasonal, correlation, cost, error-rate.
    pub fn detect_anomalies(&self, snapshot: &MetricSnapshot) -> Vec<Anomaly> {
        let started = Instant::now();
        let mut findings = Vec::new();

        for (metric, value) in &snapshot.values {
            let window = self
                .store
                .window(*metric, &snapshot.entity, self.config.window_size);
            if let Some(finding) = self.statistical.evaluate(&window, *value) {
                findings.push(self.statistical_anomaly(snapshot, *metric, *value, finding));
            }
        }

        for (metric, _) in &snapshot.values {
            let points = self.store.snapshot(*metric, &snapshot.entity);
            if let Some(finding) = self.seasonal.evaluate(&points) {
                findings.push(self.seasonal_anomaly(snapshot, *metric, finding));
            }
        }

        let (first, second) = self.config.watched_pair;
        if let (Some(current_first), Some(current_second)) =
            (snapshot.value(first), snapshot.value(second))
        {
            if let Some(finding) = self.correlation.check_divergence(
                &snapshot.entity,
                &self.store,
                current_first,
                current_second,
            ) {
                findings.push(self.divergence_anomaly(snapshot, current_first, finding));
            }
        }

        for finding in self
            .cost
            .event_insights(&snapshot.entity, snapshot.prompt_tokens, snapshot.total_tokens)
        {
            findings.push(self.cost_anomaly(&snapshot.entity, snapshot.timestamp, finding));
        }

        if let Some(error) = &snapshot.error {
            if let Some(spike) = self.errors.observe(&snapshot.entity, error, snapshot.timestamp)
            {
                findings.push(self.error_anomaly(snapshot, spike));
            }
        }

        let surfaced = self.deduplicate(findings);
        self.metrics
            .observe_detection_latency(started.elapsed().as_secs_f64());
        surfaced
    }

    /// Timer-driven deeper pass; a no-op before the cadence elapses
    pub fn perform_periodic_analysis(&self) -> Vec<Anomaly> {
        if !self.periodic.try_begin() {
            return Vec::new();
        }

        let started = Instant::now();
        let now = Utc::now();
        let cancel = self.periodic.cancel_flag();
        let mut findings = Vec::new();

        for finding in self.periodic.trend_findings(&self.store) {
            findings.push(self.trend_anomaly(now, finding));
        }

        for finding in self.periodic.cross_entity_findings(&self.store) {
            findings.push(self.cross_entity_anomaly(now, finding));
        }

        for entity in self.cost.entities() {
            if cancel.is_cancelled() {
                debug!("Periodic cost scan cancelled");
                break;
            }
            for finding in self.cost.periodic_insights(&entity) {
                findings.push(self.cost_anomaly(&entity, now, finding));
            }
        }

        let surfaced = self.deduplicate(findings);
        self.metrics
            .observe_periodic_scan(started.elapsed().as_secs_f64());
        surfaced
    }

    /// Cancellation flag tripping the current and subsequent periodic scans
    pub fn periodic_cancel_flag(&self) -> CancelFlag {
        self.periodic.cancel_flag()
    }

    /// Rolling store, for read-only inspection
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Metrics handle shared with the HTTP exposition endpoint
    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics.clone()
    }

    fn deduplicate(&self, findings: Vec<Anomaly>) -> Vec<Anomaly> {
        let mut surfaced = Vec::with_capacity(findings.len());
        for anomaly in findings {
            if self.dedup.admit(&anomaly.signature(), anomaly.timestamp) {
                self.metrics
                    .inc_anomalies_detected(anomaly.anomaly_type.as_str());
                surfaced.push(anomaly);
            } else {
                self.metrics.inc_dedup_suppressed();
            }
        }
        surfaced
    }

    fn statistical_anomaly(
        &self,
        snapshot: &MetricSnapshot,
        metric: MetricType,
        value: f64,
        finding: crate::detect::StatisticalFinding,
    ) -> Anomaly {
        let (anomaly_type, severity, description) = match finding.kind {
            StatisticalKind::Spike => {
                let z = finding.z_score.unwrap_or(0.0);
                (
                    AnomalyType::StatisticalSpike,
                    Severity::from_sigma(z),
                    format!(
                        "{} of {:.4} is {:.1} standard deviations above the mean {:.4}",
                        metric, value, z, finding.mean
                    ),
                )
            }
            StatisticalKind::Outlier => (
                AnomalyType::StatisticalOutlier,
                Severity::Warning,
                format!(
                    "{} of {:.4} exceeds the upper IQR fence {:.4}",
                    metric,
                    value,
                    finding.upper_fence.unwrap_or(0.0)
                ),
            ),
        };

        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type,
            entity: snapshot.entity.clone(),
            metric: Some(metric),
            severity,
            value,
            expected: finding.mean,
            direction: Direction::High,
            subtype: None,
            context: AnomalyContext {
                z_score: finding.z_score,
                mean: Some(finding.mean),
                std_dev: Some(finding.std_dev),
                iqr: finding.iqr,
                threshold: finding.upper_fence,
                sample_count: finding.sample_count,
                ..Default::default()
            },
            timestamp: snapshot.timestamp,
            description,
        }
    }

    fn seasonal_anomaly(
        &self,
        snapshot: &MetricSnapshot,
        metric: MetricType,
        finding: SeasonalFinding,
    ) -> Anomaly {
        let sigma = if finding.threshold > f64::EPSILON {
            finding.residual.abs() / (finding.threshold / self.config.alert_sensitivity)
        } else {
            0.0
        };
        let direction = if finding.residual >= 0.0 {
            Direction::High
        } else {
            Direction::Low
        };

        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::TimeSeriesAnomaly,
            entity: snapshot.entity.clone(),
            metric: Some(metric),
            severity: Severity::from_sigma(sigma),
            value: finding.value,
            expected: finding.expected,
            direction,
            subtype: None,
            context: AnomalyContext {
                residual: Some(finding.residual),
                threshold: Some(finding.threshold),
                sample_count: 0,
                ..Default::default()
            },
            timestamp: finding.bucket_start,
            description: format!(
                "{} hourly mean {:.4} deviates from seasonal expectation {:.4} by {:.4} (threshold {:.4})",
                metric, finding.value, finding.expected, finding.residual, finding.threshold
            ),
        }
    }

    fn divergence_anomaly(
        &self,
        snapshot: &MetricSnapshot,
        value: f64,
        finding: DivergenceFinding,
    ) -> Anomaly {
        let gap = (finding.z_first - finding.z_second).abs();
        let direction = if finding.z_first >= finding.z_second {
            Direction::High
        } else {
            Direction::Low
        };

        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::CorrelationDivergence,
            entity: snapshot.entity.clone(),
            metric: Some(finding.pair.0),
            severity: Severity::from_sigma(gap),
            value,
            expected: snapshot.value(finding.pair.1).unwrap_or(0.0),
            direction,
            subtype: None,
            context: AnomalyContext {
                z_score: Some(finding.z_first),
                peer_z_score: Some(finding.z_second),
                correlation: Some(finding.correlation),
                sample_count: 0,
                ..Default::default()
            },
            timestamp: snapshot.timestamp,
            description: format!(
                "{} and {} usually move together (r={:.2}) but diverged: z-scores {:.1} vs {:.1}",
                finding.pair.0, finding.pair.1, finding.correlation, finding.z_first,
                finding.z_second
            ),
        }
    }

    fn cost_anomaly(
        &self,
        entity: &EntityKey,
        timestamp: DateTime<Utc>,
        finding: CostFinding,
    ) -> Anomaly {
        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::CostOptimization,
            entity: entity.clone(),
            metric: None,
            severity: Severity::Warning,
            value: finding.value,
            expected: finding.expected,
            direction: Direction::High,
            subtype: Some(finding.insight),
            context: AnomalyContext::default(),
            timestamp,
            description: finding.description,
        }
    }

    fn error_anomaly(&self, snapshot: &MetricSnapshot, spike: ErrorSpike) -> Anomaly {
        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::ErrorRateSpike,
            entity: spike.entity.clone(),
            metric: None,
            severity: Severity::High,
            value: spike.count as f64,
            expected: 0.0,
            direction: Direction::High,
            subtype: None,
            context: AnomalyContext {
                sample_count: spike.count,
                ..Default::default()
            },
            timestamp: snapshot.timestamp,
            description: format!(
                "Error `{}` recurred {} times within the last hour",
                spike.error, spike.count
            ),
        }
    }

    fn trend_anomaly(&self, timestamp: DateTime<Utc>, finding: TrendFinding) -> Anomaly {
        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::InferenceTimeTrend,
            entity: finding.entity.clone(),
            metric: Some(MetricType::InferenceTime),
            severity: Severity::from_sigma(finding.shift_sigma),
            value: finding.second_half_mean,
            expected: finding.first_half_mean,
            direction: Direction::High,
            subtype: None,
            context: AnomalyContext {
                mean: Some(finding.first_half_mean),
                std_dev: Some(finding.first_half_std),
                z_score: Some(finding.shift_sigma),
                sample_count: 0,
                ..Default::default()
            },
            timestamp,
            description: format!(
                "Inference time drifted from {:.4}s to {:.4}s ({:.1} sigma)",
                finding.first_half_mean, finding.second_half_mean, finding.shift_sigma
            ),
        }
    }

    fn cross_entity_anomaly(
        &self,
        timestamp: DateTime<Utc>,
        finding: CrossEntityFinding,
    ) -> Anomaly {
        let direction = if finding.z_score >= 0.0 {
            Direction::High
        } else {
            Direction::Low
        };

        Anomaly {
            id: Uuid::new_v4(),
            anomaly_type: AnomalyType::CrossApplicationOutlier,
            entity: finding.entity.clone(),
            metric: Some(MetricType::InferenceTime),
            severity: Severity::from_sigma(finding.z_score.abs()),
            value: finding.application_mean,
            expected: finding.peer_mean,
            direction,
            subtype: None,
            context: AnomalyContext {
                z_score: Some(finding.z_score),
                mean: Some(finding.peer_mean),
                std_dev: Some(finding.peer_std),
                sample_count: 0,
                ..Default::default()
            },
            timestamp,
            description: format!(
                "Application {} averages {:.4}s inference time vs {:.4}s across peers on the same model",
                finding.entity.application, finding.application_mean, finding.peer_mean
            ),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

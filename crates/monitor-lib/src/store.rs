//! Bounded rolling metric history per (metric type, entity)
//!
//! One ingestion writer appends; the periodic analyzer reads. Each series
//! lives in its own dashmap entry, so readers take short per-entry locks and
//! a full scan never blocks the writer. Points are cloned out as snapshots;
//! a partially appended point is never observable.

use crate::models::{EntityKey, MetricPoint, MetricType};
use dashmap::DashMap;
use std::str::FromStr;
use tracing::{debug, warn};

/// Default per-series capacity
const DEFAULT_LOOKBACK: usize = 1000;

/// Soft limit on distinct entities before the store starts warning
const DEFAULT_ENTITY_SOFT_LIMIT: usize = 10_000;

/// Configuration for the series store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum points retained per (metric, entity) series
    pub lookback_period: usize,
    /// Entity count past which growth is logged; nothing is evicted
    pub entity_soft_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lookback_period: DEFAULT_LOOKBACK,
            entity_soft_limit: DEFAULT_ENTITY_SOFT_LIMIT,
        }
    }
}

/// Key of one series in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub metric: MetricType,
    pub entity: EntityKey,
}

/// Bounded ordered sequence of points with ring-buffer eviction
#[derive(Debug, Clone)]
pub struct MetricSeries {
    points: std::collections::VecDeque<MetricPoint>,
    capacity: usize,
}

impl MetricSeries {
    fn new(capacity: usize) -> Self {
        Self {
            points: std::collections::VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Append a point, dropping the oldest when at capacity
    fn push(&mut self, point: MetricPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Last `n` values, oldest first
    fn window_values(&self, n: usize) -> Vec<f64> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).map(|p| p.value).collect()
    }

    /// Last `n` points, oldest first
    fn window_points(&self, n: usize) -> Vec<MetricPoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).cloned().collect()
    }
}

/// Rolling per-entity metric history
pub struct MetricStore {
    series: DashMap<SeriesKey, MetricSeries>,
    entities: DashMap<EntityKey, ()>,
    config: StoreConfig,
}

impl MetricStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            series: DashMap::new(),
            entities: DashMap::new(),
            config,
        }
    }

    /// Append one point to the series for (metric, entity)
    pub fn add(&self, metric: MetricType, entity: &EntityKey, point: MetricPoint) {
        if self.entities.insert(entity.clone(), ()).is_none()
            && self.entities.len() > self.config.entity_soft_limit
        {
            warn!(
                entities = self.entities.len(),
                soft_limit = self.config.entity_soft_limit,
                "Tracked entity count exceeds the soft limit; memory grows with key cardinality"
            );
        }

        let key = SeriesKey {
            metric,
            entity: entity.clone(),
        };
        self.series
            .entry(key)
            .or_insert_with(|| MetricSeries::new(self.config.lookback_period))
            .push(point);
    }

    /// Append by metric name; unknown names are a logged no-op, never an error
    pub fn add_named(&self, metric: &str, entity: &EntityKey, point: MetricPoint) {
        match MetricType::from_str(metric) {
            Ok(metric) => self.add(metric, entity, point),
            Err(err) => {
                debug!(metric = %metric, entity = %entity, "{err}; dropping point");
            }
        }
    }

    /// Last `n` values of a series, oldest first
    pub fn window(&self, metric: MetricType, entity: &EntityKey, n: usize) -> Vec<f64> {
        self.with_series(metric, entity, |s| s.window_values(n))
            .unwrap_or_default()
    }

    /// Last `n` points of a series, oldest first
    pub fn recent_points(
        &self,
        metric: MetricType,
        entity: &EntityKey,
        n: usize,
    ) -> Vec<MetricPoint> {
        self.with_series(metric, entity, |s| s.window_points(n))
            .unwrap_or_default()
    }

    /// Full retained history of a series, oldest first
    pub fn snapshot(&self, metric: MetricType, entity: &EntityKey) -> Vec<MetricPoint> {
        self.with_series(metric, entity, |s| s.window_points(s.len()))
            .unwrap_or_default()
    }

    /// Number of points currently retained for a series
    pub fn len(&self, metric: MetricType, entity: &EntityKey) -> usize {
        self.with_series(metric, entity, |s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Every entity observed so far
    pub fn entities(&self) -> Vec<EntityKey> {
        self.entities.iter().map(|e| e.key().clone()).collect()
    }

    /// Entities with at least one point for `metric`
    pub fn entities_with(&self, metric: MetricType) -> Vec<EntityKey> {
        self.series
            .iter()
            .filter(|entry| entry.key().metric == metric && !entry.value().is_empty())
            .map(|entry| entry.key().entity.clone())
            .collect()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn with_series<T>(
        &self,
        metric: MetricType,
        entity: &EntityKey,
        f: impl FnOnce(&MetricSeries) -> T,
    ) -> Option<T> {
        let key = SeriesKey {
            metric,
            entity: entity.clone(),
        };
        self.series.get(&key).map(|s| f(s.value()))
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

//! Cross-metric correlation tracking and divergence detection
//!
//! Per entity, the full pairwise Pearson matrix is recomputed every
//! `recompute_interval` appended points from timestamp-aligned,
//! forward-filled series. Divergence is only checked for the configured
//! watched pair, and only once its historical correlation is strong;
//! weakly correlated pairs would just add noise.

use crate::models::{EntityKey, MetricPoint, MetricType};
use crate::store::MetricStore;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// Configuration for the correlation detector
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Appends per entity between matrix recomputations
    pub recompute_interval: usize,
    /// Minimum aligned samples for a matrix entry
    pub min_data_points: usize,
    /// |r| above which a pair counts as strongly correlated
    pub strong_threshold: f64,
    /// Divergence fires when |z1 − z2| > divergence_factor × sensitivity
    pub divergence_factor: f64,
    /// Base sensitivity, shared with the statistical checks
    pub sensitivity: f64,
    /// Window used for the per-metric z-scores
    pub window_size: usize,
    /// The pair whose divergence is watched
    pub watched_pair: (MetricType, MetricType),
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            recompute_interval: 50,
            min_data_points: 30,
            strong_threshold: 0.7,
            divergence_factor: 1.5,
            sensitivity: 3.0,
            window_size: 100,
            watched_pair: (MetricType::InferenceTime, MetricType::MemoryUsed),
        }
    }
}

/// A watched pair moving apart despite strong historical correlation
#[derive(Debug, Clone)]
pub struct DivergenceFinding {
    pub pair: (MetricType, MetricType),
    pub z_first: f64,
    pub z_second: f64,
    pub correlation: f64,
}

#[derive(Default)]
struct PairState {
    appends_since_recompute: usize,
    matrix: HashMap<(MetricType, MetricType), f64>,
}

/// Tracks pairwise metric correlation per entity and flags divergence
pub struct CorrelationDetector {
    config: CorrelationConfig,
    states: DashMap<EntityKey, PairState>,
}

impl CorrelationDetector {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Record one appended point for `entity`, recomputing the matrix when due
    pub fn on_append(&self, entity: &EntityKey, store: &MetricStore) {
        let mut state = self.states.entry(entity.clone()).or_default();
        state.appends_since_recompute += 1;
        if state.appends_since_recompute < self.config.recompute_interval {
            return;
        }
        state.appends_since_recompute = 0;

        state.matrix.clear();
        for (i, &a) in MetricType::ALL.iter().enumerate() {
            let points_a = store.snapshot(a, entity);
            if points_a.len() < self.config.min_data_points {
                continue;
            }
            for &b in &MetricType::ALL[i + 1..] {
                let points_b = store.snapshot(b, entity);
                if points_b.len() < self.config.min_data_points {
                    continue;
                }
                let (xs, ys) = align(&points_a, &points_b);
                if xs.len() < self.config.min_data_points {
                    continue;
                }
                if let Some(r) = pearson(&xs, &ys) {
                    state.matrix.insert((a, b), r);
                }
            }
        }
    }

    /// Historical coefficient for a pair, if established
    pub fn coefficient(&self, entity: &EntityKey, a: MetricType, b: MetricType) -> Option<f64> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.states
            .get(entity)
            .and_then(|state| state.matrix.get(&key).copied())
    }

    /// Check the watched pair for divergence given the current values
    pub fn check_divergence(
        &self,
        entity: &EntityKey,
        store: &MetricStore,
        current_first: f64,
        current_second: f64,
    ) -> Option<DivergenceFinding> {
        let (a, b) = self.config.watched_pair;
        let correlation = self.coefficient(entity, a, b)?;
        if correlation.abs() <= self.config.strong_threshold {
            debug!(
                entity = %entity,
                correlation,
                "Watched pair not strongly correlated; skipping divergence check"
            );
            return None;
        }

        let z_first = self.window_zscore(store, a, entity, current_first)?;
        let z_second = self.window_zscore(store, b, entity, current_second)?;

        if (z_first - z_second).abs() > self.config.divergence_factor * self.config.sensitivity {
            return Some(DivergenceFinding {
                pair: (a, b),
                z_first,
                z_second,
                correlation,
            });
        }

        None
    }

    fn window_zscore(
        &self,
        store: &MetricStore,
        metric: MetricType,
        entity: &EntityKey,
        value: f64,
    ) -> Option<f64> {
        let window = store.window(metric, entity, self.config.window_size);
        if window.len() < self.config.min_data_points {
            return None;
        }
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();
        if std_dev <= f64::EPSILON {
            return None;
        }
        Some((value - mean) / std_dev)
    }
}

impl Default for CorrelationDetector {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

/// Align two series on the union of their timestamps, forward-filling each
/// side; pairs are emitted once both series have started.
fn align(a: &[MetricPoint], b: &[MetricPoint]) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let (mut ia, mut ib) = (0usize, 0usize);
    let (mut last_a, mut last_b) = (None, None);

    while ia < a.len() || ib < b.len() {
        let ta = a.get(ia).map(|p| p.timestamp);
        let tb = b.get(ib).map(|p| p.timestamp);

        match (ta, tb) {
            (Some(ta), Some(tb)) if ta == tb => {
                last_a = Some(a[ia].value);
                last_b = Some(b[ib].value);
                ia += 1;
                ib += 1;
            }
            (Some(ta), Some(tb)) if ta < tb => {
                last_a = Some(a[ia].value);
                ia += 1;
            }
            (Some(_), Some(_)) => {
                last_b = Some(b[ib].value);
                ib += 1;
            }
            (Some(_), None) => {
                last_a = Some(a[ia].value);
                ia += 1;
            }
            (None, Some(_)) => {
                last_b = Some(b[ib].value);
                ib += 1;
            }
            (None, None) => break,
        }

        if let (Some(x), Some(y)) = (last_a, last_b) {
            xs.push(x);
            ys.push(y);
        }
    }

    (xs, ys)
}

/// Pearson correlation coefficient; None when either side is constant
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }

    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    let r = cov / denom;
    r.is_finite().then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MetricStore, StoreConfig};
    use chrono::{Duration, TimeZone, Utc};

    fn entity() -> EntityKey {
        EntityKey::new("openai", "gpt-4", "chat")
    }

    fn at(minute: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    /// Varying latency signal with matching memory usage
    fn correlated_value(i: i64) -> f64 {
        1.0 + ((i % 7) as f64) * 0.1
    }

    fn populate_correlated(store: &MetricStore, detector: &CorrelationDetector, n: i64) {
        for i in 0..n {
            let latency = correlated_value(i);
            let memory = latency * 100.0 + ((i % 3) as f64) * 0.5;
            let point = |v: f64| MetricPoint::new(v, at(i), None);
            store.add(MetricType::InferenceTime, &entity(), point(latency));
            store.add(MetricType::MemoryUsed, &entity(), point(memory));
            detector.on_append(&entity(), store);
            detector.on_append(&entity(), store);
        }
    }

    #[test]
    fn test_matrix_established_after_recompute_interval() {
        let store = MetricStore::new(StoreConfig::default());
        let detector = CorrelationDetector::default();

        populate_correlated(&store, &detector, 20);
        assert!(detector
            .coefficient(&entity(), MetricType::InferenceTime, MetricType::MemoryUsed)
            .is_none());

        populate_correlated(&store, &detector, 60);
        let r = detector
            .coefficient(&entity(), MetricType::InferenceTime, MetricType::MemoryUsed)
            .unwrap();
        assert!(r > 0.9, "expected strong correlation, got {r}");
    }

    #[test]
    fn test_divergence_fires_for_correlated_pair() {
        let store = MetricStore::new(StoreConfig::default());
        let detector = CorrelationDetector::default();
        populate_correlated(&store, &detector, 60);

        // Latency spikes while memory stays at its usual level
        let finding = detector
            .check_divergence(&entity(), &store, 10.0, 130.0)
            .unwrap();
        assert!(finding.z_first > finding.z_second);
        assert!(finding.correlation.abs() > 0.7);
    }

    #[test]
    fn test_agreeing_values_do_not_diverge() {
        let store = MetricStore::new(StoreConfig::default());
        let detector = CorrelationDetector::default();
        populate_correlated(&store, &detector, 60);

        assert!(detector
            .check_divergence(&entity(), &store, 1.3, 131.0)
            .is_none());
    }

    #[test]
    fn test_uncorrelated_pair_never_diverges() {
        let store = MetricStore::new(StoreConfig::default());
        let detector = CorrelationDetector::default();

        for i in 0..120 {
            let latency = correlated_value(i);
            // Memory varies on an unrelated cycle
            let memory = 500.0 + ((i % 11) as f64 - 5.0) * ((i % 2) as f64 * 2.0 - 1.0) * 10.0;
            let point = |v: f64| MetricPoint::new(v, at(i), None);
            store.add(MetricType::InferenceTime, &entity(), point(latency));
            store.add(MetricType::MemoryUsed, &entity(), point(memory));
            detector.on_append(&entity(), &store);
            detector.on_append(&entity(), &store);
        }

        // Wildly divergent current values, but no established correlation
        assert!(detector
            .check_divergence(&entity(), &store, 50.0, 500.0)
            .is_none());
    }

    #[test]
    fn test_align_forward_fills_gaps() {
        let a = vec![
            MetricPoint::new(1.0, at(0), None),
            MetricPoint::new(2.0, at(2), None),
            MetricPoint::new(3.0, at(4), None),
        ];
        let b = vec![
            MetricPoint::new(10.0, at(1), None),
            MetricPoint::new(20.0, at(4), None),
        ];

        let (xs, ys) = align(&a, &b);
        // Pairs start at minute 1, once both series have a value
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(ys, vec![10.0, 10.0, 20.0]);
    }

    #[test]
    fn test_pearson_on_linear_series() {
        let xs: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x + 1.0).collect();
        assert!((pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-9);

        let neg: Vec<f64> = xs.iter().map(|x| -x).collect();
        assert!((pearson(&xs, &neg).unwrap() + 1.0).abs() < 1e-9);

        let constant = vec![5.0; 50];
        assert!(pearson(&xs, &constant).is_none());
    }
}

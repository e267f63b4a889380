//! Periodic trend and cross-entity analysis
//!
//! Runs no more often than its cadence, reads only per-entry snapshots from
//! the store and checks a cancellation flag between entities so shutdown
//! stays bounded. The surrounding scheduling (ticker + shutdown broadcast)
//! lives in the pipeline module.

use crate::models::{EntityKey, MetricType};
use crate::store::MetricStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the periodic analyzer
#[derive(Debug, Clone)]
pub struct PeriodicConfig {
    /// Minimum interval between full analysis passes
    pub cadence: Duration,
    /// Threshold in first-half standard deviations for the trend check
    pub sensitivity: f64,
    /// Minimum points per half for the trend check
    pub min_data_points: usize,
    /// Recent points per application for the cross-entity check
    pub window_size: usize,
    /// Applications sharing (provider, model) required for peer comparison
    pub min_peer_group: usize,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(30 * 60),
            sensitivity: 3.0,
            min_data_points: 30,
            window_size: 100,
            min_peer_group: 3,
        }
    }
}

/// Cooperative cancellation shared between the analyzer and its scheduler
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Re-arm before a new scan
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Sustained inference-time growth for one entity
#[derive(Debug, Clone)]
pub struct TrendFinding {
    pub entity: EntityKey,
    pub first_half_mean: f64,
    pub second_half_mean: f64,
    pub first_half_std: f64,
    /// Growth measured in first-half standard deviations
    pub shift_sigma: f64,
}

/// An application out of line with peers on the same (provider, model)
#[derive(Debug, Clone)]
pub struct CrossEntityFinding {
    pub entity: EntityKey,
    pub application_mean: f64,
    pub peer_mean: f64,
    pub peer_std: f64,
    pub z_score: f64,
}

/// Timer-driven deeper analysis over the shared store
pub struct PeriodicAnalyzer {
    config: PeriodicConfig,
    last_run: Mutex<Option<Instant>>,
    cancel: CancelFlag,
}

impl PeriodicAnalyzer {
    pub fn new(config: PeriodicConfig) -> Self {
        Self {
            config,
            last_run: Mutex::new(None),
            cancel: CancelFlag::new(),
        }
    }

    /// Cancellation flag for schedulers to trip on shutdown
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Claim a run slot; false while the cadence has not elapsed
    pub fn try_begin(&self) -> bool {
        let mut last = self.last_run.lock().expect("periodic lock poisoned");
        if let Some(at) = *last {
            if at.elapsed() < self.config.cadence {
                debug!(
                    elapsed_secs = at.elapsed().as_secs(),
                    cadence_secs = self.config.cadence.as_secs(),
                    "Skipping periodic analysis, cadence not elapsed"
                );
                return false;
            }
        }
        *last = Some(Instant::now());
        self.cancel.reset();
        true
    }

    /// Compare each entity's first and second half of inference-time history
    pub fn trend_findings(&self, store: &MetricStore) -> Vec<TrendFinding> {
        let mut findings = Vec::new();

        for entity in store.entities_with(MetricType::InferenceTime) {
            if self.cancel.is_cancelled() {
                debug!("Periodic trend scan cancelled");
                break;
            }

            let points = store.snapshot(MetricType::InferenceTime, &entity);
            if points.len() < 2 * self.config.min_data_points {
                continue;
            }

            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let mid = values.len() / 2;
            let (first, second) = values.split_at(mid);

            let (first_mean, first_std) = mean_and_std(first);
            let (second_mean, _) = mean_and_std(second);

            if first_std <= f64::EPSILON {
                continue;
            }

            let shift = second_mean - first_mean;
            if shift > self.config.sensitivity * first_std {
                findings.push(TrendFinding {
                    entity,
                    first_half_mean: first_mean,
                    second_half_mean: second_mean,
                    first_half_std: first_std,
                    shift_sigma: shift / first_std,
                });
            }
        }

        findings
    }

    /// Flag applications whose recent mean is an outlier among peers sharing
    /// the same (provider, model)
    pub fn cross_entity_findings(&self, store: &MetricStore) -> Vec<CrossEntityFinding> {
        let mut groups: std::collections::HashMap<(String, String), Vec<EntityKey>> =
            std::collections::HashMap::new();
        for entity in store.entities_with(MetricType::InferenceTime) {
            groups
                .entry((entity.provider.clone(), entity.model.clone()))
                .or_default()
                .push(entity);
        }

        let mut findings = Vec::new();
        for (_, members) in groups {
            if self.cancel.is_cancelled() {
                debug!("Periodic cross-entity scan cancelled");
                break;
            }
            if members.len() < self.config.min_peer_group {
                continue;
            }

            let mut means = Vec::with_capacity(members.len());
            for entity in &members {
                let window =
                    store.window(MetricType::InferenceTime, entity, self.config.window_size);
                if window.len() < self.config.min_data_points {
                    continue;
                }
                let (mean, _) = mean_and_std(&window);
                means.push((entity.clone(), mean));
            }
            if means.len() < self.config.min_peer_group {
                continue;
            }

            // Each application is judged against its peers only; including
            // it in the reference would let a single bad application drag
            // the group statistics toward itself.
            for (index, (entity, mean)) in means.iter().enumerate() {
                let peers: Vec<f64> = means
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != index)
                    .map(|(_, (_, m))| *m)
                    .collect();
                let (peer_mean, peer_std) = mean_and_std(&peers);
                if peer_std <= f64::EPSILON {
                    continue;
                }

                let z = (mean - peer_mean) / peer_std;
                if z.abs() > self.config.sensitivity {
                    findings.push(CrossEntityFinding {
                        entity: entity.clone(),
                        application_mean: *mean,
                        peer_mean,
                        peer_std,
                        z_score: z,
                    });
                }
            }
        }

        findings
    }
}

impl Default for PeriodicAnalyzer {
    fn default() -> Self {
        Self::new(PeriodicConfig::default())
    }
}

/// Mean and sample standard deviation
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricPoint;
    use crate::store::StoreConfig;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn at(minute: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    fn app(name: &str) -> EntityKey {
        EntityKey::new("openai", "gpt-4", name)
    }

    fn feed(store: &MetricStore, entity: &EntityKey, values: impl IntoIterator<Item = f64>) {
        for (i, value) in values.into_iter().enumerate() {
            store.add(
                MetricType::InferenceTime,
                entity,
                MetricPoint::new(value, at(i as i64), None),
            );
        }
    }

    /// Stable latency around `base` with deterministic jitter
    fn stable(base: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| base + (i % 5) as f64 * 0.01).collect()
    }

    #[test]
    fn test_cadence_guard() {
        let analyzer = PeriodicAnalyzer::new(PeriodicConfig {
            cadence: Duration::from_secs(3600),
            ..Default::default()
        });

        assert!(analyzer.try_begin());
        assert!(!analyzer.try_begin());
    }

    #[test]
    fn test_zero_cadence_always_runs() {
        let analyzer = PeriodicAnalyzer::new(PeriodicConfig {
            cadence: Duration::from_secs(0),
            ..Default::default()
        });

        assert!(analyzer.try_begin());
        assert!(analyzer.try_begin());
    }

    #[test]
    fn test_trend_detected_when_second_half_degrades() {
        let analyzer = PeriodicAnalyzer::default();
        let store = MetricStore::new(StoreConfig::default());
        let entity = app("chat");

        // First half around 1.0, second half around 2.0 with the same jitter
        let mut values = stable(1.0, 40);
        values.extend(stable(2.0, 40));
        feed(&store, &entity, values);

        let findings = analyzer.trend_findings(&store);
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.entity, entity);
        assert!(finding.second_half_mean > finding.first_half_mean);
        assert!(finding.shift_sigma > 3.0);
    }

    #[test]
    fn test_stable_series_has_no_trend() {
        let analyzer = PeriodicAnalyzer::default();
        let store = MetricStore::new(StoreConfig::default());
        feed(&store, &app("chat"), stable(1.0, 80));

        assert!(analyzer.trend_findings(&store).is_empty());
    }

    #[test]
    fn test_short_history_skips_trend() {
        let analyzer = PeriodicAnalyzer::default();
        let store = MetricStore::new(StoreConfig::default());

        let mut values = stable(1.0, 20);
        values.extend(stable(5.0, 20));
        feed(&store, &app("chat"), values);

        assert!(analyzer.trend_findings(&store).is_empty());
    }

    #[test]
    fn test_cross_entity_outlier_against_peers() {
        let analyzer = PeriodicAnalyzer::default();
        let store = MetricStore::new(StoreConfig::default());

        // Peer applications hover around 1.0 with slightly different levels;
        // one application runs far slower on the same model.
        feed(&store, &app("search"), stable(0.98, 60));
        feed(&store, &app("summarize"), stable(1.0, 60));
        feed(&store, &app("extract"), stable(1.02, 60));
        feed(&store, &app("chat"), stable(9.0, 60));

        let findings = analyzer.cross_entity_findings(&store);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].entity, app("chat"));
        assert!(findings[0].z_score > 0.0);
    }

    #[test]
    fn test_small_peer_group_is_skipped() {
        let analyzer = PeriodicAnalyzer::default();
        let store = MetricStore::new(StoreConfig::default());

        feed(&store, &app("search"), stable(1.0, 60));
        feed(&store, &app("chat"), stable(9.0, 60));

        assert!(analyzer.cross_entity_findings(&store).is_empty());
    }

    #[test]
    fn test_cancel_stops_scan_early() {
        let analyzer = PeriodicAnalyzer::default();
        let store = MetricStore::new(StoreConfig::default());
        for i in 0..20 {
            let mut values = stable(1.0, 40);
            values.extend(stable(5.0, 40));
            feed(&store, &app(&format!("app-{i}")), values);
        }

        analyzer.cancel_flag().cancel();
        assert!(analyzer.trend_findings(&store).is_empty());
    }
}

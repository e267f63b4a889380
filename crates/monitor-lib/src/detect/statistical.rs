//! Z-score and IQR outlier checks over a recent window
//!
//! The z-score path assumes a roughly normal window; the IQR path is the
//! skew-robust fallback. They never both fire for one input value: a value
//! that trips the z-score check is reported as a spike and the IQR check is
//! not consulted.

use tracing::debug;

/// Configuration for the statistical detector
#[derive(Debug, Clone)]
pub struct StatisticalConfig {
    /// Number of recent points the checks run over
    pub window_size: usize,
    /// Minimum points required before any check runs
    pub min_data_points: usize,
    /// Z-score threshold, in standard deviations
    pub sensitivity: f64,
    /// Multiplier on the IQR for the upper fence
    pub iqr_multiplier: f64,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_data_points: 30,
            sensitivity: 3.0,
            iqr_multiplier: 1.5,
        }
    }
}

/// Which check produced the finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticalKind {
    /// Z-score exceeded the sensitivity threshold
    Spike,
    /// Value crossed the upper IQR fence while the z-score did not fire
    Outlier,
}

/// Outcome of a statistical check
#[derive(Debug, Clone)]
pub struct StatisticalFinding {
    pub kind: StatisticalKind,
    pub mean: f64,
    pub std_dev: f64,
    pub z_score: Option<f64>,
    pub iqr: Option<f64>,
    pub upper_fence: Option<f64>,
    pub sample_count: usize,
}

/// Z-score and IQR checks over a window
pub struct StatisticalDetector {
    config: StatisticalConfig,
}

impl StatisticalDetector {
    pub fn new(config: StatisticalConfig) -> Self {
        Self { config }
    }

    /// Evaluate `value` against `window` (which may already include it)
    ///
    /// Returns at most one finding per input value.
    pub fn evaluate(&self, window: &[f64], value: f64) -> Option<StatisticalFinding> {
        if window.len() < self.config.min_data_points {
            debug!(
                samples = window.len(),
                required = self.config.min_data_points,
                "Skipping statistical checks, insufficient data"
            );
            return None;
        }

        let (mean, std_dev) = mean_and_std(window);

        if std_dev > f64::EPSILON {
            let z = (value - mean) / std_dev;
            if z > self.config.sensitivity {
                return Some(StatisticalFinding {
                    kind: StatisticalKind::Spike,
                    mean,
                    std_dev,
                    z_score: Some(z),
                    iqr: None,
                    upper_fence: None,
                    sample_count: window.len(),
                });
            }
        }

        // Constant series cannot anomaly; a zero IQR below also bails out.
        let (q1, q3) = quartiles(window);
        let iqr = q3 - q1;
        if iqr <= f64::EPSILON {
            return None;
        }

        let upper_fence = q3 + self.config.iqr_multiplier * iqr;
        if value > upper_fence {
            return Some(StatisticalFinding {
                kind: StatisticalKind::Outlier,
                mean,
                std_dev,
                z_score: None,
                iqr: Some(iqr),
                upper_fence: Some(upper_fence),
                sample_count: window.len(),
            });
        }

        None
    }
}

impl Default for StatisticalDetector {
    fn default() -> Self {
        Self::new(StatisticalConfig::default())
    }
}

/// Mean and sample standard deviation (Bessel's correction)
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    if values.len() < 2 {
        return (mean, 0.0);
    }

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// First and third quartiles by rank
fn quartiles(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(3 * sorted.len() / 4).min(sorted.len() - 1)];
    (q1, q3)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Window alternating around 10.0 with unit deviation
    fn alternating_window(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| if i % 2 == 0 { 11.0 } else { 9.0 })
            .collect()
    }

    #[test]
    fn test_four_sigma_value_is_a_spike() {
        let detector = StatisticalDetector::default();
        let window = alternating_window(100);

        let finding = detector.evaluate(&window, 14.0).unwrap();
        assert_eq!(finding.kind, StatisticalKind::Spike);
        assert!(finding.z_score.unwrap() > 3.0);
    }

    #[test]
    fn test_one_sigma_value_is_not_flagged() {
        let detector = StatisticalDetector::default();
        let window = alternating_window(100);

        assert!(detector.evaluate(&window, 11.0).is_none());
    }

    #[test]
    fn test_insufficient_data_skips_both_checks() {
        let detector = StatisticalDetector::default();
        let window = alternating_window(20);

        // Far beyond any threshold, but the window is too small
        assert!(detector.evaluate(&window, 1_000.0).is_none());
    }

    #[test]
    fn test_spike_suppresses_iqr_for_the_same_value() {
        let detector = StatisticalDetector::default();
        let window = alternating_window(100);

        // 20.0 crosses both the z threshold and the IQR fence; only the
        // spike is reported.
        let finding = detector.evaluate(&window, 20.0).unwrap();
        assert_eq!(finding.kind, StatisticalKind::Spike);
        assert!(finding.iqr.is_none());
    }

    #[test]
    fn test_iqr_catches_outlier_in_skewed_window() {
        let detector = StatisticalDetector::default();

        // 28 tightly clustered values plus two huge ones inflate the std
        // enough that the z-score stays small while the fence stays tight.
        let mut window: Vec<f64> = (0..28).map(|i| 10.0 + (i % 3) as f64 * 0.5).collect();
        window.push(1_000.0);
        window.push(1_000.0);

        let finding = detector.evaluate(&window, 150.0).unwrap();
        assert_eq!(finding.kind, StatisticalKind::Outlier);
        assert!(finding.z_score.is_none());
        assert!(150.0 > finding.upper_fence.unwrap());
    }

    #[test]
    fn test_constant_series_never_fires() {
        let detector = StatisticalDetector::default();
        let window = vec![5.0; 100];

        assert!(detector.evaluate(&window, 500.0).is_none());
    }
}

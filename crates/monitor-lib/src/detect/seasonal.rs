//! Seasonal time-series detection against diurnal patterns
//!
//! The raw series is resampled to one mean value per hour (gaps forward
//! filled), then decomposed additively into a moving-average trend, a
//! period-average seasonal index and a residual. The latest bucket is
//! compared against trend + seasonal; deviations beyond
//! sensitivity × std(residual) are findings. Plain arithmetic throughout,
//! no statistics library.

use crate::models::MetricPoint;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Seconds per resampling bucket
const BUCKET_SECS: i64 = 3600;

/// Hard cap on the resampled span; sparser series are treated as degenerate
const MAX_BUCKETS: usize = 4096;

/// Configuration for the seasonal detector
#[derive(Debug, Clone)]
pub struct SeasonalConfig {
    /// Season length in hourly buckets (24 = diurnal)
    pub period: usize,
    /// Full seasons required before detection runs
    pub min_cycles: usize,
    /// Residual threshold, in residual standard deviations
    pub sensitivity: f64,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            period: 24,
            min_cycles: 2,
            sensitivity: 3.0,
        }
    }
}

/// A deviation of the latest bucket from its seasonal expectation
#[derive(Debug, Clone)]
pub struct SeasonalFinding {
    /// Mean of the latest bucket
    pub value: f64,
    /// Trend + seasonal expectation for that bucket
    pub expected: f64,
    /// value − expected
    pub residual: f64,
    /// sensitivity × std of the decomposition residuals
    pub threshold: f64,
    /// Start of the offending bucket
    pub bucket_start: DateTime<Utc>,
}

/// Decomposition-based detector for repeating hourly patterns
pub struct SeasonalTrendDetector {
    config: SeasonalConfig,
}

struct Decomposition {
    trend: Vec<f64>,
    seasonal: Vec<f64>,
    residual_std: f64,
}

impl SeasonalTrendDetector {
    pub fn new(config: SeasonalConfig) -> Self {
        Self { config }
    }

    /// Evaluate the full retained history of one series
    pub fn evaluate(&self, points: &[MetricPoint]) -> Option<SeasonalFinding> {
        let required = self.config.period * self.config.min_cycles;
        if points.len() < self.config.period {
            return None;
        }

        let (start_bucket, values) = match resample_hourly(points) {
            Some(resampled) => resampled,
            None => {
                warn!("Seasonal resampling failed on degenerate input; no finding");
                return None;
            }
        };

        if values.len() < required {
            debug!(
                buckets = values.len(),
                required,
                "Skipping seasonal check, not enough resampled history"
            );
            return None;
        }

        let decomposition = match decompose(&values, self.config.period) {
            Some(d) => d,
            None => {
                warn!(
                    buckets = values.len(),
                    "Seasonal decomposition failed; no finding"
                );
                return None;
            }
        };

        if decomposition.residual_std <= f64::EPSILON {
            // Perfectly periodic input leaves nothing to threshold against.
            return None;
        }

        let threshold = self.config.sensitivity * decomposition.residual_std;
        let last = values.len() - 1;
        let expected =
            decomposition.trend[last] + decomposition.seasonal[last % self.config.period];
        let residual = values[last] - expected;

        if residual.abs() > threshold {
            let bucket_start = Utc
                .timestamp_opt((start_bucket + last as i64) * BUCKET_SECS, 0)
                .single()?;
            return Some(SeasonalFinding {
                value: values[last],
                expected,
                residual,
                threshold,
                bucket_start,
            });
        }

        None
    }
}

impl Default for SeasonalTrendDetector {
    fn default() -> Self {
        Self::new(SeasonalConfig::default())
    }
}

/// Resample to one mean value per hour, forward-filling empty buckets
///
/// Returns the first bucket index (unix hours) and the contiguous values.
fn resample_hourly(points: &[MetricPoint]) -> Option<(i64, Vec<f64>)> {
    let mut buckets: BTreeMap<i64, (f64, u32)> = BTreeMap::new();
    for point in points {
        if !point.value.is_finite() {
            return None;
        }
        let bucket = point.timestamp.timestamp().div_euclid(BUCKET_SECS);
        let entry = buckets.entry(bucket).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    let first = *buckets.keys().next()?;
    let last = *buckets.keys().next_back()?;
    let span = usize::try_from(last - first + 1).ok()?;
    if span > MAX_BUCKETS {
        return None;
    }

    let mut values = Vec::with_capacity(span);
    let mut previous = None;
    for bucket in first..=last {
        let value = match buckets.get(&bucket) {
            Some((sum, count)) => {
                let mean = sum / f64::from(*count);
                previous = Some(mean);
                mean
            }
            None => previous?,
        };
        values.push(value);
    }

    Some((first, values))
}

/// Additive decomposition: moving-average trend + period-average seasonal
fn decompose(values: &[f64], period: usize) -> Option<Decomposition> {
    let n = values.len();
    if period < 2 || n < 2 * period {
        return None;
    }

    // Centered moving average over one period; edges carry the nearest
    // computed value.
    let half = period / 2;
    let mut trend = vec![0.0; n];
    for i in half..n - half {
        let window = &values[i - half..i - half + period];
        trend[i] = window.iter().sum::<f64>() / period as f64;
    }
    for i in 0..half {
        trend[i] = trend[half];
    }
    for i in n - half..n {
        trend[i] = trend[n - half - 1];
    }

    // Seasonal index: mean detrended value per bucket position, normalized
    // to zero mean so the trend keeps the level.
    let mut sums = vec![0.0; period];
    let mut counts = vec![0u32; period];
    for i in 0..n {
        sums[i % period] += values[i] - trend[i];
        counts[i % period] += 1;
    }
    let mut seasonal: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, count)| if *count > 0 { sum / f64::from(*count) } else { 0.0 })
        .collect();
    let seasonal_mean = seasonal.iter().sum::<f64>() / period as f64;
    for s in &mut seasonal {
        *s -= seasonal_mean;
    }

    let residuals: Vec<f64> = (0..n)
        .map(|i| values[i] - trend[i] - seasonal[i % period])
        .collect();
    let mean = residuals.iter().sum::<f64>() / n as f64;
    let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let residual_std = variance.sqrt();

    if !residual_std.is_finite() || trend.iter().any(|t| !t.is_finite()) {
        return None;
    }

    Some(Decomposition {
        trend,
        seasonal,
        residual_std,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn hourly_point(hour: i64, value: f64) -> MetricPoint {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        MetricPoint::new(value, base + Duration::hours(hour), None)
    }

    /// Diurnal pattern with small deterministic jitter
    fn diurnal_value(hour: i64) -> f64 {
        let phase = (hour % 24) as f64 / 24.0 * std::f64::consts::TAU;
        10.0 + 5.0 * phase.sin() + ((hour * 7) % 5) as f64 * 0.02
    }

    #[test]
    fn test_insufficient_history_is_skipped() {
        let detector = SeasonalTrendDetector::default();
        let points: Vec<_> = (0..30).map(|h| hourly_point(h, diurnal_value(h))).collect();

        assert!(detector.evaluate(&points).is_none());
    }

    #[test]
    fn test_clean_diurnal_series_yields_no_finding() {
        let detector = SeasonalTrendDetector::default();
        let points: Vec<_> = (0..96).map(|h| hourly_point(h, diurnal_value(h))).collect();

        assert!(detector.evaluate(&points).is_none());
    }

    #[test]
    fn test_spike_fires_exactly_once_at_its_own_bucket() {
        let detector = SeasonalTrendDetector::default();
        let spike_hour = 95;

        let mut findings = Vec::new();
        for end in 48..=100 {
            let points: Vec<_> = (0..=end)
                .map(|h| {
                    let mut value = diurnal_value(h);
                    if h == spike_hour {
                        value += 50.0;
                    }
                    hourly_point(h, value)
                })
                .collect();
            if let Some(finding) = detector.evaluate(&points) {
                findings.push((end, finding));
            }
        }

        assert_eq!(findings.len(), 1);
        let (end, finding) = &findings[0];
        assert_eq!(*end, spike_hour);
        assert!(finding.residual > finding.threshold);
        let expected_bucket = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
            + Duration::hours(spike_hour);
        assert_eq!(finding.bucket_start, expected_bucket);
    }

    #[test]
    fn test_gaps_are_forward_filled() {
        let detector = SeasonalTrendDetector::default();
        // Every third hour is missing
        let points: Vec<_> = (0..96)
            .filter(|h| h % 3 != 2)
            .map(|h| hourly_point(h, diurnal_value(h)))
            .collect();

        // Still enough resampled buckets; no spurious finding either
        assert!(detector.evaluate(&points).is_none());
    }

    #[test]
    fn test_perfectly_constant_series_is_degenerate() {
        let detector = SeasonalTrendDetector::default();
        let points: Vec<_> = (0..96).map(|h| hourly_point(h, 4.0)).collect();

        assert!(detector.evaluate(&points).is_none());
    }

    #[test]
    fn test_non_finite_input_is_degenerate() {
        let detector = SeasonalTrendDetector::default();
        let mut points: Vec<_> = (0..96).map(|h| hourly_point(h, diurnal_value(h))).collect();
        points[40].value = f64::NAN;

        assert!(detector.evaluate(&points).is_none());
    }
}

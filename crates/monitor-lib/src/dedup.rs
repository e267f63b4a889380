//! Deduplication of findings and recurring-error tracking
//!
//! Every finding is checked against a bounded signature cache before it is
//! surfaced: a repeat within its cooldown is dropped. Recurring errors are a
//! separate, narrower mechanism counting occurrences per (entity, truncated
//! error text) and emitting at most one `error_rate_spike` per hour per
//! signature.

use crate::models::{AnomalyType, EntityKey, Signature};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

/// Configuration for deduplication and error tracking
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Cooldown between repeats of the same generic signature
    pub cooldown: Duration,
    /// Cooldown for recurring-error findings
    pub error_cooldown: Duration,
    /// Maximum signatures retained; oldest are evicted first
    pub capacity: usize,
    /// Occurrences within the error window required for a spike
    pub error_threshold: usize,
    /// Window over which error occurrences are counted
    pub error_window: Duration,
    /// Error text is truncated to this many bytes for grouping
    pub error_text_len: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::minutes(5),
            error_cooldown: Duration::hours(1),
            capacity: 4096,
            error_threshold: 5,
            error_window: Duration::hours(1),
            error_text_len: 80,
        }
    }
}

#[derive(Default)]
struct DedupState {
    last_emitted: HashMap<Signature, DateTime<Utc>>,
    order: VecDeque<(Signature, DateTime<Utc>)>,
}

/// Suppresses repeat findings within a cooldown window
pub struct AnomalyDeduplicator {
    config: DedupConfig,
    state: Mutex<DedupState>,
}

impl AnomalyDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Returns true when the finding may be surfaced, recording the emission
    pub fn admit(&self, signature: &Signature, at: DateTime<Utc>) -> bool {
        let cooldown = if signature.anomaly_type == AnomalyType::ErrorRateSpike {
            self.config.error_cooldown
        } else {
            self.config.cooldown
        };

        let mut state = self.state.lock().expect("dedup lock poisoned");

        if let Some(last) = state.last_emitted.get(signature) {
            if at.signed_duration_since(*last) < cooldown {
                debug!(
                    anomaly_type = %signature.anomaly_type,
                    entity = %signature.entity,
                    "Suppressing repeat finding within cooldown"
                );
                return false;
            }
        }

        state.last_emitted.insert(signature.clone(), at);
        state.order.push_back((signature.clone(), at));

        while state.order.len() > self.config.capacity {
            if let Some((evicted, recorded_at)) = state.order.pop_front() {
                // Only drop the map entry if it still refers to this emission
                if state.last_emitted.get(&evicted) == Some(&recorded_at) {
                    state.last_emitted.remove(&evicted);
                }
            }
        }

        true
    }
}

impl Default for AnomalyDeduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

/// A burst of identical errors for one entity
#[derive(Debug, Clone)]
pub struct ErrorSpike {
    pub entity: EntityKey,
    pub error: String,
    /// Occurrences within the window at emission time
    pub count: usize,
}

#[derive(Default)]
struct ErrorState {
    occurrences: HashMap<(EntityKey, String), VecDeque<DateTime<Utc>>>,
    last_spike: HashMap<(EntityKey, String), DateTime<Utc>>,
}

/// Counts identical errors per entity and reports sustained bursts
pub struct RecurringErrorTracker {
    config: DedupConfig,
    state: Mutex<ErrorState>,
}

impl RecurringErrorTracker {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ErrorState::default()),
        }
    }

    /// Record one error occurrence; returns a spike when the burst threshold
    /// is crossed and its cooldown has elapsed
    pub fn observe(
        &self,
        entity: &EntityKey,
        error: &str,
        at: DateTime<Utc>,
    ) -> Option<ErrorSpike> {
        let truncated = truncate(error, self.config.error_text_len);
        let key = (entity.clone(), truncated.clone());
        let cutoff = at - self.config.error_window;

        let mut state = self.state.lock().expect("error tracker lock poisoned");

        let timestamps = state.occurrences.entry(key.clone()).or_default();
        while timestamps.front().is_some_and(|t| *t < cutoff) {
            timestamps.pop_front();
        }
        timestamps.push_back(at);
        let count = timestamps.len();

        // Keep the maps bounded: drop groups with no recent activity. The
        // group just touched always survives.
        if state.occurrences.len() > self.config.capacity {
            state
                .occurrences
                .retain(|_, times| times.back().is_some_and(|t| *t >= cutoff));
            let occurrences = std::mem::take(&mut state.occurrences);
            state
                .last_spike
                .retain(|key, _| occurrences.contains_key(key));
            state.occurrences = occurrences;
        }

        if count < self.config.error_threshold {
            return None;
        }

        if let Some(last) = state.last_spike.get(&key) {
            if at.signed_duration_since(*last) < self.config.error_cooldown {
                return None;
            }
        }
        state.last_spike.insert(key, at);

        Some(ErrorSpike {
            entity: entity.clone(),
            error: truncated,
            count,
        })
    }
}

impl Default for RecurringErrorTracker {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

/// Truncate on a char boundary
fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnomalyType;
    use chrono::TimeZone;

    fn signature(kind: AnomalyType, discriminant: &str) -> Signature {
        Signature {
            anomaly_type: kind,
            entity: EntityKey::new("openai", "gpt-4", "chat"),
            discriminant: discriminant.to_string(),
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_repeat_within_cooldown_is_suppressed() {
        let dedup = AnomalyDeduplicator::default();
        let sig = signature(AnomalyType::StatisticalSpike, "inference_time:high");

        assert!(dedup.admit(&sig, at(0)));
        assert!(!dedup.admit(&sig, at(2)));
        // Cooldown elapsed: a repeat is allowed again
        assert!(dedup.admit(&sig, at(6)));
    }

    #[test]
    fn test_distinct_signatures_do_not_interfere() {
        let dedup = AnomalyDeduplicator::default();
        let spike = signature(AnomalyType::StatisticalSpike, "inference_time:high");
        let outlier = signature(AnomalyType::StatisticalOutlier, "inference_time:high");

        assert!(dedup.admit(&spike, at(0)));
        assert!(dedup.admit(&outlier, at(0)));
    }

    #[test]
    fn test_error_spike_uses_longer_cooldown() {
        let dedup = AnomalyDeduplicator::default();
        let sig = signature(AnomalyType::ErrorRateSpike, "timeout");

        assert!(dedup.admit(&sig, at(0)));
        // Well past the generic cooldown, still inside the error cooldown
        assert!(!dedup.admit(&sig, at(30)));
        assert!(dedup.admit(&sig, at(61)));
    }

    #[test]
    fn test_cache_is_bounded_with_fifo_eviction() {
        let dedup = AnomalyDeduplicator::new(DedupConfig {
            capacity: 10,
            ..Default::default()
        });

        for i in 0..50 {
            let sig = signature(AnomalyType::StatisticalSpike, &format!("metric-{i}:high"));
            assert!(dedup.admit(&sig, at(0)));
        }

        let state = dedup.state.lock().unwrap();
        assert!(state.order.len() <= 10);
        assert!(state.last_emitted.len() <= 10);
    }

    #[test]
    fn test_error_spike_after_threshold() {
        let tracker = RecurringErrorTracker::default();
        let entity = EntityKey::new("openai", "gpt-4", "chat");

        for i in 0..4 {
            assert!(tracker.observe(&entity, "connection reset", at(i)).is_none());
        }
        let spike = tracker.observe(&entity, "connection reset", at(4)).unwrap();
        assert_eq!(spike.count, 5);
    }

    #[test]
    fn test_error_spike_at_most_once_per_hour() {
        let tracker = RecurringErrorTracker::default();
        let entity = EntityKey::new("openai", "gpt-4", "chat");

        for i in 0..5 {
            tracker.observe(&entity, "connection reset", at(i));
        }
        // Burst continues: no further spike inside the hour
        for i in 5..30 {
            assert!(tracker.observe(&entity, "connection reset", at(i)).is_none());
        }
        // Past the cooldown, the still-ongoing burst may fire again
        assert!(tracker
            .observe(&entity, "connection reset", at(65))
            .is_some());
    }

    #[test]
    fn test_old_occurrences_fall_out_of_the_window() {
        let tracker = RecurringErrorTracker::default();
        let entity = EntityKey::new("openai", "gpt-4", "chat");

        // Four early errors, then a long pause: the late one stands alone
        for i in 0..4 {
            tracker.observe(&entity, "timeout", at(i));
        }
        assert!(tracker.observe(&entity, "timeout", at(120)).is_none());
    }

    #[test]
    fn test_different_errors_tracked_separately() {
        let tracker = RecurringErrorTracker::default();
        let entity = EntityKey::new("openai", "gpt-4", "chat");

        for i in 0..4 {
            tracker.observe(&entity, "timeout", at(i));
            tracker.observe(&entity, "rate limited", at(i));
        }
        assert!(tracker.observe(&entity, "timeout", at(4)).is_some());
        assert!(tracker.observe(&entity, "rate limited", at(4)).is_some());
    }

    #[test]
    fn test_error_text_truncated_for_grouping() {
        let tracker = RecurringErrorTracker::default();
        let entity = EntityKey::new("openai", "gpt-4", "chat");
        let long_a = format!("{}{}", "x".repeat(100), "variant-a");
        let long_b = format!("{}{}", "x".repeat(100), "variant-b");

        for i in 0..4 {
            tracker.observe(&entity, &long_a, at(i));
        }
        // Same first 80 bytes: counted as the same error
        let spike = tracker.observe(&entity, &long_b, at(4)).unwrap();
        assert_eq!(spike.count, 5);
        assert_eq!(spike.error.len(), 80);
    }
}

//! Incremental cost/usage aggregates and optimization insights
//!
//! Per-entity aggregates are updated in place on every successful event and
//! never recomputed from scratch. Insights share the `cost_optimization`
//! anomaly type and are distinguished by subtype. The model catalog is
//! immutable configuration injected at construction.

use crate::models::{CostInsight, EntityKey};
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

/// Configuration for the cost analyzer
#[derive(Debug, Clone)]
pub struct CostConfig {
    /// Prompt/total ratio above which prompts dominate spend
    pub prompt_ratio_threshold: f64,
    /// Fraction of the context window under which usage counts as low
    pub context_utilization_floor: f64,
    /// Per-hour cost share that marks an hour as a peak
    pub peak_hour_share: f64,
    /// Maximum number of peak hours for a concentration finding
    pub peak_hours_max: usize,
    /// Combined share the peak hours must exceed
    pub peak_total_share: f64,
    /// Requests observed before any insight fires
    pub min_requests: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            prompt_ratio_threshold: 0.8,
            context_utilization_floor: 0.3,
            peak_hour_share: 0.15,
            peak_hours_max: 6,
            peak_total_share: 0.5,
            min_requests: 30,
        }
    }
}

/// A cheaper model suggested in place of a costly one
#[derive(Debug, Clone)]
pub struct ModelAlternative {
    pub alternative: String,
    /// Alternative cost relative to the original (0.1 = ten times cheaper)
    pub cost_ratio: f64,
    /// Rough capability retained by the alternative
    pub capability_ratio: f64,
}

/// Static model knowledge: alternatives and context window sizes
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    pub alternatives: HashMap<String, ModelAlternative>,
    pub context_windows: HashMap<String, u64>,
}

impl ModelCatalog {
    /// Catalog of widely deployed models
    pub fn builtin() -> Self {
        let mut alternatives = HashMap::new();
        for (model, alternative, cost_ratio, capability_ratio) in [
            ("gpt-4", "gpt-4o", 0.17, 0.95),
            ("gpt-4-32k", "gpt-4o", 0.08, 0.95),
            ("gpt-4o", "gpt-4o-mini", 0.06, 0.85),
            ("claude-3-opus", "claude-3-5-sonnet", 0.2, 0.95),
            ("claude-3-sonnet", "claude-3-haiku", 0.08, 0.8),
            ("gemini-1.5-pro", "gemini-1.5-flash", 0.06, 0.85),
        ] {
            alternatives.insert(
                model.to_string(),
                ModelAlternative {
                    alternative: alternative.to_string(),
                    cost_ratio,
                    capability_ratio,
                },
            );
        }

        let mut context_windows = HashMap::new();
        for (model, window) in [
            ("gpt-4", 8_192u64),
            ("gpt-4-32k", 32_768),
            ("gpt-4o", 128_000),
            ("gpt-4o-mini", 128_000),
            ("gpt-3.5-turbo", 16_385),
            ("claude-3-opus", 200_000),
            ("claude-3-sonnet", 200_000),
            ("claude-3-5-sonnet", 200_000),
            ("claude-3-haiku", 200_000),
            ("gemini-1.5-pro", 1_048_576),
            ("gemini-1.5-flash", 1_048_576),
            ("mistral-large", 32_768),
        ] {
            context_windows.insert(model.to_string(), window);
        }

        Self {
            alternatives,
            context_windows,
        }
    }
}

/// Running per-entity cost aggregates
#[derive(Debug, Clone)]
pub struct CostPattern {
    pub total_cost: f64,
    pub request_count: u64,
    /// Running mean of total tokens per request
    pub mean_tokens_per_request: f64,
    /// Running mean of prompt/total token ratio
    pub mean_prompt_ratio: f64,
    /// Cost accumulated per hour of day
    pub hourly_cost: [f64; 24],
    /// Cost accumulated per day of week (Monday = 0)
    pub daily_cost: [f64; 7],
}

impl Default for CostPattern {
    fn default() -> Self {
        Self {
            total_cost: 0.0,
            request_count: 0,
            mean_tokens_per_request: 0.0,
            mean_prompt_ratio: 0.0,
            hourly_cost: [0.0; 24],
            daily_cost: [0.0; 7],
        }
    }
}

impl CostPattern {
    /// Fold one successful request into the aggregates
    fn observe(&mut self, timestamp: DateTime<Utc>, prompt_tokens: u64, total_tokens: u64, cost: f64) {
        self.request_count += 1;
        self.total_cost += cost;

        let n = self.request_count as f64;
        self.mean_tokens_per_request += (total_tokens as f64 - self.mean_tokens_per_request) / n;

        if total_tokens > 0 {
            let ratio = prompt_tokens as f64 / total_tokens as f64;
            self.mean_prompt_ratio += (ratio - self.mean_prompt_ratio) / n;
        }

        self.hourly_cost[timestamp.hour() as usize] += cost;
        self.daily_cost[timestamp.weekday().num_days_from_monday() as usize] += cost;
    }
}

/// One cost-optimization insight, before conversion into an anomaly
#[derive(Debug, Clone)]
pub struct CostFinding {
    pub insight: CostInsight,
    pub value: f64,
    pub expected: f64,
    pub description: String,
}

/// Maintains per-entity cost patterns and derives insights from them
pub struct CostPatternAnalyzer {
    config: CostConfig,
    catalog: ModelCatalog,
    patterns: DashMap<EntityKey, CostPattern>,
}

impl CostPatternAnalyzer {
    pub fn new(config: CostConfig, catalog: ModelCatalog) -> Self {
        Self {
            config,
            catalog,
            patterns: DashMap::new(),
        }
    }

    /// Record one successful request
    pub fn observe(
        &self,
        entity: &EntityKey,
        timestamp: DateTime<Utc>,
        prompt_tokens: u64,
        total_tokens: u64,
        cost: f64,
    ) {
        self.patterns
            .entry(entity.clone())
            .or_default()
            .observe(timestamp, prompt_tokens, total_tokens, cost);
    }

    /// Aggregates for one entity, if any requests were observed
    pub fn pattern(&self, entity: &EntityKey) -> Option<CostPattern> {
        self.patterns.get(entity).map(|p| p.clone())
    }

    /// Entities with cost history
    pub fn entities(&self) -> Vec<EntityKey> {
        self.patterns.iter().map(|e| e.key().clone()).collect()
    }

    /// Insights evaluated against the event currently being processed
    pub fn event_insights(
        &self,
        entity: &EntityKey,
        prompt_tokens: u64,
        total_tokens: Option<u64>,
    ) -> Vec<CostFinding> {
        let Some(pattern) = self.patterns.get(entity) else {
            return Vec::new();
        };
        if pattern.request_count < self.config.min_requests {
            return Vec::new();
        }

        let mut findings = Vec::new();

        if let Some(total) = total_tokens.filter(|t| *t > 0) {
            let current_ratio = prompt_tokens as f64 / total as f64;
            if current_ratio > self.config.prompt_ratio_threshold
                && pattern.mean_prompt_ratio > self.config.prompt_ratio_threshold
            {
                findings.push(CostFinding {
                    insight: CostInsight::HighPromptRatio,
                    value: current_ratio,
                    expected: self.config.prompt_ratio_threshold,
                    description: format!(
                        "Prompts account for {:.0}% of tokens (historical {:.0}%); consider trimming context or caching prompts",
                        current_ratio * 100.0,
                        pattern.mean_prompt_ratio * 100.0
                    ),
                });
            }

            if let Some(window) = self.catalog.context_windows.get(&entity.model) {
                let floor = self.config.context_utilization_floor * *window as f64;
                if (total as f64) < floor {
                    findings.push(CostFinding {
                        insight: CostInsight::UnderutilizedContext,
                        value: total as f64,
                        expected: floor,
                        description: format!(
                            "Request used {} of {} context tokens; a smaller-context model may be cheaper",
                            total, window
                        ),
                    });
                }
            }
        }

        if let Some(alternative) = self.catalog.alternatives.get(&entity.model) {
            findings.push(CostFinding {
                insight: CostInsight::ModelAlternative,
                value: pattern.total_cost,
                expected: pattern.total_cost * alternative.cost_ratio,
                description: format!(
                    "{} could be replaced by {} at {:.0}% of the cost with ~{:.0}% capability",
                    entity.model,
                    alternative.alternative,
                    alternative.cost_ratio * 100.0,
                    alternative.capability_ratio * 100.0
                ),
            });
        }

        findings
    }

    /// Insights evaluated over the aggregates alone, for the periodic pass
    pub fn periodic_insights(&self, entity: &EntityKey) -> Vec<CostFinding> {
        let Some(pattern) = self.patterns.get(entity) else {
            return Vec::new();
        };
        if pattern.request_count < self.config.min_requests || pattern.total_cost <= f64::EPSILON {
            return Vec::new();
        }

        let mut findings = Vec::new();

        let shares: Vec<(usize, f64)> = pattern
            .hourly_cost
            .iter()
            .enumerate()
            .map(|(hour, cost)| (hour, cost / pattern.total_cost))
            .filter(|(_, share)| *share > self.config.peak_hour_share)
            .collect();
        let combined: f64 = shares.iter().map(|(_, share)| share).sum();

        if !shares.is_empty()
            && shares.len() <= self.config.peak_hours_max
            && combined > self.config.peak_total_share
        {
            let hours: Vec<String> = shares
                .iter()
                .map(|(hour, _)| format!("{hour:02}:00"))
                .collect();
            findings.push(CostFinding {
                insight: CostInsight::PeakHourUsage,
                value: combined,
                expected: self.config.peak_total_share,
                description: format!(
                    "{:.0}% of spend concentrates in {} ({} hours); off-peak batching could flatten cost",
                    combined * 100.0,
                    hours.join(", "),
                    shares.len()
                ),
            });
        }

        if let Some(window) = self.catalog.context_windows.get(&entity.model) {
            let floor = self.config.context_utilization_floor * *window as f64;
            if pattern.mean_tokens_per_request > 0.0 && pattern.mean_tokens_per_request < floor {
                findings.push(CostFinding {
                    insight: CostInsight::UnderutilizedContext,
                    value: pattern.mean_tokens_per_request,
                    expected: floor,
                    description: format!(
                        "Average request uses {:.0} of {} context tokens; a smaller-context model may be cheaper",
                        pattern.mean_tokens_per_request, window
                    ),
                });
            }
        }

        findings
    }
}

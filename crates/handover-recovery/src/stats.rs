//! Per-strategy outcome counters
//!
//! One mutex per strategy: concurrent updates to different strategies never
//! contend, updates to the same strategy are serialized. Aggregate reads lock
//! each strategy in turn and may interleave with writers.

use crate::strategy::FallbackStrategy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Success rate reported for a strategy that has never been tried
pub const DEFAULT_SUCCESS_RATE: f64 = 0.500000000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    /// Running mean over all attempts
    pub average_recovery_time_s: f64,
    pub failure_reasons: BTreeMap<String, u64>,
}

impl StrategyStats {
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            None
        } else {
            Some(self.successful_attempts as f64 / self.total_attempts as f64)
        }
    }
}

#[derive(Debug)]
pub struct StatisticsStore {
    per_strategy: BTreeMap<FallbackStrategy, Mutex<StrategyStats>>,
}

impl Default for StatisticsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsStore {
    pub fn new() -> Self {
        Self {
            per_strategy: FallbackStrategy::ALL
                .iter()
                .map(|s| (*s, Mutex::new(StrategyStats::default())))
                .collect(),
        }
    }

    pub fn record(
        &self,
        strategy: FallbackStrategy,
        success: bool,
        recovery_time_s: f64,
        failure_reason: Option<&str>,
    ) {
        let Some(slot) = self.per_strategy.get(&strategy) else {
            return;
        };
        let mut stats = slot.lock();
        stats.total_attempts += 1;
        if success {
            stats.successful_attempts += 1;
        } else if let Some(reason) = failure_reason {
            *stats.failure_reasons.entry(reason.to_string()).or_insert(0) += 1;
        }
        if recovery_time_s.is_finite() {
            let n = stats.total_attempts as f64;
            stats.average_recovery_time_s += (recovery_time_s - stats.average_recovery_time_s) / n;
        }
    }

    pub fn get(&self, strategy: FallbackStrategy) -> StrategyStats {
        self.per_strategy
            .get(&strategy)
            .map(|m| m.lock().clone())
            .unwrap_or_default()
    }

    /// Observed success rate, or the neutral default when untried
    pub fn historical_rate(&self, strategy: FallbackStrategy) -> f64 {
        self.get(strategy)
            .success_rate()
            .unwrap_or(DEFAULT_SUCCESS_RATE)
    }

    pub fn snapshot(&self) -> BTreeMap<FallbackStrategy, StrategyStats> {
        self.per_strategy
            .iter()
            .map(|(s, m)| (*s, m.lock().clone()))
            .collect()
    }
}

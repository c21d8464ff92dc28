//! Fallback Decision Engine
//!
//! Picks one recovery action per anomaly:
//!
//! 1. Look up eligible strategies in the priority table for
//!    (anomaly type, severity).
//! 2. Materialize each into an option with closed-form estimates
//!    parameterized by retry count and severity.
//! 3. Adjust estimates for history, system load and retries.
//! 4. Score and take the best. No eligible option yields the fixed
//!    emergency fallback to source.
//!
//! Outcomes feed per-strategy statistics. Every `learning_interval`
//! outcomes the weights and the priority table are re-derived from the
//! learning buffer.

use crate::context::{HandoverContext, UNKNOWN_RSRP_DBM};
use crate::detector::Escalation;
use crate::stats::{StatisticsStore, StrategyStats, DEFAULT_SUCCESS_RATE};
use crate::strategy::{FallbackAction, FallbackOption, FallbackStrategy, StrategyParameters};
use crate::{Anomaly, AnomalySeverity, AnomalyType, RecoveryError, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Recovery time at or above this scores zero speed
const SPEED_HORIZON_S: f64 = 10.000000000;
/// Success times must be under this fraction of failure times to shift weight
const MATERIAL_SPEEDUP: f64 = 0.800000000;
const RECOVERY_WEIGHT_CAP: f64 = 0.400000000;
const SUCCESS_WEIGHT_FLOOR: f64 = 0.200000000;
/// Decisions kept for the accuracy trend
const ACCURACY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightFactors {
    pub success_probability: f64,
    pub recovery_time: f64,
    pub resource_cost: f64,
    pub risk_level: f64,
    pub historical_performance: f64,
}

impl Default for WeightFactors {
    fn default() -> Self {
        Self {
            success_probability: 0.35,
            recovery_time: 0.25,
            resource_cost: 0.15,
            risk_level: 0.20,
            historical_performance: 0.05,
        }
    }
}

impl WeightFactors {
    fn as_array(&self) -> [f64; 5] {
        [
            self.success_probability,
            self.recovery_time,
            self.resource_cost,
            self.risk_level,
            self.historical_performance,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_weights: WeightFactors,
    /// Outcomes between re-learning passes
    pub learning_interval: usize,
    pub learning_buffer_capacity: usize,
    /// Decisions older than the most recent this many stop accepting outcomes
    pub max_open_decisions: usize,
    /// Time budgets under this are tight
    pub tight_budget_s: f64,
    /// Options faster than this get the bonus under a tight budget
    pub fast_option_s: f64,
    pub fast_bonus: f64,
    pub retry_penalty_per_retry: f64,
    pub max_retry_penalty: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_weights: WeightFactors::default(),
            learning_interval: 50,
            learning_buffer_capacity: 1000,
            max_open_decisions: 1000,
            tight_budget_s: 3.0,
            fast_option_s: 2.0,
            fast_bonus: 1.3,
            retry_penalty_per_retry: 0.1,
            max_retry_penalty: 0.5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = self.initial_weights.as_array();
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(RecoveryError::Configuration(
                "weight factors must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(RecoveryError::Configuration(format!(
                "weight factors sum to {}, expected 1",
                sum
            )));
        }
        if self.learning_interval == 0 || self.learning_buffer_capacity < self.learning_interval {
            return Err(RecoveryError::Configuration(format!(
                "learning interval {} must be non-zero and fit buffer {}",
                self.learning_interval, self.learning_buffer_capacity
            )));
        }
        if self.max_open_decisions == 0 {
            return Err(RecoveryError::Configuration(
                "max open decisions must be non-zero".to_string(),
            ));
        }
        if !(self.fast_bonus.is_finite() && self.fast_bonus >= 1.0) {
            return Err(RecoveryError::Configuration(format!(
                "fast bonus {} must be at least 1",
                self.fast_bonus
            )));
        }
        if !(0.0..1.0).contains(&self.max_retry_penalty) || self.retry_penalty_per_retry < 0.0 {
            return Err(RecoveryError::Configuration(
                "retry penalty must be non-negative and capped below 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Success,
    PartialSuccess,
    Failure,
    Timeout,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Success => "SUCCESS",
            DecisionOutcome::PartialSuccess => "PARTIAL_SUCCESS",
            DecisionOutcome::Failure => "FAILURE",
            DecisionOutcome::Timeout => "TIMEOUT",
        }
    }
}

/// Strategy eligibility per (type, severity), most preferred first
pub type PriorityTable = BTreeMap<(AnomalyType, AnomalySeverity), Vec<FallbackStrategy>>;

pub fn default_priority_table() -> PriorityTable {
    use AnomalySeverity::*;
    use FallbackStrategy::*;

    let mut table = PriorityTable::new();
    let mut set = |t: AnomalyType, rows: [(AnomalySeverity, Vec<FallbackStrategy>); 4]| {
        for (severity, strategies) in rows {
            table.insert((t, severity), strategies);
        }
    };

    set(
        AnomalyType::Timeout,
        [
            (Low, vec![DelayHandover, AdjustPowerParameters]),
            (Medium, vec![SelectAlternativeSatellite, RollbackToSource]),
            (High, vec![RollbackToSource, EmergencyFallback]),
            (Critical, vec![EmergencyFallback]),
        ],
    );
    set(
        AnomalyType::SignalDegradation,
        [
            (Low, vec![AdjustPowerParameters, DelayHandover]),
            (Medium, vec![FrequencyHopping, SelectAlternativeSatellite]),
            (High, vec![SelectAlternativeSatellite, RollbackToSource]),
            (Critical, vec![EmergencyFallback]),
        ],
    );
    set(
        AnomalyType::TargetUnavailable,
        [
            (Low, vec![SelectAlternativeSatellite]),
            (Medium, vec![SelectAlternativeSatellite, LoadBalancing]),
            (High, vec![RollbackToSource, EmergencyFallback]),
            (Critical, vec![EmergencyFallback]),
        ],
    );
    set(
        AnomalyType::InterferenceDetected,
        [
            (Low, vec![FrequencyHopping, AdjustPowerParameters]),
            (Medium, vec![FrequencyHopping, SelectAlternativeSatellite]),
            (High, vec![SelectAlternativeSatellite, RollbackToSource]),
            (Critical, vec![EmergencyFallback]),
        ],
    );
    set(
        AnomalyType::NetworkCongestion,
        [
            (Low, vec![LoadBalancing, DelayHandover]),
            (Medium, vec![LoadBalancing, SelectAlternativeSatellite]),
            (High, vec![SelectAlternativeSatellite, RollbackToSource]),
            (Critical, vec![EmergencyFallback]),
        ],
    );
    table
}

/// Maps RSRP onto 0..1 between -140 and -80 dBm
fn rsrp_quality(rsrp_dbm: f64) -> f64 {
    ((rsrp_dbm + 140.0) / 60.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
struct OpenDecision {
    strategy: FallbackStrategy,
}

#[derive(Debug, Clone)]
struct LearningSample {
    strategy: FallbackStrategy,
    success: bool,
    recovery_time_s: f64,
}

#[derive(Debug, Default)]
struct LearningState {
    buffer: VecDeque<LearningSample>,
    since_update: usize,
    updates: u64,
}

#[derive(Debug, Default)]
struct OutcomeLedger {
    resolved: u64,
    successful: u64,
    recovery_time_sum_s: f64,
    recovery_time_count: u64,
    recent: VecDeque<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_decisions: u64,
    pub resolved_decisions: u64,
    /// Dropped from the open set without an outcome
    pub expired_decisions: u64,
    pub successful_decisions: u64,
    pub average_recovery_time_s: f64,
    pub strategy_success_rates: BTreeMap<FallbackStrategy, f64>,
    /// Cumulative accuracy over the most recent resolved decisions
    pub accuracy_trend: Vec<f64>,
    pub learning_updates: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub strategy: FallbackStrategy,
    pub success_rate: f64,
    pub average_recovery_time_s: f64,
    pub total_attempts: u64,
    pub recommended_scenarios: Vec<String>,
}

/// An escalated anomaly and the action chosen for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub anomaly: Anomaly,
    pub action: FallbackAction,
}

pub struct FallbackDecisionEngine {
    config: EngineConfig,
    weights: RwLock<WeightFactors>,
    priority_table: RwLock<PriorityTable>,
    stats: Arc<StatisticsStore>,
    open: DashMap<String, OpenDecision>,
    /// Ids of the most recent decisions, oldest first
    open_order: Mutex<VecDeque<String>>,
    expired: std::sync::atomic::AtomicU64,
    learning: Mutex<LearningState>,
    ledger: Mutex<OutcomeLedger>,
    decisions: std::sync::atomic::AtomicU64,
}

impl FallbackDecisionEngine {
    pub fn new(config: EngineConfig, stats: Arc<StatisticsStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            weights: RwLock::new(config.initial_weights),
            priority_table: RwLock::new(default_priority_table()),
            config,
            stats,
            open: DashMap::new(),
            open_order: Mutex::new(VecDeque::new()),
            expired: std::sync::atomic::AtomicU64::new(0),
            learning: Mutex::new(LearningState::default()),
            ledger: Mutex::new(OutcomeLedger::default()),
            decisions: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn weights(&self) -> WeightFactors {
        *self.weights.read()
    }

    pub fn priority_table(&self) -> PriorityTable {
        self.priority_table.read().clone()
    }

    pub fn statistics(&self) -> BTreeMap<FallbackStrategy, StrategyStats> {
        self.stats.snapshot()
    }

    /// Decisions awaiting an outcome
    pub fn open_decisions(&self) -> usize {
        self.open.len()
    }

    /// Always returns exactly one action
    pub fn decide_fallback(&self, anomaly: &Anomaly, context: &HandoverContext) -> FallbackAction {
        let eligible = self
            .priority_table
            .read()
            .get(&(anomaly.anomaly_type, anomaly.severity))
            .cloned()
            .unwrap_or_default();

        let options: Vec<FallbackOption> = eligible
            .iter()
            .filter_map(|s| self.materialize(*s, anomaly, context))
            .map(|o| self.adjust(o, context))
            .filter(FallbackOption::is_well_formed)
            .collect();

        let weights = self.weights();
        let mut best: Option<(f64, FallbackOption)> = None;
        for option in options {
            let score = self.score(&option, context, &weights);
            debug!(
                handover_id = %context.handover_id,
                "Option {} scored {:.4}",
                option.strategy,
                score
            );
            if !score.is_finite() {
                continue;
            }
            if best.as_ref().map_or(true, |(b, _)| score > *b) {
                best = Some((score, option));
            }
        }

        let (score, option) = match best {
            Some(found) => found,
            None => {
                warn!(
                    handover_id = %context.handover_id,
                    "No eligible option for {} {:?}, using emergency fallback",
                    anomaly.anomaly_type,
                    anomaly.severity
                );
                (0.0, emergency_default(context))
            }
        };

        let action = FallbackAction {
            action_id: uuid::Uuid::new_v4().to_string(),
            anomaly_id: anomaly.id.clone(),
            handover_id: context.handover_id.clone(),
            ue_id: context.ue_id.clone(),
            strategy: option.strategy,
            target_satellite: option.target_satellite.clone(),
            estimated_recovery_time_s: option.estimated_recovery_time_s,
            confidence: option.success_probability,
            resource_cost: option.resource_cost,
            risk_level: option.risk_level,
            priority: self.priority(&option, anomaly, context),
            score,
            description: option.description.clone(),
            parameters: option.parameters.clone(),
            decided_at: Utc::now(),
        };

        self.open.insert(
            action.action_id.clone(),
            OpenDecision {
                strategy: action.strategy,
            },
        );
        self.decisions
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.expire_oldest(&action.action_id);

        info!(
            handover_id = %context.handover_id,
            "Fallback for {} {:?}: {} (confidence {:.2}, priority {})",
            anomaly.anomaly_type,
            anomaly.severity,
            action.strategy,
            action.confidence,
            action.priority
        );
        action
    }

    fn expire_oldest(&self, newest: &str) {
        let mut order = self.open_order.lock();
        order.push_back(newest.to_string());
        while order.len() > self.config.max_open_decisions {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            if self.open.remove(&oldest).is_some() {
                self.expired
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                debug!(action_id = %oldest, "Open decision expired without an outcome");
            }
        }
    }

    fn materialize(
        &self,
        strategy: FallbackStrategy,
        anomaly: &Anomaly,
        context: &HandoverContext,
    ) -> Option<FallbackOption> {
        let retries = context.retry_count as f64;
        let source = Some(context.source_satellite.clone());
        let target = Some(context.target_satellite.clone());

        let option = match strategy {
            FallbackStrategy::RollbackToSource => FallbackOption {
                strategy,
                target_satellite: source,
                estimated_recovery_time_s: 2.0 + 0.5 * retries,
                success_probability: 0.95 - 0.1 * retries,
                resource_cost: 0.3,
                risk_level: 0.2,
                description: format!("Roll back to source {}", context.source_satellite),
                parameters: StrategyParameters::Rollback { immediate: true },
            },
            FallbackStrategy::SelectAlternativeSatellite => {
                let satellite = best_alternative(context)?;
                FallbackOption {
                    strategy,
                    target_satellite: Some(satellite.clone()),
                    estimated_recovery_time_s: 3.0 + 0.7 * retries,
                    success_probability: 0.85 - 0.15 * retries,
                    resource_cost: 0.5,
                    risk_level: 0.4,
                    description: format!("Hand over to alternative {}", satellite),
                    parameters: StrategyParameters::AlternativeSatellite {
                        satellite_id: satellite,
                        preemptive: true,
                    },
                }
            }
            FallbackStrategy::DelayHandover => {
                let delay_s = 2.0 + anomaly.severity.value() as f64;
                FallbackOption {
                    strategy,
                    target_satellite: target,
                    estimated_recovery_time_s: delay_s,
                    success_probability: 0.7,
                    resource_cost: 0.1,
                    risk_level: 0.6,
                    description: format!("Delay handover by {:.0}s", delay_s),
                    parameters: StrategyParameters::Delay { delay_s },
                }
            }
            FallbackStrategy::AdjustPowerParameters => FallbackOption {
                strategy,
                target_satellite: target,
                estimated_recovery_time_s: 1.5,
                success_probability: 0.6,
                resource_cost: 0.2,
                risk_level: 0.3,
                description: "Raise transmit power".to_string(),
                parameters: StrategyParameters::PowerAdjustment {
                    gain_factor: 1.5,
                    duration_s: 10.0,
                },
            },
            FallbackStrategy::FrequencyHopping => FallbackOption {
                strategy,
                target_satellite: target,
                estimated_recovery_time_s: 1.0,
                success_probability: 0.75,
                resource_cost: 0.4,
                risk_level: 0.25,
                description: "Hop to backup band".to_string(),
                parameters: StrategyParameters::FrequencyHop {
                    band: "backup".to_string(),
                    hop_count: 3,
                },
            },
            FallbackStrategy::LoadBalancing => FallbackOption {
                strategy,
                target_satellite: None,
                estimated_recovery_time_s: 4.0,
                success_probability: 0.8,
                resource_cost: 0.6,
                risk_level: 0.3,
                description: "Rebalance load across satellites".to_string(),
                parameters: StrategyParameters::LoadBalance {
                    rebalance_threshold: 0.7,
                },
            },
            FallbackStrategy::EmergencyFallback => FallbackOption {
                strategy,
                target_satellite: source,
                estimated_recovery_time_s: 1.0,
                success_probability: 0.99,
                resource_cost: 0.8,
                risk_level: 0.1,
                description: "Emergency fallback to a stable link".to_string(),
                parameters: StrategyParameters::Emergency {
                    bypass_checks: true,
                },
            },
        };
        Some(option)
    }

    /// History, load and retry adjustments
    fn adjust(&self, mut option: FallbackOption, context: &HandoverContext) -> FallbackOption {
        let historical = self.stats.historical_rate(option.strategy);
        option.success_probability =
            (option.success_probability * (0.7 + 0.3 * historical)).clamp(0.0, 1.0);

        let load_factor = (context.network.system_load_or_default() * 2.0).max(1.0);
        option.estimated_recovery_time_s *= load_factor;

        option.risk_level += (0.1 * context.retry_count as f64).min(0.3);
        option
    }

    fn score(&self, option: &FallbackOption, context: &HandoverContext, w: &WeightFactors) -> f64 {
        let speed = ((SPEED_HORIZON_S - option.estimated_recovery_time_s) / SPEED_HORIZON_S).max(0.0);
        let historical = self.stats.historical_rate(option.strategy);

        let mut score = w.success_probability * option.success_probability
            + w.recovery_time * speed
            + w.resource_cost * (1.0 - option.resource_cost)
            + w.risk_level * (1.0 - option.risk_level)
            + w.historical_performance * historical;

        let tight = context
            .time_budget_s
            .is_some_and(|b| b < self.config.tight_budget_s);
        if tight && option.estimated_recovery_time_s < self.config.fast_option_s {
            score *= self.config.fast_bonus;
        }

        let penalty = (self.config.retry_penalty_per_retry * context.retry_count as f64)
            .min(self.config.max_retry_penalty);
        score * (1.0 - penalty)
    }

    /// 1..=10 from severity, success probability and urgency
    fn priority(&self, option: &FallbackOption, anomaly: &Anomaly, context: &HandoverContext) -> u8 {
        let severity_bonus = match anomaly.severity {
            AnomalySeverity::Low => 0,
            AnomalySeverity::Medium => 2,
            AnomalySeverity::High => 4,
            AnomalySeverity::Critical => 5,
        };
        let success_bonus = (option.success_probability.clamp(0.0, 1.0) * 3.0) as u8;
        let urgency_bonus = if context.time_budget_s.is_some_and(|b| b < 2.0) {
            3
        } else {
            1
        };
        (5 + severity_bonus + success_bonus + urgency_bonus).clamp(1, 10)
    }

    /// Close a decision with its observed outcome
    pub fn record_outcome(
        &self,
        action_id: &str,
        outcome: DecisionOutcome,
        actual_recovery_time_s: f64,
        success: bool,
    ) -> Result<()> {
        let (_, decision) = self
            .open
            .remove(action_id)
            .ok_or_else(|| RecoveryError::UnknownAction(action_id.to_string()))?;

        let reason = (!success).then(|| outcome.as_str());
        self.stats
            .record(decision.strategy, success, actual_recovery_time_s, reason);

        {
            let mut ledger = self.ledger.lock();
            ledger.resolved += 1;
            if success {
                ledger.successful += 1;
            }
            if actual_recovery_time_s.is_finite() && actual_recovery_time_s > 0.0 {
                ledger.recovery_time_sum_s += actual_recovery_time_s;
                ledger.recovery_time_count += 1;
            }
            ledger.recent.push_back(success);
            if ledger.recent.len() > ACCURACY_WINDOW {
                ledger.recent.pop_front();
            }
        }

        let due = {
            let mut learning = self.learning.lock();
            learning.buffer.push_back(LearningSample {
                strategy: decision.strategy,
                success,
                recovery_time_s: actual_recovery_time_s,
            });
            while learning.buffer.len() > self.config.learning_buffer_capacity {
                learning.buffer.pop_front();
            }
            learning.since_update += 1;
            if learning.since_update >= self.config.learning_interval {
                learning.since_update = 0;
                learning.updates += 1;
                Some(learning.buffer.iter().cloned().collect::<Vec<_>>())
            } else {
                None
            }
        };

        if let Some(samples) = due {
            self.learn(&samples);
        }

        debug!(
            "Outcome {} for {}: {} in {:.2}s",
            outcome.as_str(),
            action_id,
            decision.strategy,
            actual_recovery_time_s
        );
        Ok(())
    }

    fn learn(&self, samples: &[LearningSample]) {
        let mean = |ok: bool| {
            let times: Vec<f64> = samples
                .iter()
                .filter(|s| s.success == ok && s.recovery_time_s.is_finite())
                .map(|s| s.recovery_time_s)
                .collect();
            if times.is_empty() {
                None
            } else {
                Some(times.iter().sum::<f64>() / times.len() as f64)
            }
        };

        if let (Some(ok), Some(failed)) = (mean(true), mean(false)) {
            if ok < failed * MATERIAL_SPEEDUP {
                let mut w = self.weights.write();
                w.recovery_time = (w.recovery_time * 1.1).min(RECOVERY_WEIGHT_CAP);
                w.success_probability = (w.success_probability * 0.9).max(SUCCESS_WEIGHT_FLOOR);
                info!(
                    "Successful recoveries {:.2}s vs failed {:.2}s, recovery-time weight now {:.3}",
                    ok, failed, w.recovery_time
                );
            }
        }

        let mut rates: BTreeMap<FallbackStrategy, (u64, u64)> = BTreeMap::new();
        for s in samples {
            let entry = rates.entry(s.strategy).or_insert((0, 0));
            entry.1 += 1;
            if s.success {
                entry.0 += 1;
            }
        }
        let rate = |s: &FallbackStrategy| match rates.get(s) {
            Some((ok, total)) if *total > 0 => *ok as f64 / *total as f64,
            _ => DEFAULT_SUCCESS_RATE,
        };

        let mut table = self.priority_table.write();
        for strategies in table.values_mut() {
            strategies.sort_by(|a, b| rate(b).total_cmp(&rate(a)));
        }
        info!("Re-ranked priority table from {} samples", samples.len());
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let ledger = self.ledger.lock();
        let mut accuracy_trend = Vec::with_capacity(ledger.recent.len());
        let mut hits = 0usize;
        for (i, ok) in ledger.recent.iter().enumerate() {
            if *ok {
                hits += 1;
            }
            accuracy_trend.push(hits as f64 / (i + 1) as f64);
        }

        PerformanceMetrics {
            total_decisions: self.decisions.load(std::sync::atomic::Ordering::Relaxed),
            resolved_decisions: ledger.resolved,
            expired_decisions: self.expired.load(std::sync::atomic::Ordering::Relaxed),
            successful_decisions: ledger.successful,
            average_recovery_time_s: if ledger.recovery_time_count == 0 {
                0.0
            } else {
                ledger.recovery_time_sum_s / ledger.recovery_time_count as f64
            },
            strategy_success_rates: self
                .stats
                .snapshot()
                .into_iter()
                .filter_map(|(s, stats)| stats.success_rate().map(|r| (s, r)))
                .collect(),
            accuracy_trend,
            learning_updates: self.learning.lock().updates,
        }
    }

    /// Eligible strategies for a bucket, in current priority order
    pub fn strategy_recommendations(
        &self,
        anomaly_type: AnomalyType,
        severity: AnomalySeverity,
    ) -> Vec<StrategyRecommendation> {
        let strategies = self
            .priority_table
            .read()
            .get(&(anomaly_type, severity))
            .cloned()
            .unwrap_or_default();

        strategies
            .into_iter()
            .map(|strategy| {
                let stats = self.stats.get(strategy);
                StrategyRecommendation {
                    strategy,
                    success_rate: stats.success_rate().unwrap_or(DEFAULT_SUCCESS_RATE),
                    average_recovery_time_s: stats.average_recovery_time_s,
                    total_attempts: stats.total_attempts,
                    recommended_scenarios: strategy
                        .recommended_scenarios()
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                }
            })
            .collect()
    }
}

/// Fixed last resort when nothing is eligible
fn emergency_default(context: &HandoverContext) -> FallbackOption {
    FallbackOption {
        strategy: FallbackStrategy::EmergencyFallback,
        target_satellite: Some(context.source_satellite.clone()),
        estimated_recovery_time_s: 1.0,
        success_probability: 0.99,
        resource_cost: 1.0,
        risk_level: 0.05,
        description: "No eligible option, emergency fallback to source".to_string(),
        parameters: StrategyParameters::Emergency {
            bypass_checks: true,
        },
    }
}

/// Alternative with the best RSRP quality times load headroom. Unmeasured
/// alternatives count as poor. Ties go to the smaller id.
fn best_alternative(context: &HandoverContext) -> Option<String> {
    let load_factor = 1.0 - context.network.congestion_or_default().clamp(0.0, 1.0);
    let mut alternatives: Vec<&String> = context.alternatives().collect();
    alternatives.sort();
    alternatives.dedup();

    let mut best: Option<(f64, &String)> = None;
    for satellite in alternatives {
        let rsrp = context
            .alternative_rsrp_dbm
            .get(satellite)
            .copied()
            .filter(|r| r.is_finite())
            .unwrap_or(UNKNOWN_RSRP_DBM);
        let score = rsrp_quality(rsrp) * load_factor;
        if best.map_or(true, |(b, _)| score > b) {
            best = Some((score, satellite));
        }
    }
    best.map(|(_, s)| s.clone())
}

/// Single consumer turning escalations into decisions
pub fn spawn_fallback_consumer(
    engine: Arc<FallbackDecisionEngine>,
    mut escalations: mpsc::Receiver<Escalation>,
    decisions: mpsc::Sender<RecoveryDecision>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(escalation) = escalations.recv().await {
            let action = engine.decide_fallback(&escalation.anomaly, &escalation.context);
            let decision = RecoveryDecision {
                anomaly: escalation.anomaly,
                action,
            };
            if decisions.send(decision).await.is_err() {
                warn!("Decision receiver dropped, stopping fallback consumer");
                break;
            }
        }
        debug!("Fallback consumer finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignalSnapshot;
    use orbital_mechanics::GeoPosition;

    fn engine() -> FallbackDecisionEngine {
        FallbackDecisionEngine::new(EngineConfig::default(), Arc::new(StatisticsStore::new()))
            .unwrap()
    }

    fn context() -> HandoverContext {
        HandoverContext::new("ue-1", "SAT_A", "SAT_B", GeoPosition::new(24.0, 120.0))
            .with_signal(SignalSnapshot::new(-115.0, 2.0))
            .with_alternatives(["SAT_A", "SAT_B", "SAT_C", "SAT_D"])
    }

    fn anomaly(t: AnomalyType, s: AnomalySeverity, ctx: &HandoverContext) -> Anomaly {
        Anomaly::new(t, s, ctx, Utc::now(), vec![], BTreeMap::new())
    }

    #[test]
    fn test_signal_high_never_delays() {
        let e = engine();
        let ctx = context();
        let action = e.decide_fallback(
            &anomaly(AnomalyType::SignalDegradation, AnomalySeverity::High, &ctx),
            &ctx,
        );
        assert!(matches!(
            action.strategy,
            FallbackStrategy::SelectAlternativeSatellite | FallbackStrategy::RollbackToSource
        ));
        assert_eq!(e.open_decisions(), 1);
    }

    #[test]
    fn test_rollback_wins_without_history() {
        // rollback: 0.35*0.8075 + 0.25*0.8 + 0.15*0.7 + 0.20*0.8 + 0.05*0.5 = 0.772625
        // alternative: 0.35*0.7225 + 0.25*0.7 + 0.15*0.5 + 0.20*0.6 + 0.05*0.5 = 0.647875
        let e = engine();
        let ctx = context();
        let action = e.decide_fallback(
            &anomaly(AnomalyType::SignalDegradation, AnomalySeverity::High, &ctx),
            &ctx,
        );
        assert_eq!(action.strategy, FallbackStrategy::RollbackToSource);
        assert_eq!(action.target_satellite.as_deref(), Some("SAT_A"));
        assert!((action.score - 0.772625).abs() < 1e-9);
        assert!((action.confidence - 0.8075).abs() < 1e-9);
        // 5 + 4 + 2 + 1, capped
        assert_eq!(action.priority, 10);
    }

    #[test]
    fn test_alternative_prefers_measured_rsrp() {
        let mut ctx = context();
        ctx.alternative_rsrp_dbm.insert("SAT_D".to_string(), -90.0);
        assert_eq!(best_alternative(&ctx).as_deref(), Some("SAT_D"));

        let ctx = HandoverContext::new("ue-1", "SAT_A", "SAT_B", GeoPosition::new(0.0, 0.0))
            .with_alternatives(["SAT_A", "SAT_B"]);
        assert!(best_alternative(&ctx).is_none());
    }

    #[test]
    fn test_no_options_falls_back_to_emergency() {
        let e = engine();
        let ctx = HandoverContext::new("ue-1", "SAT_A", "SAT_B", GeoPosition::new(0.0, 0.0));
        let action = e.decide_fallback(
            &anomaly(AnomalyType::TargetUnavailable, AnomalySeverity::Low, &ctx),
            &ctx,
        );
        assert_eq!(action.strategy, FallbackStrategy::EmergencyFallback);
        assert_eq!(action.target_satellite.as_deref(), Some("SAT_A"));
        assert_eq!(action.confidence, 0.99);
    }

    #[test]
    fn test_tight_budget_favors_fast_options() {
        // rollback 0.772625 beats emergency 0.754525 until the 1.3x bonus
        let e = engine();
        let mut ctx = context();
        let a = anomaly(AnomalyType::Timeout, AnomalySeverity::High, &ctx);
        assert_eq!(e.decide_fallback(&a, &ctx).strategy, FallbackStrategy::RollbackToSource);

        ctx.time_budget_s = Some(1.0);
        let action = e.decide_fallback(&a, &ctx);
        assert_eq!(action.strategy, FallbackStrategy::EmergencyFallback);
        assert!((action.score - 0.754525 * 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_record_outcome_updates_stats() {
        let e = engine();
        let ctx = context();
        let a = anomaly(AnomalyType::Timeout, AnomalySeverity::Critical, &ctx);
        let action = e.decide_fallback(&a, &ctx);
        e.record_outcome(&action.action_id, DecisionOutcome::Failure, 3.0, false)
            .unwrap();

        let stats = e.statistics()[&FallbackStrategy::EmergencyFallback].clone();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.failure_reasons["FAILURE"], 1);
        assert!(matches!(
            e.record_outcome(&action.action_id, DecisionOutcome::Success, 1.0, true),
            Err(RecoveryError::UnknownAction(_))
        ));

        let metrics = e.performance_metrics();
        assert_eq!(metrics.total_decisions, 1);
        assert_eq!(metrics.resolved_decisions, 1);
        assert_eq!(metrics.accuracy_trend, vec![0.0]);
    }

    #[test]
    fn test_open_decisions_bounded() {
        let config = EngineConfig {
            max_open_decisions: 10,
            ..EngineConfig::default()
        };
        let e = FallbackDecisionEngine::new(config, Arc::new(StatisticsStore::new())).unwrap();
        let ctx = context();

        let actions: Vec<FallbackAction> = (0..25)
            .map(|_| {
                let a = anomaly(AnomalyType::Timeout, AnomalySeverity::Critical, &ctx);
                e.decide_fallback(&a, &ctx)
            })
            .collect();
        assert!(e.open_decisions() <= 10);
        assert_eq!(e.open_decisions(), 10);

        assert!(matches!(
            e.record_outcome(&actions[0].action_id, DecisionOutcome::Success, 1.0, true),
            Err(RecoveryError::UnknownAction(_))
        ));
        e.record_outcome(&actions[24].action_id, DecisionOutcome::Success, 1.0, true)
            .unwrap();

        let metrics = e.performance_metrics();
        assert_eq!(metrics.total_decisions, 25);
        assert_eq!(metrics.expired_decisions, 15);
        assert_eq!(metrics.resolved_decisions, 1);
    }

    #[test]
    fn test_learning_shifts_weights_and_reranks() {
        let config = EngineConfig {
            learning_interval: 10,
            learning_buffer_capacity: 100,
            ..EngineConfig::default()
        };
        let e = FallbackDecisionEngine::new(config, Arc::new(StatisticsStore::new())).unwrap();
        let ctx = context();

        // CRITICAL timeouts only offer the emergency fallback
        for i in 0..10 {
            let a = anomaly(AnomalyType::Timeout, AnomalySeverity::Critical, &ctx);
            let action = e.decide_fallback(&a, &ctx);
            assert_eq!(action.strategy, FallbackStrategy::EmergencyFallback);
            let ok = i % 5 != 0;
            let time = if ok { 1.0 } else { 8.0 };
            e.record_outcome(&action.action_id, DecisionOutcome::Success, time, ok)
                .unwrap();
        }

        let w = e.weights();
        assert!((w.recovery_time - 0.275).abs() < 1e-9);
        assert!((w.success_probability - 0.315).abs() < 1e-9);
        assert_eq!(e.performance_metrics().learning_updates, 1);

        // emergency at 0.8 now outranks untried rollback at 0.5
        let table = e.priority_table();
        assert_eq!(
            table[&(AnomalyType::Timeout, AnomalySeverity::High)],
            vec![FallbackStrategy::EmergencyFallback, FallbackStrategy::RollbackToSource]
        );
        assert_eq!(
            table[&(AnomalyType::Timeout, AnomalySeverity::Low)],
            vec![FallbackStrategy::DelayHandover, FallbackStrategy::AdjustPowerParameters]
        );
    }

    #[test]
    fn test_recommendations_follow_table() {
        let e = engine();
        let recs = e.strategy_recommendations(AnomalyType::NetworkCongestion, AnomalySeverity::Low);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].strategy, FallbackStrategy::LoadBalancing);
        assert_eq!(recs[0].success_rate, DEFAULT_SUCCESS_RATE);
        assert!(!recs[0].recommended_scenarios.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let config = EngineConfig {
            learning_interval: 0,
            ..EngineConfig::default()
        };
        assert!(FallbackDecisionEngine::new(config, Arc::new(StatisticsStore::new())).is_err());
    }
}

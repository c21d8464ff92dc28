//! Handover Recovery
//!
//! Supervises in-flight handovers and picks recovery actions when they go
//! wrong:
//!
//! - [`rules`]: independent detection rules graded by severity
//! - [`detector`]: one supervision task per open handover context
//! - [`fallback`]: scored strategy selection with outcome-driven learning
//! - [`stats`]: per-strategy counters shared by every supervision task
//! - [`history`]: append-only anomaly log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod context;
pub mod detector;
pub mod fallback;
pub mod history;
pub mod rules;
pub mod stats;
pub mod strategy;

pub use context::{HandoverContext, NetworkConditions, SignalSnapshot};
pub use detector::{AnomalyDetector, Escalation};
pub use fallback::{
    spawn_fallback_consumer, DecisionOutcome, EngineConfig, FallbackDecisionEngine,
    PerformanceMetrics, RecoveryDecision, StrategyRecommendation, WeightFactors,
};
pub use history::AnomalyHistory;
pub use rules::{DetectionRules, DetectorConfig, Rule, RuleError};
pub use stats::{StatisticsStore, StrategyStats};
pub use strategy::{FallbackAction, FallbackOption, FallbackStrategy, StrategyParameters};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Handover {0} is already supervised")]
    DuplicateHandover(String),
    #[error("Handover {0} is not supervised")]
    UnknownHandover(String),
    #[error("No open decision for action {0}")]
    UnknownAction(String),
    #[error("Supervision needs a Tokio runtime")]
    NoRuntime,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    Timeout,
    SignalDegradation,
    TargetUnavailable,
    InterferenceDetected,
    NetworkCongestion,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 5] = [
        AnomalyType::Timeout,
        AnomalyType::SignalDegradation,
        AnomalyType::TargetUnavailable,
        AnomalyType::InterferenceDetected,
        AnomalyType::NetworkCongestion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Timeout => "TIMEOUT",
            AnomalyType::SignalDegradation => "SIGNAL_DEGRADATION",
            AnomalyType::TargetUnavailable => "TARGET_UNAVAILABLE",
            AnomalyType::InterferenceDetected => "INTERFERENCE_DETECTED",
            AnomalyType::NetworkCongestion => "NETWORK_CONGESTION",
        }
    }

    /// Descriptive hints attached to every anomaly of this type
    pub fn remedy_hints(&self) -> &'static [&'static str] {
        match self {
            AnomalyType::Timeout => &[
                "check target satellite control link",
                "consider rollback to source",
                "extend handover window if signal is stable",
            ],
            AnomalyType::SignalDegradation => &[
                "raise transmit power",
                "switch to a higher-elevation satellite",
                "hold handover until signal recovers",
            ],
            AnomalyType::TargetUnavailable => &[
                "select an alternative satellite",
                "verify target is still in the active pool",
            ],
            AnomalyType::InterferenceDetected => &[
                "hop to a backup frequency band",
                "reduce beam power on adjacent cells",
            ],
            AnomalyType::NetworkCongestion => &[
                "rebalance load across satellites",
                "defer non-critical handovers",
            ],
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered LOW < MEDIUM < HIGH < CRITICAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    pub const ALL: [AnomalySeverity; 4] = [
        AnomalySeverity::Low,
        AnomalySeverity::Medium,
        AnomalySeverity::High,
        AnomalySeverity::Critical,
    ];

    /// 1 (LOW) through 4 (CRITICAL)
    pub fn value(&self) -> u8 {
        match self {
            AnomalySeverity::Low => 1,
            AnomalySeverity::Medium => 2,
            AnomalySeverity::High => 3,
            AnomalySeverity::Critical => 4,
        }
    }

    /// HIGH and CRITICAL go straight to the fallback engine
    pub fn is_urgent(&self) -> bool {
        *self >= AnomalySeverity::High
    }
}

/// Immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub detected_at: DateTime<Utc>,
    pub ue_id: String,
    pub handover_id: String,
    pub affected_satellites: Vec<String>,
    /// Raw measurements that fired the rule
    pub metrics: BTreeMap<String, f64>,
    pub remedy_hints: Vec<String>,
}

impl Anomaly {
    pub fn new(
        anomaly_type: AnomalyType,
        severity: AnomalySeverity,
        context: &HandoverContext,
        detected_at: DateTime<Utc>,
        affected_satellites: Vec<String>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            anomaly_type,
            severity,
            detected_at,
            ue_id: context.ue_id.clone(),
            handover_id: context.handover_id.clone(),
            affected_satellites,
            metrics,
            remedy_hints: anomaly_type
                .remedy_hints()
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

//! Recovery strategies and the actions built from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackStrategy {
    RollbackToSource,
    SelectAlternativeSatellite,
    DelayHandover,
    AdjustPowerParameters,
    FrequencyHopping,
    LoadBalancing,
    EmergencyFallback,
}

impl FallbackStrategy {
    pub const ALL: [FallbackStrategy; 7] = [
        FallbackStrategy::RollbackToSource,
        FallbackStrategy::SelectAlternativeSatellite,
        FallbackStrategy::DelayHandover,
        FallbackStrategy::AdjustPowerParameters,
        FallbackStrategy::FrequencyHopping,
        FallbackStrategy::LoadBalancing,
        FallbackStrategy::EmergencyFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::RollbackToSource => "ROLLBACK_TO_SOURCE",
            FallbackStrategy::SelectAlternativeSatellite => "SELECT_ALTERNATIVE_SATELLITE",
            FallbackStrategy::DelayHandover => "DELAY_HANDOVER",
            FallbackStrategy::AdjustPowerParameters => "ADJUST_POWER_PARAMETERS",
            FallbackStrategy::FrequencyHopping => "FREQUENCY_HOPPING",
            FallbackStrategy::LoadBalancing => "LOAD_BALANCING",
            FallbackStrategy::EmergencyFallback => "EMERGENCY_FALLBACK",
        }
    }

    /// Situations the strategy suits, for operator-facing recommendations
    pub fn recommended_scenarios(&self) -> &'static [&'static str] {
        match self {
            FallbackStrategy::RollbackToSource => &[
                "handover timeout",
                "target satellite failure",
                "emergency",
            ],
            FallbackStrategy::SelectAlternativeSatellite => &[
                "target satellite unavailable",
                "poor signal quality",
                "load balancing",
            ],
            FallbackStrategy::DelayHandover => &[
                "mild signal degradation",
                "transient interference",
                "high system load",
            ],
            FallbackStrategy::AdjustPowerParameters => &[
                "insufficient signal strength",
                "interference suppression",
                "power optimization",
            ],
            FallbackStrategy::FrequencyHopping => &[
                "in-band interference",
                "signal blocking",
                "frequency-selective fading",
            ],
            FallbackStrategy::LoadBalancing => &[
                "network congestion",
                "uneven resource use",
                "capacity limits",
            ],
            FallbackStrategy::EmergencyFallback => &[
                "severe failure",
                "system crash",
                "safe mode",
            ],
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution parameters, one shape per strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParameters {
    Rollback { immediate: bool },
    AlternativeSatellite { satellite_id: String, preemptive: bool },
    Delay { delay_s: f64 },
    PowerAdjustment { gain_factor: f64, duration_s: f64 },
    FrequencyHop { band: String, hop_count: u32 },
    LoadBalance { rebalance_threshold: f64 },
    Emergency { bypass_checks: bool },
}

impl StrategyParameters {
    pub fn strategy(&self) -> FallbackStrategy {
        match self {
            StrategyParameters::Rollback { .. } => FallbackStrategy::RollbackToSource,
            StrategyParameters::AlternativeSatellite { .. } => {
                FallbackStrategy::SelectAlternativeSatellite
            }
            StrategyParameters::Delay { .. } => FallbackStrategy::DelayHandover,
            StrategyParameters::PowerAdjustment { .. } => FallbackStrategy::AdjustPowerParameters,
            StrategyParameters::FrequencyHop { .. } => FallbackStrategy::FrequencyHopping,
            StrategyParameters::LoadBalance { .. } => FallbackStrategy::LoadBalancing,
            StrategyParameters::Emergency { .. } => FallbackStrategy::EmergencyFallback,
        }
    }
}

/// A materialized strategy with its estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackOption {
    pub strategy: FallbackStrategy,
    pub target_satellite: Option<String>,
    pub estimated_recovery_time_s: f64,
    /// 0..1
    pub success_probability: f64,
    /// 0..1
    pub resource_cost: f64,
    /// 0..1
    pub risk_level: f64,
    pub description: String,
    pub parameters: StrategyParameters,
}

impl FallbackOption {
    pub fn is_well_formed(&self) -> bool {
        [
            self.estimated_recovery_time_s,
            self.success_probability,
            self.resource_cost,
            self.risk_level,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// The single action chosen for an anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAction {
    pub action_id: String,
    pub anomaly_id: String,
    pub handover_id: String,
    pub ue_id: String,
    pub strategy: FallbackStrategy,
    pub target_satellite: Option<String>,
    pub estimated_recovery_time_s: f64,
    /// Adjusted success probability of the chosen option
    pub confidence: f64,
    pub resource_cost: f64,
    pub risk_level: f64,
    /// 1 (lowest) through 10
    pub priority: u8,
    pub score: f64,
    pub description: String,
    pub parameters: StrategyParameters,
    pub decided_at: DateTime<Utc>,
}

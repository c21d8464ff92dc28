//! Anomaly detection rules
//!
//! | Rule | Fires when | Severity |
//! |------|-----------|----------|
//! | Timeout | elapsed > timeout threshold | <5s LOW, 5-10s MEDIUM, 10-20s HIGH, >20s CRITICAL |
//! | SignalDegradation | RSRP < threshold or SINR < threshold | banded by RSRP deficit |
//! | TargetUnavailable | reachability check fails | HIGH |
//! | Interference | level > 0.7 | HIGH above 0.9, else MEDIUM |
//! | NetworkCongestion | congestion > 0.8 or latency > 200 ms | MEDIUM above 0.9, else LOW |
//!
//! Rules are evaluated independently; a failing rule is logged and skipped
//! for that tick without affecting the others.

use crate::{Anomaly, AnomalySeverity, AnomalyType, HandoverContext, RecoveryError, Result};
use chrono::{DateTime, Utc};
use orbital_mechanics::SatelliteReachability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("{rule:?}: metric {metric} is not finite ({value})")]
    NonFiniteMetric {
        rule: Rule,
        metric: &'static str,
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub timeout_threshold_s: f64,
    pub rsrp_threshold_dbm: f64,
    pub sinr_threshold_db: f64,
    pub interference_threshold: f64,
    pub interference_high: f64,
    pub congestion_threshold: f64,
    pub congestion_medium: f64,
    pub latency_threshold_ms: f64,
    pub poll_interval_ms: u64,
    /// Consecutive MEDIUM ticks before escalating
    pub medium_recheck_ticks: u32,
    pub escalation_buffer: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout_threshold_s: 5.0,
            rsrp_threshold_dbm: -110.0,
            sinr_threshold_db: 5.0,
            interference_threshold: 0.7,
            interference_high: 0.9,
            congestion_threshold: 0.8,
            congestion_medium: 0.9,
            latency_threshold_ms: 200.0,
            poll_interval_ms: 500,
            medium_recheck_ticks: 3,
            escalation_buffer: 1000,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.timeout_threshold_s,
            self.rsrp_threshold_dbm,
            self.sinr_threshold_db,
            self.interference_threshold,
            self.interference_high,
            self.congestion_threshold,
            self.congestion_medium,
            self.latency_threshold_ms,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(RecoveryError::Configuration(
                "detector thresholds must be finite".to_string(),
            ));
        }
        if self.timeout_threshold_s <= 0.0 {
            return Err(RecoveryError::Configuration(format!(
                "timeout threshold {} must be positive",
                self.timeout_threshold_s
            )));
        }
        if self.interference_high < self.interference_threshold {
            return Err(RecoveryError::Configuration(
                "interference HIGH band below firing threshold".to_string(),
            ));
        }
        if self.congestion_medium < self.congestion_threshold {
            return Err(RecoveryError::Configuration(
                "congestion MEDIUM band below firing threshold".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RecoveryError::Configuration(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.medium_recheck_ticks == 0 || self.escalation_buffer == 0 {
            return Err(RecoveryError::Configuration(
                "recheck ticks and escalation buffer must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rule {
    Timeout,
    SignalDegradation,
    TargetUnavailable,
    Interference,
    NetworkCongestion,
}

impl Rule {
    pub const ALL: [Rule; 5] = [
        Rule::Timeout,
        Rule::SignalDegradation,
        Rule::TargetUnavailable,
        Rule::Interference,
        Rule::NetworkCongestion,
    ];

    pub fn anomaly_type(&self) -> AnomalyType {
        match self {
            Rule::Timeout => AnomalyType::Timeout,
            Rule::SignalDegradation => AnomalyType::SignalDegradation,
            Rule::TargetUnavailable => AnomalyType::TargetUnavailable,
            Rule::Interference => AnomalyType::InterferenceDetected,
            Rule::NetworkCongestion => AnomalyType::NetworkCongestion,
        }
    }
}

type RuleResult = std::result::Result<Option<Anomaly>, RuleError>;

fn finite(rule: Rule, metric: &'static str, value: f64) -> std::result::Result<f64, RuleError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RuleError::NonFiniteMetric {
            rule,
            metric,
            value,
        })
    }
}

pub fn timeout_severity(elapsed_s: f64) -> AnomalySeverity {
    if elapsed_s < 5.0 {
        AnomalySeverity::Low
    } else if elapsed_s < 10.0 {
        AnomalySeverity::Medium
    } else if elapsed_s <= 20.0 {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Critical
    }
}

/// Severity from how far RSRP sits below threshold. A SINR-only trigger
/// (no RSRP deficit) is LOW, or MEDIUM when SINR is negative.
pub fn signal_severity(rsrp_deficit_db: f64, sinr_db: Option<f64>) -> AnomalySeverity {
    if rsrp_deficit_db <= 0.0 {
        match sinr_db {
            Some(s) if s < 0.0 => AnomalySeverity::Medium,
            _ => AnomalySeverity::Low,
        }
    } else if rsrp_deficit_db <= 3.0 {
        AnomalySeverity::Medium
    } else if rsrp_deficit_db <= 10.0 {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Critical
    }
}

pub struct DetectionRules {
    config: DetectorConfig,
    reachability: Option<Arc<dyn SatelliteReachability>>,
}

impl DetectionRules {
    pub fn new(
        config: DetectorConfig,
        reachability: Option<Arc<dyn SatelliteReachability>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reachability,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run every rule once. Failing rules are skipped.
    pub fn evaluate(&self, context: &HandoverContext, now: DateTime<Utc>) -> Vec<Anomaly> {
        Rule::ALL
            .iter()
            .filter_map(|rule| match self.apply(*rule, context, now) {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        handover_id = %context.handover_id,
                        "Rule evaluation failed, skipping this tick: {}",
                        e
                    );
                    None
                }
            })
            .collect()
    }

    pub fn apply(&self, rule: Rule, context: &HandoverContext, now: DateTime<Utc>) -> RuleResult {
        match rule {
            Rule::Timeout => self.check_timeout(context, now),
            Rule::SignalDegradation => self.check_signal(context, now),
            Rule::TargetUnavailable => Ok(self.check_target(context, now)),
            Rule::Interference => self.check_interference(context, now),
            Rule::NetworkCongestion => self.check_congestion(context, now),
        }
    }

    fn check_timeout(&self, context: &HandoverContext, now: DateTime<Utc>) -> RuleResult {
        let elapsed = finite(Rule::Timeout, "elapsed_s", context.elapsed_s(now))?;
        if elapsed <= self.config.timeout_threshold_s {
            return Ok(None);
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("elapsed_s".to_string(), elapsed);
        metrics.insert(
            "timeout_threshold_s".to_string(),
            self.config.timeout_threshold_s,
        );
        Ok(Some(Anomaly::new(
            AnomalyType::Timeout,
            timeout_severity(elapsed),
            context,
            now,
            vec![
                context.source_satellite.clone(),
                context.target_satellite.clone(),
            ],
            metrics,
        )))
    }

    fn check_signal(&self, context: &HandoverContext, now: DateTime<Utc>) -> RuleResult {
        let rsrp = finite(
            Rule::SignalDegradation,
            "rsrp_dbm",
            context.signal.rsrp_or_poor(),
        )?;
        let sinr = match context.signal.sinr_db {
            Some(s) => Some(finite(Rule::SignalDegradation, "sinr_db", s)?),
            None => None,
        };

        let rsrp_low = rsrp < self.config.rsrp_threshold_dbm;
        let sinr_low = sinr.is_some_and(|s| s < self.config.sinr_threshold_db);
        if !rsrp_low && !sinr_low {
            return Ok(None);
        }

        let deficit = self.config.rsrp_threshold_dbm - rsrp;
        let mut metrics = BTreeMap::new();
        metrics.insert("rsrp_dbm".to_string(), rsrp);
        metrics.insert("rsrp_deficit_db".to_string(), deficit);
        if let Some(s) = sinr {
            metrics.insert("sinr_db".to_string(), s);
        }
        Ok(Some(Anomaly::new(
            AnomalyType::SignalDegradation,
            signal_severity(deficit, sinr),
            context,
            now,
            vec![context.target_satellite.clone()],
            metrics,
        )))
    }

    fn check_target(&self, context: &HandoverContext, now: DateTime<Utc>) -> Option<Anomaly> {
        let reachability = self.reachability.as_ref()?;
        if reachability.is_reachable(&context.target_satellite) {
            return None;
        }
        let mut metrics = BTreeMap::new();
        metrics.insert("reachable".to_string(), 0.0);
        Some(Anomaly::new(
            AnomalyType::TargetUnavailable,
            AnomalySeverity::High,
            context,
            now,
            vec![context.target_satellite.clone()],
            metrics,
        ))
    }

    fn check_interference(&self, context: &HandoverContext, now: DateTime<Utc>) -> RuleResult {
        let level = match context.network.interference_level {
            Some(l) => finite(Rule::Interference, "interference_level", l)?,
            None => return Ok(None),
        };
        if level <= self.config.interference_threshold {
            return Ok(None);
        }
        let severity = if level > self.config.interference_high {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Medium
        };
        let mut metrics = BTreeMap::new();
        metrics.insert("interference_level".to_string(), level);
        Ok(Some(Anomaly::new(
            AnomalyType::InterferenceDetected,
            severity,
            context,
            now,
            vec![context.target_satellite.clone()],
            metrics,
        )))
    }

    fn check_congestion(&self, context: &HandoverContext, now: DateTime<Utc>) -> RuleResult {
        let congestion = match context.network.congestion_level {
            Some(c) => Some(finite(Rule::NetworkCongestion, "congestion_level", c)?),
            None => None,
        };
        let latency = match context.network.latency_ms {
            Some(l) => Some(finite(Rule::NetworkCongestion, "latency_ms", l)?),
            None => None,
        };

        let congested = congestion.is_some_and(|c| c > self.config.congestion_threshold);
        let slow = latency.is_some_and(|l| l > self.config.latency_threshold_ms);
        if !congested && !slow {
            return Ok(None);
        }

        let severity = if congestion.is_some_and(|c| c > self.config.congestion_medium) {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        };
        let mut metrics = BTreeMap::new();
        if let Some(c) = congestion {
            metrics.insert("congestion_level".to_string(), c);
        }
        if let Some(l) = latency {
            metrics.insert("latency_ms".to_string(), l);
        }
        Ok(Some(Anomaly::new(
            AnomalyType::NetworkCongestion,
            severity,
            context,
            now,
            vec![
                context.source_satellite.clone(),
                context.target_satellite.clone(),
            ],
            metrics,
        )))
    }
}

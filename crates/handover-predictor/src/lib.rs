//! Handover Predictor
//!
//! Per-UE handover decisions against the active satellite pool:
//!
//! 1. Two-point prediction: best serving satellite at `now` and `now + Δt`.
//! 2. If they differ, bisect `[now, now + Δt]` until the interval is narrower
//!    than the precision threshold or the iteration cap is reached.
//! 3. The trigger time is the midpoint of the final interval.
//!
//! Prediction is a pure function of (UE, now, Δt, provider answers); the only
//! shared state is a set of lock-free counters.

use orbital_mechanics::{GeoPosition, VisibilitySample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod predictor;
pub mod session;

pub use predictor::{HandoverPredictor, PredictorMetrics, PredictorMetricsSnapshot};
pub use session::{HandoverPhase, HandoverTrigger, UeHandoverSession, PHASE_HISTORY_CAPACITY};

/// Default prediction horizon (s)
pub const DEFAULT_DELTA_T_S: f64 = 5.000000000;
/// Default refinement precision (s)
pub const DEFAULT_PRECISION_S: f64 = 0.010000000;
/// Default refinement iteration cap
pub const DEFAULT_MAX_REFINEMENT_ITERATIONS: u32 = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictorError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid transition from {from:?}: {action}")]
    InvalidTransition { from: HandoverPhase, action: String },
}

pub type Result<T> = std::result::Result<T, PredictorError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Satellites below this elevation are not candidates
    pub elevation_threshold_deg: f64,
    pub max_refinement_iterations: u32,
    /// Confidence blend: signal quality at both endpoints
    pub signal_weight: f64,
    /// Confidence blend: 1 / (1 + Δt / reference)
    pub delta_t_weight: f64,
    /// Confidence blend: mean elevation / 90°
    pub elevation_weight: f64,
    pub delta_t_reference_s: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            elevation_threshold_deg: 10.0,
            max_refinement_iterations: DEFAULT_MAX_REFINEMENT_ITERATIONS,
            signal_weight: 0.4,
            delta_t_weight: 0.3,
            elevation_weight: 0.3,
            delta_t_reference_s: 10.0,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.elevation_threshold_deg) {
            return Err(PredictorError::Configuration(format!(
                "elevation threshold {} outside [-90, 90]",
                self.elevation_threshold_deg
            )));
        }
        if self.max_refinement_iterations == 0 || self.max_refinement_iterations > 64 {
            return Err(PredictorError::Configuration(format!(
                "refinement cap {} outside [1, 64]",
                self.max_refinement_iterations
            )));
        }
        let weights = [self.signal_weight, self.delta_t_weight, self.elevation_weight];
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(PredictorError::Configuration(
                "confidence weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PredictorError::Configuration(format!(
                "confidence weights sum to {}, expected 1",
                sum
            )));
        }
        if !(self.delta_t_reference_s.is_finite() && self.delta_t_reference_s > 0.0) {
            return Err(PredictorError::Configuration(
                "delta_t reference must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A connection endpoint and the pool it may be served from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEquipment {
    pub id: String,
    pub position: GeoPosition,
    pub candidate_satellites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSatellite {
    pub satellite_id: String,
    pub sample: VisibilitySample,
}

/// One bisection step, recorded for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementStep {
    pub iteration: u32,
    pub t_start: f64,
    pub t_end: f64,
    pub t_mid: f64,
    pub mid_satellite: String,
    /// Interval width after this step
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementTrace {
    pub steps: Vec<RefinementStep>,
    pub final_start: f64,
    pub final_end: f64,
    /// Stopped on the iteration cap with width still above precision
    pub capped: bool,
}

impl RefinementTrace {
    pub fn iterations(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn final_width(&self) -> f64 {
        self.final_end - self.final_start
    }

    pub fn midpoint(&self) -> f64 {
        (self.final_start + self.final_end) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub ue_id: String,
    pub now_s: f64,
    pub delta_t_s: f64,
    pub handover_required: bool,
    pub current_best: BestSatellite,
    pub future_best: BestSatellite,
    pub trigger_time_s: Option<f64>,
    pub confidence: f64,
    pub refinement: Option<RefinementTrace>,
}

/// "No satellite" is its own outcome, never folded into "no change"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PredictionOutcome {
    Predicted(PredictionResult),
    NoVisibleSatellite { ue_id: String, at_s: f64 },
}

impl PredictionOutcome {
    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            PredictionOutcome::Predicted(r) => Some(r),
            PredictionOutcome::NoVisibleSatellite { .. } => None,
        }
    }

    pub fn handover_required(&self) -> bool {
        self.result().map(|r| r.handover_required).unwrap_or(false)
    }

    pub fn is_no_visible(&self) -> bool {
        matches!(self, PredictionOutcome::NoVisibleSatellite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(PredictorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_weights_rejected() {
        let c = PredictorConfig {
            signal_weight: 0.9,
            ..PredictorConfig::default()
        };
        assert!(matches!(c.validate(), Err(PredictorError::Configuration(_))));

        let c = PredictorConfig {
            max_refinement_iterations: 0,
            ..PredictorConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let o = PredictionOutcome::NoVisibleSatellite {
            ue_id: "ue-1".to_string(),
            at_s: 12.5,
        };
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["outcome"], "no_visible_satellite");
        assert!(!o.handover_required());
        assert!(o.is_no_visible());
    }
}

//! Per-UE handover session
//!
//! `Idle → PredictionIssued → {NoChangeNeeded | RefinementInProgress} →
//! HandoverScheduled → Completed | Aborted`
//!
//! Call `tick` every update cycle. Once the scheduled trigger time is reached
//! the session emits a single `HandoverTrigger`, which the caller turns into
//! a supervised handover context.

use crate::{PredictionOutcome, PredictorError, Result};
use orbital_mechanics::GeoPosition;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Most recent phases kept per session
pub const PHASE_HISTORY_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HandoverPhase {
    /// No prediction outstanding
    Idle,

    /// Prediction requested, outcome pending
    PredictionIssued,

    /// Serving satellite stays best over the horizon
    NoChangeNeeded,

    /// Bisecting the switchover instant
    RefinementInProgress,

    /// Trigger time fixed, waiting for it to arrive
    HandoverScheduled,

    Completed,

    Aborted,
}

impl HandoverPhase {
    /// Phases from which a new prediction may start
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            HandoverPhase::Idle
                | HandoverPhase::NoChangeNeeded
                | HandoverPhase::Completed
                | HandoverPhase::Aborted
        )
    }
}

/// Emitted once when a scheduled handover becomes due
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverTrigger {
    pub ue_id: String,
    pub source_satellite: String,
    pub target_satellite: String,
    pub trigger_time_s: f64,
    pub position: GeoPosition,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct UeHandoverSession {
    ue_id: String,
    position: GeoPosition,
    phase: HandoverPhase,
    serving_satellite: Option<String>,
    scheduled: Option<HandoverTrigger>,
    trigger_emitted: bool,
    abort_reason: Option<String>,
    history: VecDeque<HandoverPhase>,
    last_tick_s: Option<f64>,
}

impl UeHandoverSession {
    pub fn new(ue_id: impl Into<String>, position: GeoPosition) -> Self {
        Self {
            ue_id: ue_id.into(),
            position,
            phase: HandoverPhase::Idle,
            serving_satellite: None,
            scheduled: None,
            trigger_emitted: false,
            abort_reason: None,
            history: VecDeque::from([HandoverPhase::Idle]),
            last_tick_s: None,
        }
    }

    pub fn ue_id(&self) -> &str {
        &self.ue_id
    }

    pub fn phase(&self) -> HandoverPhase {
        self.phase
    }

    pub fn serving_satellite(&self) -> Option<&str> {
        self.serving_satellite.as_deref()
    }

    pub fn scheduled(&self) -> Option<&HandoverTrigger> {
        self.scheduled.as_ref()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Last `PHASE_HISTORY_CAPACITY` phases entered, oldest first
    pub fn history(&self) -> Vec<HandoverPhase> {
        self.history.iter().copied().collect()
    }

    pub fn last_tick_s(&self) -> Option<f64> {
        self.last_tick_s
    }

    pub fn update_position(&mut self, position: GeoPosition) {
        self.position = position;
    }

    fn enter(&mut self, phase: HandoverPhase) {
        debug!(ue_id = %self.ue_id, "{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        if self.history.len() == PHASE_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(phase);
    }

    fn reject(&self, action: &str) -> PredictorError {
        PredictorError::InvalidTransition {
            from: self.phase,
            action: action.to_string(),
        }
    }

    pub fn begin_prediction(&mut self) -> Result<()> {
        if !self.phase.is_resting() {
            return Err(self.reject("begin_prediction"));
        }
        self.scheduled = None;
        self.trigger_emitted = false;
        self.abort_reason = None;
        self.enter(HandoverPhase::PredictionIssued);
        Ok(())
    }

    /// Apply a prediction outcome and return the resulting phase
    pub fn on_prediction(&mut self, outcome: &PredictionOutcome) -> Result<HandoverPhase> {
        if self.phase != HandoverPhase::PredictionIssued {
            return Err(self.reject("on_prediction"));
        }
        let result = match outcome {
            PredictionOutcome::Predicted(r) if r.ue_id == self.ue_id => r,
            PredictionOutcome::Predicted(r) => {
                return Err(PredictorError::InvalidArgument(format!(
                    "prediction for {} applied to session {}",
                    r.ue_id, self.ue_id
                )))
            }
            PredictionOutcome::NoVisibleSatellite { at_s, .. } => {
                self.abort_reason = Some(format!("no visible satellite at {:.3}s", at_s));
                self.enter(HandoverPhase::Aborted);
                return Ok(self.phase);
            }
        };

        self.serving_satellite = Some(result.current_best.satellite_id.clone());

        let trigger_time_s = match (result.handover_required, result.trigger_time_s) {
            (true, Some(t)) => t,
            _ => {
                self.enter(HandoverPhase::NoChangeNeeded);
                return Ok(self.phase);
            }
        };

        self.enter(HandoverPhase::RefinementInProgress);
        self.scheduled = Some(HandoverTrigger {
            ue_id: self.ue_id.clone(),
            source_satellite: result.current_best.satellite_id.clone(),
            target_satellite: result.future_best.satellite_id.clone(),
            trigger_time_s,
            position: self.position,
            confidence: result.confidence,
        });
        self.enter(HandoverPhase::HandoverScheduled);
        Ok(self.phase)
    }

    /// Advance time. Returns the trigger exactly once, on the first tick at
    /// or after the scheduled time.
    pub fn tick(&mut self, now_s: f64) -> Option<HandoverTrigger> {
        self.last_tick_s = Some(now_s);

        match self.phase {
            HandoverPhase::HandoverScheduled if !self.trigger_emitted => {
                let scheduled = self.scheduled.as_mut()?;
                if now_s < scheduled.trigger_time_s {
                    return None;
                }
                scheduled.position = self.position;
                self.trigger_emitted = true;
                info!(
                    ue_id = %self.ue_id,
                    "Handover due: {} -> {} at {:.3}s",
                    scheduled.source_satellite,
                    scheduled.target_satellite,
                    scheduled.trigger_time_s
                );
                Some(scheduled.clone())
            }
            _ => None,
        }
    }

    /// Switch the serving satellite to the scheduled target
    pub fn complete(&mut self) -> Result<()> {
        if self.phase != HandoverPhase::HandoverScheduled || !self.trigger_emitted {
            return Err(self.reject("complete"));
        }
        self.serving_satellite = self.scheduled.as_ref().map(|s| s.target_satellite.clone());
        self.enter(HandoverPhase::Completed);
        Ok(())
    }

    pub fn abort(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.phase {
            HandoverPhase::PredictionIssued
            | HandoverPhase::RefinementInProgress
            | HandoverPhase::HandoverScheduled => {
                self.abort_reason = Some(reason.into());
                self.enter(HandoverPhase::Aborted);
                Ok(())
            }
            _ => Err(self.reject("abort")),
        }
    }
}

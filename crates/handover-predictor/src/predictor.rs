//! Two-point prediction and binary-search refinement

use crate::{
    BestSatellite, PredictionOutcome, PredictionResult, PredictorConfig, PredictorError,
    RefinementStep, RefinementTrace, Result, UserEquipment,
};
use orbital_mechanics::VisibilityProvider;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// RSRP mapped to 0 at -140 dBm and 1 at -80 dBm
fn rsrp_quality(rsrp_dbm: f64) -> f64 {
    ((rsrp_dbm + 140.0) / 60.0).clamp(0.0, 1.0)
}

/// Lock-free prediction counters
#[derive(Debug, Default)]
pub struct PredictorMetrics {
    predictions: AtomicU64,
    handovers_predicted: AtomicU64,
    no_visible: AtomicU64,
    refinement_iterations: AtomicU64,
    capped_refinements: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorMetricsSnapshot {
    pub predictions: u64,
    pub handovers_predicted: u64,
    pub no_visible: u64,
    pub capped_refinements: u64,
    pub avg_refinement_iterations: f64,
}

impl PredictorMetrics {
    pub fn snapshot(&self) -> PredictorMetricsSnapshot {
        let handovers = self.handovers_predicted.load(Ordering::Relaxed);
        let iterations = self.refinement_iterations.load(Ordering::Relaxed);
        PredictorMetricsSnapshot {
            predictions: self.predictions.load(Ordering::Relaxed),
            handovers_predicted: handovers,
            no_visible: self.no_visible.load(Ordering::Relaxed),
            capped_refinements: self.capped_refinements.load(Ordering::Relaxed),
            avg_refinement_iterations: if handovers == 0 {
                0.0
            } else {
                iterations as f64 / handovers as f64
            },
        }
    }
}

pub struct HandoverPredictor<P: VisibilityProvider> {
    config: PredictorConfig,
    provider: P,
    metrics: PredictorMetrics,
}

impl<P: VisibilityProvider> HandoverPredictor<P> {
    pub fn new(config: PredictorConfig, provider: P) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            metrics: PredictorMetrics::default(),
        })
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn metrics(&self) -> PredictorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Best serving satellite at `t`: highest RSRP, ties to higher elevation,
    /// then to the lexicographically smaller id.
    pub fn best_satellite_at(&self, ue: &UserEquipment, t: f64) -> Option<BestSatellite> {
        ue.candidate_satellites
            .iter()
            .filter_map(|id| {
                self.provider
                    .sample(&ue.position, id, t)
                    .filter(|s| s.elevation_deg >= self.config.elevation_threshold_deg)
                    .map(|sample| BestSatellite {
                        satellite_id: id.clone(),
                        sample,
                    })
            })
            .max_by(compare_candidates)
    }

    /// Predict whether `ue` needs a handover within `[now, now + delta_t]`,
    /// refining the trigger instant to `precision` seconds.
    pub fn predict(
        &self,
        ue: &UserEquipment,
        now: f64,
        delta_t: f64,
        precision: f64,
    ) -> Result<PredictionOutcome> {
        if !(now.is_finite() && delta_t.is_finite() && delta_t > 0.0) {
            return Err(PredictorError::InvalidArgument(format!(
                "delta_t must be positive and finite, got {}",
                delta_t
            )));
        }
        if !(precision.is_finite() && precision > 0.0) {
            return Err(PredictorError::InvalidArgument(format!(
                "precision must be positive and finite, got {}",
                precision
            )));
        }

        self.metrics.predictions.fetch_add(1, Ordering::Relaxed);
        let future = now + delta_t;

        let (current_best, future_best) =
            match (self.best_satellite_at(ue, now), self.best_satellite_at(ue, future)) {
                (Some(c), Some(f)) => (c, f),
                (None, _) => return Ok(self.no_visible(ue, now)),
                (_, None) => return Ok(self.no_visible(ue, future)),
            };

        let confidence = self.confidence(&current_best, &future_best, delta_t);

        if current_best.satellite_id == future_best.satellite_id {
            debug!(
                ue_id = %ue.id,
                "No handover needed, {} stays best",
                current_best.satellite_id
            );
            return Ok(PredictionOutcome::Predicted(PredictionResult {
                ue_id: ue.id.clone(),
                now_s: now,
                delta_t_s: delta_t,
                handover_required: false,
                current_best,
                future_best,
                trigger_time_s: None,
                confidence,
                refinement: None,
            }));
        }

        let trace = match self.refine(ue, now, future, &current_best.satellite_id, precision) {
            Ok(trace) => trace,
            Err(at) => return Ok(self.no_visible(ue, at)),
        };

        self.metrics.handovers_predicted.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .refinement_iterations
            .fetch_add(trace.iterations() as u64, Ordering::Relaxed);
        if trace.capped {
            self.metrics.capped_refinements.fetch_add(1, Ordering::Relaxed);
        }

        let trigger = trace.midpoint();
        info!(
            ue_id = %ue.id,
            "Handover {} -> {} at {:.3}s ({} iterations{}, confidence {:.2})",
            current_best.satellite_id,
            future_best.satellite_id,
            trigger,
            trace.iterations(),
            if trace.capped { ", capped" } else { "" },
            confidence
        );

        Ok(PredictionOutcome::Predicted(PredictionResult {
            ue_id: ue.id.clone(),
            now_s: now,
            delta_t_s: delta_t,
            handover_required: true,
            current_best,
            future_best,
            trigger_time_s: Some(trigger),
            confidence,
            refinement: Some(trace),
        }))
    }

    /// Bisect `[t_start, t_end]`. The left bound keeps `source` as best.
    /// `Err(t)` when nothing is visible at the midpoint `t`.
    fn refine(
        &self,
        ue: &UserEquipment,
        mut t_start: f64,
        mut t_end: f64,
        source: &str,
        precision: f64,
    ) -> std::result::Result<RefinementTrace, f64> {
        let mut steps = Vec::new();
        let mut iteration = 0;

        while t_end - t_start > precision && iteration < self.config.max_refinement_iterations {
            iteration += 1;
            let t_mid = (t_start + t_end) / 2.0;
            let best = self.best_satellite_at(ue, t_mid).ok_or(t_mid)?;

            if best.satellite_id == source {
                t_start = t_mid;
            } else {
                t_end = t_mid;
            }

            steps.push(RefinementStep {
                iteration,
                t_start,
                t_end,
                t_mid,
                mid_satellite: best.satellite_id,
                width: t_end - t_start,
            });
        }

        Ok(RefinementTrace {
            steps,
            final_start: t_start,
            final_end: t_end,
            capped: t_end - t_start > precision,
        })
    }

    fn no_visible(&self, ue: &UserEquipment, at_s: f64) -> PredictionOutcome {
        self.metrics.no_visible.fetch_add(1, Ordering::Relaxed);
        debug!(ue_id = %ue.id, "No visible satellite at {:.3}s", at_s);
        PredictionOutcome::NoVisibleSatellite {
            ue_id: ue.id.clone(),
            at_s,
        }
    }

    fn confidence(&self, current: &BestSatellite, future: &BestSatellite, delta_t: f64) -> f64 {
        let signal =
            (rsrp_quality(current.sample.rsrp_dbm) + rsrp_quality(future.sample.rsrp_dbm)) / 2.0;
        let horizon = 1.0 / (1.0 + delta_t / self.config.delta_t_reference_s);
        let elevation = ((current.sample.elevation_deg + future.sample.elevation_deg) / 2.0 / 90.0)
            .clamp(0.0, 1.0);

        let c = self.config.signal_weight * signal
            + self.config.delta_t_weight * horizon
            + self.config.elevation_weight * elevation;
        if c.is_finite() {
            c.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Orders by RSRP, then elevation, then reversed id, so `max_by` picks the
/// strongest signal and breaks ties toward higher elevation and the smaller id.
pub fn compare_candidates(a: &BestSatellite, b: &BestSatellite) -> CmpOrdering {
    a.sample
        .rsrp_dbm
        .total_cmp(&b.sample.rsrp_dbm)
        .then_with(|| a.sample.elevation_deg.total_cmp(&b.sample.elevation_deg))
        .then_with(|| b.satellite_id.cmp(&a.satellite_id))
}

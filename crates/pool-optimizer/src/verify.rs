//! Final solution verification
//!
//! Converts the best search state into a `PoolSolution` with its quality
//! metrics and constraint-satisfaction map.

use crate::cost::{CostBreakdown, PoolState};
use crate::coverage::SpatiotemporalCoverageAnalyzer;
use crate::timeline::{signal_quality, SearchSpace};
use crate::{
    ConstellationPool, OptimizationStats, PoolSolution, MIN_SIGNAL_QUALITY,
    MIN_TEMPORAL_DISTRIBUTION, MIN_VISIBILITY_COMPLIANCE,
};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Width of the bins used to score handover opportunity (steps)
const OPPORTUNITY_BIN_STEPS: usize = 10;

pub(crate) struct Verification<'s, 'a> {
    pub space: &'s SearchSpace<'a>,
    pub analyzer: &'s SpatiotemporalCoverageAnalyzer,
}

impl<'s, 'a> Verification<'s, 'a> {
    pub fn assemble(
        &self,
        state: &PoolState,
        cost: CostBreakdown,
        stats: OptimizationStats,
        seed: u64,
    ) -> PoolSolution {
        let space = self.space;
        let degenerate = space.is_degenerate();
        let mut constraints = BTreeMap::new();
        let mut pools = Vec::with_capacity(space.constellations.len());

        for (ci, c) in space.constellations.iter().enumerate() {
            let selection = &state.selections[ci];
            let members: Vec<_> = selection.iter().map(|&i| space.candidate(ci, i)).collect();
            let name = c.target.constellation;

            constraints.insert(format!("{}_input_sufficient", name), !c.is_undersized());

            let size_ok = selection.len() >= c.target.min_pool_size
                && selection.len() <= c.target.max_pool_size;
            constraints.insert(format!("{}_pool_size_ok", name), size_ok);

            let coverage = self
                .analyzer
                .validate_orbit_period_coverage(members.iter().copied(), &c.target);
            constraints.insert(format!("{}_orbit_coverage_ok", name), coverage.passed);

            pools.push(ConstellationPool {
                constellation: name,
                selected: members.iter().map(|m| m.id.clone()).collect(),
                visible_counts: state.counts[ci].clone(),
                orbit_coverage: coverage,
            });
        }

        let visibility_compliance = self.visibility_compliance(state);
        let temporal_distribution = self.temporal_distribution(state);
        let signal_quality = self.signal_quality(state);

        constraints.insert(
            "visibility_compliance_ok".to_string(),
            visibility_compliance >= MIN_VISIBILITY_COMPLIANCE,
        );
        constraints.insert(
            "temporal_distribution_ok".to_string(),
            temporal_distribution >= MIN_TEMPORAL_DISTRIBUTION,
        );
        constraints.insert(
            "signal_quality_ok".to_string(),
            signal_quality >= MIN_SIGNAL_QUALITY,
        );

        let compliant = constraints.values().all(|ok| *ok);

        info!(
            "Pool verification: compliance={:.1}%, temporal={:.3}, signal={:.3}, compliant={}",
            visibility_compliance * 100.0,
            temporal_distribution,
            signal_quality,
            compliant
        );
        for (name, ok) in &constraints {
            if !ok {
                warn!("Constraint not met: {}", name);
            }
        }

        PoolSolution {
            pools,
            cost: cost.total,
            visibility_compliance,
            temporal_distribution,
            signal_quality,
            constraints_satisfied: constraints,
            compliant,
            degenerate,
            seed,
            stats,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Fraction of horizon steps where every constellation still inside its
    /// own period is inside its band
    pub fn visibility_compliance(&self, state: &PoolState) -> f64 {
        let steps = self.space.steps;
        if steps == 0 {
            return 0.0;
        }
        let ok = (0..steps)
            .filter(|&k| {
                self.space
                    .constellations
                    .iter()
                    .zip(&state.counts)
                    .filter(|(c, _)| k < c.steps)
                    .all(|(c, counts)| c.target.within_band(counts[k]))
            })
            .count();
        ok as f64 / steps as f64
    }

    /// 0.4·continuity + 0.3·load balance + 0.3·handover opportunity
    pub fn temporal_distribution(&self, state: &PoolState) -> f64 {
        let space = self.space;
        let n = space.constellations.len();
        if n == 0 {
            return 0.0;
        }

        let mut continuity = 0.0;
        let mut balance = 0.0;
        let mut opportunity = 0.0;

        for (ci, c) in space.constellations.iter().enumerate() {
            let counts = &state.counts[ci];
            let steps = c.steps;
            if steps == 0 {
                continue;
            }

            let continuous = counts.iter().filter(|&&v| v >= c.target.min_visible).count();
            continuity += continuous as f64 / steps as f64;

            let mean = counts.iter().map(|&v| v as f64).sum::<f64>() / steps as f64;
            if mean > 0.0 {
                let var = counts
                    .iter()
                    .map(|&v| (v as f64 - mean).powi(2))
                    .sum::<f64>()
                    / steps as f64;
                balance += (1.0 - var.sqrt() / mean).clamp(0.0, 1.0);
            }

            // A bin offers a handover when some member rises inside it
            let bins = steps.div_ceil(OPPORTUNITY_BIN_STEPS);
            let mut rising = vec![false; bins];
            for &local in &state.selections[ci] {
                let row = &c.visibility[local];
                for k in 0..steps {
                    let rises = row[k] && (k == 0 || !row[k - 1]);
                    if rises {
                        rising[k / OPPORTUNITY_BIN_STEPS] = true;
                    }
                }
            }
            opportunity += rising.iter().filter(|r| **r).count() as f64 / bins as f64;
        }

        let n = n as f64;
        0.4 * continuity / n + 0.3 * balance / n + 0.3 * opportunity / n
    }

    /// Mean RSRP-derived quality over every selected satellite
    pub fn signal_quality(&self, state: &PoolState) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (ci, selection) in state.selections.iter().enumerate() {
            for &local in selection {
                sum += signal_quality(self.space.candidate(ci, local).mean_rsrp_dbm());
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

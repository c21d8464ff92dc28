//! Simulated-annealing pool search
//!
//! Neighbor generation is a pure function of (state, space, rng); the RNG is
//! a seeded ChaCha8 stream, so a run is fully determined by its seed.

use crate::cost::{CostModel, PoolState};
use crate::coverage::SpatiotemporalCoverageAnalyzer;
use crate::timeline::SearchSpace;
use crate::verify::Verification;
use crate::{
    AnnealingParams, CostWeights, InitialPool, OptimizationStats, PoolConstraints, PoolSolution,
    Result, StopReason,
};
use orbital_mechanics::SatelliteCandidate;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

/// Iterations between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 64;
/// Iterations between history samples
const HISTORY_INTERVAL: usize = 100;
/// Minimum cost decrease counted as an improvement
const IMPROVEMENT_EPSILON: f64 = 1e-12;

/// One search move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    /// Pool member at `slot` replaced by unselected candidate `with`
    Replace {
        constellation: usize,
        slot: usize,
        with: usize,
    },
    /// Two members trade positions; only ordering changes
    Permute {
        constellation: usize,
        a: usize,
        b: usize,
    },
    Identity,
}

/// Propose a neighbor of `state`. Pool sizes never change and undersized
/// constellations keep every candidate they have.
pub fn neighbor<R: Rng + ?Sized>(
    state: &PoolState,
    space: &SearchSpace<'_>,
    rng: &mut R,
) -> (PoolState, Move) {
    let populated: Vec<usize> = (0..state.selections.len())
        .filter(|&ci| {
            !state.selections[ci].is_empty() && !space.constellations[ci].is_undersized()
        })
        .collect();
    if populated.is_empty() {
        return (state.clone(), Move::Identity);
    }
    let ci = populated[rng.gen_range(0..populated.len())];
    let selection = &state.selections[ci];

    if rng.gen_bool(0.5) {
        let mut in_pool = vec![false; space.constellations[ci].len()];
        for &i in selection {
            in_pool[i] = true;
        }
        let unselected: Vec<usize> = (0..in_pool.len()).filter(|&i| !in_pool[i]).collect();
        if !unselected.is_empty() {
            let slot = rng.gen_range(0..selection.len());
            let with = unselected[rng.gen_range(0..unselected.len())];
            let mut next = state.clone();
            next.replace(space, ci, slot, with);
            return (
                next,
                Move::Replace {
                    constellation: ci,
                    slot,
                    with,
                },
            );
        }
    }

    if selection.len() < 2 {
        return (state.clone(), Move::Identity);
    }
    let a = rng.gen_range(0..selection.len());
    let b = rng.gen_range(0..selection.len());
    let mut next = state.clone();
    next.selections[ci].swap(a, b);
    (
        next,
        Move::Permute {
            constellation: ci,
            a,
            b,
        },
    )
}

/// Metropolis criterion with an acceptance floor
pub fn metropolis_accept<R: Rng + ?Sized>(
    delta: f64,
    temperature: f64,
    floor: f64,
    rng: &mut R,
) -> bool {
    if delta < 0.0 {
        return true;
    }
    let p = (-delta / temperature).exp();
    p > floor && rng.gen::<f64>() < p
}

#[derive(Debug, Clone)]
pub struct PoolOptimizer {
    params: AnnealingParams,
    weights: CostWeights,
}

impl PoolOptimizer {
    pub fn new(params: AnnealingParams, weights: CostWeights) -> Result<Self> {
        params.validate()?;
        weights.validate()?;
        Ok(Self { params, weights })
    }

    pub fn params(&self) -> &AnnealingParams {
        &self.params
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    /// Optimize pools for every constellation in `constraints`.
    ///
    /// Errors only on invalid constraints. Empty or undersized input yields a
    /// flagged, non-compliant solution.
    pub fn optimize(
        &self,
        candidates: &[SatelliteCandidate],
        constraints: &PoolConstraints,
        seed: Option<u64>,
    ) -> Result<PoolSolution> {
        self.optimize_with_cancel(candidates, constraints, seed, &|| false)
    }

    /// As [`optimize`](Self::optimize), polling `cancelled` periodically.
    /// A cancelled run returns its best state so far with
    /// `StopReason::Cancelled`.
    pub fn optimize_with_cancel(
        &self,
        candidates: &[SatelliteCandidate],
        constraints: &PoolConstraints,
        seed: Option<u64>,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<PoolSolution> {
        constraints.validate()?;
        let seed = seed.unwrap_or_else(rand::random);
        let analyzer = SpatiotemporalCoverageAnalyzer::new(constraints.time_step_s);
        let space = SearchSpace::build(candidates, constraints);
        let model = CostModel::new(self.weights.clone(), analyzer.clone());
        let verification = Verification {
            space: &space,
            analyzer: &analyzer,
        };

        info!(
            "Optimizing {} candidates over {} steps (seed={}, T0={}, cooling={}, max_iter={})",
            candidates.len(),
            space.steps,
            seed,
            self.params.initial_temperature,
            self.params.cooling_rate,
            self.params.max_iterations
        );

        if space.is_degenerate() {
            warn!("Degenerate candidate input, returning best-effort pool");
            let selections: Vec<Vec<usize>> = space
                .constellations
                .iter()
                .map(|c| (0..c.len().min(c.target.max_pool_size)).collect())
                .collect();
            let state = PoolState::new(&space, selections);
            let cost = model.evaluate(&state, &space);
            let stats = OptimizationStats {
                initial_cost: cost.total,
                stop_reason: Some(StopReason::DegenerateInput),
                ..OptimizationStats::default()
            };
            return Ok(verification.assemble(&state, cost, stats, seed));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut state = initial_state(&space, &analyzer, constraints.initial_pool, &mut rng);
        let mut current = model.evaluate(&state, &space).total;

        let mut best = state.clone();
        let mut best_cost = current;
        let mut stats = OptimizationStats {
            initial_cost: current,
            improvements: vec![(0, current)],
            ..OptimizationStats::default()
        };

        let mut temperature = self.params.initial_temperature;
        let mut plateau = 0usize;
        let mut iteration = 0usize;

        let stop = loop {
            if temperature <= self.params.min_temperature {
                break StopReason::TemperatureFloor;
            }
            if iteration >= self.params.max_iterations {
                break StopReason::IterationCap;
            }
            if iteration % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                break StopReason::Cancelled;
            }

            let (next, _) = neighbor(&state, &space, &mut rng);
            let next_cost = model.evaluate(&next, &space).total;

            if metropolis_accept(
                next_cost - current,
                temperature,
                self.params.acceptance_floor,
                &mut rng,
            ) {
                state = next;
                current = next_cost;
                stats.accepted_moves += 1;
            }

            iteration += 1;
            if current < best_cost - IMPROVEMENT_EPSILON {
                best = state.clone();
                best_cost = current;
                stats.best_iteration = iteration;
                stats.improvements.push((iteration, best_cost));
                plateau = 0;
                debug!("New best at iteration {}: {:.3}", iteration, best_cost);
            } else {
                plateau += 1;
            }

            if iteration % HISTORY_INTERVAL == 0 {
                stats.cost_history.push(current);
                stats.temperature_history.push(temperature);
                debug!(
                    "Iteration {}: T={:.4}, current={:.3}, best={:.3}",
                    iteration, temperature, current, best_cost
                );
            }

            temperature *= self.params.cooling_rate;

            if plateau >= self.params.plateau_tolerance {
                break StopReason::Plateau;
            }
        };

        stats.iterations = iteration;
        stats.acceptance_rate = if iteration == 0 {
            0.0
        } else {
            stats.accepted_moves as f64 / iteration as f64
        };
        stats.stop_reason = Some(stop);

        info!(
            "Annealing stopped ({:?}) after {} iterations, best cost {:.3} at iteration {}",
            stop, iteration, best_cost, stats.best_iteration
        );

        let cost = model.evaluate(&best, &space);
        Ok(verification.assemble(&best, cost, stats, seed))
    }
}

/// Starting pool of target size. Undersized constellations take every
/// candidate up to their maximum.
fn initial_state<R: Rng + ?Sized>(
    space: &SearchSpace<'_>,
    analyzer: &SpatiotemporalCoverageAnalyzer,
    strategy: InitialPool,
    rng: &mut R,
) -> PoolState {
    let selections: Vec<Vec<usize>> = space
        .constellations
        .iter()
        .map(|c| {
            if c.is_undersized() {
                return (0..c.len().min(c.target.max_pool_size)).collect();
            }
            let size = c.target.target_pool_size.min(c.len());
            match strategy {
                InitialPool::Random => index::sample(&mut *rng, c.len(), size).into_vec(),
                InitialPool::PhaseDiverse => {
                    let members: Vec<SatelliteCandidate> = c
                        .members
                        .iter()
                        .map(|&i| space.candidates[i].clone())
                        .collect();
                    analyzer
                        .select_diverse_pool(&members, c.target.constellation, size)
                        .indices
                }
            }
        })
        .collect();
    PoolState::new(space, selections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstellationTarget;
    use orbital_mechanics::{Constellation, OrbitalElements, VisibilityWindow};

    /// Satellite i is visible during step i only
    fn staircase(n: usize) -> Vec<SatelliteCandidate> {
        (0..n)
            .map(|i| SatelliteCandidate {
                id: format!("OW-0-{}", i),
                constellation: Constellation::OneWeb,
                elements: OrbitalElements::new(87.9, 0.0, i as f64 * 18.0).unwrap(),
                windows: vec![VisibilityWindow {
                    start_s: i as f64 * 30.0,
                    end_s: (i + 1) as f64 * 30.0,
                    peak_elevation_deg: 40.0,
                    mean_rsrp_dbm: Some(-90.0),
                }],
            })
            .collect()
    }

    fn constraints(target: usize, max: usize) -> PoolConstraints {
        let mut t = ConstellationTarget::oneweb();
        t.min_pool_size = 1;
        t.target_pool_size = target;
        t.max_pool_size = max;
        t.min_visible = 1;
        t.max_visible = 1;
        t.orbit_period_minutes = 5.0; // 10 steps
        PoolConstraints {
            targets: vec![t],
            clustering_gap_s: 30.0,
            ..PoolConstraints::default()
        }
    }

    fn optimizer() -> PoolOptimizer {
        PoolOptimizer::new(AnnealingParams::default(), CostWeights::default()).unwrap()
    }

    #[test]
    fn test_metropolis() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(metropolis_accept(-1.0, 0.001, 0.5, &mut rng));
        // exp(-100) is far below any floor
        assert!(!metropolis_accept(1.0, 0.01, 0.01, &mut rng));
        // Equal cost is always taken above the floor
        assert!(metropolis_accept(0.0, 1.0, 0.01, &mut rng));
    }

    #[test]
    fn test_neighbor_keeps_pool_size() {
        let cands = staircase(20);
        let c = constraints(10, 10);
        let space = SearchSpace::build(&cands, &c);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut state = PoolState::new(&space, vec![(0..10).collect()]);
        for _ in 0..200 {
            let (next, mv) = neighbor(&state, &space, &mut rng);
            assert_eq!(next.selections[0].len(), 10);
            let mut ids = next.selections[0].clone();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), 10, "duplicate member after {:?}", mv);
            state = next;
        }
    }

    #[test]
    fn test_finds_full_coverage() {
        // Two of twelve never rise inside the 10-step horizon
        let cands = staircase(12);
        let solution = optimizer()
            .optimize(&cands, &constraints(10, 10), Some(42))
            .unwrap();
        assert_eq!(solution.visibility_compliance, 1.0);
        let selected = solution.selected_ids(Constellation::OneWeb);
        assert!(!selected.iter().any(|id| id == "OW-0-10" || id == "OW-0-11"));
    }

    #[test]
    fn test_same_seed_same_solution() {
        let cands = staircase(20);
        let c = constraints(6, 8);
        let a = optimizer().optimize(&cands, &c, Some(9)).unwrap();
        let b = optimizer().optimize(&cands, &c, Some(9)).unwrap();
        assert_eq!(a.pools[0].selected, b.pools[0].selected);
        assert_eq!(a.cost, b.cost);
        assert_eq!(a.stats.iterations, b.stats.iterations);
    }

    #[test]
    fn test_candidates_not_mutated() {
        let cands = staircase(20);
        let before = serde_json_snapshot(&cands);
        let _ = optimizer().optimize(&cands, &constraints(6, 8), Some(3)).unwrap();
        assert_eq!(before, serde_json_snapshot(&cands));
    }

    fn serde_json_snapshot(c: &[SatelliteCandidate]) -> String {
        serde_json::to_string(c).unwrap()
    }

    #[test]
    fn test_empty_input_is_degenerate() {
        let solution = optimizer().optimize(&[], &constraints(6, 8), Some(1)).unwrap();
        assert!(solution.degenerate);
        assert!(!solution.compliant);
        assert_eq!(solution.total_selected(), 0);
        assert_eq!(solution.stats.stop_reason, Some(StopReason::DegenerateInput));
        assert_eq!(
            solution.constraints_satisfied.get("oneweb_input_sufficient"),
            Some(&false)
        );
    }

    #[test]
    fn test_undersized_input_takes_everything() {
        let cands = staircase(4);
        let solution = optimizer()
            .optimize(&cands, &constraints(6, 8), Some(1))
            .unwrap();
        assert!(!solution.degenerate);
        assert_eq!(solution.total_selected(), 4);
    }

    #[test]
    fn test_undersized_constellation_does_not_block_others() {
        let mut cands = staircase(20);
        cands.push(SatelliteCandidate {
            id: "SL-0-0".to_string(),
            constellation: Constellation::Starlink,
            elements: OrbitalElements::new(53.0, 0.0, 0.0).unwrap(),
            windows: vec![VisibilityWindow {
                start_s: 0.0,
                end_s: 300.0,
                peak_elevation_deg: 40.0,
                mean_rsrp_dbm: Some(-90.0),
            }],
        });
        let mut starlink = ConstellationTarget::starlink();
        starlink.min_pool_size = 3;
        starlink.target_pool_size = 3;
        starlink.max_pool_size = 4;
        starlink.orbit_period_minutes = 5.0;
        let mut c = constraints(6, 8);
        c.targets.push(starlink);

        let solution = optimizer().optimize(&cands, &c, Some(5)).unwrap();
        assert!(!solution.degenerate);
        assert_ne!(solution.stats.stop_reason, Some(StopReason::DegenerateInput));
        assert!(solution.stats.iterations > 0);
        assert_eq!(solution.selected_ids(Constellation::Starlink), vec!["SL-0-0".to_string()]);
        assert_eq!(solution.selected_ids(Constellation::OneWeb).len(), 6);
        assert_eq!(
            solution.constraints_satisfied.get("starlink_input_sufficient"),
            Some(&false)
        );
        assert_eq!(
            solution.constraints_satisfied.get("oneweb_input_sufficient"),
            Some(&true)
        );
        assert!(!solution.compliant);
    }

    #[test]
    fn test_cancellation_returns_best_so_far() {
        let cands = staircase(20);
        let solution = optimizer()
            .optimize_with_cancel(&cands, &constraints(6, 8), Some(1), &|| true)
            .unwrap();
        assert_eq!(solution.stats.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(solution.stats.iterations, 0);
        assert_eq!(solution.total_selected(), 6);
    }

    #[test]
    fn test_invalid_constraints_error() {
        let mut c = constraints(6, 8);
        c.time_step_s = 0.0;
        assert!(optimizer().optimize(&staircase(4), &c, None).is_err());
    }
}

//! Property tests for the annealer

use orbital_mechanics::{Constellation, OrbitalElements, SatelliteCandidate, VisibilityWindow};
use pool_optimizer::{AnnealingParams, ConstellationTarget, CostWeights, PoolConstraints, PoolOptimizer};
use proptest::prelude::*;

fn candidates(n: usize, seed: u64) -> Vec<SatelliteCandidate> {
    (0..n)
        .map(|i| {
            let start = ((i as u64 * 7 + seed % 20) % 20) as f64 * 30.0;
            SatelliteCandidate {
                id: format!("OW-{}-{}", i / 10, i % 10),
                constellation: Constellation::OneWeb,
                elements: OrbitalElements::new(87.9, (i / 10) as f64 * 36.0, (i % 10) as f64 * 36.0)
                    .unwrap(),
                windows: vec![VisibilityWindow {
                    start_s: start,
                    end_s: start + 90.0,
                    peak_elevation_deg: 30.0,
                    mean_rsrp_dbm: Some(-100.0 + (i % 5) as f64 * 4.0),
                }],
            }
        })
        .collect()
}

fn constraints(min: usize, target: usize, max: usize) -> PoolConstraints {
    let mut t = ConstellationTarget::oneweb();
    t.min_pool_size = min;
    t.target_pool_size = target;
    t.max_pool_size = max;
    t.min_visible = 2;
    t.max_visible = 4;
    t.orbit_period_minutes = 10.0;
    PoolConstraints {
        targets: vec![t],
        ..PoolConstraints::default()
    }
}

fn fast_params() -> AnnealingParams {
    AnnealingParams {
        max_iterations: 400,
        plateau_tolerance: 150,
        ..AnnealingParams::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pool_never_exceeds_max(n in 0usize..40, min in 0usize..6, extra in 0usize..6, spare in 0usize..6, seed in any::<u64>()) {
        let target = min + extra;
        let max = (target + spare).max(1);
        let optimizer = PoolOptimizer::new(fast_params(), CostWeights::default()).unwrap();
        let solution = optimizer.optimize(&candidates(n, seed), &constraints(min, target, max), Some(seed)).unwrap();
        prop_assert!(solution.total_selected() <= max);
        if solution.degenerate {
            prop_assert!(!solution.compliant);
        }
    }

    #[test]
    fn best_cost_never_increases(n in 5usize..40, seed in any::<u64>()) {
        let optimizer = PoolOptimizer::new(fast_params(), CostWeights::default()).unwrap();
        let solution = optimizer.optimize(&candidates(n, seed), &constraints(1, 5, 5), Some(seed)).unwrap();
        let trace = &solution.stats.improvements;
        prop_assert!(!trace.is_empty());
        for pair in trace.windows(2) {
            prop_assert!(pair[1].1 < pair[0].1);
            prop_assert!(pair[1].0 > pair[0].0);
        }
        let last = trace.last().map(|(_, c)| *c).unwrap_or(f64::INFINITY);
        prop_assert!((solution.cost - last).abs() < 1e-9);
    }

    #[test]
    fn fixed_seed_is_reproducible(n in 5usize..30, seed in any::<u64>()) {
        let optimizer = PoolOptimizer::new(fast_params(), CostWeights::default()).unwrap();
        let cands = candidates(n, seed);
        let c = constraints(1, 4, 6);
        let a = optimizer.optimize(&cands, &c, Some(seed)).unwrap();
        let b = optimizer.optimize(&cands, &c, Some(seed)).unwrap();
        prop_assert_eq!(&a.pools[0].selected, &b.pools[0].selected);
        prop_assert_eq!(a.stats.iterations, b.stats.iterations);
    }
}

//! Full-size planning scenario: 600 Starlink + 200 OneWeb candidates

use orbital_mechanics::walker::synthesize_candidates;
use orbital_mechanics::{Constellation, PassGeometry, SatelliteCandidate, WalkerDelta};
use pool_optimizer::{
    AnnealingParams, CostWeights, InitialPool, PoolConstraints, PoolOptimizer, MIN_VISIBILITY_COMPLIANCE,
};

fn walker_candidates(constraints: &PoolConstraints) -> Vec<SatelliteCandidate> {
    let horizon = constraints.horizon_s();
    let mut all = synthesize_candidates(
        Constellation::Starlink,
        &WalkerDelta::starlink_shell(),
        &PassGeometry::starlink(),
        horizon,
    )
    .unwrap();
    all.extend(
        synthesize_candidates(
            Constellation::OneWeb,
            &WalkerDelta::oneweb_shell(),
            &PassGeometry::oneweb(),
            horizon,
        )
        .unwrap(),
    );
    all
}

#[test]
fn test_starlink_oneweb_reaches_compliance() {
    let constraints = PoolConstraints::default();
    let candidates = walker_candidates(&constraints);
    assert_eq!(candidates.len(), 800);

    let optimizer = PoolOptimizer::new(AnnealingParams::default(), CostWeights::default()).unwrap();
    let solution = optimizer.optimize(&candidates, &constraints, Some(42)).unwrap();

    assert!(!solution.degenerate);
    assert_eq!(solution.selected_ids(Constellation::Starlink).len(), 225);
    assert_eq!(solution.selected_ids(Constellation::OneWeb).len(), 70);
    assert!(
        solution.visibility_compliance >= MIN_VISIBILITY_COMPLIANCE,
        "compliance {:.3} after {} iterations",
        solution.visibility_compliance,
        solution.stats.iterations
    );
    assert_eq!(solution.constraints_satisfied.get("visibility_compliance_ok"), Some(&true));
    assert!(solution.stats.iterations <= AnnealingParams::default().max_iterations);
    assert!(solution.cost <= solution.stats.initial_cost);
}

#[test]
fn test_pools_are_disjoint_and_typed() {
    let constraints = PoolConstraints {
        initial_pool: InitialPool::PhaseDiverse,
        ..PoolConstraints::default()
    };
    let candidates = walker_candidates(&constraints);
    let params = AnnealingParams {
        max_iterations: 500,
        ..AnnealingParams::default()
    };
    let optimizer = PoolOptimizer::new(params, CostWeights::default()).unwrap();
    let solution = optimizer.optimize(&candidates, &constraints, Some(7)).unwrap();

    let starlink = solution.selected_ids(Constellation::Starlink);
    let oneweb = solution.selected_ids(Constellation::OneWeb);
    assert!(starlink.iter().all(|id| id.starts_with("SL-")));
    assert!(oneweb.iter().all(|id| id.starts_with("OW-")));

    let mut all: Vec<&String> = starlink.iter().chain(oneweb).collect();
    let before = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), before);

    // each constellation is sampled over its own period
    let starlink_steps = constraints
        .target(Constellation::Starlink)
        .unwrap()
        .steps(constraints.time_step_s);
    let pool = solution.pool(Constellation::Starlink).unwrap();
    assert_eq!(pool.visible_counts.len(), starlink_steps);
    assert!(starlink_steps < constraints.steps());
    let pool = solution.pool(Constellation::OneWeb).unwrap();
    assert_eq!(pool.visible_counts.len(), constraints.steps());
}

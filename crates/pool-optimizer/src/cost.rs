//! Multi-criteria pool cost
//!
//! Cost(S) = w_v·V + w_t·T + w_p·P + w_s·Q + w_d·D, see crate docs.

use crate::coverage::SpatiotemporalCoverageAnalyzer;
use crate::timeline::SearchSpace;
use crate::CostWeights;
use serde::{Deserialize, Serialize};

/// Working selection: local indices and running visible counts per constellation
#[derive(Debug, Clone, PartialEq)]
pub struct PoolState {
    pub selections: Vec<Vec<usize>>,
    pub counts: Vec<Vec<u32>>,
}

impl PoolState {
    pub fn new(space: &SearchSpace<'_>, selections: Vec<Vec<usize>>) -> Self {
        let counts = selections
            .iter()
            .zip(&space.constellations)
            .map(|(sel, c)| c.counts_for(sel))
            .collect();
        Self { selections, counts }
    }

    /// Swap `old` (position `slot`) for `new` in one constellation, updating counts
    pub fn replace(&mut self, space: &SearchSpace<'_>, constellation: usize, slot: usize, new: usize) {
        let old = self.selections[constellation][slot];
        let rows = &space.constellations[constellation].visibility;
        for (k, count) in self.counts[constellation].iter_mut().enumerate() {
            if rows[old][k] {
                *count -= 1;
            }
            if rows[new][k] {
                *count += 1;
            }
        }
        self.selections[constellation][slot] = new;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Out-of-band (constellation, step) pairs
    pub visibility: f64,
    pub clustering: f64,
    pub pool_size: f64,
    pub signal: f64,
    pub diversity: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct CostModel {
    pub weights: CostWeights,
    pub analyzer: SpatiotemporalCoverageAnalyzer,
}

impl CostModel {
    pub fn new(weights: CostWeights, analyzer: SpatiotemporalCoverageAnalyzer) -> Self {
        Self { weights, analyzer }
    }

    pub fn evaluate(&self, state: &PoolState, space: &SearchSpace<'_>) -> CostBreakdown {
        let mut b = CostBreakdown::default();
        let n = space.constellations.len().max(1) as f64;
        let mut phase_diversity = 0.0;

        for (ci, c) in space.constellations.iter().enumerate() {
            let selection = &state.selections[ci];

            b.visibility += state.counts[ci]
                .iter()
                .filter(|&&v| !c.target.within_band(v))
                .count() as f64;

            b.clustering += clustering_penalty(
                selection.iter().filter_map(|&i| c.first_visible[i]),
                space.gap_steps,
            );

            let target = c.target.target_pool_size.max(1) as f64;
            b.pool_size += (selection.len() as f64 - target).abs() / target;

            if !selection.is_empty() {
                b.signal += selection.iter().map(|&i| c.signal_deviation[i]).sum::<f64>()
                    / selection.len() as f64
                    / n;
                phase_diversity += self
                    .analyzer
                    .diversity_score(selection.iter().map(|&i| &space.candidate(ci, i).elements))
                    .overall
                    / n;
            } else {
                b.signal += 1.0 / n;
            }
        }

        let orbital = self.analyzer.orbital_diversity(
            state.selections.iter().enumerate().flat_map(|(ci, selection)| {
                selection.iter().map(move |&i| space.candidate(ci, i))
            }),
            space.constellations.iter().map(|c| &c.target),
        );
        b.diversity = 1.0 - 0.5 * (orbital.overall + phase_diversity);

        let w = &self.weights;
        b.total = w.visibility * b.visibility
            + w.temporal_clustering * b.clustering
            + w.pool_size * b.pool_size
            + w.signal_quality * b.signal
            + w.orbital_diversity * b.diversity;
        b
    }
}

/// Σ (gap - g)/gap over adjacent first-appearance gaps g < gap
pub fn clustering_penalty(first_steps: impl Iterator<Item = usize>, gap_steps: usize) -> f64 {
    let mut steps: Vec<usize> = first_steps.collect();
    steps.sort_unstable();
    let gap = gap_steps as f64;
    steps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64)
        .filter(|g| *g < gap)
        .map(|g| (gap - g) / gap)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConstellationTarget, PoolConstraints};
    use orbital_mechanics::{Constellation, OrbitalElements, SatelliteCandidate, VisibilityWindow};

    fn sat(id: &str, windows: &[(f64, f64)]) -> SatelliteCandidate {
        SatelliteCandidate {
            id: id.to_string(),
            constellation: Constellation::OneWeb,
            elements: OrbitalElements::new(87.9, 0.0, 0.0).unwrap(),
            windows: windows
                .iter()
                .map(|&(a, b)| VisibilityWindow {
                    start_s: a,
                    end_s: b,
                    peak_elevation_deg: 50.0,
                    mean_rsrp_dbm: Some(-70.0),
                })
                .collect(),
        }
    }

    fn constraints() -> PoolConstraints {
        let mut t = ConstellationTarget::oneweb();
        t.min_pool_size = 1;
        t.target_pool_size = 2;
        t.max_pool_size = 2;
        t.min_visible = 1;
        t.max_visible = 1;
        t.orbit_period_minutes = 2.0; // 4 steps
        PoolConstraints {
            targets: vec![t],
            ..PoolConstraints::default()
        }
    }

    #[test]
    fn test_clustering_penalty() {
        // gaps 3, 20, 15 with gap 15: only the 3-step gap counts
        let p = clustering_penalty([0usize, 3, 23, 38].into_iter(), 15);
        assert!((p - 12.0 / 15.0).abs() < 1e-12);
        assert_eq!(clustering_penalty(std::iter::empty(), 15), 0.0);
    }

    #[test]
    fn test_visibility_counts_each_violating_step() {
        let cands = vec![sat("a", &[(0.0, 60.0)]), sat("b", &[(30.0, 90.0)])];
        let c = constraints();
        let space = SearchSpace::build(&cands, &c);
        let state = PoolState::new(&space, vec![vec![0, 1]]);
        assert_eq!(state.counts[0], vec![1, 2, 1, 0]);

        let model = CostModel::new(
            CostWeights {
                visibility: 1.0,
                temporal_clustering: 0.0,
                pool_size: 0.0,
                signal_quality: 0.0,
                orbital_diversity: 0.0,
            },
            SpatiotemporalCoverageAnalyzer::default(),
        );
        let b = model.evaluate(&state, &space);
        assert_eq!(b.visibility, 2.0);
        assert_eq!(b.total, 2.0);
        assert_eq!(b.pool_size, 0.0);
        assert_eq!(b.signal, 0.0);
    }

    #[test]
    fn test_replace_keeps_counts_consistent() {
        let cands = vec![
            sat("a", &[(0.0, 60.0)]),
            sat("b", &[(30.0, 90.0)]),
            sat("c", &[(90.0, 120.0)]),
        ];
        let c = constraints();
        let space = SearchSpace::build(&cands, &c);
        let mut state = PoolState::new(&space, vec![vec![0, 1]]);
        state.replace(&space, 0, 1, 2);
        assert_eq!(state, PoolState::new(&space, vec![vec![0, 2]]));
    }

    #[test]
    fn test_diversity_blends_orbital_and_phase() {
        // two co-located OneWeb satellites:
        // phase 0.5·(1/24 + 1/16) = 5/96, orbital 0.3/24 + 0.3 = 30/96
        let cands = vec![sat("a", &[(0.0, 60.0)]), sat("b", &[(30.0, 90.0)])];
        let c = constraints();
        let space = SearchSpace::build(&cands, &c);
        let state = PoolState::new(&space, vec![vec![0, 1]]);
        let b = CostModel::new(CostWeights::default(), SpatiotemporalCoverageAnalyzer::default())
            .evaluate(&state, &space);
        assert!((b.diversity - (1.0 - 35.0 / 192.0)).abs() < 1e-12);

        let empty = PoolState::new(&space, vec![vec![]]);
        let b = CostModel::new(CostWeights::default(), SpatiotemporalCoverageAnalyzer::default())
            .evaluate(&empty, &space);
        assert_eq!(b.diversity, 1.0);
    }

    #[test]
    fn test_shorter_period_scored_over_own_steps() {
        let mut starlink = ConstellationTarget::starlink();
        starlink.min_pool_size = 1;
        starlink.target_pool_size = 1;
        starlink.max_pool_size = 1;
        starlink.min_visible = 1;
        starlink.max_visible = 1;
        starlink.orbit_period_minutes = 1.0; // 2 steps
        let mut c = constraints();
        c.targets.push(starlink);

        let mut s = sat("s", &[(0.0, 45.0)]);
        s.constellation = Constellation::Starlink;
        let cands = vec![sat("a", &[(0.0, 120.0)]), s];
        let space = SearchSpace::build(&cands, &c);
        assert_eq!(space.steps, 4);

        let state = PoolState::new(&space, vec![vec![0], vec![0]]);
        assert_eq!(state.counts[1], vec![1, 1]);
        let b = CostModel::new(CostWeights::default(), SpatiotemporalCoverageAnalyzer::default())
            .evaluate(&state, &space);
        assert_eq!(b.visibility, 0.0);
    }
}

//! Discretized visibility over one orbital period
//!
//! Every candidate is sampled once per time step up front, so cost
//! evaluation during search only touches precomputed rows. Rows span the
//! candidate's own constellation period.

use crate::{ConstellationTarget, PoolConstraints};
use orbital_mechanics::SatelliteCandidate;
use tracing::{debug, warn};

/// Candidates of one constellation and their visibility rows
#[derive(Debug, Clone)]
pub struct ConstellationSpace {
    pub target: ConstellationTarget,
    /// Steps in this constellation's orbital period
    pub steps: usize,
    /// Indices into the caller's candidate slice
    pub members: Vec<usize>,
    /// `visibility[local][step]`
    pub visibility: Vec<Vec<bool>>,
    /// First step each member is visible, if ever
    pub first_visible: Vec<Option<usize>>,
    /// 0 = excellent, 1 = unusable or unknown
    pub signal_deviation: Vec<f64>,
}

impl ConstellationSpace {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Too few candidates to reach the minimum pool size
    pub fn is_undersized(&self) -> bool {
        self.len() < self.target.min_pool_size.max(1)
    }

    /// Visible counts per step for a set of local indices
    pub fn counts_for(&self, selection: &[usize]) -> Vec<u32> {
        let mut counts = vec![0u32; self.steps];
        for &local in selection {
            for (k, visible) in self.visibility[local].iter().enumerate() {
                if *visible {
                    counts[k] += 1;
                }
            }
        }
        counts
    }
}

/// Everything the annealer needs, borrowed against the candidate slice
#[derive(Debug)]
pub struct SearchSpace<'a> {
    pub candidates: &'a [SatelliteCandidate],
    pub constellations: Vec<ConstellationSpace>,
    /// Longest constellation period in steps
    pub steps: usize,
    pub time_step_s: f64,
    pub gap_steps: usize,
}

impl<'a> SearchSpace<'a> {
    pub fn build(candidates: &'a [SatelliteCandidate], constraints: &PoolConstraints) -> Self {
        let time_step_s = constraints.time_step_s;

        let constellations: Vec<ConstellationSpace> = constraints
            .targets
            .iter()
            .map(|target| {
                let steps = target.steps(time_step_s);
                let mut space = ConstellationSpace {
                    target: target.clone(),
                    steps,
                    members: Vec::new(),
                    visibility: Vec::new(),
                    first_visible: Vec::new(),
                    signal_deviation: Vec::new(),
                };

                for (idx, candidate) in candidates.iter().enumerate() {
                    if candidate.constellation != target.constellation {
                        continue;
                    }
                    if let Err(e) = candidate.validate() {
                        warn!("Skipping candidate: {}", e);
                        continue;
                    }
                    let row = visibility_row(candidate, target, steps, time_step_s);
                    space.first_visible.push(row.iter().position(|v| *v));
                    space.visibility.push(row);
                    space
                        .signal_deviation
                        .push(1.0 - signal_quality(candidate.mean_rsrp_dbm()));
                    space.members.push(idx);
                }

                debug!(
                    "{}: {} candidates over {} steps",
                    target.constellation,
                    space.members.len(),
                    steps
                );
                space
            })
            .collect();

        Self {
            candidates,
            steps: constellations.iter().map(|c| c.steps).max().unwrap_or(0),
            constellations,
            time_step_s,
            gap_steps: constraints.clustering_gap_steps(),
        }
    }

    /// No constellation can reach its minimum pool size. Undersized
    /// constellations alongside healthy ones are frozen instead.
    pub fn is_degenerate(&self) -> bool {
        self.constellations.iter().all(ConstellationSpace::is_undersized)
    }

    pub fn candidate(&self, constellation: usize, local: usize) -> &'a SatelliteCandidate {
        &self.candidates[self.constellations[constellation].members[local]]
    }
}

/// Sample a candidate at each step; passes peaking below the mask never count
fn visibility_row(
    candidate: &SatelliteCandidate,
    target: &ConstellationTarget,
    steps: usize,
    time_step_s: f64,
) -> Vec<bool> {
    (0..steps)
        .map(|k| {
            let t = k as f64 * time_step_s;
            candidate
                .windows
                .iter()
                .any(|w| w.peak_elevation_deg >= target.min_elevation_deg && w.contains(t))
        })
        .collect()
}

/// Map mean RSRP onto [0, 1]; unknown RSRP is treated as unusable
pub fn signal_quality(rsrp_dbm: Option<f64>) -> f64 {
    match rsrp_dbm {
        Some(r) if r >= -80.0 => 1.0,
        Some(r) if r >= -100.0 => 0.8 + 0.2 * (r + 100.0) / 20.0,
        Some(r) if r >= -120.0 => 0.8 * (r + 120.0) / 20.0,
        _ => 0.0,
    }
}

//! Spatiotemporal coverage analysis
//!
//! Buckets candidates by orbital phase (mean anomaly) and RAAN, fills the
//! buckets round-robin to spread a pool across the orbit, and checks that a
//! pool keeps at least one satellite in view for a full orbital period.
//!
//! Two diversity measures live here. `diversity_score` is the per
//! constellation phase diversity (phase and RAAN bin spread).
//! `orbital_diversity` scores the whole multi-constellation pool:
//!
//! `0.4 · inclination spread + 0.3 · RAAN uniformity + 0.3 · constellation balance`

use crate::ConstellationTarget;
use orbital_mechanics::{Constellation, OrbitalElements, SatelliteCandidate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Inclination spread (deg) that earns a full inclination score
pub const FULL_INCLINATION_SPREAD_DEG: f64 = 10.000000000;

/// 30° RAAN bins for pool-wide uniformity
pub const RAAN_UNIFORMITY_BINS: usize = 12;

/// Phase diversity of one constellation's selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiversityScore {
    pub phase: f64,
    pub raan: f64,
    /// `0.5 · phase + 0.5 · raan`
    pub overall: f64,
}

/// Orbital diversity of a whole pool across constellations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalDiversity {
    pub inclination: f64,
    pub raan_uniformity: f64,
    /// 1 - total variation distance between actual and target shares
    pub constellation_balance: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub time_coverage_ratio: f64,
    pub passed: bool,
    pub longest_gap_s: f64,
    pub uncovered_steps: usize,
    pub steps: usize,
}

/// Output of the greedy bucket fill
#[derive(Debug, Clone)]
pub struct DiversePool {
    /// Indices into the candidate slice passed in
    pub indices: Vec<usize>,
    pub diversity: DiversityScore,
    pub buckets_used: usize,
}

#[derive(Debug, Clone)]
pub struct SpatiotemporalCoverageAnalyzer {
    pub phase_bins: usize,
    pub raan_bins: usize,
    pub time_step_s: f64,
    pub coverage_threshold: f64,
}

impl Default for SpatiotemporalCoverageAnalyzer {
    fn default() -> Self {
        Self {
            phase_bins: 12,
            raan_bins: 8,
            time_step_s: 30.0,
            coverage_threshold: crate::MIN_ORBIT_COVERAGE,
        }
    }
}

impl SpatiotemporalCoverageAnalyzer {
    pub fn new(time_step_s: f64) -> Self {
        Self {
            time_step_s,
            ..Self::default()
        }
    }

    fn bin(angle_deg: f64, bins: usize) -> usize {
        let width = 360.0 / bins as f64;
        ((angle_deg.rem_euclid(360.0) / width) as usize).min(bins - 1)
    }

    pub fn phase_bin(&self, elements: &OrbitalElements) -> usize {
        Self::bin(elements.mean_anomaly_deg, self.phase_bins)
    }

    pub fn raan_bin(&self, elements: &OrbitalElements) -> usize {
        Self::bin(elements.raan_deg, self.raan_bins)
    }

    /// Pick `target_size` candidates of `constellation`, spreading them over
    /// phase × RAAN buckets. Within a bucket, higher peak elevation wins.
    pub fn select_diverse_pool(
        &self,
        candidates: &[SatelliteCandidate],
        constellation: Constellation,
        target_size: usize,
    ) -> DiversePool {
        let mut buckets: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (idx, c) in candidates.iter().enumerate() {
            if c.constellation != constellation {
                continue;
            }
            buckets
                .entry((self.phase_bin(&c.elements), self.raan_bin(&c.elements)))
                .or_default()
                .push(idx);
        }

        for members in buckets.values_mut() {
            members.sort_by(|&a, &b| {
                candidates[b]
                    .peak_elevation_deg()
                    .total_cmp(&candidates[a].peak_elevation_deg())
                    .then_with(|| candidates[a].id.cmp(&candidates[b].id))
            });
        }

        let mut indices = Vec::with_capacity(target_size);
        let mut depth = 0;
        while indices.len() < target_size {
            let mut progressed = false;
            for members in buckets.values() {
                if indices.len() >= target_size {
                    break;
                }
                if let Some(&idx) = members.get(depth) {
                    indices.push(idx);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
            depth += 1;
        }

        let diversity = self.diversity_score(indices.iter().map(|&i| &candidates[i].elements));
        debug!(
            "{}: diverse pool of {} from {} buckets (diversity={:.3})",
            constellation,
            indices.len(),
            buckets.len(),
            diversity.overall
        );

        DiversePool {
            indices,
            diversity,
            buckets_used: buckets.len(),
        }
    }

    /// Bin occupancy blended with evenness for phase and RAAN
    pub fn diversity_score<'a>(
        &self,
        elements: impl IntoIterator<Item = &'a OrbitalElements>,
    ) -> DiversityScore {
        let mut phase = vec![0usize; self.phase_bins];
        let mut raan = vec![0usize; self.raan_bins];
        for e in elements {
            phase[self.phase_bin(e)] += 1;
            raan[self.raan_bin(e)] += 1;
        }

        let phase_score = bin_spread(&phase);
        let raan_score = bin_spread(&raan);
        DiversityScore {
            phase: phase_score,
            raan: raan_score,
            overall: 0.5 * phase_score + 0.5 * raan_score,
        }
    }

    /// Score a pool spanning several constellations. Target shares come
    /// from each target's `target_pool_size`; members of constellations
    /// without a target count toward no expected share.
    pub fn orbital_diversity<'a, 'b, T>(
        &self,
        pool: impl IntoIterator<Item = &'a SatelliteCandidate>,
        targets: T,
    ) -> OrbitalDiversity
    where
        T: IntoIterator<Item = &'b ConstellationTarget>,
        T::IntoIter: Clone,
    {
        let targets = targets.into_iter();
        let mut raan = vec![0usize; RAAN_UNIFORMITY_BINS];
        let mut per_constellation: BTreeMap<Constellation, usize> = BTreeMap::new();
        let mut inc_min = f64::INFINITY;
        let mut inc_max = f64::NEG_INFINITY;
        let mut n = 0usize;

        for c in pool {
            raan[Self::bin(c.elements.raan_deg, RAAN_UNIFORMITY_BINS)] += 1;
            *per_constellation.entry(c.constellation).or_default() += 1;
            inc_min = inc_min.min(c.elements.inclination_deg);
            inc_max = inc_max.max(c.elements.inclination_deg);
            n += 1;
        }

        if n == 0 {
            return OrbitalDiversity {
                inclination: 0.0,
                raan_uniformity: 0.0,
                constellation_balance: 0.0,
                overall: 0.0,
            };
        }

        let inclination = ((inc_max - inc_min) / FULL_INCLINATION_SPREAD_DEG).clamp(0.0, 1.0);
        let raan_uniformity = bin_spread(&raan);

        let target_total: usize = targets.clone().map(|t| t.target_pool_size).sum();
        let target_count = targets.clone().count();
        let mut distance = 0.0;
        for t in targets {
            let expected = if target_total == 0 {
                1.0 / target_count as f64
            } else {
                t.target_pool_size as f64 / target_total as f64
            };
            let actual = per_constellation.remove(&t.constellation).unwrap_or(0) as f64 / n as f64;
            distance += (actual - expected).abs();
        }
        distance += per_constellation.values().sum::<usize>() as f64 / n as f64;
        let constellation_balance = (1.0 - 0.5 * distance).clamp(0.0, 1.0);

        OrbitalDiversity {
            inclination,
            raan_uniformity,
            constellation_balance,
            overall: 0.4 * inclination + 0.3 * raan_uniformity + 0.3 * constellation_balance,
        }
    }

    /// Fraction of one orbital period during which at least one pool member
    /// is above the target's elevation threshold.
    pub fn validate_orbit_period_coverage<'a>(
        &self,
        pool: impl IntoIterator<Item = &'a SatelliteCandidate>,
        target: &ConstellationTarget,
    ) -> CoverageReport {
        let steps = (target.orbit_period_s() / self.time_step_s).ceil() as usize;
        let pool: Vec<&SatelliteCandidate> = pool.into_iter().collect();

        let mut covered = vec![false; steps];
        for (k, slot) in covered.iter_mut().enumerate() {
            let t = k as f64 * self.time_step_s;
            *slot = pool.iter().any(|c| {
                c.windows
                    .iter()
                    .any(|w| w.peak_elevation_deg >= target.min_elevation_deg && w.contains(t))
            });
        }

        let covered_steps = covered.iter().filter(|c| **c).count();
        let mut longest = 0usize;
        let mut run = 0usize;
        for c in &covered {
            if *c {
                run = 0;
            } else {
                run += 1;
                longest = longest.max(run);
            }
        }

        let ratio = if steps == 0 {
            0.0
        } else {
            covered_steps as f64 / steps as f64
        };
        let passed = ratio >= self.coverage_threshold;

        info!(
            "{} coverage over {:.1} min: {:.1}% ({})",
            target.constellation,
            target.orbit_period_minutes,
            ratio * 100.0,
            if passed { "pass" } else { "fail" }
        );

        CoverageReport {
            time_coverage_ratio: ratio,
            passed,
            longest_gap_s: longest as f64 * self.time_step_s,
            uncovered_steps: steps - covered_steps,
            steps,
        }
    }
}

/// 0.5 · occupied fraction + 0.5 · evenness (1 - coefficient of variation)
fn bin_spread(counts: &[usize]) -> f64 {
    let bins = counts.len() as f64;
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let occupied = counts.iter().filter(|c| **c > 0).count() as f64 / bins;
    let mean = total as f64 / bins;
    let var = counts
        .iter()
        .map(|&c| (c as f64 - mean).powi(2))
        .sum::<f64>()
        / bins;
    let evenness = (1.0 - var.sqrt() / mean).clamp(0.0, 1.0);
    0.5 * occupied + 0.5 * evenness
}

//! Satellite Pool Optimizer
//!
//! Selects, per constellation, a bounded active pool from a large candidate
//! set so that the number of simultaneously visible satellites stays inside a
//! target band across a full orbital period.
//!
//! # Cost Model
//!
//! ```text
//! Cost(S) = w_v·V + w_t·T + w_p·P + w_s·Q + w_d·D
//! ```
//!
//! | Term | Default weight | Description |
//! |------|----------------|-------------|
//! | V    | 10.0  | Time steps with visible count outside the band |
//! | T    | 0.5   | First-appearance clustering, Σ (gap - g)/gap for g < gap |
//! | P    | 100.0 | Pool size deviation, \|n - target\| / target |
//! | Q    | 5.0   | Mean signal-quality deviation of pool members |
//! | D    | 2.0   | 1 - mean of pool orbital diversity and per-constellation phase diversity |
//!
//! Each constellation is sampled over its own orbital period; the
//! horizon is the longest of them.
//!
//! The search is simulated annealing with Metropolis acceptance and an
//! injected, seeded ChaCha RNG, so a fixed seed reproduces a run exactly.

use orbital_mechanics::Constellation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod annealing;
pub mod cost;
pub mod coverage;
pub mod loader;
pub mod planner;
pub mod timeline;
pub mod verify;

pub use annealing::PoolOptimizer;
pub use coverage::{
    CoverageReport, DiversePool, DiversityScore, OrbitalDiversity, SpatiotemporalCoverageAnalyzer,
};
pub use planner::{PlanHandle, PoolPlanner};

/// Default cost weights (9 decimal precision)
pub const W_VISIBILITY: f64 = 10.000000000;
pub const W_TEMPORAL_CLUSTERING: f64 = 0.500000000;
pub const W_POOL_SIZE: f64 = 100.000000000;
pub const W_SIGNAL_QUALITY: f64 = 5.000000000;
pub const W_ORBITAL_DIVERSITY: f64 = 2.000000000;

/// Acceptance thresholds for the final constraint map
pub const MIN_VISIBILITY_COMPLIANCE: f64 = 0.900000000;
pub const MIN_TEMPORAL_DISTRIBUTION: f64 = 0.700000000;
pub const MIN_SIGNAL_QUALITY: f64 = 0.800000000;
pub const MIN_ORBIT_COVERAGE: f64 = 0.950000000;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Planning run {0} superseded by a newer request")]
    Superseded(u64),
    #[error("Planning task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Pool size and visibility band for one constellation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationTarget {
    pub constellation: Constellation,
    pub target_pool_size: usize,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    /// Visible-count band, inclusive
    pub min_visible: u32,
    pub max_visible: u32,
    pub min_elevation_deg: f64,
    pub orbit_period_minutes: f64,
}

impl ConstellationTarget {
    pub fn starlink() -> Self {
        Self {
            constellation: Constellation::Starlink,
            target_pool_size: 225,
            min_pool_size: 200,
            max_pool_size: 250,
            min_visible: 10,
            max_visible: 15,
            min_elevation_deg: 5.0,
            orbit_period_minutes: 96.0,
        }
    }

    pub fn oneweb() -> Self {
        Self {
            constellation: Constellation::OneWeb,
            target_pool_size: 70,
            min_pool_size: 60,
            max_pool_size: 80,
            min_visible: 3,
            max_visible: 6,
            min_elevation_deg: 10.0,
            orbit_period_minutes: 109.64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.constellation;
        if self.max_pool_size == 0 {
            return Err(OptimizerError::Configuration(format!(
                "{}: max_pool_size must be positive",
                name
            )));
        }
        if !(self.min_pool_size <= self.target_pool_size
            && self.target_pool_size <= self.max_pool_size)
        {
            return Err(OptimizerError::Configuration(format!(
                "{}: pool sizes must satisfy min {} <= target {} <= max {}",
                name, self.min_pool_size, self.target_pool_size, self.max_pool_size
            )));
        }
        if self.min_visible > self.max_visible {
            return Err(OptimizerError::Configuration(format!(
                "{}: visible band [{}, {}] is empty",
                name, self.min_visible, self.max_visible
            )));
        }
        if !(self.orbit_period_minutes.is_finite() && self.orbit_period_minutes > 0.0) {
            return Err(OptimizerError::Configuration(format!(
                "{}: orbit period must be positive",
                name
            )));
        }
        if !(-90.0..=90.0).contains(&self.min_elevation_deg) {
            return Err(OptimizerError::Configuration(format!(
                "{}: elevation threshold {} outside [-90, 90]",
                name, self.min_elevation_deg
            )));
        }
        Ok(())
    }

    pub fn orbit_period_s(&self) -> f64 {
        self.orbit_period_minutes * 60.0
    }

    /// Time steps covering one orbital period
    pub fn steps(&self, time_step_s: f64) -> usize {
        (self.orbit_period_s() / time_step_s).ceil() as usize
    }

    pub fn within_band(&self, visible: u32) -> bool {
        visible >= self.min_visible && visible <= self.max_visible
    }
}

/// How the annealer's starting pool is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitialPool {
    /// Uniform random sample of the target size
    #[default]
    Random,
    /// Greedy phase/RAAN bucket fill from the coverage analyzer
    PhaseDiverse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConstraints {
    pub targets: Vec<ConstellationTarget>,
    pub time_step_s: f64,
    /// Minimum spacing between consecutive first appearances
    pub clustering_gap_s: f64,
    #[serde(default)]
    pub initial_pool: InitialPool,
}

impl Default for PoolConstraints {
    fn default() -> Self {
        Self {
            targets: vec![ConstellationTarget::starlink(), ConstellationTarget::oneweb()],
            time_step_s: 30.0,
            clustering_gap_s: 450.0,
            initial_pool: InitialPool::Random,
        }
    }
}

impl PoolConstraints {
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(OptimizerError::Configuration(
                "at least one constellation target is required".to_string(),
            ));
        }
        if !(self.time_step_s.is_finite() && self.time_step_s > 0.0) {
            return Err(OptimizerError::Configuration(format!(
                "time step {} must be positive",
                self.time_step_s
            )));
        }
        if !(self.clustering_gap_s.is_finite() && self.clustering_gap_s > 0.0) {
            return Err(OptimizerError::Configuration(format!(
                "clustering gap {} must be positive",
                self.clustering_gap_s
            )));
        }
        for (i, t) in self.targets.iter().enumerate() {
            t.validate()?;
            if self.targets[..i].iter().any(|o| o.constellation == t.constellation) {
                return Err(OptimizerError::Configuration(format!(
                    "duplicate target for {}",
                    t.constellation
                )));
            }
        }
        Ok(())
    }

    pub fn target(&self, constellation: Constellation) -> Option<&ConstellationTarget> {
        self.targets.iter().find(|t| t.constellation == constellation)
    }

    /// Longest configured orbital period. Candidate windows must cover it;
    /// each constellation is still scored over its own period only.
    pub fn horizon_s(&self) -> f64 {
        self.targets
            .iter()
            .map(|t| t.orbit_period_s())
            .fold(0.0, f64::max)
    }

    /// Time steps in the horizon
    pub fn steps(&self) -> usize {
        (self.horizon_s() / self.time_step_s).ceil() as usize
    }

    /// Clustering gap in time steps, derived from the configured resolution
    pub fn clustering_gap_steps(&self) -> usize {
        ((self.clustering_gap_s / self.time_step_s).ceil() as usize).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealingParams {
    pub initial_temperature: f64,
    pub min_temperature: f64,
    pub cooling_rate: f64,
    pub max_iterations: usize,
    /// Consecutive iterations without a new best before stopping
    pub plateau_tolerance: usize,
    /// Worse moves are never taken when exp(-Δ/T) falls below this
    pub acceptance_floor: f64,
}

impl Default for AnnealingParams {
    fn default() -> Self {
        Self {
            initial_temperature: 100.0,
            min_temperature: 0.01,
            cooling_rate: 0.995,
            max_iterations: 10_000,
            plateau_tolerance: 500,
            acceptance_floor: 0.01,
        }
    }
}

impl AnnealingParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_temperature > 0.0 && self.initial_temperature > self.min_temperature) {
            return Err(OptimizerError::Configuration(format!(
                "temperatures must satisfy 0 < min {} < initial {}",
                self.min_temperature, self.initial_temperature
            )));
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate < 1.0) {
            return Err(OptimizerError::Configuration(format!(
                "cooling rate {} outside (0, 1)",
                self.cooling_rate
            )));
        }
        if self.max_iterations == 0 || self.plateau_tolerance == 0 {
            return Err(OptimizerError::Configuration(
                "max_iterations and plateau_tolerance must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.acceptance_floor) {
            return Err(OptimizerError::Configuration(format!(
                "acceptance floor {} outside [0, 1)",
                self.acceptance_floor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostWeights {
    pub visibility: f64,
    pub temporal_clustering: f64,
    pub pool_size: f64,
    pub signal_quality: f64,
    pub orbital_diversity: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            visibility: W_VISIBILITY,
            temporal_clustering: W_TEMPORAL_CLUSTERING,
            pool_size: W_POOL_SIZE,
            signal_quality: W_SIGNAL_QUALITY,
            orbital_diversity: W_ORBITAL_DIVERSITY,
        }
    }
}

impl CostWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [
            ("visibility", self.visibility),
            ("temporal_clustering", self.temporal_clustering),
            ("pool_size", self.pool_size),
            ("signal_quality", self.signal_quality),
            ("orbital_diversity", self.orbital_diversity),
        ];
        for (name, w) in all {
            if !(w.is_finite() && w >= 0.0) {
                return Err(OptimizerError::Configuration(format!(
                    "weight {} = {} must be finite and non-negative",
                    name, w
                )));
            }
        }
        Ok(())
    }
}

/// Selected pool for one constellation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationPool {
    pub constellation: Constellation,
    pub selected: Vec<String>,
    /// Visible pool members per time step
    pub visible_counts: Vec<u32>,
    pub orbit_coverage: CoverageReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TemperatureFloor,
    IterationCap,
    Plateau,
    Cancelled,
    DegenerateInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationStats {
    pub iterations: usize,
    pub best_iteration: usize,
    pub accepted_moves: usize,
    pub acceptance_rate: f64,
    pub initial_cost: f64,
    /// (iteration, cost) at every new best
    pub improvements: Vec<(usize, f64)>,
    /// Current cost sampled every 100 iterations
    pub cost_history: Vec<f64>,
    pub temperature_history: Vec<f64>,
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSolution {
    pub pools: Vec<ConstellationPool>,
    pub cost: f64,
    /// Fraction of time steps with every constellation inside its band
    pub visibility_compliance: f64,
    pub temporal_distribution: f64,
    pub signal_quality: f64,
    pub constraints_satisfied: BTreeMap<String, bool>,
    pub compliant: bool,
    /// Input was empty or undersized; pools are a best-effort fallback
    pub degenerate: bool,
    pub seed: u64,
    pub stats: OptimizationStats,
    pub generated_at: String,
}

impl PoolSolution {
    pub fn pool(&self, constellation: Constellation) -> Option<&ConstellationPool> {
        self.pools.iter().find(|p| p.constellation == constellation)
    }

    pub fn selected_ids(&self, constellation: Constellation) -> &[String] {
        self.pool(constellation)
            .map(|p| p.selected.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_selected(&self) -> usize {
        self.pools.iter().map(|p| p.selected.len()).sum()
    }

    pub fn unmet_constraints(&self) -> Vec<&str> {
        self.constraints_satisfied
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

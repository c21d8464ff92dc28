//! Planning-epoch runner
//!
//! Runs the optimizer on the blocking pool, off the async hot path. Each
//! submission bumps a generation counter; older runs notice at their next
//! cancellation check and stop, and only the newest generation may publish.

use crate::{OptimizerError, PoolConstraints, PoolOptimizer, PoolSolution, Result, StopReason};
use orbital_mechanics::SatelliteCandidate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Latest published pool and the generation that produced it
#[derive(Debug, Clone)]
pub struct PlannedPool {
    pub generation: u64,
    pub solution: Arc<PoolSolution>,
}

pub struct PoolPlanner {
    optimizer: Arc<PoolOptimizer>,
    generation: Arc<AtomicU64>,
    latest: Arc<watch::Sender<Option<PlannedPool>>>,
}

/// An in-flight planning run
pub struct PlanHandle {
    generation: u64,
    task: JoinHandle<Result<Arc<PoolSolution>>>,
}

impl PlanHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the run. Superseded runs resolve to `OptimizerError::Superseded`.
    pub async fn wait(self) -> Result<Arc<PoolSolution>> {
        self.task
            .await
            .map_err(|e| OptimizerError::Task(e.to_string()))?
    }
}

impl PoolPlanner {
    pub fn new(optimizer: PoolOptimizer) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            optimizer: Arc::new(optimizer),
            generation: Arc::new(AtomicU64::new(0)),
            latest: Arc::new(latest),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PlannedPool>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<PlannedPool> {
        self.latest.borrow().clone()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a planning run, superseding any run still in flight.
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        candidates: Arc<Vec<SatelliteCandidate>>,
        constraints: PoolConstraints,
        seed: Option<u64>,
    ) -> PlanHandle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = Arc::clone(&self.generation);
        let optimizer = Arc::clone(&self.optimizer);
        let latest = Arc::clone(&self.latest);

        info!(
            "Planning run {} submitted ({} candidates)",
            generation,
            candidates.len()
        );

        let task = tokio::task::spawn_blocking(move || {
            let superseded = || counter.load(Ordering::SeqCst) != generation;
            let solution =
                optimizer.optimize_with_cancel(&candidates, &constraints, seed, &superseded)?;

            if solution.stats.stop_reason == Some(StopReason::Cancelled) {
                debug!("Planning run {} cancelled", generation);
                return Err(OptimizerError::Superseded(generation));
            }

            let solution = Arc::new(solution);
            // The generation check and the publish happen under the channel lock
            let published = latest.send_if_modified(|slot| {
                if counter.load(Ordering::SeqCst) != generation {
                    return false;
                }
                *slot = Some(PlannedPool {
                    generation,
                    solution: Arc::clone(&solution),
                });
                true
            });

            if published {
                info!(
                    "Planning run {} published (compliance={:.1}%)",
                    generation,
                    solution.visibility_compliance * 100.0
                );
                Ok(solution)
            } else {
                debug!("Planning run {} finished stale, discarded", generation);
                Err(OptimizerError::Superseded(generation))
            }
        });

        PlanHandle { generation, task }
    }
}

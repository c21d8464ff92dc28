//! Satellite Pool Optimization CLI
//!
//! Selects active Starlink/OneWeb pools for one planning epoch.
//!
//! Usage:
//!   optimize-pool --candidates data/candidates.json --output data/pool_solution.json
//!   optimize-pool --synthetic --seed 42

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use orbital_mechanics::walker::synthesize_candidates;
use orbital_mechanics::{Constellation, PassGeometry, WalkerDelta};
use pool_optimizer::{
    loader, AnnealingParams, CostWeights, InitialPool, PoolConstraints, PoolOptimizer,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InitArg {
    Random,
    Diverse,
}

#[derive(Parser, Debug)]
#[command(
    name = "optimize-pool",
    about = "Select active satellite pools with simulated annealing"
)]
struct Args {
    /// Candidate JSON file
    #[arg(short, long)]
    candidates: Option<PathBuf>,

    /// Generate Walker Delta candidates instead of loading a file
    #[arg(long)]
    synthetic: bool,

    /// Output JSON file
    #[arg(short, long, default_value = "pool_solution.json")]
    output: PathBuf,

    /// RNG seed for a reproducible run
    #[arg(short, long)]
    seed: Option<u64>,

    /// Initial pool strategy
    #[arg(long, value_enum, default_value = "random")]
    init: InitArg,

    /// Iteration cap
    #[arg(long, default_value_t = 10_000)]
    max_iterations: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose when set
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Satellite Pool Optimizer");
    info!("{}", "=".repeat(60));

    let mut constraints = PoolConstraints::default();
    constraints.initial_pool = match args.init {
        InitArg::Random => InitialPool::Random,
        InitArg::Diverse => InitialPool::PhaseDiverse,
    };

    let candidates = match (&args.candidates, args.synthetic) {
        (Some(path), false) => loader::load_candidates(path)?,
        (None, true) => {
            let horizon = constraints.horizon_s();
            let mut all = synthesize_candidates(
                Constellation::Starlink,
                &WalkerDelta::starlink_shell(),
                &PassGeometry::starlink(),
                horizon,
            )?;
            all.extend(synthesize_candidates(
                Constellation::OneWeb,
                &WalkerDelta::oneweb_shell(),
                &PassGeometry::oneweb(),
                horizon,
            )?);
            info!("Synthesized {} Walker Delta candidates", all.len());
            all
        }
        _ => bail!("pass exactly one of --candidates or --synthetic"),
    };

    let params = AnnealingParams {
        max_iterations: args.max_iterations,
        ..AnnealingParams::default()
    };
    let optimizer = PoolOptimizer::new(params.clone(), CostWeights::default())?;
    let solution = optimizer.optimize(&candidates, &constraints, args.seed)?;

    loader::write_solution(&args.output, &solution, &params)?;

    info!("{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    for pool in &solution.pools {
        info!(
            "  {}: {} satellites, orbit coverage {:.1}%",
            pool.constellation,
            pool.selected.len(),
            pool.orbit_coverage.time_coverage_ratio * 100.0
        );
    }
    info!("Visibility compliance: {:.1}%", solution.visibility_compliance * 100.0);
    info!("Temporal distribution: {:.3}", solution.temporal_distribution);
    info!("Signal quality: {:.3}", solution.signal_quality);
    info!("Seed: {}", solution.seed);
    if !solution.compliant {
        info!("Unmet constraints: {:?}", solution.unmet_constraints());
    }

    Ok(())
}

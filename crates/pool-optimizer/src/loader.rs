//! Candidate loading and solution export

use crate::{AnnealingParams, PoolSolution, Result};
use orbital_mechanics::SatelliteCandidate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};

/// Sanitize ID (alphanumeric, dash, underscore only)
fn sanitize_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(128)
        .collect()
}

/// Container form: `{"candidates": [...]}`
#[derive(Debug, Deserialize)]
struct CandidateFile {
    candidates: Vec<serde_json::Value>,
}

/// Load candidates from a JSON array or a `{"candidates": [...]}` object.
/// Entries that fail to parse or carry malformed windows are skipped.
pub fn load_candidates(path: impl AsRef<Path>) -> Result<Vec<SatelliteCandidate>> {
    let path = path.as_ref();
    info!("Loading candidates from {:?}", path);

    let file = File::open(path)?;
    let raw: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;

    let entries = if raw.is_array() {
        serde_json::from_value::<Vec<serde_json::Value>>(raw)?
    } else {
        serde_json::from_value::<CandidateFile>(raw)?.candidates
    };

    let mut candidates = Vec::with_capacity(entries.len());
    let mut skipped = 0;

    for (i, entry) in entries.into_iter().enumerate() {
        let mut candidate: SatelliteCandidate = match serde_json::from_value(entry) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping candidate {}: {}", i, e);
                skipped += 1;
                continue;
            }
        };
        if let Err(e) = candidate.validate() {
            warn!("Skipping candidate {}: {}", i, e);
            skipped += 1;
            continue;
        }
        candidate.id = sanitize_id(&candidate.id);
        if candidate.id.is_empty() {
            candidate.id = format!("sat-{}", i);
        }
        candidates.push(candidate);
    }

    info!(
        "Loaded {} candidates ({} skipped)",
        candidates.len(),
        skipped
    );

    Ok(candidates)
}

#[derive(Debug, Serialize)]
struct SolutionExport<'a> {
    algorithm: &'static str,
    params: &'a AnnealingParams,
    solution: &'a PoolSolution,
}

/// Write a solution with its search parameters as pretty JSON
pub fn write_solution(
    path: impl AsRef<Path>,
    solution: &PoolSolution,
    params: &AnnealingParams,
) -> Result<()> {
    let path = path.as_ref();
    info!("Writing solution to {:?}", path);
    let file = File::create(path)?;
    let export = SolutionExport {
        algorithm: "simulated_annealing",
        params,
        solution,
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &export)?;
    Ok(())
}

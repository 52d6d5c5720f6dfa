//! Reporting and persisted-state types.

use serde::{Deserialize, Serialize};

use crate::evolution::{Candidate, CandidateId, Endogenous, Fitness, SelectorState};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Why a population (and with it the run) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Generation limit reached.
    MaxGenerations,
    /// Evaluation budget spent.
    MaxEvaluations,
    /// Wall-clock budget spent.
    MaxTime,
    /// Best fitness stopped improving.
    SteadyState,
    /// Target fitness reached.
    TargetFitness,
    /// Interrupt or sentinel file.
    ExternalRequest,
    /// No viable candidate left, or no valid child could be produced.
    Extinction,
}

/// Per-operator line of a generation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorReport {
    pub name: String,
    pub enabled: bool,
    pub pseudo_deactivated: bool,
    pub tokens: u32,
    /// Invocations during the generation.
    pub calls: u32,
    /// Weight under the current selection strategy.
    pub weight: f64,
}

/// Summary of one committed generation of one population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub population: String,
    pub generation: u64,
    /// Live candidates after slaughtering.
    pub live: usize,
    /// Children inserted during the generation.
    pub new_children: usize,
    /// Children that failed validation or evaluation.
    pub failed_children: usize,
    /// Clones found during clone scaling.
    pub clones: usize,
    /// Evaluations performed by this population so far.
    pub evaluations: u64,
    /// Best raw fitness of the population.
    pub best_raw: Option<Fitness>,
    pub best_id: Option<CandidateId>,
    /// Mean of the first raw fitness component over live candidates.
    pub mean_raw: f64,
    /// Population entropy in bits.
    pub entropy: f64,
    /// Mutation strength after the generation.
    pub sigma: f64,
    /// Tournament size after the generation.
    pub tau: f64,
    pub operators: Vec<OperatorReport>,
}

/// Best candidate of a population at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCandidate {
    pub id: CandidateId,
    pub raw_fitness: Fitness,
    /// External representation of the genome.
    pub representation: String,
}

/// Final state of one population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSummary {
    pub name: String,
    pub generation: u64,
    pub evaluations: u64,
    pub live: usize,
    pub best: Option<BestCandidate>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub stop_reason: StopReason,
    /// Population whose condition ended the run.
    pub stopped_by: Option<String>,
    pub populations: Vec<PopulationSummary>,
    pub elapsed_seconds: f64,
}

/// Recoverable state of one population, written after each committed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationSnapshot<G> {
    pub version: u32,
    pub name: String,
    pub generation: u64,
    /// Serial of the next candidate identifier.
    pub next_serial: u64,
    pub evaluations: u64,
    /// Generations since the best raw fitness last improved.
    pub steady_state_generations: u64,
    pub best_ever: Option<Fitness>,
    /// Self-adapted sigma and tau.
    #[serde(default)]
    pub endogenous: Option<Endogenous>,
    pub selector: SelectorState,
    pub candidates: Vec<Candidate<G>>,
}

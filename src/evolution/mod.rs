//! Evolution engine.
//!
//! Leaf to root:
//!
//! - `ledger`, `bandit`: per-operator performance records and bandit statistics
//! - `selector`: adaptive operator selection with the token economy
//! - `clones`, `entropy`, `statistics`: clone scaling, diversity and operator scoring
//! - `pareto`, `adaptation`: multi-objective ranking and sigma/tau self-adaptation
//! - `population`, `pipeline`: the candidate arena and the generational state machine
//! - `run`, `persist`, `stop`: multi-population orchestration, recovery and stop requests
//! - `bitstring`: a complete bit-string problem used by the CLI and the tests

pub mod adaptation;
pub mod bandit;
pub mod bitstring;
pub mod candidate;
pub mod clones;
pub mod entropy;
pub mod evaluator;
pub mod ledger;
pub mod lineage;
pub mod operator;
pub mod pareto;
pub mod persist;
pub mod pipeline;
pub mod population;
pub mod run;
pub mod selector;
pub mod statistics;
pub mod stop;

pub use adaptation::Endogenous;
pub use bandit::BanditStats;
pub use candidate::{
    Candidate, CandidateId, CandidateState, DeathCause, Fitness, Genotype, Rankable, Seeder,
};
pub use clones::{GroupMembership, clone_factor, detect_clone_groups, scale_clones};
pub use evaluator::{CommandEvaluator, EvaluationError, Evaluator, EvaluatorPool};
pub use ledger::{CallId, CallOutcome, OperatorRecord, Quality};
pub use lineage::Lineage;
pub use operator::{Operator, OperatorCategory, OperatorOutput, OperatorRegistry};
pub use pareto::ParetoRank;
pub use persist::PersistError;
pub use pipeline::{Pipeline, PipelineError, PipelineState};
pub use population::{
    DiversityPolicy, EnhancedPolicy, MultiObjectivePolicy, Population, PopulationPolicy,
    compare_performance, policy_for,
};
pub use run::{EvolutionRun, Migrator, RunError};
pub use selector::{OperatorSelector, Selection, SelectionError, SelectorState};
pub use stop::{StopController, StopHandle};

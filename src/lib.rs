//! Evoloop - Evolutionary search with adaptive operator scheduling.
//!
//! Populations of candidates evolve generation by generation: an adaptive
//! selector picks genetic operators, their children are evaluated by an
//! external evaluator, duplicate phenotypes ("clones") have their fitness
//! scaled down, and the population is cut back to its configured size.
//! Operator outcomes flow back into the selector so that useful operators are
//! picked more often and inapplicable ones are set aside.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, reporting and snapshot types
//! - `evolution`: The engine (selector, clone scaling, pipeline, run loop)
//!
//! # Example
//!
//! ```rust,no_run
//! use evoloop::{
//!     evolution::{
//!         EvolutionRun,
//!         bitstring::{onemax, random_seeder, standard_registry},
//!     },
//!     schema::EvolutionConfig,
//! };
//!
//! let mut config = EvolutionConfig::default();
//! config.populations[0].stop.max_generations = Some(50);
//! config.random_seed = Some(42);
//!
//! let mut run = EvolutionRun::new(config, standard_registry(), onemax)?;
//! let result = run.run_with_callback(&random_seeder(64), |report| {
//!     println!("generation {}: best {:?}", report.generation, report.best_raw);
//! })?;
//!
//! println!("Stopped: {:?}", result.stop_reason);
//! # Ok::<(), evoloop::evolution::RunError>(())
//! ```

pub mod evolution;
pub mod schema;

// Re-export commonly used types
pub use evolution::{EvolutionRun, Pipeline, RunError};
pub use schema::{EvolutionConfig, PopulationConfig, RunResult, StopReason};

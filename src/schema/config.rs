//! Configuration types for evolutionary runs.
//!
//! A run evolves one or more populations. Each population carries its own
//! sizes, operator-scheduling preferences and stop conditions; evaluation and
//! run-level settings (recovery, sentinel file, statistics) are shared.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for an evolutionary run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Populations evolved side by side.
    pub populations: Vec<PopulationConfig>,
    /// Fitness evaluation settings.
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Recovery, stop sentinel and statistics settings.
    #[serde(default)]
    pub run: RunConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            populations: vec![PopulationConfig::default()],
            evaluation: EvaluationConfig::default(),
            run: RunConfig::default(),
            random_seed: None,
        }
    }
}

/// Settings of one population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Population name, unique within the run. Used for snapshots and logs.
    #[serde(default = "default_population_name")]
    pub name: String,
    /// Comparison and clone-handling policy.
    #[serde(default)]
    pub kind: PopulationKind,
    /// Maximum number of live candidates kept after slaughtering.
    #[serde(default = "default_mu")]
    pub mu: usize,
    /// Number of successful operator invocations per generation.
    #[serde(default = "default_lambda")]
    pub lambda: usize,
    /// Size of the initial population.
    #[serde(default = "default_nu")]
    pub nu: usize,
    /// Number of best candidates that never age out.
    #[serde(default = "default_elite_cardinality")]
    pub elite_cardinality: usize,
    /// Maximum age of non-elite candidates (0 = unlimited).
    #[serde(default)]
    pub maximum_age: u32,
    /// Tournament size used to pick parents (real numbers allowed, >= 1).
    /// Starting value of tau when self-adaptation is enabled.
    #[serde(default = "default_selection_pressure")]
    pub selection_pressure: f64,
    /// Self-adaptation of mutation strength and tournament size.
    #[serde(default)]
    pub adaptation: AdaptationConfig,
    /// Dimensionality of the fitness vector returned by the evaluator.
    #[serde(default = "default_fitness_dimensions")]
    pub fitness_dimensions: usize,
    /// Base of the clone scaling factor, in [0, 1).
    #[serde(default = "default_clone_scaling_factor")]
    pub clone_scaling_factor: f64,
    /// Number of generations per statistics epoch.
    #[serde(default = "default_epoch_length")]
    pub epoch_length: u64,
    /// Discard every fitness value after each generation (dynamic fitness).
    #[serde(default)]
    pub invalidate_fitness_after_generation: bool,
    /// Operator scheduling settings.
    #[serde(default)]
    pub operators: OperatorsConfig,
    /// Population stop conditions.
    #[serde(default)]
    pub stop: StopConfig,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            name: default_population_name(),
            kind: PopulationKind::default(),
            mu: default_mu(),
            lambda: default_lambda(),
            nu: default_nu(),
            elite_cardinality: default_elite_cardinality(),
            maximum_age: 0,
            selection_pressure: default_selection_pressure(),
            adaptation: AdaptationConfig::default(),
            fitness_dimensions: default_fitness_dimensions(),
            clone_scaling_factor: default_clone_scaling_factor(),
            epoch_length: default_epoch_length(),
            invalidate_fitness_after_generation: false,
            operators: OperatorsConfig::default(),
            stop: StopConfig::default(),
        }
    }
}

fn default_population_name() -> String {
    "main".to_string()
}
fn default_mu() -> usize {
    30
}
fn default_lambda() -> usize {
    20
}
fn default_nu() -> usize {
    30
}
fn default_elite_cardinality() -> usize {
    1
}
fn default_selection_pressure() -> f64 {
    2.0
}
fn default_fitness_dimensions() -> usize {
    1
}
fn default_clone_scaling_factor() -> f64 {
    0.5
}
fn default_epoch_length() -> u64 {
    1
}

/// Endogenous parameters adapted once per epoch from the operators' results.
///
/// Sigma is the mutation strength handed to every operator invocation; tau
/// is the tournament size, starting at the selection pressure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptationConfig {
    /// Whether sigma and tau move at all.
    #[serde(default)]
    pub enabled: bool,
    /// Initial mutation strength, in [0, 1].
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Weight of the previous value in each update, in [0, 1].
    #[serde(default = "default_inertia")]
    pub inertia: f64,
    /// Smallest tournament size (>= 1).
    #[serde(default = "default_tau_min")]
    pub tau_min: f64,
    /// Largest tournament size.
    #[serde(default = "default_tau_max")]
    pub tau_max: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sigma: default_sigma(),
            inertia: default_inertia(),
            tau_min: default_tau_min(),
            tau_max: default_tau_max(),
        }
    }
}

fn default_sigma() -> f64 {
    0.0
}
fn default_inertia() -> f64 {
    0.9
}
fn default_tau_min() -> f64 {
    1.0
}
fn default_tau_max() -> f64 {
    4.0
}

/// Population variant, selecting the comparison policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PopulationKind {
    /// Scaled fitness, then age, then identifier.
    #[default]
    Enhanced,
    /// Scaled fitness, then delta entropy, then age, then identifier.
    Diversity,
    /// Pareto front level, then dominance strength, then delta entropy,
    /// then age, then identifier. Fitness components are objectives.
    MultiObjective,
}

/// Which operator categories are enabled when the user does not say otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DefaultEnabling {
    /// Only explicitly enabled operators.
    None,
    /// Operators of the default-on category.
    #[default]
    DefaultOn,
    /// Every registered operator.
    All,
}

/// Strategy used to draw among selectable operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type")]
pub enum SelectionStrategy {
    /// Roulette weighted by the last epoch's quality histogram.
    #[default]
    Histogram,
    /// Uniform draw.
    Uniform,
    /// Dynamic multi-armed bandit with kappa-exponentiated roulette.
    Dmab {
        #[serde(default = "default_kappa")]
        kappa: f64,
    },
    /// DMAB whose scores also count selections still pending in the
    /// current generation.
    Pdmab {
        #[serde(default = "default_kappa")]
        kappa: f64,
    },
}

fn default_kappa() -> f64 {
    1.0
}

/// Explicit user decision about one operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorOverride {
    /// Operator name.
    pub name: String,
    /// Whether the operator may be selected.
    pub enabled: bool,
}

/// Operator scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorsConfig {
    /// Category-based enabling policy.
    #[serde(default)]
    pub default_enabling: DefaultEnabling,
    /// Draw strategy.
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Explicit enable/disable decisions; these always win over categories.
    #[serde(default)]
    pub overrides: Vec<OperatorOverride>,
    /// Tokens granted to a freshly registered operator.
    #[serde(default = "default_initial_tokens")]
    pub initial_tokens: u32,
    /// Generations between two tokens for exhausted pseudo-deactivated operators.
    #[serde(default = "default_token_interval")]
    pub token_interval: u32,
}

impl Default for OperatorsConfig {
    fn default() -> Self {
        Self {
            default_enabling: DefaultEnabling::default(),
            strategy: SelectionStrategy::default(),
            overrides: Vec::new(),
            initial_tokens: default_initial_tokens(),
            token_interval: default_token_interval(),
        }
    }
}

fn default_initial_tokens() -> u32 {
    3
}
fn default_token_interval() -> u32 {
    10
}

/// Conditions that end the evolution of a population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StopConfig {
    /// Stop after this many generations.
    #[serde(default)]
    pub max_generations: Option<u64>,
    /// Stop after this many fitness evaluations.
    #[serde(default)]
    pub max_evaluations: Option<u64>,
    /// Stop after this many seconds of wall-clock time.
    #[serde(default)]
    pub max_time_secs: Option<f64>,
    /// Stop when the best raw fitness has not improved for this many generations.
    #[serde(default)]
    pub max_steady_state_generations: Option<u64>,
    /// Stop when the best raw fitness reaches this vector.
    #[serde(default)]
    pub target_fitness: Option<Vec<f64>>,
}

impl StopConfig {
    /// Whether any stop condition is configured.
    pub fn is_bounded(&self) -> bool {
        self.max_generations.is_some()
            || self.max_evaluations.is_some()
            || self.max_time_secs.is_some()
            || self.max_steady_state_generations.is_some()
            || self.target_fitness.is_some()
    }
}

/// Fitness evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationConfig {
    /// Number of evaluator worker threads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Cache fitness by candidate representation.
    #[serde(default)]
    pub cache: bool,
    /// Fitness changes over time; incompatible with the cache.
    #[serde(default)]
    pub dynamic_fitness: bool,
    /// External evaluator program. When absent the embedding program supplies one.
    #[serde(default)]
    pub command: Option<CommandConfig>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            cache: false,
            dynamic_fitness: false,
            command: None,
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// External evaluator program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandConfig {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the program after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

/// Run-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Directory receiving one snapshot per population after each generation.
    #[serde(default)]
    pub recovery_dir: Option<PathBuf>,
    /// Sentinel file; its presence requests a graceful stop.
    #[serde(default = "default_stop_file")]
    pub stop_file: Option<PathBuf>,
    /// Discard all fitness values when restoring from snapshots.
    #[serde(default)]
    pub discard_fitness_on_load: bool,
    /// CSV file receiving one row per population step.
    #[serde(default)]
    pub statistics_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            recovery_dir: None,
            stop_file: default_stop_file(),
            discard_fitness_on_load: false,
            statistics_file: None,
        }
    }
}

fn default_stop_file() -> Option<PathBuf> {
    Some(PathBuf::from("evoloop.stop"))
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("At least one population is required")]
    NoPopulations,
    #[error("Population name {0:?} is used more than once")]
    DuplicatePopulation(String),
    #[error("Population {population}: {message}")]
    InvalidPopulation { population: String, message: String },
    #[error("Evaluation concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("Fitness cache and dynamic fitness are mutually exclusive")]
    CacheWithDynamicFitness,
    #[error("Operator {0:?} is registered more than once")]
    DuplicateOperator(String),
    #[error("Population {0}: no enabled operators")]
    NoEnabledOperators(String),
}

impl EvolutionConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: EvolutionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.populations.is_empty() {
            return Err(ConfigError::NoPopulations);
        }

        let mut names = HashSet::new();
        for population in &self.populations {
            if !names.insert(population.name.as_str()) {
                return Err(ConfigError::DuplicatePopulation(population.name.clone()));
            }
            population.validate()?;
        }

        if self.evaluation.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let dynamic = self.evaluation.dynamic_fitness
            || self
                .populations
                .iter()
                .any(|p| p.invalidate_fitness_after_generation);
        if self.evaluation.cache && dynamic {
            return Err(ConfigError::CacheWithDynamicFitness);
        }

        Ok(())
    }
}

impl PopulationConfig {
    /// Validate the settings of this population.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidPopulation {
            population: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.mu == 0 {
            return Err(invalid("mu must be at least 1".to_string()));
        }
        if self.lambda == 0 {
            return Err(invalid("lambda must be at least 1".to_string()));
        }
        if self.nu == 0 {
            return Err(invalid("nu must be at least 1".to_string()));
        }
        if self.elite_cardinality > self.mu {
            return Err(invalid(format!(
                "elite cardinality ({}) exceeds mu ({})",
                self.elite_cardinality, self.mu
            )));
        }
        if !(self.selection_pressure >= 1.0) {
            return Err(invalid(format!(
                "selection pressure {} must be >= 1",
                self.selection_pressure
            )));
        }
        if self.fitness_dimensions == 0 {
            return Err(invalid("fitness dimensions must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.clone_scaling_factor) {
            return Err(invalid(format!(
                "clone scaling factor {} must lie in [0, 1)",
                self.clone_scaling_factor
            )));
        }
        if self.epoch_length == 0 {
            return Err(invalid("epoch length must be at least 1".to_string()));
        }
        if self.operators.token_interval == 0 {
            return Err(invalid("token interval must be at least 1".to_string()));
        }
        if let SelectionStrategy::Dmab { kappa } | SelectionStrategy::Pdmab { kappa } =
            self.operators.strategy
            && !(kappa >= 0.0)
        {
            return Err(invalid(format!("DMAB kappa {kappa} must be >= 0")));
        }
        self.adaptation
            .validate(self.selection_pressure)
            .map_err(invalid)?;
        if let Some(target) = &self.stop.target_fitness
            && target.len() != self.fitness_dimensions
        {
            return Err(invalid(format!(
                "target fitness has {} values, expected {}",
                target.len(),
                self.fitness_dimensions
            )));
        }
        if let Some(secs) = self.stop.max_time_secs
            && !(secs > 0.0)
        {
            return Err(invalid(format!("maximum time {secs} must be positive")));
        }

        Ok(())
    }
}

impl AdaptationConfig {
    fn validate(&self, selection_pressure: f64) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.sigma) {
            return Err(format!("sigma {} must lie in [0, 1]", self.sigma));
        }
        if !(0.0..=1.0).contains(&self.inertia) {
            return Err(format!("inertia {} must lie in [0, 1]", self.inertia));
        }
        if !self.enabled {
            return Ok(());
        }
        if !(self.tau_min >= 1.0) {
            return Err(format!("tau min {} must be >= 1", self.tau_min));
        }
        if !(self.tau_max >= self.tau_min) {
            return Err(format!(
                "tau max {} is below tau min {}",
                self.tau_max, self.tau_min
            ));
        }
        if !(self.tau_min..=self.tau_max).contains(&selection_pressure) {
            return Err(format!(
                "selection pressure {selection_pressure} outside [{}, {}]",
                self.tau_min, self.tau_max
            ));
        }
        Ok(())
    }
}

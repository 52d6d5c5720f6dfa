//! Candidate solutions, their identifiers and fitness values.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use rand::rngs::StdRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::lineage::Lineage;
use super::pareto::ParetoRank;

/// Population-unique candidate identifier, rendered as `c<serial>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(u64);

impl CandidateId {
    pub fn new(serial: u64) -> Self {
        Self(serial)
    }

    pub fn serial(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl FromStr for CandidateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('c')
            .and_then(|digits| digits.parse().ok())
            .map(CandidateId)
            .ok_or_else(|| format!("invalid candidate id {s:?}"))
    }
}

impl Serialize for CandidateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CandidateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Fitness vector. Higher is better; components compare lexicographically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fitness(Vec<f64>);

impl Fitness {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First component, used for summaries.
    pub fn primary(&self) -> f64 {
        self.0.first().copied().unwrap_or(f64::NEG_INFINITY)
    }

    /// Component-wise product with `factor`.
    pub fn scaled(&self, factor: f64) -> Fitness {
        Fitness(self.0.iter().map(|v| v * factor).collect())
    }

    /// Lexicographic comparison; `Greater` means `self` is better.
    pub fn compare(&self, other: &Fitness) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }

    pub fn is_better_than(&self, other: &Fitness) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

/// Why a candidate left the population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeathCause {
    /// Failed validation or evaluation.
    EvaluationFailed,
    /// Exceeded the maximum age.
    Aged,
    /// Ranked beyond mu.
    Slaughtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Alive,
    Dead(DeathCause),
}

/// Genome representation evolved by the engine.
///
/// Implemented by the problem-specific representation; the engine never looks
/// inside a genome except through these hooks.
pub trait Genotype: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Canonical text that is identical for clones and independent of creation order.
    fn normalized_phenotype(&self) -> String;

    /// Text handed to the evaluator.
    fn external_representation(&self) -> String;

    /// Symbols contributing to the population entropy.
    fn symbols(&self) -> Vec<String>;

    /// Structural validity. Invalid children are discarded before evaluation.
    fn validate(&self) -> bool {
        true
    }
}

/// Produces the initial candidates of a population.
pub trait Seeder<G>: Send + Sync {
    fn seed(&self, rng: &mut StdRng) -> G;
}

impl<G, F> Seeder<G> for F
where
    F: Fn(&mut StdRng) -> G + Send + Sync,
{
    fn seed(&self, rng: &mut StdRng) -> G {
        self(rng)
    }
}

/// Hash of a normalized phenotype.
pub fn phenotype_hash(phenotype: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    phenotype.hash(&mut hasher);
    hasher.finish()
}

/// Ranking view of a candidate used by population policies.
pub trait Rankable {
    fn id(&self) -> CandidateId;
    fn birth(&self) -> u64;
    fn ranking_fitness(&self) -> Option<&Fitness>;
    fn delta_entropy(&self) -> f64;
}

/// One candidate solution owned by a population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate<G> {
    pub id: CandidateId,
    pub genome: G,
    pub lineage: Lineage,
    /// Generation in which the candidate was created.
    pub birth: u64,
    /// Generations survived.
    pub age: u32,
    pub state: CandidateState,
    /// Member of the elite of the last slaughter; elite candidates do not age.
    #[serde(default)]
    pub elite: bool,
    /// Fitness as returned by the evaluator.
    pub raw_fitness: Option<Fitness>,
    /// Fitness after clone scaling, used for every ranking.
    pub scaled_fitness: Option<Fitness>,
    /// Clone scaling factor applied to the raw fitness.
    pub clone_factor: f64,
    /// Population entropy minus the entropy without this candidate.
    #[serde(skip)]
    pub delta_entropy: f64,
    /// Front level and crowding strength; multi-objective populations only.
    #[serde(skip)]
    pub pareto: ParetoRank,
}

impl<G: Genotype> Candidate<G> {
    pub fn new(id: CandidateId, genome: G, lineage: Lineage, birth: u64) -> Self {
        Self {
            id,
            genome,
            lineage,
            birth,
            age: 0,
            state: CandidateState::Alive,
            elite: false,
            raw_fitness: None,
            scaled_fitness: None,
            clone_factor: 1.0,
            delta_entropy: 0.0,
            pareto: ParetoRank::UNRANKED,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == CandidateState::Alive
    }

    pub fn is_evaluated(&self) -> bool {
        self.raw_fitness.is_some()
    }

    pub fn kill(&mut self, cause: DeathCause) {
        self.state = CandidateState::Dead(cause);
    }

    /// Store a freshly evaluated raw fitness and reset clone scaling.
    pub fn set_raw_fitness(&mut self, fitness: Fitness) {
        self.scaled_fitness = Some(fitness.clone());
        self.raw_fitness = Some(fitness);
        self.clone_factor = 1.0;
    }

    /// Apply a clone factor to the raw fitness.
    pub fn set_clone_factor(&mut self, factor: f64) {
        self.clone_factor = factor;
        self.scaled_fitness = self.raw_fitness.as_ref().map(|f| f.scaled(factor));
    }

    /// Forget every fitness value so the candidate is evaluated again.
    pub fn invalidate_fitness(&mut self) {
        self.raw_fitness = None;
        self.scaled_fitness = None;
        self.clone_factor = 1.0;
    }

    pub fn phenotype_hash(&self) -> u64 {
        phenotype_hash(&self.genome.normalized_phenotype())
    }
}

impl<G: Genotype> Rankable for Candidate<G> {
    fn id(&self) -> CandidateId {
        self.id
    }

    fn birth(&self) -> u64 {
        self.birth
    }

    fn ranking_fitness(&self) -> Option<&Fitness> {
        self.scaled_fitness.as_ref()
    }

    fn delta_entropy(&self) -> f64 {
        self.delta_entropy
    }
}

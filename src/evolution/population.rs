//! Population arena and the comparison policies of the population kinds.
//!
//! A population owns its candidates in a map keyed by identifier; parents,
//! clone masters and best/worst references are plain identifiers into it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};

use rand::prelude::*;

use crate::schema::{PopulationConfig, PopulationKind};

use super::adaptation::Endogenous;
use super::candidate::{Candidate, CandidateId, DeathCause, Genotype, Rankable};
use super::clones::scale_clones;
use super::entropy::SymbolCounts;
use super::pareto::assign_pareto_ranks;
use super::selector::SelectionError;

// ============================================================================
// Ordering helpers
// ============================================================================

/// Better ranking fitness first; unevaluated candidates last.
fn fitness_first<R: Rankable>(a: &R, b: &R) -> Ordering {
    match (a.ranking_fitness(), b.ranking_fitness()) {
        (Some(x), Some(y)) => y.compare(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Older (lower birth generation) first.
fn older_first<R: Rankable>(a: &R, b: &R) -> Ordering {
    a.birth().cmp(&b.birth())
}

/// Higher delta entropy first.
fn diverse_first<R: Rankable>(a: &R, b: &R) -> Ordering {
    b.delta_entropy().total_cmp(&a.delta_entropy())
}

/// Performance comparison for operator statistics; `Greater` means `a` is better.
///
/// Scaled fitness, then delta entropy. No further tie-break.
pub fn compare_performance<R: Rankable>(a: &R, b: &R) -> Ordering {
    fitness_first(b, a).then_with(|| a.delta_entropy().total_cmp(&b.delta_entropy()))
}

// ============================================================================
// Policies
// ============================================================================

/// Comparison and clone-handling behavior of a population kind.
pub trait PopulationPolicy<G: Genotype>: Send + Sync {
    fn kind(&self) -> PopulationKind;

    /// Selection order; `Less` means `a` ranks before `b`. Total and deterministic.
    fn compare_for_selection(&self, a: &Candidate<G>, b: &Candidate<G>) -> Ordering;

    /// `Greater` means `a` performed better than `b`.
    fn compare_operator_performance(&self, a: &Candidate<G>, b: &Candidate<G>) -> Ordering {
        compare_performance(a, b)
    }

    /// Rescale clones. Returns the number of clones found.
    fn handle_clone(
        &self,
        candidates: &mut BTreeMap<CandidateId, Candidate<G>>,
        factor: f64,
    ) -> usize {
        scale_clones(candidates, factor)
    }

    fn prepare_for_commit(&self, population: &mut Population<G>) {
        population.recompute_entropy();
        population.refresh_references(|a, b| self.compare_for_selection(a, b));
    }

    /// End of an epoch: move sigma and tau according to the quality
    /// histogram summed over every operator.
    fn adapt_parameters(&self, population: &mut Population<G>, histogram: &[u64; 5]) {
        population.adapt_endogenous(histogram);
    }

    /// Write the population part of a statistics row.
    fn dump_statistics(&self, population: &Population<G>, out: &mut dyn Write) -> io::Result<()> {
        let best = population
            .best_raw()
            .and_then(|c| c.raw_fitness.as_ref())
            .map(|f| f.primary())
            .unwrap_or(f64::NAN);
        write!(
            out,
            "{},{:?},{},{},{:.6},{},{}",
            population.name(),
            self.kind(),
            population.generation(),
            population.live_count(),
            population.entropy(),
            best,
            population.mean_raw()
        )
    }
}

/// Scaled fitness, then age, then identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnhancedPolicy;

impl<G: Genotype> PopulationPolicy<G> for EnhancedPolicy {
    fn kind(&self) -> PopulationKind {
        PopulationKind::Enhanced
    }

    fn compare_for_selection(&self, a: &Candidate<G>, b: &Candidate<G>) -> Ordering {
        fitness_first(a, b)
            .then_with(|| older_first(a, b))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Scaled fitness, then delta entropy, then age, then identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiversityPolicy;

impl<G: Genotype> PopulationPolicy<G> for DiversityPolicy {
    fn kind(&self) -> PopulationKind {
        PopulationKind::Diversity
    }

    fn compare_for_selection(&self, a: &Candidate<G>, b: &Candidate<G>) -> Ordering {
        fitness_first(a, b)
            .then_with(|| diverse_first(a, b))
            .then_with(|| older_first(a, b))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Pareto level, then crowding strength, then delta entropy, then age, then
/// identifier.
///
/// Levels and strengths are recomputed after every clone scaling and before
/// every commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiObjectivePolicy;

impl MultiObjectivePolicy {
    /// Lower level first, then the more isolated.
    fn front_first<G>(a: &Candidate<G>, b: &Candidate<G>) -> Ordering {
        a.pareto
            .level
            .cmp(&b.pareto.level)
            .then_with(|| b.pareto.strength.total_cmp(&a.pareto.strength))
    }
}

impl<G: Genotype> PopulationPolicy<G> for MultiObjectivePolicy {
    fn kind(&self) -> PopulationKind {
        PopulationKind::MultiObjective
    }

    fn compare_for_selection(&self, a: &Candidate<G>, b: &Candidate<G>) -> Ordering {
        Self::front_first(a, b)
            .then_with(|| diverse_first(a, b))
            .then_with(|| older_first(a, b))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn compare_operator_performance(&self, a: &Candidate<G>, b: &Candidate<G>) -> Ordering {
        Self::front_first(b, a).then_with(|| a.delta_entropy.total_cmp(&b.delta_entropy))
    }

    fn handle_clone(
        &self,
        candidates: &mut BTreeMap<CandidateId, Candidate<G>>,
        factor: f64,
    ) -> usize {
        let clones = scale_clones(candidates, factor);
        assign_pareto_ranks(candidates);
        clones
    }

    fn prepare_for_commit(&self, population: &mut Population<G>) {
        population.recompute_entropy();
        assign_pareto_ranks(population.candidates_mut());
        population.refresh_references(|a, b| self.compare_for_selection(a, b));
    }
}

/// Policy implementing `kind`.
pub fn policy_for<G: Genotype>(kind: PopulationKind) -> Box<dyn PopulationPolicy<G>> {
    match kind {
        PopulationKind::Enhanced => Box::new(EnhancedPolicy),
        PopulationKind::Diversity => Box::new(DiversityPolicy),
        PopulationKind::MultiObjective => Box::new(MultiObjectivePolicy),
    }
}

// ============================================================================
// Population
// ============================================================================

/// Candidates removed by one slaughter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaughterOutcome {
    pub aged: usize,
    pub slaughtered: usize,
}

pub struct Population<G> {
    config: PopulationConfig,
    candidates: BTreeMap<CandidateId, Candidate<G>>,
    next_serial: u64,
    generation: u64,
    entropy: f64,
    best_raw: Option<CandidateId>,
    worst_raw: Option<CandidateId>,
    best_scaled: Option<CandidateId>,
    worst_scaled: Option<CandidateId>,
    endogenous: Endogenous,
}

impl<G: Genotype> Population<G> {
    pub fn new(config: PopulationConfig) -> Self {
        Self {
            endogenous: Endogenous::new(&config.adaptation, config.selection_pressure),
            config,
            candidates: BTreeMap::new(),
            next_serial: 0,
            generation: 0,
            entropy: 0.0,
            best_raw: None,
            worst_raw: None,
            best_scaled: None,
            worst_scaled: None,
        }
    }

    /// Rebuild a population from persisted parts.
    pub fn from_parts(
        config: PopulationConfig,
        generation: u64,
        next_serial: u64,
        candidates: Vec<Candidate<G>>,
    ) -> Self {
        let mut population = Self::new(config);
        population.generation = generation;
        let highest = candidates.iter().map(|c| c.id.serial() + 1).max().unwrap_or(0);
        population.next_serial = next_serial.max(highest);
        population.candidates = candidates.into_iter().map(|c| (c.id, c)).collect();
        population
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn next_serial(&self) -> u64 {
        self.next_serial
    }

    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    /// Current mutation strength and tournament size.
    pub fn endogenous(&self) -> Endogenous {
        self.endogenous
    }

    /// Restore persisted endogenous parameters. Ignored unless adaptation is
    /// enabled, so a disabled run keeps its configured values.
    pub fn set_endogenous(&mut self, endogenous: Endogenous) {
        if self.config.adaptation.enabled {
            self.endogenous = endogenous;
        }
    }

    /// Self-adapt sigma and tau from an epoch's summed quality histogram.
    pub fn adapt_endogenous(&mut self, histogram: &[u64; 5]) {
        let adaptation = &self.config.adaptation;
        if !adaptation.enabled {
            return;
        }
        let before = self.endogenous;
        self.endogenous.adapt(
            adaptation,
            histogram,
            self.config.epoch_length,
            self.config.lambda,
        );
        log::debug!(
            "{}: sigma {:.4} -> {:.4}, tau {:.3} -> {:.3}",
            self.config.name,
            before.sigma,
            self.endogenous.sigma,
            before.tau,
            self.endogenous.tau
        );
    }

    /// Allocate a fresh identifier.
    pub fn next_id(&mut self) -> CandidateId {
        let id = CandidateId::new(self.next_serial);
        self.next_serial += 1;
        id
    }

    pub fn insert(&mut self, candidate: Candidate<G>) {
        self.candidates.insert(candidate.id, candidate);
    }

    pub fn get(&self, id: CandidateId) -> Option<&Candidate<G>> {
        self.candidates.get(&id)
    }

    pub fn get_mut(&mut self, id: CandidateId) -> Option<&mut Candidate<G>> {
        self.candidates.get_mut(&id)
    }

    pub fn candidates(&self) -> &BTreeMap<CandidateId, Candidate<G>> {
        &self.candidates
    }

    pub fn candidates_mut(&mut self) -> &mut BTreeMap<CandidateId, Candidate<G>> {
        &mut self.candidates
    }

    pub fn live(&self) -> impl Iterator<Item = &Candidate<G>> {
        self.candidates.values().filter(|c| c.is_alive())
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Live candidates with a valid fitness.
    pub fn evaluated(&self) -> impl Iterator<Item = &Candidate<G>> {
        self.live().filter(|c| c.is_evaluated())
    }

    /// Live candidates waiting for evaluation.
    pub fn unevaluated(&self) -> Vec<CandidateId> {
        self.live()
            .filter(|c| !c.is_evaluated())
            .map(|c| c.id)
            .collect()
    }

    /// Live evaluated candidates in selection order.
    pub fn ranked<F>(&self, compare: F) -> Vec<CandidateId>
    where
        F: Fn(&Candidate<G>, &Candidate<G>) -> Ordering,
    {
        let mut ranked: Vec<&Candidate<G>> = self.evaluated().collect();
        ranked.sort_by(|a, b| compare(*a, *b));
        ranked.into_iter().map(|c| c.id).collect()
    }

    pub fn best_raw(&self) -> Option<&Candidate<G>> {
        self.best_raw.and_then(|id| self.candidates.get(&id))
    }

    pub fn worst_raw(&self) -> Option<&Candidate<G>> {
        self.worst_raw.and_then(|id| self.candidates.get(&id))
    }

    pub fn best_scaled(&self) -> Option<&Candidate<G>> {
        self.best_scaled.and_then(|id| self.candidates.get(&id))
    }

    pub fn worst_scaled(&self) -> Option<&Candidate<G>> {
        self.worst_scaled.and_then(|id| self.candidates.get(&id))
    }

    /// Mean of the first raw fitness component over live evaluated candidates.
    pub fn mean_raw(&self) -> f64 {
        let (sum, count) = self
            .evaluated()
            .filter_map(|c| c.raw_fitness.as_ref())
            .fold((0.0, 0usize), |(s, n), f| (s + f.primary(), n + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Recompute best/worst raw and scaled references.
    pub fn refresh_references<F>(&mut self, compare: F)
    where
        F: Fn(&Candidate<G>, &Candidate<G>) -> Ordering,
    {
        let ranked = self.ranked(compare);
        self.best_scaled = ranked.first().copied();
        self.worst_scaled = ranked.last().copied();

        let mut best: Option<&Candidate<G>> = None;
        let mut worst: Option<&Candidate<G>> = None;
        for candidate in self.evaluated() {
            let Some(raw) = candidate.raw_fitness.as_ref() else {
                continue;
            };
            if best.is_none_or(|b| b.raw_fitness.as_ref().is_some_and(|f| raw.is_better_than(f))) {
                best = Some(candidate);
            }
            if worst.is_none_or(|w| w.raw_fitness.as_ref().is_some_and(|f| f.is_better_than(raw))) {
                worst = Some(candidate);
            }
        }
        let (best, worst) = (best.map(|c| c.id), worst.map(|c| c.id));
        self.best_raw = best;
        self.worst_raw = worst;
    }

    /// Recompute the population entropy and every live candidate's delta entropy.
    pub fn recompute_entropy(&mut self) {
        let mut counts = SymbolCounts::new();
        let symbols: Vec<(CandidateId, Vec<String>)> = self
            .evaluated()
            .map(|c| (c.id, c.genome.symbols()))
            .collect();
        for (_, s) in &symbols {
            counts.add(s.as_slice());
        }
        self.entropy = counts.entropy();
        for (id, s) in symbols {
            if let Some(candidate) = self.candidates.get_mut(&id) {
                candidate.delta_entropy = self.entropy - counts.entropy_without(s.as_slice());
            }
        }
    }

    // ========================================================================
    // Parent selection
    // ========================================================================

    /// Tournament among live evaluated candidates not in `exclude`.
    ///
    /// The tournament size is tau, which starts at the selection pressure; a
    /// fractional part adds one more participant with that probability.
    pub fn tournament<F, R>(&self, compare: F, rng: &mut R, exclude: &[CandidateId]) -> Option<CandidateId>
    where
        F: Fn(&Candidate<G>, &Candidate<G>) -> Ordering,
        R: Rng + ?Sized,
    {
        let pool: Vec<&Candidate<G>> = self
            .evaluated()
            .filter(|c| !exclude.contains(&c.id))
            .collect();
        if pool.is_empty() {
            return None;
        }

        let pressure = self.endogenous.tau.max(1.0);
        let mut size = pressure.floor() as usize;
        let fraction = pressure - pressure.floor();
        if fraction > 0.0 && rng.gen_bool(fraction) {
            size += 1;
        }

        let mut winner: Option<&Candidate<G>> = None;
        for _ in 0..size.max(1) {
            let Some(&challenger) = pool.choose(rng) else {
                break;
            };
            if winner.is_none_or(|w| compare(challenger, w) == Ordering::Less) {
                winner = Some(challenger);
            }
        }
        winner.map(|c| c.id)
    }

    /// Distinct parents chosen by tournament.
    pub fn select_parents<F, R>(
        &self,
        compare: F,
        rng: &mut R,
        operator: &str,
        count: usize,
    ) -> Result<Vec<CandidateId>, SelectionError>
    where
        F: Fn(&Candidate<G>, &Candidate<G>) -> Ordering,
        R: Rng + ?Sized,
    {
        let available = self.evaluated().count();
        let insufficient = || SelectionError::InsufficientParents {
            operator: operator.to_string(),
            needed: count,
            available,
        };
        if available < count {
            return Err(insufficient());
        }

        let mut parents = Vec::with_capacity(count);
        for _ in 0..count {
            let parent = self
                .tournament(&compare, rng, &parents)
                .ok_or_else(insufficient)?;
            parents.push(parent);
        }
        Ok(parents)
    }

    /// Uniform sample of up to `n` live evaluated candidates not in `exclude`.
    pub fn random_sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n: usize,
        exclude: &[CandidateId],
    ) -> Vec<CandidateId> {
        let pool: Vec<CandidateId> = self
            .evaluated()
            .map(|c| c.id)
            .filter(|id| !exclude.contains(id))
            .collect();
        pool.choose_multiple(rng, n).copied().collect()
    }

    // ========================================================================
    // Slaughtering and commit
    // ========================================================================

    /// Mark the elite, kill candidates beyond the maximum age, then kill
    /// everything ranked beyond mu.
    pub fn slaughter<F>(&mut self, compare: F) -> SlaughterOutcome
    where
        F: Fn(&Candidate<G>, &Candidate<G>) -> Ordering,
    {
        let ranked = self.ranked(&compare);
        let elite: HashSet<CandidateId> = ranked
            .iter()
            .take(self.config.elite_cardinality)
            .copied()
            .collect();
        let maximum_age = self.config.maximum_age;
        let mut outcome = SlaughterOutcome::default();

        for candidate in self.candidates.values_mut().filter(|c| c.is_alive()) {
            candidate.elite = elite.contains(&candidate.id);
            if maximum_age > 0 && !candidate.elite && candidate.age > maximum_age {
                candidate.kill(DeathCause::Aged);
                outcome.aged += 1;
            }
        }

        let mut kept = 0;
        for id in ranked {
            let Some(candidate) = self.candidates.get_mut(&id) else {
                continue;
            };
            if !candidate.is_alive() {
                continue;
            }
            if kept < self.config.mu {
                kept += 1;
            } else {
                candidate.kill(DeathCause::Slaughtered);
                outcome.slaughtered += 1;
            }
        }
        outcome
    }

    /// Age every live non-elite candidate by one generation.
    pub fn age_survivors(&mut self) {
        for candidate in self.candidates.values_mut() {
            if candidate.is_alive() && !candidate.elite {
                candidate.age += 1;
            }
        }
    }

    /// Drop dead candidates from the arena. Returns how many were removed.
    pub fn remove_dead(&mut self) -> usize {
        let before = self.candidates.len();
        self.candidates.retain(|_, c| c.is_alive());
        before - self.candidates.len()
    }

    /// End the generation-scoped link between candidates and call outcomes.
    pub fn detach_calls(&mut self) {
        for candidate in self.candidates.values_mut() {
            candidate.lineage.detach_call();
        }
    }

    /// Forget every fitness value.
    pub fn invalidate_fitness(&mut self) {
        for candidate in self.candidates.values_mut() {
            candidate.invalidate_fitness();
        }
        self.best_raw = None;
        self.worst_raw = None;
        self.best_scaled = None;
        self.worst_scaled = None;
    }
}

//! Generational pipeline of one population.
//!
//! Each call to [`Pipeline::step`] runs one full generation:
//!
//! ```text
//! Idle -> Selecting -> Applying -> Evaluating -> CloneScaling
//!      -> Slaughtering -> Committed -> (next generation | Terminal)
//! ```
//!
//! Nothing is committed until the whole generation has been evaluated; a
//! generation that fails half way leaves the previous commit untouched in
//! the snapshot.

use std::time::Instant;

use rand::prelude::*;

use crate::schema::{
    ConfigError, GenerationReport, OperatorReport, PopulationConfig, PopulationSnapshot,
    SNAPSHOT_VERSION, StopReason,
};

use super::candidate::{Candidate, CandidateId, DeathCause, Fitness, Genotype, Seeder};
use super::evaluator::{EvaluationError, EvaluationJob, EvaluatorPool};
use super::ledger::{CallId, CallOutcome};
use super::lineage::Lineage;
use super::operator::OperatorRegistry;
use super::persist::PersistError;
use super::population::{Population, PopulationPolicy, policy_for};
use super::selector::{OperatorSelector, SelectionError};
use super::statistics::{assign_quality, rank_rewards};

/// Size of the random reference sample for parentless children.
const REFERENCE_SAMPLE: usize = 5;

/// Invocation attempts per generation, as a multiple of lambda.
const ATTEMPTS_PER_CHILD: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Selecting,
    Applying,
    Evaluating,
    CloneScaling,
    Slaughtering,
    Committed,
    Terminal(StopReason),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Population {0} is extinct")]
    Extinction(String),
    #[error("Population {0} has already stopped")]
    Terminated(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Counts gathered while a generation runs.
#[derive(Debug, Default)]
struct GenerationTally {
    new_children: usize,
    failed_children: usize,
    clones: usize,
}

pub struct Pipeline<G: Genotype> {
    population: Population<G>,
    policy: Box<dyn PopulationPolicy<G>>,
    selector: OperatorSelector,
    rng: StdRng,
    state: PipelineState,
    calls: Vec<CallOutcome>,
    last_calls: Vec<CallOutcome>,
    evaluations: u64,
    steady_state_generations: u64,
    best_ever: Option<Fitness>,
    started: Instant,
}

impl<G: Genotype> Pipeline<G> {
    /// Set up a pipeline for a fresh population.
    ///
    /// Applies the user's operator overrides, then the default-enabling policy.
    pub fn new(
        config: PopulationConfig,
        registry: &OperatorRegistry<G>,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        let mut selector = OperatorSelector::new(&config.operators, config.lambda);
        selector.apply_overrides(&config.operators.overrides, registry);
        selector.apply_default_enabling(&config.name, registry.categories())?;

        Ok(Self {
            policy: policy_for(config.kind),
            population: Population::new(config),
            selector,
            rng: StdRng::seed_from_u64(seed),
            state: PipelineState::Idle,
            calls: Vec::new(),
            last_calls: Vec::new(),
            evaluations: 0,
            steady_state_generations: 0,
            best_ever: None,
            started: Instant::now(),
        })
    }

    /// Rebuild a pipeline from a recovery snapshot.
    ///
    /// The selector is restored exactly, then the current overrides and
    /// default-enabling policy are applied against `registry`. Operator
    /// parameters are pushed back into the registry. With `discard_fitness`
    /// every candidate is evaluated again on the next step.
    pub fn restore(
        snapshot: PopulationSnapshot<G>,
        config: PopulationConfig,
        registry: &mut OperatorRegistry<G>,
        discard_fitness: bool,
        seed: u64,
    ) -> Result<Self, PipelineError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            }
            .into());
        }
        if snapshot.name != config.name {
            log::warn!(
                "Snapshot of population {} loaded into population {}",
                snapshot.name,
                config.name
            );
        }

        let mut selector =
            OperatorSelector::from_state(snapshot.selector, &config.operators, config.lambda);
        selector.apply_overrides(&config.operators.overrides, registry);
        selector.apply_default_enabling(&config.name, registry.categories())?;
        selector.restore_parameters(registry);

        let policy = policy_for(config.kind);
        let mut population = Population::from_parts(
            config,
            snapshot.generation,
            snapshot.next_serial,
            snapshot.candidates,
        );
        if let Some(endogenous) = snapshot.endogenous {
            population.set_endogenous(endogenous);
        }
        if discard_fitness {
            log::info!("Discarding fitness of population {}", population.name());
            population.invalidate_fitness();
        } else {
            policy.prepare_for_commit(&mut population);
        }

        log::info!(
            "Restored population {} at generation {} with {} candidates",
            population.name(),
            population.generation(),
            population.live_count()
        );

        Ok(Self {
            population,
            policy,
            selector,
            rng: StdRng::seed_from_u64(seed),
            state: PipelineState::Committed,
            calls: Vec::new(),
            last_calls: Vec::new(),
            evaluations: snapshot.evaluations,
            steady_state_generations: snapshot.steady_state_generations,
            best_ever: snapshot.best_ever,
            started: Instant::now(),
        })
    }

    pub fn name(&self) -> &str {
        self.population.name()
    }

    pub fn population(&self) -> &Population<G> {
        &self.population
    }

    /// Mutable access for migration between rounds.
    pub fn population_mut(&mut self) -> &mut Population<G> {
        &mut self.population
    }

    pub fn policy(&self) -> &dyn PopulationPolicy<G> {
        self.policy.as_ref()
    }

    pub fn selector(&self) -> &OperatorSelector {
        &self.selector
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.population.generation()
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn steady_state_generations(&self) -> u64 {
        self.steady_state_generations
    }

    pub fn best_ever(&self) -> Option<&Fitness> {
        self.best_ever.as_ref()
    }

    /// Operator invocations of the last committed generation.
    pub fn last_calls(&self) -> &[CallOutcome] {
        &self.last_calls
    }

    fn transition(&mut self, state: PipelineState) {
        log::trace!("{}: {:?} -> {:?}", self.population.name(), self.state, state);
        self.state = state;
    }

    fn terminate(&mut self, reason: StopReason) {
        self.transition(PipelineState::Terminal(reason));
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Seed `nu` candidates and evaluate them.
    pub fn initialize(
        &mut self,
        seeder: &dyn Seeder<G>,
        evaluator: &EvaluatorPool,
    ) -> Result<(), PipelineError> {
        let nu = self.population.config().nu;
        let mut seeded = 0;
        for _ in 0..nu * ATTEMPTS_PER_CHILD {
            if seeded == nu {
                break;
            }
            let genome = seeder.seed(&mut self.rng);
            if !genome.validate() {
                log::warn!("{}: discarding invalid seed", self.population.name());
                continue;
            }
            let id = self.population.next_id();
            self.population
                .insert(Candidate::new(id, genome, Lineage::seed(), 0));
            seeded += 1;
        }
        log::info!("{}: seeded {seeded} candidates", self.population.name());

        self.evaluate_pending(evaluator);
        self.population.remove_dead();
        if self.population.evaluated().next().is_none() {
            self.terminate(StopReason::Extinction);
            return Err(PipelineError::Extinction(self.population.name().to_string()));
        }
        self.track_steady_state();
        self.transition(PipelineState::Committed);
        Ok(())
    }

    /// Evaluate live candidates without fitness, then rescale clones and
    /// refresh the population references. Returns the number evaluated.
    pub fn evaluate_pending(&mut self, evaluator: &EvaluatorPool) -> usize {
        let (evaluated, _) = self.evaluate_unevaluated(evaluator);
        // Migrants may arrive evaluated, so rank even when nothing was evaluated
        let factor = self.population.config().clone_scaling_factor;
        self.policy
            .handle_clone(self.population.candidates_mut(), factor);
        self.policy.prepare_for_commit(&mut self.population);
        evaluated
    }

    /// Evaluate every live candidate without fitness.
    ///
    /// Returns how many were evaluated and how many failed.
    fn evaluate_unevaluated(&mut self, evaluator: &EvaluatorPool) -> (usize, usize) {
        let jobs: Vec<EvaluationJob> = self
            .population
            .unevaluated()
            .into_iter()
            .filter_map(|id| {
                self.population.get(id).map(|c| EvaluationJob {
                    id,
                    representation: c.genome.external_representation(),
                })
            })
            .collect();
        if jobs.is_empty() {
            return (0, 0);
        }

        let count = jobs.len();
        let dimensions = self.population.config().fitness_dimensions;
        let results = evaluator.evaluate_batch(jobs, dimensions);
        self.evaluations += count as u64;

        let mut failed = 0;
        for (id, result) in results {
            let Some(candidate) = self.population.get_mut(id) else {
                continue;
            };
            match result {
                Ok(fitness) => {
                    candidate.set_raw_fitness(fitness);
                    if let Some(CallId(call)) = candidate.lineage.call
                        && let Some(outcome) = self.calls.get_mut(call)
                    {
                        outcome.record_evaluated();
                    }
                }
                Err(e) => {
                    candidate.kill(DeathCause::EvaluationFailed);
                    failed += 1;
                    log::warn!("{}: evaluation of {id} failed: {e}", self.population.name());
                }
            }
        }
        (count - failed, failed)
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Run one generation and commit it.
    ///
    /// Returns [`PipelineError::Extinction`] when no valid child could be
    /// produced or no candidate survived; the pipeline is then terminal.
    pub fn step(
        &mut self,
        registry: &OperatorRegistry<G>,
        evaluator: &EvaluatorPool,
    ) -> Result<GenerationReport, PipelineError> {
        if let PipelineState::Terminal(_) = self.state {
            return Err(PipelineError::Terminated(self.population.name().to_string()));
        }

        if self.population.config().invalidate_fitness_after_generation
            && self.population.generation() > 0
        {
            self.population.invalidate_fitness();
        }
        self.evaluate_pending(evaluator);

        let generation = self.population.generation() + 1;
        let best_ref = self.population.best_scaled().map(|c| c.id);
        let worst_ref = self.population.worst_scaled().map(|c| c.id);
        let mut tally = GenerationTally::default();

        self.transition(PipelineState::Selecting);
        self.selector.prepare_for_generation();
        let children = self.produce_children(registry, generation, &mut tally);

        if children.is_empty() {
            log::warn!(
                "{}: no operator produced a valid child in generation {generation}",
                self.population.name()
            );
            self.calls.clear();
            self.terminate(StopReason::Extinction);
            return Err(PipelineError::Extinction(self.population.name().to_string()));
        }

        self.transition(PipelineState::Evaluating);
        let (_, failed) = self.evaluate_unevaluated(evaluator);
        tally.failed_children += failed;

        self.transition(PipelineState::CloneScaling);
        let factor = self.population.config().clone_scaling_factor;
        tally.clones = self
            .policy
            .handle_clone(self.population.candidates_mut(), factor);
        self.population.recompute_entropy();
        if tally.clones > 0 {
            log::debug!("{}: {} clones rescaled", self.population.name(), tally.clones);
        }

        self.assign_qualities(&children, best_ref, worst_ref);
        self.distribute_rewards();

        self.transition(PipelineState::Slaughtering);
        let policy = &self.policy;
        let outcome = self
            .population
            .slaughter(|a, b| policy.compare_for_selection(a, b));
        log::debug!(
            "{}: {} aged out, {} slaughtered",
            self.population.name(),
            outcome.aged,
            outcome.slaughtered
        );

        self.commit(generation);

        if self.population.live_count() == 0 {
            self.terminate(StopReason::Extinction);
            return Err(PipelineError::Extinction(self.population.name().to_string()));
        }

        let report = self.report(&tally);
        log::info!(
            "{} generation {}: {} live, {} new, best {:?}",
            report.population,
            report.generation,
            report.live,
            report.new_children,
            report.best_raw.as_ref().map(|f| f.values().to_vec())
        );
        Ok(report)
    }

    /// Invoke operators until lambda children exist or the attempts run out.
    fn produce_children(
        &mut self,
        registry: &OperatorRegistry<G>,
        generation: u64,
        tally: &mut GenerationTally,
    ) -> Vec<CandidateId> {
        let lambda = self.population.config().lambda;
        let mut children = Vec::with_capacity(lambda);

        for _ in 0..lambda * ATTEMPTS_PER_CHILD {
            if children.len() >= lambda {
                break;
            }

            let selection = match self.selector.select(&mut self.rng) {
                Ok(selection) => selection,
                Err(e) => {
                    log::warn!("{}: {e}", self.population.name());
                    break;
                }
            };
            let Some(operator) = registry.get(&selection.operator) else {
                log::warn!("Operator {} is not registered", selection.operator);
                continue;
            };

            let policy = &self.policy;
            let parents = match self.population.select_parents(
                |a, b| policy.compare_for_selection(a, b),
                &mut self.rng,
                &selection.operator,
                operator.parents_cardinality(),
            ) {
                Ok(parents) => parents,
                Err(e @ SelectionError::InsufficientParents { .. }) => {
                    log::warn!("{}: skipping invocation: {e}", self.population.name());
                    continue;
                }
                Err(e) => {
                    log::warn!("{}: {e}", self.population.name());
                    break;
                }
            };

            self.transition(PipelineState::Applying);
            let genomes: Vec<&G> = parents
                .iter()
                .filter_map(|id| self.population.get(*id).map(|c| &c.genome))
                .collect();
            let sigma = self.population.endogenous().sigma;
            let output = operator.apply_with_strength(&genomes, sigma, &mut self.rng);
            let produced = if output.succeeded { output.children } else { Vec::new() };
            let total = produced.len();
            let valid: Vec<G> = produced.into_iter().filter(|g| g.validate()).collect();
            tally.failed_children += total - valid.len();

            let call = CallId(self.calls.len());
            self.calls.push(CallOutcome::new(
                selection.operator.as_str(),
                u32::try_from(valid.len()).unwrap_or(u32::MAX),
            ));
            if valid.is_empty() {
                log::trace!("{}: {} produced no valid child", self.population.name(), selection.operator);
                self.selector.failure(&selection.operator);
            } else {
                self.selector.success(&selection.operator);
            }

            for genome in valid {
                let id = self.population.next_id();
                let lineage = Lineage::new(selection.operator.as_str(), parents.clone(), call);
                self.population
                    .insert(Candidate::new(id, genome, lineage, generation));
                children.push(id);
            }
            self.transition(PipelineState::Selecting);
        }

        tally.new_children = children.len();
        children
    }

    /// Put every evaluated child into a quality bucket of its call.
    fn assign_qualities(
        &mut self,
        children: &[CandidateId],
        best_ref: Option<CandidateId>,
        worst_ref: Option<CandidateId>,
    ) {
        for &id in children {
            let Some(child) = self.population.get(id) else {
                continue;
            };
            if !child.is_alive() || !child.is_evaluated() {
                continue;
            }
            let Some(CallId(call)) = child.lineage.call else {
                continue;
            };

            let mut references: Vec<CandidateId> = child
                .lineage
                .parents
                .iter()
                .copied()
                .filter(|p| {
                    self.population
                        .get(*p)
                        .is_some_and(|c| c.is_alive() && c.is_evaluated())
                })
                .collect();
            if references.is_empty() {
                references = self.population.random_sample(&mut self.rng, REFERENCE_SAMPLE, &[id]);
            }

            let lookup = |r: Option<CandidateId>| {
                r.and_then(|r| self.population.get(r))
                    .filter(|c| c.is_evaluated())
            };
            let reference_candidates: Vec<&Candidate<G>> = references
                .iter()
                .filter_map(|r| self.population.get(*r))
                .collect();
            let quality = assign_quality(
                child,
                lookup(best_ref),
                lookup(worst_ref),
                &reference_candidates,
                |a, b| self.policy.compare_operator_performance(a, b),
            );
            log::trace!("{id}: {quality:?}");
            if let Some(outcome) = self.calls.get_mut(call) {
                outcome.record_quality(quality);
            }
        }
    }

    /// Rank every live evaluated candidate and reward the new children.
    fn distribute_rewards(&mut self) {
        let policy = &self.policy;
        let ranked = self
            .population
            .ranked(|a, b| policy.compare_for_selection(a, b));
        let candidates: Vec<&Candidate<G>> = ranked
            .iter()
            .filter_map(|id| self.population.get(*id))
            .collect();

        let Some(rewards) = performance_rewards(policy.as_ref(), &candidates) else {
            log::debug!("{}: all candidates tie; no rewards", self.population.name());
            return;
        };

        for (id, reward) in rewards {
            if let Some(CallId(call)) = self.population.get(id).and_then(|c| c.lineage.call)
                && let Some(outcome) = self.calls.get_mut(call)
            {
                outcome.record_reward(reward);
            }
        }
    }

    fn commit(&mut self, generation: u64) {
        self.population.remove_dead();
        self.population.age_survivors();
        self.policy.prepare_for_commit(&mut self.population);

        let epoch_length = self.population.config().epoch_length;
        self.selector.step(generation, epoch_length, &self.calls);
        if (generation + 1) % epoch_length.max(1) == 0 {
            let histogram = self.selector.epoch_histogram();
            self.policy.adapt_parameters(&mut self.population, &histogram);
        }
        self.last_calls = std::mem::take(&mut self.calls);
        self.population.detach_calls();
        self.population.set_generation(generation);
        self.track_steady_state();
        self.transition(PipelineState::Committed);
    }

    fn track_steady_state(&mut self) {
        let best = self
            .population
            .best_raw()
            .and_then(|c| c.raw_fitness.clone());
        match (best, &self.best_ever) {
            (Some(best), None) => self.best_ever = Some(best),
            (Some(best), Some(previous)) if best.is_better_than(previous) => {
                self.best_ever = Some(best);
                self.steady_state_generations = 0;
            }
            _ => self.steady_state_generations += 1,
        }
    }

    fn report(&self, tally: &GenerationTally) -> GenerationReport {
        let best = self.population.best_raw();
        GenerationReport {
            population: self.population.name().to_string(),
            generation: self.population.generation(),
            live: self.population.live_count(),
            new_children: tally.new_children,
            failed_children: tally.failed_children,
            clones: tally.clones,
            evaluations: self.evaluations,
            best_raw: best.and_then(|c| c.raw_fitness.clone()),
            best_id: best.map(|c| c.id),
            mean_raw: self.population.mean_raw(),
            entropy: self.population.entropy(),
            sigma: self.population.endogenous().sigma,
            tau: self.population.endogenous().tau,
            operators: self
                .selector
                .records()
                .iter()
                .map(|record| OperatorReport {
                    name: record.name.clone(),
                    enabled: record.enabled,
                    pseudo_deactivated: record.pseudo_deactivated,
                    tokens: record.tokens,
                    calls: record.calls_last_generation,
                    weight: self.selector.weight(record),
                })
                .collect(),
        }
    }

    // ========================================================================
    // Stop conditions and persistence
    // ========================================================================

    /// First stop condition that holds, if any.
    pub fn check_stop_condition(&self, external: bool) -> Option<StopReason> {
        if let PipelineState::Terminal(reason) = self.state {
            return Some(reason);
        }
        if external {
            return Some(StopReason::ExternalRequest);
        }

        let stop = &self.population.config().stop;
        if let Some(limit) = stop.max_generations
            && self.population.generation() >= limit
        {
            return Some(StopReason::MaxGenerations);
        }
        if let Some(limit) = stop.max_evaluations
            && self.evaluations >= limit
        {
            return Some(StopReason::MaxEvaluations);
        }
        if let Some(limit) = stop.max_time_secs
            && self.started.elapsed().as_secs_f64() >= limit
        {
            return Some(StopReason::MaxTime);
        }
        if let Some(limit) = stop.max_steady_state_generations
            && self.steady_state_generations >= limit
        {
            return Some(StopReason::SteadyState);
        }
        if let Some(target) = &stop.target_fitness
            && let Some(best) = self.population.best_raw().and_then(|c| c.raw_fitness.as_ref())
            && !best.compare(&Fitness::new(target.clone())).is_lt()
        {
            return Some(StopReason::TargetFitness);
        }
        None
    }

    /// Recoverable state of the last commit.
    pub fn snapshot(&mut self, registry: &OperatorRegistry<G>) -> PopulationSnapshot<G> {
        self.selector.capture_parameters(registry);
        PopulationSnapshot {
            version: SNAPSHOT_VERSION,
            name: self.population.name().to_string(),
            generation: self.population.generation(),
            next_serial: self.population.next_serial(),
            evaluations: self.evaluations,
            steady_state_generations: self.steady_state_generations,
            best_ever: self.best_ever.clone(),
            endogenous: Some(self.population.endogenous()),
            selector: self.selector.state(),
            candidates: self.population.candidates().values().cloned().collect(),
        }
    }
}

/// Rank reward of every candidate, best performer first.
///
/// Candidates the policy cannot tell apart by performance share a class.
/// `ranked` is in selection order, which breaks ties between classes of
/// equal rank. Returns `None` when everything ties.
fn performance_rewards<G: Genotype>(
    policy: &dyn PopulationPolicy<G>,
    ranked: &[&Candidate<G>],
) -> Option<Vec<(CandidateId, f64)>> {
    let mut ordered = ranked.to_vec();
    ordered.sort_by(|a, b| policy.compare_operator_performance(b, a));
    let rewards = rank_rewards(&ordered, |a, b| {
        policy.compare_operator_performance(a, b).is_eq()
    })?;
    Some(ordered.iter().map(|c| c.id).zip(rewards).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::bitstring::{BitString, onemax, random_seeder, standard_registry};
    use crate::evolution::operator::{Operator, OperatorCategory, OperatorOutput};
    use crate::evolution::adaptation::Endogenous;
    use crate::schema::{
        AdaptationConfig, DefaultEnabling, EvaluationConfig, OperatorsConfig, StopConfig,
    };

    fn config(mu: usize, lambda: usize) -> PopulationConfig {
        PopulationConfig {
            mu,
            lambda,
            nu: mu,
            ..Default::default()
        }
    }

    fn pool() -> EvaluatorPool {
        EvaluatorPool::new(
            &EvaluationConfig {
                concurrency: 2,
                ..Default::default()
            },
            onemax,
        )
        .unwrap()
    }

    /// Operator that never produces a child.
    struct Barren;

    impl Operator<BitString> for Barren {
        fn name(&self) -> &str {
            "barren"
        }

        fn category(&self) -> OperatorCategory {
            OperatorCategory::DefaultOn
        }

        fn parents_cardinality(&self) -> usize {
            1
        }

        fn apply(&self, _parents: &[&BitString], _rng: &mut StdRng) -> OperatorOutput<BitString> {
            OperatorOutput::failure()
        }
    }

    #[test]
    fn test_initialize_and_step() {
        let registry = standard_registry();
        let mut pipeline = Pipeline::new(config(10, 6), &registry, 7).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.initialize(&random_seeder(16), &pool()).unwrap();
        assert_eq!(pipeline.population().live_count(), 10);
        assert_eq!(pipeline.evaluations(), 10);
        assert_eq!(pipeline.state(), PipelineState::Committed);

        let report = pipeline.step(&registry, &pool()).unwrap();
        assert_eq!(report.generation, 1);
        assert!(report.new_children >= 6);
        assert!(report.live <= 10);
        assert_eq!(pipeline.generation(), 1);
        assert_eq!(pipeline.state(), PipelineState::Committed);

        let calls: u32 = report.operators.iter().map(|o| o.calls).sum();
        assert!(calls > 0);
        for candidate in pipeline.population().candidates().values() {
            assert!(candidate.lineage.call.is_none());
            assert!(candidate.is_alive());
        }
    }

    #[test]
    fn test_extinction_when_no_operator_produces() {
        let registry = OperatorRegistry::new().with(Barren).unwrap();
        let mut pipeline = Pipeline::new(config(4, 4), &registry, 1).unwrap();
        pipeline.initialize(&random_seeder(8), &pool()).unwrap();

        let err = pipeline.step(&registry, &pool()).unwrap_err();
        assert!(matches!(err, PipelineError::Extinction(_)));
        assert_eq!(pipeline.state(), PipelineState::Terminal(StopReason::Extinction));
        assert_eq!(pipeline.check_stop_condition(false), Some(StopReason::Extinction));
        assert_eq!(pipeline.generation(), 0);

        let barren = pipeline.selector().record("barren").unwrap();
        assert!(barren.tokens < 3);

        assert!(matches!(
            pipeline.step(&registry, &pool()),
            Err(PipelineError::Terminated(_))
        ));
    }

    #[test]
    fn test_evaluation_failure_kills_only_that_candidate() {
        let registry = standard_registry();
        let flaky = |text: &str| {
            if text.starts_with('1') {
                Err(EvaluationError::Failed("rejected".to_string()))
            } else {
                onemax(text)
            }
        };
        let pool = EvaluatorPool::new(&EvaluationConfig::default(), flaky).unwrap();
        let mut pipeline = Pipeline::new(config(12, 8), &registry, 3).unwrap();
        pipeline.initialize(&random_seeder(12), &pool).unwrap();

        for candidate in pipeline.population().live() {
            assert!(candidate.genome.to_string().starts_with('0'));
        }
        let report = pipeline.step(&registry, &pool).unwrap();
        assert!(report.live > 0);
        for candidate in pipeline.population().live() {
            assert!(candidate.is_evaluated());
        }
    }

    #[test]
    fn test_stop_conditions() {
        let registry = standard_registry();
        let mut cfg = config(8, 4);
        cfg.stop = StopConfig {
            max_generations: Some(2),
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(cfg, &registry, 5).unwrap();
        pipeline.initialize(&random_seeder(8), &pool()).unwrap();
        assert_eq!(pipeline.check_stop_condition(false), None);
        assert_eq!(
            pipeline.check_stop_condition(true),
            Some(StopReason::ExternalRequest)
        );

        pipeline.step(&registry, &pool()).unwrap();
        pipeline.step(&registry, &pool()).unwrap();
        assert_eq!(
            pipeline.check_stop_condition(false),
            Some(StopReason::MaxGenerations)
        );
    }

    #[test]
    fn test_target_fitness() {
        let registry = standard_registry();
        let mut cfg = config(8, 4);
        cfg.stop.target_fitness = Some(vec![0.0]);
        let mut pipeline = Pipeline::new(cfg, &registry, 5).unwrap();
        pipeline.initialize(&random_seeder(8), &pool()).unwrap();
        assert_eq!(
            pipeline.check_stop_condition(false),
            Some(StopReason::TargetFitness)
        );
    }

    #[test]
    fn test_same_seed_same_run() {
        let registry = standard_registry();
        let run = |seed: u64| {
            let mut pipeline = Pipeline::new(config(10, 6), &registry, seed).unwrap();
            pipeline.initialize(&random_seeder(20), &pool()).unwrap();
            for _ in 0..3 {
                pipeline.step(&registry, &pool()).unwrap();
            }
            pipeline
                .population()
                .live()
                .map(|c| (c.id, c.genome.to_string()))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut registry = standard_registry();
        let mut pipeline = Pipeline::new(config(10, 6), &registry, 9).unwrap();
        pipeline.initialize(&random_seeder(16), &pool()).unwrap();
        pipeline.step(&registry, &pool()).unwrap();
        let snapshot = pipeline.snapshot(&registry);
        let json = serde_json::to_string(&snapshot).unwrap();
        let snapshot: PopulationSnapshot<BitString> = serde_json::from_str(&json).unwrap();

        let restored =
            Pipeline::restore(snapshot.clone(), config(10, 6), &mut registry, false, 9).unwrap();
        assert_eq!(restored.generation(), 1);
        assert_eq!(restored.evaluations(), pipeline.evaluations());
        assert_eq!(
            serde_json::to_value(restored.selector().state()).unwrap(),
            serde_json::to_value(pipeline.selector().state()).unwrap()
        );
        assert_eq!(
            restored.population().live_count(),
            pipeline.population().live_count()
        );
        assert!(restored.population().next_serial() >= pipeline.population().next_serial());

        let mut discarded =
            Pipeline::restore(snapshot, config(10, 6), &mut registry, true, 9).unwrap();
        assert_eq!(discarded.population().unevaluated().len(), discarded.population().live_count());
        let before = discarded.evaluations();
        let report = discarded.step(&registry, &pool()).unwrap();
        assert!(report.evaluations > before);
        assert_eq!(report.generation, 2);
    }

    #[test]
    fn test_every_evaluated_child_lands_in_one_bucket() {
        let registry = standard_registry();
        let mut pipeline = Pipeline::new(config(12, 8), &registry, 21).unwrap();
        pipeline.initialize(&random_seeder(24), &pool()).unwrap();

        for _ in 0..4 {
            pipeline.step(&registry, &pool()).unwrap();
            let calls = pipeline.last_calls();
            assert!(!calls.is_empty());
            for call in calls {
                assert_eq!(call.quality_count(), call.evaluated_children);
                assert!(call.evaluated_children <= call.valid_children);
                assert!(call.rewards.len() <= call.evaluated_children as usize);
                assert!(call.rewards.iter().all(|r| (0.0..=1.0).contains(r)));
            }
        }
        let rewarded = pipeline.last_calls().iter().any(|c| !c.rewards.is_empty());
        assert!(rewarded);
    }

    fn scored(serial: u64, fitness: f64, delta_entropy: f64) -> Candidate<BitString> {
        let mut candidate = Candidate::new(
            CandidateId::new(serial),
            "0101".parse().unwrap(),
            Lineage::seed(),
            serial,
        );
        candidate.set_raw_fitness(Fitness::new(vec![fitness]));
        candidate.delta_entropy = delta_entropy;
        candidate
    }

    #[test]
    fn test_reward_classes_split_on_delta_entropy() {
        let policy = policy_for::<BitString>(crate::schema::PopulationKind::Enhanced);
        let a = scored(0, 5.0, 0.1);
        let b = scored(1, 5.0, 0.2);
        let c = scored(2, 5.0, 0.1);
        let d = scored(3, 1.0, 0.9);

        // Enhanced selection order interleaves the equal-fitness candidates
        let rewards = performance_rewards(policy.as_ref(), &[&a, &b, &c, &d]).unwrap();
        let reward = |id: u64| {
            rewards
                .iter()
                .find(|(c, _)| *c == CandidateId::new(id))
                .map(|(_, r)| *r)
                .unwrap()
        };
        assert_eq!(reward(1), 1.0);
        assert_eq!(reward(0), 0.5);
        assert_eq!(reward(2), 0.5);
        assert_eq!(reward(3), 0.0);
    }

    #[test]
    fn test_equal_performance_shares_reward() {
        let policy = policy_for::<BitString>(crate::schema::PopulationKind::Diversity);
        let a = scored(0, 5.0, 0.3);
        let b = scored(1, 5.0, 0.3);
        let c = scored(2, 2.0, 0.3);
        let rewards = performance_rewards(policy.as_ref(), &[&a, &b, &c]).unwrap();
        assert_eq!(rewards[0].1, 1.0);
        assert_eq!(rewards[1].1, 1.0);
        assert_eq!(rewards[2], (CandidateId::new(2), 0.0));

        assert_eq!(performance_rewards(policy.as_ref(), &[&a, &b]), None);
    }

    #[test]
    fn test_adaptation_at_epoch_end_and_restore() {
        let mut registry = standard_registry();
        let mut cfg = config(10, 6);
        cfg.epoch_length = 2;
        cfg.adaptation = AdaptationConfig {
            enabled: true,
            sigma: 0.5,
            inertia: 0.0,
            tau_min: 1.0,
            tau_max: 4.0,
        };
        let mut pipeline = Pipeline::new(cfg.clone(), &registry, 13).unwrap();
        pipeline.initialize(&random_seeder(24), &pool()).unwrap();
        assert_eq!(pipeline.population().endogenous(), Endogenous { sigma: 0.5, tau: 2.0 });

        let expected = |from: Endogenous, pipeline: &Pipeline<BitString>| {
            let mut next = from;
            next.adapt(&cfg.adaptation, &pipeline.selector().epoch_histogram(), 2, 6);
            next
        };

        // Generation 1 closes the first (short) epoch
        let before = pipeline.population().endogenous();
        let report = pipeline.step(&registry, &pool()).unwrap();
        let after_first = pipeline.population().endogenous();
        assert_eq!(after_first, expected(before, &pipeline));
        assert_eq!((report.sigma, report.tau), (after_first.sigma, after_first.tau));

        pipeline.step(&registry, &pool()).unwrap();
        assert_eq!(pipeline.population().endogenous(), after_first);

        pipeline.step(&registry, &pool()).unwrap();
        let after_second = pipeline.population().endogenous();
        assert_eq!(after_second, expected(after_first, &pipeline));

        let snapshot = pipeline.snapshot(&registry);
        assert_eq!(snapshot.endogenous, Some(after_second));
        let restored = Pipeline::restore(snapshot, cfg, &mut registry, false, 13).unwrap();
        assert_eq!(restored.population().endogenous(), after_second);
    }

    #[test]
    fn test_multi_objective_population_steps() {
        let registry = standard_registry();
        let ones_and_zeros = |text: &str| -> Result<Vec<f64>, EvaluationError> {
            let ones = onemax(text)?[0];
            let length = text.trim().len() as f64;
            Ok(vec![ones, length - ones])
        };
        let pool = EvaluatorPool::new(&EvaluationConfig::default(), ones_and_zeros).unwrap();
        let mut cfg = config(10, 6);
        cfg.kind = crate::schema::PopulationKind::MultiObjective;
        cfg.fitness_dimensions = 2;
        let mut pipeline = Pipeline::new(cfg, &registry, 4).unwrap();
        pipeline.initialize(&random_seeder(12), &pool).unwrap();

        for _ in 0..3 {
            let report = pipeline.step(&registry, &pool).unwrap();
            assert!(report.live <= 10);
            for candidate in pipeline.population().live() {
                assert_ne!(candidate.pareto, crate::evolution::ParetoRank::UNRANKED);
            }
            let best = pipeline.population().best_scaled().unwrap();
            assert_eq!(best.pareto.level, 0);
            for call in pipeline.last_calls() {
                assert_eq!(call.quality_count(), call.evaluated_children);
            }
        }
    }

    #[test]
    fn test_no_enabled_operator_is_config_error() {
        let registry = standard_registry();
        let mut cfg = config(4, 2);
        cfg.operators = OperatorsConfig {
            default_enabling: DefaultEnabling::None,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new(cfg, &registry, 0),
            Err(ConfigError::NoEnabledOperators(_))
        ));
    }
}

//! Adaptive operator selector.
//!
//! The selector owns one [`OperatorRecord`] per operator known to a
//! population. It decides which operator to invoke next and folds each
//! generation's [`CallOutcome`]s back into the records.
//!
//! Operators start pseudo-deactivated with a few tokens. While in that state
//! they are tried once per generation before any weighted draw; each failed
//! trial costs a token, and the first valid child activates the operator for
//! the rest of the run. Exhausted pseudo-deactivated operators receive a new
//! token every `token_interval` generations.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{
    ConfigError, DefaultEnabling, OperatorOverride, OperatorsConfig, SelectionStrategy,
};

use super::bandit::{kappa_roulette, roulette};
use super::ledger::{CallOutcome, OperatorRecord, Quality};
use super::operator::{OperatorCategory, OperatorRegistry};

/// No operator could be selected.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("No selectable operator")]
    NoSelectableOperator,
    #[error("Not enough live candidates for {operator}: need {needed}, have {available}")]
    InsufficientParents {
        operator: String,
        needed: usize,
        available: usize,
    },
}

/// Operator chosen for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub operator: String,
    /// Trial of a pseudo-deactivated operator rather than a weighted draw.
    pub exploration: bool,
}

/// Persisted selector state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorState {
    pub default_enabling: DefaultEnabling,
    pub strategy: SelectionStrategy,
    pub records: Vec<OperatorRecord>,
}

pub struct OperatorSelector {
    /// Records sorted by operator name.
    records: Vec<OperatorRecord>,
    strategy: SelectionStrategy,
    default_enabling: DefaultEnabling,
    initial_tokens: u32,
    token_interval: u32,
    lambda: u32,
    new_operator_activated: bool,
}

impl OperatorSelector {
    pub fn new(config: &OperatorsConfig, lambda: usize) -> Self {
        Self {
            records: Vec::new(),
            strategy: config.strategy.clone(),
            default_enabling: config.default_enabling,
            initial_tokens: config.initial_tokens,
            token_interval: config.token_interval.max(1),
            lambda: u32::try_from(lambda).unwrap_or(u32::MAX),
            new_operator_activated: false,
        }
    }

    /// Rebuild a selector from persisted records.
    ///
    /// Strategy and policy come from `config`; records, tokens and bandit
    /// statistics come from `state`.
    pub fn from_state(state: SelectorState, config: &OperatorsConfig, lambda: usize) -> Self {
        if state.strategy != config.strategy {
            log::info!(
                "Selection strategy changed from {:?} to {:?} since the snapshot",
                state.strategy,
                config.strategy
            );
        }
        let mut selector = Self::new(config, lambda);
        selector.records = state.records;
        selector.records.sort_by(|a, b| a.name.cmp(&b.name));
        selector.records.dedup_by(|a, b| a.name == b.name);
        selector
    }

    pub fn state(&self) -> SelectorState {
        SelectorState {
            default_enabling: self.default_enabling,
            strategy: self.strategy.clone(),
            records: self.records.clone(),
        }
    }

    pub fn records(&self) -> &[OperatorRecord] {
        &self.records
    }

    pub fn record(&self, name: &str) -> Option<&OperatorRecord> {
        self.position(name).ok().map(|i| &self.records[i])
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut OperatorRecord> {
        match self.position(name) {
            Ok(i) => Some(&mut self.records[i]),
            Err(_) => None,
        }
    }

    pub fn strategy(&self) -> &SelectionStrategy {
        &self.strategy
    }

    pub fn default_enabling(&self) -> DefaultEnabling {
        self.default_enabling
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.records.binary_search_by(|r| r.name.as_str().cmp(name))
    }

    fn record_or_insert(&mut self, name: &str) -> &mut OperatorRecord {
        let index = match self.position(name) {
            Ok(i) => i,
            Err(i) => {
                self.records
                    .insert(i, OperatorRecord::new(name, self.initial_tokens));
                i
            }
        };
        &mut self.records[index]
    }

    // ========================================================================
    // Enabling
    // ========================================================================

    /// Apply explicit user decisions. Unknown operators are ignored with a warning.
    pub fn apply_overrides<G>(
        &mut self,
        overrides: &[OperatorOverride],
        registry: &OperatorRegistry<G>,
    ) {
        for decision in overrides {
            if !registry.contains(&decision.name) {
                log::warn!("Ignoring setting for unknown operator {}", decision.name);
                continue;
            }
            let record = self.record_or_insert(&decision.name);
            record.enabled = decision.enabled;
            record.explicitly_enabled = true;
        }
    }

    /// Enable operators according to the default-enabling policy.
    ///
    /// Explicit decisions are kept. Implicitly enabled operators whose
    /// category is no longer enabled are dropped, as are records of operators
    /// missing from `categories`. Operators of an enabled category that have
    /// no record yet are added.
    pub fn apply_default_enabling<'a, I>(
        &mut self,
        population: &str,
        categories: I,
    ) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, OperatorCategory)>,
    {
        let categories: Vec<(&str, OperatorCategory)> = categories.into_iter().collect();
        let policy = self.default_enabling;
        let category_of = |name: &str| {
            categories
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, category)| *category)
        };

        self.records.retain_mut(|record| {
            let Some(category) = category_of(&record.name) else {
                if record.explicitly_enabled {
                    if record.enabled {
                        log::warn!("Operator {} is not registered; disabling it", record.name);
                    }
                    record.enabled = false;
                    return true;
                }
                log::warn!("Dropping record of unregistered operator {}", record.name);
                return false;
            };
            if record.explicitly_enabled {
                return true;
            }
            let keep = record.enabled && category_enabled(policy, category);
            if !keep {
                log::debug!("Operator {} no longer enabled by default", record.name);
            }
            keep
        });

        for (name, category) in &categories {
            if category_enabled(policy, *category) && self.position(name).is_err() {
                log::debug!("Operator {name} enabled by default");
                self.record_or_insert(name).enabled = true;
            }
        }

        if !self.records.iter().any(|r| r.enabled) {
            return Err(ConfigError::NoEnabledOperators(population.to_string()));
        }
        Ok(())
    }

    /// Switch to another default-enabling policy and apply it.
    pub fn force_default_enabling<'a, I>(
        &mut self,
        population: &str,
        policy: DefaultEnabling,
        categories: I,
    ) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, OperatorCategory)>,
    {
        self.default_enabling = policy;
        self.apply_default_enabling(population, categories)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Refill tokens and clear per-generation counters.
    pub fn prepare_for_generation(&mut self) {
        for record in &mut self.records {
            record.pending = 0;
            record.explored_this_generation = false;
            if !record.enabled {
                continue;
            }
            if !record.pseudo_deactivated {
                record.tokens = self.lambda;
            } else if record.tick_replenishment(self.token_interval) {
                log::debug!(
                    "Operator {} receives a token after {} generations",
                    record.name,
                    self.token_interval
                );
            }
        }
    }

    /// Choose the operator for the next invocation.
    pub fn select<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Selection, SelectionError> {
        if let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.is_explorable() && !r.explored_this_generation)
        {
            record.explored_this_generation = true;
            record.pending += 1;
            log::trace!("Exploring pseudo-deactivated operator {}", record.name);
            return Ok(Selection {
                operator: record.name.clone(),
                exploration: true,
            });
        }

        let selectable: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].is_selectable())
            .collect();
        if selectable.is_empty() {
            return Err(SelectionError::NoSelectableOperator);
        }

        let choice = match &self.strategy {
            SelectionStrategy::Uniform => selectable.choose(rng).copied(),
            SelectionStrategy::Histogram => {
                let weights: Vec<f64> = selectable
                    .iter()
                    .map(|&i| self.records[i].histogram_weight())
                    .collect();
                roulette(&weights, rng).map(|k| selectable[k])
            }
            SelectionStrategy::Dmab { kappa } => self.select_dmab(&selectable, *kappa, false, rng),
            SelectionStrategy::Pdmab { kappa } => self.select_dmab(&selectable, *kappa, true, rng),
        };
        let index = choice.ok_or(SelectionError::NoSelectableOperator)?;

        let record = &mut self.records[index];
        record.pending += 1;
        Ok(Selection {
            operator: record.name.clone(),
            exploration: false,
        })
    }

    /// Bandit draw. With `count_pending`, selections made earlier in this
    /// generation weigh in the exploration term.
    fn select_dmab<R: Rng + ?Sized>(
        &self,
        selectable: &[usize],
        kappa: f64,
        count_pending: bool,
        rng: &mut R,
    ) -> Option<usize> {
        if selectable
            .iter()
            .any(|&i| self.records[i].bandit.executions == 0)
        {
            // Least tried first; `min_by_key` keeps the first, i.e. name order
            return selectable
                .iter()
                .copied()
                .min_by_key(|&i| self.records[i].bandit.executions + self.records[i].pending as u64);
        }

        let total: u64 = selectable
            .iter()
            .map(|&i| self.records[i].bandit.executions)
            .sum();
        let total_pending: u64 = selectable
            .iter()
            .map(|&i| u64::from(self.records[i].pending))
            .sum();
        let scores: Vec<f64> = selectable
            .iter()
            .map(|&i| {
                let record = &self.records[i];
                if count_pending {
                    record
                        .bandit
                        .pending_ucb_score(total, total_pending, u64::from(record.pending))
                } else {
                    record.bandit.ucb_score(total)
                }
            })
            .collect();
        kappa_roulette(&scores, kappa, rng).map(|k| selectable[k])
    }

    /// The invocation of `name` produced at least one valid child.
    pub fn success(&mut self, name: &str) {
        let lambda = self.lambda;
        if let Some(record) = self.record_mut(name)
            && record.pseudo_deactivated
        {
            record.activate(lambda);
            log::debug!("Operator {name} produced a valid child and is now active");
            self.new_operator_activated = true;
        }
    }

    /// The invocation of `name` produced no valid child.
    pub fn failure(&mut self, name: &str) {
        if let Some(record) = self.record_mut(name) {
            record.consume_token();
            if record.tokens == 0 {
                log::debug!("Operator {name} ran out of tokens");
            }
        }
    }

    // ========================================================================
    // Epoch update
    // ========================================================================

    /// Fold the generation's call outcomes into the records.
    ///
    /// Epoch counters are cleared first whenever `generation` starts a new
    /// epoch. Must run after evaluation and clone scaling.
    pub fn step(&mut self, generation: u64, epoch_length: u64, calls: &[CallOutcome]) {
        if generation % epoch_length.max(1) == 0 {
            for record in &mut self.records {
                record.reset_epoch();
            }
        }
        for record in &mut self.records {
            record.calls_last_generation = 0;
        }

        for call in calls {
            let Some(record) = self.record_mut(&call.operator) else {
                log::warn!("Call outcome for unknown operator {}", call.operator);
                continue;
            };
            record.calls_last_generation += 1;
            if !call.succeeded() {
                record.record_failure();
                continue;
            }
            for quality in Quality::ALL {
                for _ in 0..call.qualities[quality.index()] {
                    record.record_quality(quality);
                }
            }
        }

        self.update_bandit(calls);
    }

    /// Quality histogram of the current epoch summed over every operator.
    pub fn epoch_histogram(&self) -> [u64; 5] {
        let mut histogram = [0; 5];
        for record in &self.records {
            for (total, count) in histogram.iter_mut().zip(record.quality_histogram) {
                *total += count;
            }
        }
        histogram
    }

    fn update_bandit(&mut self, calls: &[CallOutcome]) {
        if self.new_operator_activated {
            log::debug!("New operator activated this generation; resetting bandit statistics");
            self.reset_bandit();
            self.new_operator_activated = false;
        }

        for call in calls.iter().filter(|c| c.succeeded()) {
            let instant = call.max_reward().unwrap_or(0.0);
            let Some(record) = self.record_mut(&call.operator) else {
                continue;
            };
            let reward = record.bandit.push_instant_reward(instant);
            if record.bandit.reward(reward) {
                log::debug!("Page-Hinkley alarm on {}; resetting bandit statistics", call.operator);
                self.reset_bandit();
            }
        }
    }

    fn reset_bandit(&mut self) {
        for record in &mut self.records {
            record.bandit.reset();
        }
    }

    /// Weight of an operator under the current strategy, for statistics.
    pub fn weight(&self, record: &OperatorRecord) -> f64 {
        match self.strategy {
            SelectionStrategy::Histogram => record.histogram_weight(),
            SelectionStrategy::Uniform => 1.0,
            SelectionStrategy::Dmab { .. } | SelectionStrategy::Pdmab { .. } => {
                record.bandit.mean_reward
            }
        }
    }

    // ========================================================================
    // Operator parameters
    // ========================================================================

    /// Copy operator parameters into the records before persisting.
    pub fn capture_parameters<G>(&mut self, registry: &OperatorRegistry<G>) {
        for record in &mut self.records {
            record.parameters = registry
                .get(&record.name)
                .filter(|op| op.has_parameters())
                .and_then(|op| op.save_parameters());
        }
    }

    /// Push persisted parameters back into the operators.
    pub fn restore_parameters<G>(&self, registry: &mut OperatorRegistry<G>) {
        for record in &self.records {
            let Some(parameters) = &record.parameters else {
                continue;
            };
            let Some(operator) = registry.get_mut(&record.name) else {
                continue;
            };
            if let Err(message) = operator.load_parameters(parameters) {
                log::warn!("Cannot restore parameters of {}: {message}", record.name);
            }
        }
    }
}

fn category_enabled(policy: DefaultEnabling, category: OperatorCategory) -> bool {
    match policy {
        DefaultEnabling::None => false,
        DefaultEnabling::DefaultOn => category == OperatorCategory::DefaultOn,
        DefaultEnabling::All => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CATEGORIES: [(&str, OperatorCategory); 3] = [
        ("flip", OperatorCategory::DefaultOn),
        ("scramble", OperatorCategory::DefaultOff),
        ("xover", OperatorCategory::DefaultOn),
    ];

    fn selector(policy: DefaultEnabling, strategy: SelectionStrategy) -> OperatorSelector {
        let config = OperatorsConfig {
            default_enabling: policy,
            strategy,
            ..Default::default()
        };
        let mut selector = OperatorSelector::new(&config, 4);
        selector.apply_default_enabling("test", CATEGORIES).unwrap();
        selector
    }

    fn activate_all(selector: &mut OperatorSelector) {
        let names: Vec<String> = selector.records().iter().map(|r| r.name.clone()).collect();
        for name in names {
            selector.success(&name);
        }
        selector.prepare_for_generation();
    }

    #[test]
    fn test_default_on_policy() {
        let selector = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Histogram);
        let names: Vec<&str> = selector.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["flip", "xover"]);
        assert!(selector.records().iter().all(|r| r.enabled));
        assert!(selector.records().iter().all(|r| !r.explicitly_enabled));
    }

    #[test]
    fn test_default_off_operator_scenario() {
        let mut rng = StdRng::seed_from_u64(1);

        let mut smart = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Uniform);
        activate_all(&mut smart);
        for _ in 0..100 {
            assert_ne!(smart.select(&mut rng).unwrap().operator, "scramble");
        }

        let mut all = selector(DefaultEnabling::All, SelectionStrategy::Uniform);
        activate_all(&mut all);
        let picked = (0..100).any(|_| all.select(&mut rng).unwrap().operator == "scramble");
        assert!(picked);
        assert_eq!(
            all.record("flip").map(|r| r.tokens),
            smart.record("flip").map(|r| r.tokens)
        );
    }

    #[test]
    fn test_policy_change_drops_implicit_records() {
        let mut selector = selector(DefaultEnabling::All, SelectionStrategy::Histogram);
        assert!(selector.record("scramble").is_some());

        selector
            .force_default_enabling("test", DefaultEnabling::DefaultOn, CATEGORIES)
            .unwrap();
        assert!(selector.record("scramble").is_none());
        assert!(selector.record("flip").is_some());
    }

    #[test]
    fn test_explicit_decisions_survive_policy() {
        let registry = {
            use crate::evolution::bitstring::standard_registry;
            standard_registry()
        };
        let config = OperatorsConfig {
            default_enabling: DefaultEnabling::None,
            overrides: vec![
                OperatorOverride {
                    name: "flip".into(),
                    enabled: true,
                },
                OperatorOverride {
                    name: "xover".into(),
                    enabled: false,
                },
                OperatorOverride {
                    name: "missing".into(),
                    enabled: true,
                },
            ],
            ..Default::default()
        };
        let mut selector = OperatorSelector::new(&config, 4);
        selector.apply_overrides(&config.overrides, &registry);
        selector
            .apply_default_enabling("test", registry.categories())
            .unwrap();
        assert!(selector.record("missing").is_none());

        selector
            .force_default_enabling("test", DefaultEnabling::All, registry.categories())
            .unwrap();
        assert_eq!(selector.record("xover").map(|r| r.enabled), Some(false));
        assert_eq!(selector.record("scramble").map(|r| r.enabled), Some(true));
        assert_eq!(selector.record("flip").map(|r| r.explicitly_enabled), Some(true));
    }

    #[test]
    fn test_no_enabled_operators_is_an_error() {
        let config = OperatorsConfig {
            default_enabling: DefaultEnabling::None,
            ..Default::default()
        };
        let mut selector = OperatorSelector::new(&config, 4);
        let err = selector
            .apply_default_enabling("bits", CATEGORIES)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoEnabledOperators(p) if p == "bits"));
    }

    #[test]
    fn test_exploration_once_per_generation_in_name_order() {
        let mut selector = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Histogram);
        let mut rng = StdRng::seed_from_u64(3);

        let first = selector.select(&mut rng).unwrap();
        assert_eq!(first, Selection { operator: "flip".into(), exploration: true });
        let second = selector.select(&mut rng).unwrap();
        assert_eq!(second.operator, "xover");
        assert!(matches!(
            selector.select(&mut rng),
            Err(SelectionError::NoSelectableOperator)
        ));

        selector.prepare_for_generation();
        assert_eq!(selector.select(&mut rng).unwrap().operator, "flip");
    }

    #[test]
    fn test_failing_operator_scenario() {
        let mut selector = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Histogram);
        let mut rng = StdRng::seed_from_u64(5);
        selector.success("xover");

        for generation in 0..3 {
            selector.prepare_for_generation();
            let mut explored = false;
            for _ in 0..4 {
                let selection = selector.select(&mut rng).unwrap();
                if selection.operator == "flip" {
                    explored = true;
                    selector.failure("flip");
                }
            }
            assert!(explored, "flip explored in generation {generation}");
        }

        let flip = selector.record("flip").unwrap();
        assert_eq!(flip.tokens, 0);
        assert!(!flip.is_selectable());
        assert!(!flip.is_explorable());

        for _ in 0..9 {
            selector.prepare_for_generation();
            for _ in 0..4 {
                assert_eq!(selector.select(&mut rng).unwrap().operator, "xover");
            }
        }
        selector.prepare_for_generation();
        assert_eq!(selector.record("flip").unwrap().tokens, 1);
        assert_eq!(selector.select(&mut rng).unwrap().operator, "flip");
    }

    #[test]
    fn test_success_activates_with_lambda_tokens() {
        let mut selector = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Histogram);
        selector.success("flip");
        let flip = selector.record("flip").unwrap();
        assert!(!flip.pseudo_deactivated);
        assert_eq!(flip.tokens, 4);
        assert!(flip.is_selectable());
    }

    #[test]
    fn test_step_accumulates_and_resets_epoch() {
        let mut selector = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Histogram);
        let mut good = CallOutcome::new("flip", 2);
        good.record_quality(Quality::VeryGood);
        good.record_quality(Quality::Bad);
        let failed = CallOutcome::new("xover", 0);

        selector.step(1, 2, &[good.clone(), failed.clone()]);
        selector.step(2, 2, &[good.clone()]);
        let flip = selector.record("flip").unwrap();
        assert_eq!(flip.quality_histogram, [1, 0, 0, 1, 0]);
        assert_eq!(flip.calls_last_generation, 1);

        selector.step(3, 2, &[good]);
        let flip = selector.record("flip").unwrap();
        assert_eq!(flip.quality_histogram, [2, 0, 0, 2, 0]);
        assert_eq!(selector.epoch_histogram(), [2, 0, 0, 2, 0]);
        let xover = selector.record("xover").unwrap();
        assert_eq!(xover.failed_calls, 0);
        assert_eq!(xover.calls_last_generation, 0);
    }

    #[test]
    fn test_dmab_tries_unexecuted_operators_first() {
        let mut selector = selector(
            DefaultEnabling::DefaultOn,
            SelectionStrategy::Dmab { kappa: 1.0 },
        );
        activate_all(&mut selector);
        let mut rng = StdRng::seed_from_u64(9);

        assert_eq!(selector.select(&mut rng).unwrap().operator, "flip");
        assert_eq!(selector.select(&mut rng).unwrap().operator, "xover");

        let mut call = CallOutcome::new("flip", 1);
        call.record_reward(1.0);
        selector.step(1, 1, &[call]);
        assert_eq!(selector.record("flip").unwrap().bandit.executions, 1);

        selector.prepare_for_generation();
        assert_eq!(selector.select(&mut rng).unwrap().operator, "xover");
    }

    #[test]
    fn test_pdmab_spreads_picks_within_a_generation() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut rewarded = |strategy: SelectionStrategy| {
            let mut selector = selector(DefaultEnabling::DefaultOn, strategy);
            activate_all(&mut selector);
            for generation in 1..=3 {
                let mut flip = CallOutcome::new("flip", 1);
                flip.record_reward(0.6);
                let mut xover = CallOutcome::new("xover", 1);
                xover.record_reward(0.5);
                selector.step(generation, 1, &[flip, xover]);
            }
            selector.prepare_for_generation();
            (0..6)
                .filter(|_| selector.select(&mut rng).unwrap().operator == "xover")
                .count()
        };

        // Greedy DMAB keeps picking the better arm; PDMAB turns to the
        // other one once the pending picks pile up
        assert_eq!(rewarded(SelectionStrategy::Dmab { kappa: 200.0 }), 0);
        assert!(rewarded(SelectionStrategy::Pdmab { kappa: 200.0 }) > 0);
    }

    #[test]
    fn test_state_round_trip_keeps_tokens() {
        let mut selector = selector(DefaultEnabling::DefaultOn, SelectionStrategy::Histogram);
        selector.failure("flip");
        let state = selector.state();
        let json = serde_json::to_string(&state).unwrap();
        let restored_state: SelectorState = serde_json::from_str(&json).unwrap();
        let restored =
            OperatorSelector::from_state(restored_state, &OperatorsConfig::default(), 4);
        assert_eq!(restored.records(), selector.records());
    }

    proptest! {
        #[test]
        fn prop_zero_token_operators_never_selected(
            seed in any::<u64>(),
            failures in proptest::collection::vec(0usize..3, 0..30),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut selector = selector(DefaultEnabling::All, SelectionStrategy::Histogram);
            selector.success("xover");
            for pick in failures {
                let name = CATEGORIES[pick].0;
                selector.failure(name);
                if let Ok(selection) = selector.select(&mut rng) {
                    let record = selector.record(&selection.operator).unwrap();
                    prop_assert!(record.tokens > 0);
                    prop_assert!(record.enabled);
                }
            }
        }

        #[test]
        fn prop_token_economy_over_generations(
            seed in any::<u64>(),
            generations in proptest::collection::vec(
                proptest::collection::vec(any::<bool>(), 0..8),
                1..25,
            ),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut selector = selector(DefaultEnabling::All, SelectionStrategy::Histogram);
            let ceiling = 4u32.max(OperatorsConfig::default().initial_tokens);
            let snapshot = |s: &OperatorSelector| -> Vec<(u32, bool)> {
                s.records().iter().map(|r| (r.tokens, r.pseudo_deactivated)).collect()
            };

            for outcomes in generations {
                let before = snapshot(&selector);
                selector.prepare_for_generation();
                for ((_, was_pseudo), record) in before.iter().zip(selector.records()) {
                    prop_assert!(*was_pseudo || !record.pseudo_deactivated);
                    prop_assert!(record.tokens <= ceiling);
                }

                for succeeded in outcomes {
                    let before = snapshot(&selector);
                    let Ok(selection) = selector.select(&mut rng) else {
                        break;
                    };
                    let record = selector.record(&selection.operator).unwrap();
                    prop_assert!(record.enabled);
                    prop_assert!(record.tokens > 0);
                    prop_assert_eq!(selection.exploration, record.pseudo_deactivated);

                    if succeeded {
                        selector.success(&selection.operator);
                    } else {
                        selector.failure(&selection.operator);
                    }

                    for ((tokens, was_pseudo), record) in before.iter().zip(selector.records()) {
                        prop_assert!(*was_pseudo || !record.pseudo_deactivated);
                        prop_assert!(record.tokens <= ceiling);
                        let activated = *was_pseudo && !record.pseudo_deactivated;
                        if activated {
                            prop_assert!(succeeded);
                            prop_assert_eq!(record.tokens, 4);
                        } else {
                            prop_assert!(record.tokens <= *tokens);
                        }
                    }
                }
            }
        }
    }
}

//! Per-operator performance ledger and per-invocation call outcomes.

use serde::{Deserialize, Serialize};

use super::bandit::BanditStats;

/// Quality bucket of an evaluated child, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quality {
    VeryGood,
    Good,
    Normal,
    Bad,
    VeryBad,
}

impl Quality {
    /// All buckets, best first. Histogram slots follow this order.
    pub const ALL: [Quality; 5] = [
        Quality::VeryGood,
        Quality::Good,
        Quality::Normal,
        Quality::Bad,
        Quality::VeryBad,
    ];

    /// Histogram slot of this bucket.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Roulette weight of one child in this bucket.
    pub fn weight(self) -> f64 {
        match self {
            Quality::VeryGood => 5.0,
            Quality::Good => 4.0,
            Quality::Normal => 3.0,
            Quality::Bad => 2.0,
            Quality::VeryBad => 1.0,
        }
    }
}

/// Lowest roulette weight an operator can have.
pub const MIN_WEIGHT: f64 = 0.1;

/// Performance record of one registered operator.
///
/// Histogram and failure counters cover the last completed epoch only; the
/// token economy and the pseudo-deactivation flag persist for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRecord {
    /// Operator name, unique within a registry.
    pub name: String,
    /// Whether the operator may currently be selected.
    pub enabled: bool,
    /// True when `enabled` was set by the user rather than by a category rule.
    pub explicitly_enabled: bool,
    /// Children per quality bucket, indexed by [`Quality::index`].
    pub quality_histogram: [u64; 5],
    /// Invocations that produced no valid child.
    pub failed_calls: u64,
    /// True until the operator produces its first valid child.
    pub pseudo_deactivated: bool,
    /// Remaining chances before the operator is skipped.
    pub tokens: u32,
    /// Generations spent pseudo-deactivated without tokens.
    pub generations_since_last_token: u32,
    /// Invocations during the last generation.
    #[serde(default)]
    pub calls_last_generation: u32,
    /// Selections not yet accounted for by the bandit update.
    #[serde(skip)]
    pub pending: u32,
    /// Whether the pseudo-deactivated operator was already explored this generation.
    #[serde(skip)]
    pub explored_this_generation: bool,
    /// Dynamic multi-armed bandit statistics.
    #[serde(default)]
    pub bandit: BanditStats,
    /// Operator-specific parameters, saved and restored through the operator hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl OperatorRecord {
    /// Fresh record: disabled, pseudo-deactivated, with `initial_tokens` tokens.
    pub fn new(name: impl Into<String>, initial_tokens: u32) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            explicitly_enabled: false,
            quality_histogram: [0; 5],
            failed_calls: 0,
            pseudo_deactivated: true,
            tokens: initial_tokens,
            generations_since_last_token: 0,
            calls_last_generation: 0,
            pending: 0,
            explored_this_generation: false,
            bandit: BanditStats::default(),
            parameters: None,
        }
    }

    /// Count one child in `quality`.
    pub fn record_quality(&mut self, quality: Quality) {
        self.quality_histogram[quality.index()] += 1;
    }

    /// Count one invocation without valid children.
    pub fn record_failure(&mut self) {
        self.failed_calls += 1;
    }

    /// Zero the epoch counters.
    pub fn reset_epoch(&mut self) {
        self.quality_histogram = [0; 5];
        self.failed_calls = 0;
    }

    pub fn is_selectable(&self) -> bool {
        self.enabled && !self.pseudo_deactivated && self.tokens > 0
    }

    /// Pseudo-deactivated but still allowed a trial.
    pub fn is_explorable(&self) -> bool {
        self.enabled && self.pseudo_deactivated && self.tokens > 0
    }

    /// Children counted in the histogram.
    pub fn evaluated_children(&self) -> u64 {
        self.quality_histogram.iter().sum()
    }

    /// Roulette weight derived from the last epoch.
    ///
    /// Mean bucket weight over children and failed calls (a failure weighs 0).
    /// An operator without data weighs as a `Normal` child.
    pub fn histogram_weight(&self) -> f64 {
        let samples = self.evaluated_children() + self.failed_calls;
        if samples == 0 {
            return Quality::Normal.weight();
        }
        let total: f64 = Quality::ALL
            .iter()
            .map(|q| q.weight() * self.quality_histogram[q.index()] as f64)
            .sum();
        (total / samples as f64).max(MIN_WEIGHT)
    }

    /// Take one token after a failed invocation. Never goes below zero.
    pub fn consume_token(&mut self) {
        self.tokens = self.tokens.saturating_sub(1);
    }

    /// Leave pseudo-deactivation for good.
    pub fn activate(&mut self, tokens: u32) {
        self.pseudo_deactivated = false;
        self.tokens = tokens;
        self.generations_since_last_token = 0;
    }

    /// Advance the replenishment counter of an exhausted pseudo-deactivated
    /// operator. Returns true when a token was granted.
    pub fn tick_replenishment(&mut self, interval: u32) -> bool {
        if !self.pseudo_deactivated || self.tokens > 0 {
            return false;
        }
        self.generations_since_last_token += 1;
        if self.generations_since_last_token >= interval {
            self.generations_since_last_token = 0;
            self.tokens += 1;
            return true;
        }
        false
    }
}

/// Index of a [`CallOutcome`] within the generation that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub usize);

/// Result of one operator invocation during the current generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    /// Operator that was invoked.
    pub operator: String,
    /// Children produced before evaluation.
    pub valid_children: u32,
    /// Children that survived evaluation.
    pub evaluated_children: u32,
    /// Per-bucket child counts, indexed by [`Quality::index`].
    pub qualities: [u32; 5],
    /// Rank rewards of the children, in [0, 1].
    pub rewards: Vec<f64>,
}

impl CallOutcome {
    pub fn new(operator: impl Into<String>, valid_children: u32) -> Self {
        Self {
            operator: operator.into(),
            valid_children,
            ..Default::default()
        }
    }

    /// Count a child that survived evaluation.
    pub fn record_evaluated(&mut self) {
        debug_assert!(self.evaluated_children < self.valid_children);
        self.evaluated_children = (self.evaluated_children + 1).min(self.valid_children);
    }

    pub fn record_quality(&mut self, quality: Quality) {
        self.qualities[quality.index()] += 1;
    }

    pub fn record_reward(&mut self, reward: f64) {
        self.rewards.push(reward);
    }

    /// Whether the invocation produced any valid child.
    pub fn succeeded(&self) -> bool {
        self.valid_children > 0
    }

    /// Best reward among the children, if any was rewarded.
    pub fn max_reward(&self) -> Option<f64> {
        self.rewards.iter().copied().reduce(f64::max)
    }

    /// Number of bucket increments recorded.
    pub fn quality_count(&self) -> u32 {
        self.qualities.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_record_is_not_selectable() {
        let mut record = OperatorRecord::new("flip", 3);
        assert!(!record.is_selectable());
        record.enabled = true;
        assert!(!record.is_selectable());
        assert!(record.is_explorable());
        record.activate(20);
        assert!(record.is_selectable());
        assert_eq!(record.tokens, 20);
    }

    #[test]
    fn test_zero_tokens_blocks_selection() {
        let mut record = OperatorRecord::new("flip", 1);
        record.enabled = true;
        record.activate(1);
        record.consume_token();
        assert_eq!(record.tokens, 0);
        assert!(!record.is_selectable());
        record.consume_token();
        assert_eq!(record.tokens, 0);
    }

    #[test]
    fn test_reset_epoch_idempotent() {
        let mut record = OperatorRecord::new("flip", 3);
        record.record_quality(Quality::Good);
        record.record_quality(Quality::VeryBad);
        record.record_failure();

        record.reset_epoch();
        let once = record.clone();
        record.reset_epoch();
        assert_eq!(record, once);
        assert_eq!(record.quality_histogram, [0; 5]);
        assert_eq!(record.failed_calls, 0);
    }

    #[test]
    fn test_histogram_weight() {
        let mut record = OperatorRecord::new("flip", 3);
        assert_eq!(record.histogram_weight(), 3.0);

        record.record_quality(Quality::VeryGood);
        record.record_quality(Quality::Bad);
        assert!((record.histogram_weight() - 3.5).abs() < 1e-12);

        record.reset_epoch();
        record.record_failure();
        assert_eq!(record.histogram_weight(), MIN_WEIGHT);
    }

    #[test]
    fn test_replenishment_interval() {
        let mut record = OperatorRecord::new("scramble", 0);
        for _ in 0..9 {
            assert!(!record.tick_replenishment(10));
        }
        assert!(record.tick_replenishment(10));
        assert_eq!(record.tokens, 1);
        assert!(!record.tick_replenishment(10));
        assert_eq!(record.generations_since_last_token, 0);
    }

    #[test]
    fn test_call_outcome_rewards() {
        let mut call = CallOutcome::new("xover", 2);
        assert!(call.succeeded());
        assert_eq!(call.max_reward(), None);
        call.record_evaluated();
        call.record_evaluated();
        assert_eq!(call.evaluated_children, 2);
        call.record_reward(0.25);
        call.record_reward(0.75);
        assert_eq!(call.max_reward(), Some(0.75));
    }

    proptest! {
        #[test]
        fn prop_tokens_never_increase_without_replenishment(
            initial in 0u32..8,
            failures in 0usize..20,
        ) {
            let mut record = OperatorRecord::new("op", initial);
            let mut previous = record.tokens;
            for _ in 0..failures {
                record.consume_token();
                prop_assert!(record.tokens <= previous);
                previous = record.tokens;
            }
        }
    }
}

//! Dynamic multi-armed bandit statistics and roulette draws.
//!
//! Each operator is an arm scored with UCB1. Rewards reaching an arm are the
//! discounted mean of its recent best-child rewards, and a Page-Hinkley test
//! on that signal detects when the landscape has changed enough to forget
//! everything learned so far.

use std::collections::VecDeque;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// UCB1 exploration constant.
pub const EXPLORATION: f64 = 1.4;
/// Number of past rewards kept per operator.
pub const WINDOW_SIZE: usize = 10;
/// Geometric discount applied to the sorted reward window.
pub const WINDOW_DISCOUNT: f64 = 0.7;
/// Page-Hinkley tolerance.
pub const PH_DELTA: f64 = 0.15;
/// Page-Hinkley alarm threshold.
pub const PH_LAMBDA: f64 = 1.0;

/// Bandit state of one operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditStats {
    /// Rewards received since the last reset.
    pub executions: u64,
    /// Running mean of those rewards.
    pub mean_reward: f64,
    /// Page-Hinkley cumulative deviation.
    pub mean_deviation: f64,
    /// Maximum of the cumulative deviation.
    pub max_deviation: f64,
    /// Sliding window of instant rewards, oldest first. Survives resets.
    pub past_rewards: VecDeque<f64>,
}

impl BanditStats {
    /// Forget the learned statistics. The reward window is kept.
    pub fn reset(&mut self) {
        self.executions = 0;
        self.mean_reward = 0.0;
        self.mean_deviation = 0.0;
        self.max_deviation = 0.0;
    }

    /// Push an instant reward into the window and return the discounted mean
    /// of the window sorted best first.
    pub fn push_instant_reward(&mut self, reward: f64) -> f64 {
        self.past_rewards.push_back(reward);
        while self.past_rewards.len() > WINDOW_SIZE {
            self.past_rewards.pop_front();
        }
        let mut sorted: Vec<f64> = self.past_rewards.iter().copied().collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        discounted_mean(&sorted, WINDOW_DISCOUNT)
    }

    /// Feed a reward to the running mean and the Page-Hinkley test.
    ///
    /// Returns true when the test raises an alarm.
    pub fn reward(&mut self, reward: f64) -> bool {
        self.mean_reward =
            (self.mean_reward * self.executions as f64 + reward) / (self.executions + 1) as f64;
        self.executions += 1;
        self.mean_deviation += self.mean_reward - reward + PH_DELTA;
        self.max_deviation = self.max_deviation.max(self.mean_deviation);
        self.max_deviation - self.mean_deviation > PH_LAMBDA
    }

    /// UCB1 score given the executions of all selectable operators.
    ///
    /// An arm never rewarded scores infinity.
    pub fn ucb_score(&self, total_executions: u64) -> f64 {
        self.pending_ucb_score(total_executions, 0, 0)
    }

    /// UCB1 score counting selections not yet rewarded as executions.
    ///
    /// `total_pending` covers all selectable operators, `pending` this one.
    /// The score of an arm drops each time it is picked within a generation.
    pub fn pending_ucb_score(&self, total_executions: u64, total_pending: u64, pending: u64) -> f64 {
        if self.executions == 0 {
            return f64::INFINITY;
        }
        let total = (total_executions + total_pending).max(1) as f64;
        let tried = (self.executions + pending) as f64;
        self.mean_reward + EXPLORATION * (total.ln() / tried).sqrt()
    }
}

/// Weighted mean of `values` with weights 1, d, d^2, ...
pub fn discounted_mean(values: &[f64], discount: f64) -> f64 {
    let mut weight = 1.0;
    let mut weights = 0.0;
    let mut sum = 0.0;
    for value in values {
        sum += value * weight;
        weights += weight;
        weight *= discount;
    }
    if weights > 0.0 { sum / weights } else { 0.0 }
}

/// Fitness-proportionate draw over non-negative weights.
///
/// Falls back to a uniform draw when every weight is zero. Returns `None`
/// only for an empty slice.
pub fn roulette<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let total: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    if !(total > 0.0) || !total.is_finite() {
        return Some(rng.gen_range(0..weights.len()));
    }

    let target = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (i, weight) in weights.iter().enumerate() {
        cumulative += weight.max(0.0);
        if target < cumulative {
            return Some(i);
        }
    }
    Some(weights.len() - 1)
}

/// Roulette over scores normalized by their maximum and raised to `kappa`.
///
/// A large `kappa` approaches a greedy choice, zero gives a uniform draw.
pub fn kappa_roulette<R: Rng + ?Sized>(scores: &[f64], kappa: f64, rng: &mut R) -> Option<usize> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() && max > 0.0 {
        // Unexplored arms win outright
        let best: Vec<usize> = (0..scores.len())
            .filter(|&i| scores[i] == f64::INFINITY)
            .collect();
        return best.choose(rng).copied();
    }
    if !(max > 0.0) {
        return roulette(&vec![0.0; scores.len()], rng);
    }
    let weights: Vec<f64> = scores
        .iter()
        .map(|s| (s.max(0.0) / max).powf(kappa))
        .collect();
    roulette(&weights, rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discounted_mean() {
        assert_eq!(discounted_mean(&[], 0.7), 0.0);
        assert_eq!(discounted_mean(&[0.4], 0.7), 0.4);
        let mean = discounted_mean(&[1.0, 0.0], 0.5);
        assert!((mean - 1.0 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut stats = BanditStats::default();
        for i in 0..25 {
            stats.push_instant_reward(i as f64 / 25.0);
        }
        assert_eq!(stats.past_rewards.len(), WINDOW_SIZE);
        assert_eq!(stats.past_rewards.front().copied(), Some(15.0 / 25.0));
    }

    #[test]
    fn test_page_hinkley_alarm_on_rise() {
        let mut stats = BanditStats::default();
        let mut alarm = false;
        for _ in 0..20 {
            alarm |= stats.reward(1.0);
        }
        assert!(!alarm);
        for _ in 0..20 {
            if stats.reward(0.0) {
                alarm = true;
                break;
            }
        }
        assert!(!alarm);

        let mut stats = BanditStats::default();
        for _ in 0..5 {
            stats.reward(0.0);
        }
        let mut alarm = false;
        for _ in 0..20 {
            if stats.reward(1.0) {
                alarm = true;
                break;
            }
        }
        assert!(alarm);
    }

    #[test]
    fn test_reset_keeps_window() {
        let mut stats = BanditStats::default();
        let r = stats.push_instant_reward(0.5);
        stats.reward(r);
        stats.reset();
        assert_eq!(stats.executions, 0);
        assert_eq!(stats.mean_reward, 0.0);
        assert_eq!(stats.past_rewards.len(), 1);
        assert_eq!(stats.ucb_score(10), f64::INFINITY);
    }

    #[test]
    fn test_pending_selections_lower_the_score() {
        let mut stats = BanditStats::default();
        stats.reward(0.5);
        stats.reward(0.5);
        assert_eq!(stats.pending_ucb_score(8, 0, 0), stats.ucb_score(8));

        let idle = stats.pending_ucb_score(8, 3, 0);
        let picked_once = stats.pending_ucb_score(8, 3, 1);
        let picked_twice = stats.pending_ucb_score(8, 3, 2);
        assert!(idle > picked_once);
        assert!(picked_once > picked_twice);
        assert!(picked_twice > stats.mean_reward);
        assert_eq!(BanditStats::default().pending_ucb_score(8, 3, 1), f64::INFINITY);
    }

    #[test]
    fn test_roulette_respects_zero_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let i = roulette(&[0.0, 2.0, 0.0], &mut rng);
            assert_eq!(i, Some(1));
        }
        assert_eq!(roulette(&[], &mut rng), None);
    }

    #[test]
    fn test_kappa_roulette_greedy_limit() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut hits = 0;
        for _ in 0..500 {
            if kappa_roulette(&[0.5, 1.0], 50.0, &mut rng) == Some(1) {
                hits += 1;
            }
        }
        assert!(hits > 490);
    }
}

//! Self-adaptation of the endogenous parameters.
//!
//! Sigma is the mutation strength passed to every operator invocation and
//! tau the tournament size of parent selection. At the end of each epoch
//! both move toward a target derived from the quality histogram summed over
//! every operator; `inertia` is the weight kept by the previous value.

use serde::{Deserialize, Serialize};

use crate::schema::AdaptationConfig;

use super::ledger::Quality;

/// Sigma target after an epoch with at least one very good child per generation.
pub const SIGMA_HIGH: f64 = 0.99;
/// Sigma target after an epoch with few good children.
pub const SIGMA_LOW: f64 = 0.01;
/// Good children per generation, as a share of lambda, below which sigma drops.
const GOOD_SHARE: f64 = 0.1;

/// Current sigma and tau of a population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Endogenous {
    pub sigma: f64,
    pub tau: f64,
}

impl Endogenous {
    pub fn new(config: &AdaptationConfig, selection_pressure: f64) -> Self {
        Self {
            sigma: config.sigma,
            tau: selection_pressure.max(1.0),
        }
    }

    /// Move sigma and tau after an epoch of `epoch_length` generations.
    pub fn adapt(
        &mut self,
        config: &AdaptationConfig,
        histogram: &[u64; 5],
        epoch_length: u64,
        lambda: usize,
    ) {
        let sigma = sigma_target(self.sigma, histogram, epoch_length, lambda);
        let tau = tau_target(self.tau, histogram, config.tau_min, config.tau_max);
        self.sigma = blend(config.inertia, self.sigma, sigma).clamp(0.0, 1.0);
        self.tau = blend(config.inertia, self.tau, tau).clamp(config.tau_min, config.tau_max);
    }
}

fn blend(inertia: f64, previous: f64, target: f64) -> f64 {
    inertia * previous + (1.0 - inertia) * target
}

/// Sigma the population should move toward.
pub fn sigma_target(current: f64, histogram: &[u64; 5], epoch_length: u64, lambda: usize) -> f64 {
    let generations = epoch_length.max(1) as f64;
    let very_good = histogram[Quality::VeryGood.index()] as f64 / generations;
    let good = histogram[Quality::Good.index()] as f64 / generations;

    if very_good >= 1.0 {
        SIGMA_HIGH
    } else if good <= GOOD_SHARE * lambda as f64 {
        SIGMA_LOW
    } else {
        current
    }
}

/// Tau the population should move toward.
///
/// Any very good child pushes to `tau_max`; otherwise good children halve the
/// distance to `tau_min`, and only bad children fall back to it.
pub fn tau_target(current: f64, histogram: &[u64; 5], tau_min: f64, tau_max: f64) -> f64 {
    let count = |q: Quality| histogram[q.index()];
    if count(Quality::VeryGood) > 0 {
        tau_max
    } else if count(Quality::Good) > 0 {
        tau_min + (current - tau_min) / 2.0
    } else if count(Quality::Bad) + count(Quality::VeryBad) > 0 {
        tau_min
    } else {
        current
    }
}

//! Pareto front levels and crowding strength of multi-objective populations.
//!
//! Every fitness component is an objective to maximize. Level 0 is the
//! non-dominated front; level `k` is non-dominated once levels below `k` are
//! removed. Within a front, the strength of a point is the volume of the box
//! spanned by its nearest neighbors on each objective, infinite at the edges.

use std::collections::BTreeMap;

use super::candidate::{Candidate, CandidateId, Genotype};

/// Front position of one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParetoRank {
    /// Front index, 0 = non-dominated.
    pub level: usize,
    /// Crowding volume within the front; larger is more isolated.
    pub strength: f64,
}

impl Default for ParetoRank {
    fn default() -> Self {
        Self::UNRANKED
    }
}

impl ParetoRank {
    /// Rank of a candidate without fitness.
    pub const UNRANKED: ParetoRank = ParetoRank {
        level: usize::MAX,
        strength: 0.0,
    };
}

/// `a` is nowhere worse than `b` and better on at least one objective.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut better = false;
    for (x, y) in a.iter().zip(b) {
        if x < y {
            return false;
        }
        better |= x > y;
    }
    better
}

/// Non-dominated sorting: the front level of each point.
pub fn front_levels(points: &[&[f64]]) -> Vec<usize> {
    let n = points.len();
    let mut dominated_by = vec![0usize; n];
    let mut dominates_list: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in 0..n {
            if i != j && dominates(points[i], points[j]) {
                dominates_list[i].push(j);
                dominated_by[j] += 1;
            }
        }
    }

    let mut levels = vec![0usize; n];
    let mut front: Vec<usize> = (0..n).filter(|&i| dominated_by[i] == 0).collect();
    let mut level = 0;
    while !front.is_empty() {
        let mut next = Vec::new();
        for &i in &front {
            levels[i] = level;
            for &j in &dominates_list[i] {
                dominated_by[j] -= 1;
                if dominated_by[j] == 0 {
                    next.push(j);
                }
            }
        }
        front = next;
        level += 1;
    }
    levels
}

/// Crowding strength of each point among the points of the same level.
///
/// An equal value on an objective counts as a neighbor at distance zero on
/// the side whose nearest neighbor is still farther.
pub fn crowding_strength(points: &[&[f64]], levels: &[usize]) -> Vec<f64> {
    (0..points.len())
        .map(|i| {
            let objectives = points[i].len();
            let mut below: Vec<Option<f64>> = vec![None; objectives];
            let mut above: Vec<Option<f64>> = vec![None; objectives];

            for j in (0..points.len()).filter(|&j| j != i && levels[j] == levels[i]) {
                for k in 0..objectives {
                    let Some(&other) = points[j].get(k) else {
                        continue;
                    };
                    let difference = other - points[i][k];
                    let side = if difference < 0.0 {
                        &mut below[k]
                    } else if difference > 0.0 {
                        &mut above[k]
                    } else if above[k].is_none_or(|a| below[k].is_some_and(|b| a > b)) {
                        &mut above[k]
                    } else {
                        &mut below[k]
                    };
                    let distance = difference.abs();
                    if (*side).is_none_or(|d| distance < d) {
                        *side = Some(distance);
                    }
                }
            }

            below
                .iter()
                .zip(&above)
                .try_fold(1.0, |volume, (&b, &a)| Some(volume * (b? + a?)))
                .unwrap_or(f64::INFINITY)
        })
        .collect()
}

/// Recompute the Pareto rank of every candidate on its scaled fitness.
///
/// Dead and unevaluated candidates are [`ParetoRank::UNRANKED`].
pub fn assign_pareto_ranks<G: Genotype>(candidates: &mut BTreeMap<CandidateId, Candidate<G>>) {
    let ranked: Vec<(CandidateId, Vec<f64>)> = candidates
        .values()
        .filter(|c| c.is_alive())
        .filter_map(|c| c.scaled_fitness.as_ref().map(|f| (c.id, f.values().to_vec())))
        .collect();
    let points: Vec<&[f64]> = ranked.iter().map(|(_, v)| v.as_slice()).collect();
    let levels = front_levels(&points);
    let strengths = crowding_strength(&points, &levels);

    for candidate in candidates.values_mut() {
        candidate.pareto = ParetoRank::UNRANKED;
    }
    for (((id, _), level), strength) in ranked.iter().zip(levels).zip(strengths) {
        if let Some(candidate) = candidates.get_mut(id) {
            candidate.pareto = ParetoRank { level, strength };
        }
    }
}

//! Quality buckets and rank rewards of freshly evaluated children.

use std::cmp::Ordering;

use super::ledger::Quality;

/// Bucket of a child given the population references.
///
/// `compare(a, b)` returns `Greater` when `a` performs better than `b`.
/// `best` and `worst` are the references of the previous commit; a child
/// equal to or better than `best` is `VeryGood`, which is checked first.
/// `references` are the child's parents, or a random live sample for
/// parentless children. Improving over all of them gives `Good`, over none
/// gives `Bad`.
pub fn assign_quality<T, F>(
    child: &T,
    best: Option<&T>,
    worst: Option<&T>,
    references: &[&T],
    compare: F,
) -> Quality
where
    F: Fn(&T, &T) -> Ordering,
{
    if let Some(best) = best
        && compare(child, best) != Ordering::Less
    {
        return Quality::VeryGood;
    }
    if let Some(worst) = worst
        && compare(child, worst) != Ordering::Greater
    {
        return Quality::VeryBad;
    }
    if references.is_empty() {
        return Quality::Normal;
    }

    let improved = references
        .iter()
        .filter(|r| compare(child, **r) == Ordering::Greater)
        .count();
    if improved == references.len() {
        Quality::Good
    } else if improved == 0 {
        Quality::Bad
    } else {
        Quality::Normal
    }
}

/// Rank reward of every item of an already sorted slice, best first.
///
/// Ties (per `tied`) form one equivalence class; class `k` (0 = best) of `n`
/// receives `(n - 1 - k) / (n - 1)`. Returns `None` when everything ties,
/// in which case no reward is distributed.
pub fn rank_rewards<T, F>(sorted: &[T], tied: F) -> Option<Vec<f64>>
where
    F: Fn(&T, &T) -> bool,
{
    let mut classes = Vec::with_capacity(sorted.len());
    let mut class = 0usize;
    for (i, item) in sorted.iter().enumerate() {
        if i > 0 && !tied(&sorted[i - 1], item) {
            class += 1;
        }
        classes.push(class);
    }

    let nb_classes = class + 1;
    if sorted.is_empty() || nb_classes == 1 {
        return None;
    }
    let span = (nb_classes - 1) as f64;
    Some(
        classes
            .into_iter()
            .map(|k| (nb_classes - 1 - k) as f64 / span)
            .collect(),
    )
}

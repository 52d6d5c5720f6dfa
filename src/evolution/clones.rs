//! Clone detection and clone fitness scaling.
//!
//! Two live, evaluated candidates are clones when their normalized phenotypes
//! hash to the same value and are equal. Within a group the master is the
//! oldest candidate (lowest birth, then lowest id); the i-th clone after it
//! gets its raw fitness multiplied by `factor^i`. Raw fitness values are
//! non-negative, which the evaluation pool enforces.
//!
//! [`GroupMembership`] is a standalone utility for problems whose candidates
//! are evaluated as members of groups; no population kind drives it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::candidate::{Candidate, CandidateId, Fitness, Genotype};

/// Scaling factor of the clone at position `rank` (the master is rank 0).
pub fn clone_factor(base: f64, rank: usize) -> f64 {
    if rank == 0 {
        1.0
    } else {
        base.powi(i32::try_from(rank).unwrap_or(i32::MAX))
    }
}

/// Groups of clones, each ordered master first. Singletons are not returned.
pub fn detect_clone_groups<G: Genotype>(
    candidates: &BTreeMap<CandidateId, Candidate<G>>,
) -> Vec<Vec<CandidateId>> {
    let mut buckets: HashMap<u64, Vec<(String, Vec<&Candidate<G>>)>> = HashMap::new();

    for candidate in candidates.values() {
        if !candidate.is_alive() || !candidate.is_evaluated() {
            continue;
        }
        let phenotype = candidate.genome.normalized_phenotype();
        let hash = super::candidate::phenotype_hash(&phenotype);
        let bucket = buckets.entry(hash).or_default();
        match bucket.iter_mut().find(|(p, _)| *p == phenotype) {
            Some((_, members)) => members.push(candidate),
            None => bucket.push((phenotype, vec![candidate])),
        }
    }

    let mut groups: Vec<Vec<CandidateId>> = buckets
        .into_values()
        .flatten()
        .filter(|(_, members)| members.len() > 1)
        .map(|(_, mut members)| {
            members.sort_by_key(|c| (c.birth, c.id));
            members.into_iter().map(|c| c.id).collect()
        })
        .collect();
    groups.sort();
    groups
}

/// Rescale every live evaluated candidate. Returns the number of clones found.
pub fn scale_clones<G: Genotype>(
    candidates: &mut BTreeMap<CandidateId, Candidate<G>>,
    factor: f64,
) -> usize {
    let groups = detect_clone_groups(candidates);

    for candidate in candidates.values_mut() {
        if candidate.is_evaluated() {
            candidate.set_clone_factor(1.0);
        }
    }

    let mut clones = 0;
    for group in &groups {
        log::trace!("Clone group of {} led by {}", group.len(), group[0]);
        for (rank, id) in group.iter().enumerate().skip(1) {
            if let Some(candidate) = candidates.get_mut(id) {
                candidate.set_clone_factor(clone_factor(factor, rank));
                clones += 1;
            }
        }
    }
    clones
}

/// Membership of individuals in groups, with best-contribution fitness adoption.
///
/// Each individual adopts the best fitness among the groups containing it.
/// Adopted values are recomputed on every membership or fitness change.
#[derive(Debug, Clone, Default)]
pub struct GroupMembership {
    members: BTreeMap<CandidateId, BTreeSet<CandidateId>>,
    group_fitness: BTreeMap<CandidateId, Fitness>,
    adopted: BTreeMap<CandidateId, Fitness>,
}

impl GroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the members of `group`.
    pub fn set_members(&mut self, group: CandidateId, members: impl IntoIterator<Item = CandidateId>) {
        self.members.insert(group, members.into_iter().collect());
        self.recompute();
    }

    pub fn add_member(&mut self, group: CandidateId, individual: CandidateId) {
        self.members.entry(group).or_default().insert(individual);
        self.recompute();
    }

    pub fn remove_member(&mut self, group: CandidateId, individual: CandidateId) {
        if let Some(members) = self.members.get_mut(&group) {
            members.remove(&individual);
        }
        self.recompute();
    }

    pub fn remove_group(&mut self, group: CandidateId) {
        self.members.remove(&group);
        self.group_fitness.remove(&group);
        self.recompute();
    }

    pub fn set_group_fitness(&mut self, group: CandidateId, fitness: Fitness) {
        self.group_fitness.insert(group, fitness);
        self.recompute();
    }

    /// Groups containing `individual`, in id order.
    pub fn groups_of(&self, individual: CandidateId) -> Vec<CandidateId> {
        self.members
            .iter()
            .filter(|(_, members)| members.contains(&individual))
            .map(|(group, _)| *group)
            .collect()
    }

    pub fn members_of(&self, group: CandidateId) -> impl Iterator<Item = CandidateId> + '_ {
        self.members.get(&group).into_iter().flatten().copied()
    }

    /// Best fitness among the evaluated groups containing `individual`.
    pub fn adopted_fitness(&self, individual: CandidateId) -> Option<&Fitness> {
        self.adopted.get(&individual)
    }

    fn recompute(&mut self) {
        self.adopted.clear();
        for (group, members) in &self.members {
            let Some(fitness) = self.group_fitness.get(group) else {
                continue;
            };
            for individual in members {
                match self.adopted.get(individual) {
                    Some(current) if !fitness.is_better_than(current) => {}
                    _ => {
                        self.adopted.insert(*individual, fitness.clone());
                    }
                }
            }
        }
    }
}

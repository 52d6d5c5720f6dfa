//! Lineage records attached to every candidate.

use serde::{Deserialize, Serialize};

use super::candidate::CandidateId;
use super::ledger::CallId;

/// Operator name recorded for candidates created by the seeder.
pub const SEED_OPERATOR: &str = "<seed>";

/// Which operator and parents produced a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Producing operator, or [`SEED_OPERATOR`].
    pub operator: String,
    /// Parent identifiers in the order the operator received them.
    pub parents: Vec<CandidateId>,
    /// Invocation that produced the candidate. Only valid during the
    /// generation that created it.
    #[serde(skip)]
    pub call: Option<CallId>,
}

impl Lineage {
    pub fn seed() -> Self {
        Self {
            operator: SEED_OPERATOR.to_string(),
            parents: Vec::new(),
            call: None,
        }
    }

    pub fn new(operator: impl Into<String>, parents: Vec<CandidateId>, call: CallId) -> Self {
        Self {
            operator: operator.into(),
            parents,
            call: Some(call),
        }
    }

    pub fn is_seed(&self) -> bool {
        self.operator == SEED_OPERATOR
    }

    /// Drop the reference to the generation's call outcome.
    pub fn detach_call(&mut self) {
        self.call = None;
    }
}

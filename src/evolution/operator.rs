//! Genetic operator contract and the per-run operator registry.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::schema::ConfigError;

/// Category deciding whether an operator is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorCategory {
    DefaultOn,
    DefaultOff,
}

/// Children returned by one operator invocation.
#[derive(Debug, Clone)]
pub struct OperatorOutput<G> {
    pub children: Vec<G>,
    /// False when the operator could not be applied to these parents.
    pub succeeded: bool,
}

impl<G> OperatorOutput<G> {
    pub fn success(children: Vec<G>) -> Self {
        Self {
            children,
            succeeded: true,
        }
    }

    pub fn failure() -> Self {
        Self {
            children: Vec::new(),
            succeeded: false,
        }
    }
}

/// A genetic operator that can be scheduled by the selector.
pub trait Operator<G>: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> OperatorCategory;

    /// Number of parents the operator consumes.
    fn parents_cardinality(&self) -> usize;

    fn apply(&self, parents: &[&G], rng: &mut StdRng) -> OperatorOutput<G>;

    /// Apply with the population's current mutation strength `sigma` in
    /// [0, 1]. Operators without a notion of strength ignore it.
    fn apply_with_strength(&self, parents: &[&G], _sigma: f64, rng: &mut StdRng) -> OperatorOutput<G> {
        self.apply(parents, rng)
    }

    fn has_parameters(&self) -> bool {
        false
    }

    /// Operator-specific parameters to persist.
    fn save_parameters(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore parameters written by [`Operator::save_parameters`].
    fn load_parameters(&mut self, _parameters: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
}

/// Operators available to a run, keyed by name.
pub struct OperatorRegistry<G> {
    operators: BTreeMap<String, Box<dyn Operator<G>>>,
}

impl<G> Default for OperatorRegistry<G> {
    fn default() -> Self {
        Self {
            operators: BTreeMap::new(),
        }
    }
}

impl<G> OperatorRegistry<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator. Names must be unique.
    pub fn register<O>(&mut self, operator: O) -> Result<(), ConfigError>
    where
        O: Operator<G> + 'static,
    {
        let name = operator.name().to_string();
        if self.operators.contains_key(&name) {
            return Err(ConfigError::DuplicateOperator(name));
        }
        log::debug!(
            "Registered operator {name} ({:?}, {} parents)",
            operator.category(),
            operator.parents_cardinality()
        );
        self.operators.insert(name, Box::new(operator));
        Ok(())
    }

    /// Builder-style [`OperatorRegistry::register`].
    pub fn with<O>(mut self, operator: O) -> Result<Self, ConfigError>
    where
        O: Operator<G> + 'static,
    {
        self.register(operator)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Operator<G>> {
        self.operators.get(name).map(|op| op.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Operator<G> + 'static)> {
        self.operators.get_mut(name).map(|op| op.as_mut())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Names and categories in name order.
    pub fn categories(&self) -> impl Iterator<Item = (&str, OperatorCategory)> {
        self.operators
            .iter()
            .map(|(name, op)| (name.as_str(), op.category()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str, OperatorCategory);

    impl Operator<u8> for Noop {
        fn name(&self) -> &str {
            self.0
        }
        fn category(&self) -> OperatorCategory {
            self.1
        }
        fn parents_cardinality(&self) -> usize {
            1
        }
        fn apply(&self, parents: &[&u8], _rng: &mut StdRng) -> OperatorOutput<u8> {
            OperatorOutput::success(vec![*parents[0]])
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = OperatorRegistry::new();
        registry
            .register(Noop("a", OperatorCategory::DefaultOn))
            .unwrap();
        let err = registry
            .register(Noop("a", OperatorCategory::DefaultOff))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOperator(name) if name == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_categories_in_name_order() {
        let registry = OperatorRegistry::new()
            .with(Noop("b", OperatorCategory::DefaultOff))
            .unwrap()
            .with(Noop("a", OperatorCategory::DefaultOn))
            .unwrap();
        let categories: Vec<_> = registry.categories().collect();
        assert_eq!(
            categories,
            vec![
                ("a", OperatorCategory::DefaultOn),
                ("b", OperatorCategory::DefaultOff)
            ]
        );
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
    }
}

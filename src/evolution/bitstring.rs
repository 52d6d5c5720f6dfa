//! Bit-string genotype with its operators, seeder and the OneMax evaluator.
//!
//! Used by the CLI and the demo program, and as a small but complete problem
//! for exercising the engine.

use std::fmt;
use std::str::FromStr;

use rand::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::candidate::{Genotype, Seeder};
use super::evaluator::EvaluationError;
use super::operator::{Operator, OperatorCategory, OperatorOutput, OperatorRegistry};

/// Fixed-length string of bits, written as `0`/`1` characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitString(Vec<bool>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBitStringError {
    #[error("Empty bit string")]
    Empty,
    #[error("Invalid bit {0:?}")]
    InvalidBit(char),
}

impl BitString {
    pub fn new(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> &[bool] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ones(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in &self.0 {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for BitString {
    type Err = ParseBitStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseBitStringError::Empty);
        }
        s.chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                other => Err(ParseBitStringError::InvalidBit(other)),
            })
            .collect::<Result<Vec<bool>, _>>()
            .map(Self)
    }
}

impl Serialize for BitString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BitString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl Genotype for BitString {
    fn normalized_phenotype(&self) -> String {
        self.to_string()
    }

    fn external_representation(&self) -> String {
        self.to_string()
    }

    /// One symbol per position: `<index>:<bit>`.
    fn symbols(&self) -> Vec<String> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, bit)| format!("{i}:{}", u8::from(*bit)))
            .collect()
    }

    fn validate(&self) -> bool {
        !self.is_empty()
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Flips each bit with a fixed probability, and at least one bit.
#[derive(Debug, Clone)]
pub struct FlipBit {
    probability: f64,
}

impl FlipBit {
    pub const NAME: &'static str = "flip";

    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl Default for FlipBit {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl Operator<BitString> for FlipBit {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::DefaultOn
    }

    fn parents_cardinality(&self) -> usize {
        1
    }

    fn apply(&self, parents: &[&BitString], rng: &mut StdRng) -> OperatorOutput<BitString> {
        let Some(parent) = parents.first() else {
            return OperatorOutput::failure();
        };
        if parent.is_empty() {
            return OperatorOutput::failure();
        }

        let mut bits = parent.0.clone();
        let mut flipped = false;
        for bit in bits.iter_mut() {
            if rng.gen_bool(self.probability) {
                *bit = !*bit;
                flipped = true;
            }
        }
        if !flipped {
            let i = rng.gen_range(0..bits.len());
            bits[i] = !bits[i];
        }
        OperatorOutput::success(vec![BitString(bits)])
    }

    /// Flips as [`Operator::apply`], then keeps flipping one more random bit
    /// with probability `sigma`, at most once per bit.
    fn apply_with_strength(
        &self,
        parents: &[&BitString],
        sigma: f64,
        rng: &mut StdRng,
    ) -> OperatorOutput<BitString> {
        let mut output = self.apply(parents, rng);
        let sigma = sigma.clamp(0.0, 1.0);
        if let Some(child) = output.children.first_mut()
            && sigma > 0.0
        {
            let len = child.len();
            for _ in 0..len {
                if !rng.gen_bool(sigma) {
                    break;
                }
                let i = rng.gen_range(0..len);
                child.0[i] = !child.0[i];
            }
        }
        output
    }

    fn has_parameters(&self) -> bool {
        true
    }

    fn save_parameters(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "probability": self.probability }))
    }

    fn load_parameters(&mut self, parameters: &serde_json::Value) -> Result<(), String> {
        let probability = parameters
            .get("probability")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| format!("missing probability in {parameters}"))?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(format!("probability {probability} out of range"));
        }
        self.probability = probability;
        Ok(())
    }
}

/// One-point crossover of two equally long parents; yields both children.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePointCrossover;

impl OnePointCrossover {
    pub const NAME: &'static str = "xover";
}

impl Operator<BitString> for OnePointCrossover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::DefaultOn
    }

    fn parents_cardinality(&self) -> usize {
        2
    }

    fn apply(&self, parents: &[&BitString], rng: &mut StdRng) -> OperatorOutput<BitString> {
        let [a, b] = parents else {
            return OperatorOutput::failure();
        };
        if a.len() != b.len() || a.len() < 2 {
            return OperatorOutput::failure();
        }

        let cut = rng.gen_range(1..a.len());
        let first = a.0[..cut].iter().chain(&b.0[cut..]).copied().collect();
        let second = b.0[..cut].iter().chain(&a.0[cut..]).copied().collect();
        OperatorOutput::success(vec![BitString(first), BitString(second)])
    }
}

/// Shuffles a random segment of the parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scramble;

impl Scramble {
    pub const NAME: &'static str = "scramble";
}

impl Operator<BitString> for Scramble {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::DefaultOff
    }

    fn parents_cardinality(&self) -> usize {
        1
    }

    fn apply(&self, parents: &[&BitString], rng: &mut StdRng) -> OperatorOutput<BitString> {
        let Some(parent) = parents.first() else {
            return OperatorOutput::failure();
        };
        let len = parent.len();
        if len < 2 {
            return OperatorOutput::failure();
        }

        let start = rng.gen_range(0..len - 1);
        let end = rng.gen_range(start + 2..=len);
        let mut bits = parent.0.clone();
        bits[start..end].shuffle(rng);
        OperatorOutput::success(vec![BitString(bits)])
    }
}

/// Registry holding the three bit-string operators.
pub fn standard_registry() -> OperatorRegistry<BitString> {
    let mut registry = OperatorRegistry::new();
    for result in [
        registry.register(FlipBit::default()),
        registry.register(OnePointCrossover),
        registry.register(Scramble),
    ] {
        if let Err(e) = result {
            log::error!("{e}");
        }
    }
    registry
}

// ============================================================================
// Seeding and evaluation
// ============================================================================

/// Uniformly random bit strings of a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct RandomSeeder {
    pub length: usize,
}

impl Seeder<BitString> for RandomSeeder {
    fn seed(&self, rng: &mut StdRng) -> BitString {
        BitString((0..self.length).map(|_| rng.gen_bool(0.5)).collect())
    }
}

pub fn random_seeder(length: usize) -> RandomSeeder {
    RandomSeeder { length }
}

/// OneMax: the number of `1` bits.
pub fn onemax(representation: &str) -> Result<Vec<f64>, EvaluationError> {
    let bits: BitString = representation
        .trim()
        .parse()
        .map_err(|e: ParseBitStringError| EvaluationError::Failed(e.to_string()))?;
    Ok(vec![bits.ones() as f64])
}

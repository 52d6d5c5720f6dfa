//! Population entropy over phenotype symbols.

use std::collections::BTreeMap;

/// Multiset of symbols with Shannon entropy queries.
#[derive(Debug, Clone, Default)]
pub struct SymbolCounts {
    counts: BTreeMap<String, u64>,
    total: u64,
}

impl SymbolCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: AsRef<str>>(&mut self, symbols: &[S]) {
        for symbol in symbols {
            *self.counts.entry(symbol.as_ref().to_string()).or_default() += 1;
            self.total += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Entropy in bits of the whole multiset.
    pub fn entropy(&self) -> f64 {
        entropy_of(self.counts.values().copied(), self.total)
    }

    /// Entropy of the multiset with `symbols` removed once each.
    pub fn entropy_without<S: AsRef<str>>(&self, symbols: &[S]) -> f64 {
        let mut removed: BTreeMap<&str, u64> = BTreeMap::new();
        for symbol in symbols {
            *removed.entry(symbol.as_ref()).or_default() += 1;
        }
        let mut total = 0;
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|(symbol, &count)| {
                let gone = removed.get(symbol.as_str()).copied().unwrap_or(0).min(count);
                total += count - gone;
                count - gone
            })
            .collect();
        entropy_of(counts.into_iter(), total)
    }

    /// Contribution of `symbols` to the entropy of the multiset.
    pub fn delta_entropy<S: AsRef<str>>(&self, symbols: &[S]) -> f64 {
        self.entropy() - self.entropy_without(symbols)
    }
}

fn entropy_of(counts: impl Iterator<Item = u64>, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

//! Name normalisation and pluggable name-similarity scoring.
//!
//! Entity names are compared in normalised form. [`NameMatcher`] tries an
//! exact match first and then each configured [`SimilarityStrategy`] in
//! order, returning the best candidate that clears the strategy's threshold.

use std::collections::HashSet;

/// Lowercase, trim and collapse internal whitespace. This is the graph's
/// dedup key for nodes.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Scores two already-normalised names in `[0, 1]`.
pub trait SimilarityStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, a: &str, b: &str) -> f64;
    /// Minimum score that counts as a match.
    fn threshold(&self) -> f64;
}

/// One name contains the other. Scored by length ratio so the closest
/// containing candidate wins.
pub struct Containment {
    pub min_len: usize,
}

impl Default for Containment {
    fn default() -> Self {
        Self { min_len: 3 }
    }
}

impl SimilarityStrategy for Containment {
    fn name(&self) -> &'static str {
        "containment"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        if short.chars().count() < self.min_len || !long.contains(short) {
            return 0.0;
        }
        short.len() as f64 / long.len() as f64
    }

    fn threshold(&self) -> f64 {
        f64::EPSILON
    }
}

/// Jaccard overlap of whitespace tokens.
pub struct TokenOverlap {
    pub threshold: f64,
}

impl SimilarityStrategy for TokenOverlap {
    fn name(&self) -> &'static str {
        "token_overlap"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        let ta: HashSet<&str> = a.split_whitespace().collect();
        let tb: HashSet<&str> = b.split_whitespace().collect();
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let common = ta.intersection(&tb).count();
        let union = ta.union(&tb).count();
        common as f64 / union as f64
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// `1 - levenshtein / max_len`, over characters.
pub struct NormalizedEditDistance {
    pub threshold: f64,
}

impl SimilarityStrategy for NormalizedEditDistance {
    fn name(&self) -> &'static str {
        "edit_distance"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        let max_len = a.chars().count().max(b.chars().count());
        if max_len == 0 {
            return 1.0;
        }
        1.0 - levenshtein(a, b) as f64 / max_len as f64
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = usize::from(ca != b_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch<'a> {
    pub candidate: &'a str,
    pub score: f64,
    pub strategy: &'static str,
}

pub struct NameMatcher {
    strategies: Vec<Box<dyn SimilarityStrategy>>,
}

impl Default for NameMatcher {
    /// Containment, then token overlap of at least 70%.
    fn default() -> Self {
        Self::new(vec![
            Box::new(Containment::default()),
            Box::new(TokenOverlap { threshold: 0.7 }),
        ])
    }
}

impl NameMatcher {
    pub fn new(strategies: Vec<Box<dyn SimilarityStrategy>>) -> Self {
        Self { strategies }
    }

    /// Exact matching only.
    pub fn exact() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_strategy(mut self, strategy: Box<dyn SimilarityStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Best candidate for `needle`. Candidates are compared in normalised
    /// form but returned as given.
    pub fn best_match<'a, I>(&self, needle: &str, candidates: I) -> Option<NameMatch<'a>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let needle = normalize_name(needle);
        if needle.is_empty() {
            return None;
        }
        let candidates: Vec<(&'a str, String)> = candidates
            .into_iter()
            .map(|c| (c, normalize_name(c)))
            .filter(|(_, n)| !n.is_empty())
            .collect();

        if let Some((candidate, _)) = candidates.iter().find(|(_, n)| *n == needle) {
            return Some(NameMatch {
                candidate,
                score: 1.0,
                strategy: "exact",
            });
        }

        for strategy in &self.strategies {
            let mut best: Option<NameMatch<'a>> = None;
            for (candidate, normalized) in &candidates {
                let score = strategy.score(&needle, normalized);
                if score < strategy.threshold() {
                    continue;
                }
                if best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(NameMatch {
                        candidate,
                        score,
                        strategy: strategy.name(),
                    });
                }
            }
            if best.is_some() {
                return best;
            }
        }

        None
    }
}

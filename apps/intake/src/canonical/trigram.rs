//! Word-padded character trigram similarity, matching Postgres `pg_trgm` semantics
//! so the in-memory store and `similarity()` agree on the same inputs.

use std::collections::HashSet;

/// Default TRGM threshold for near-duplicate detection.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

pub fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Jaccard similarity of the two trigram sets, in `[0.0, 1.0]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

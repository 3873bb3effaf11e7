//! 64-bit SimHash over section-weighted word tokens.
//!
//! Only a probabilistic prefilter: a small Hamming distance means "probably similar",
//! never "identical". Exact duplicates are the canonical hash's job.

use sha2::{Digest, Sha256};

use super::{classify_section, SectionMap};

pub const FINGERPRINT_BITS: usize = 64;

pub fn sim_fingerprint(sections: &SectionMap) -> u64 {
    let mut accumulator = [0i64; FINGERPRINT_BITS];

    for (name, lines) in sections {
        let weight = classify_section(name).weight();
        for token in lines.iter().flat_map(|line| tokenize(line)) {
            let hash = token_hash(&token);
            for (bit, slot) in accumulator.iter_mut().enumerate() {
                if (hash >> bit) & 1 == 1 {
                    *slot += weight;
                } else {
                    *slot -= weight;
                }
            }
        }
    }

    accumulator
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > 0)
        .fold(0u64, |fp, (bit, _)| fp | (1u64 << bit))
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

fn tokenize(line: &str) -> Vec<String> {
    line.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

// Stable across processes and releases, unlike std's randomized hasher.
fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

//! Canonicalizer — turns a section map into the fingerprints used for duplicate detection.
//!
//! Pure functions only. The section map arrives already extracted from OCR/HTML upstream.

use std::collections::HashMap;

pub mod hashing;
pub mod simhash;
pub mod trigram;

/// `sectionName -> [lines]`, as handed over by the extraction stage.
pub type SectionMap = HashMap<String, Vec<String>>;

/// Derived identity of a JD. Recomputed identically for equal inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub canonical_hash: String,
    pub sim_fingerprint: u64,
    pub core_text: String,
}

/// Coarse role of a section, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionKind {
    Responsibilities,
    Requirements,
    Preferred,
    Process,
    Other,
}

impl SectionKind {
    /// Token weight used by the SimHash accumulator.
    pub fn weight(self) -> i64 {
        match self {
            SectionKind::Responsibilities | SectionKind::Requirements | SectionKind::Preferred => 3,
            SectionKind::Other => 2,
            SectionKind::Process => 1,
        }
    }

    pub fn in_core_text(self) -> bool {
        !matches!(self, SectionKind::Other)
    }
}

/// Classifies a section by name. Matching is substring-based so that
/// "Key Responsibilities" and "responsibilities" land in the same bucket.
pub fn classify_section(name: &str) -> SectionKind {
    let name = name.trim().to_lowercase();
    if name.contains("responsib") || name.contains("duties") {
        SectionKind::Responsibilities
    } else if name.contains("requirement") || name.contains("qualification") {
        SectionKind::Requirements
    } else if name.contains("prefer") || name.contains("nice to have") {
        SectionKind::Preferred
    } else if name.contains("process") || name.contains("procedure") {
        SectionKind::Process
    } else {
        SectionKind::Other
    }
}

/// Computes all three fingerprints for a section map.
pub fn fingerprint(sections: &SectionMap) -> Fingerprints {
    Fingerprints {
        canonical_hash: hashing::canonical_hash(sections),
        sim_fingerprint: simhash::sim_fingerprint(sections),
        core_text: hashing::core_text(sections),
    }
}

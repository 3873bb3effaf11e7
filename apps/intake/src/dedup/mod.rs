//! Duplicate Decision Engine — cheapest check first, most expensive last.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod engine;

pub use engine::{DedupThresholds, DuplicateDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateReason {
    Hash,
    Url,
    Simhash,
    Trgm,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateReason::Hash => "HASH",
            DuplicateReason::Url => "URL",
            DuplicateReason::Simhash => "SIMHASH",
            DuplicateReason::Trgm => "TRGM",
        }
    }
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HASH" => Ok(DuplicateReason::Hash),
            "URL" => Ok(DuplicateReason::Url),
            "SIMHASH" => Ok(DuplicateReason::Simhash),
            "TRGM" => Ok(DuplicateReason::Trgm),
            other => Err(format!("unknown duplicate reason '{other}'")),
        }
    }
}

/// Standard intake, or an operator-triggered reprocess that may reuse a snapshot
/// whose summary never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    #[default]
    Standard,
    AdminReprocess,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NotDuplicate,
    Duplicate {
        reason: DuplicateReason,
        existing_snapshot_id: Uuid,
        existing_summary_id: Option<Uuid>,
    },
    Reprocessable {
        existing_snapshot_id: Uuid,
    },
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dedup::DuplicateReason;
use crate::ledger::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Received,
    Summarizing,
    Duplicate,
    Completed,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Received => "RECEIVED",
            LedgerStatus::Summarizing => "SUMMARIZING",
            LedgerStatus::Duplicate => "DUPLICATE",
            LedgerStatus::Completed => "COMPLETED",
            LedgerStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Duplicate | LedgerStatus::Completed | LedgerStatus::Failed
        )
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(LedgerStatus::Received),
            "SUMMARIZING" => Ok(LedgerStatus::Summarizing),
            "DUPLICATE" => Ok(LedgerStatus::Duplicate),
            "COMPLETED" => Ok(LedgerStatus::Completed),
            "FAILED" => Ok(LedgerStatus::Failed),
            other => Err(format!("unknown ledger status '{other}'")),
        }
    }
}

/// One row per intake request. Only ever changed through `ledger::state_machine::apply`.
///
/// For DUPLICATE rows the result ids point at the pre-existing snapshot/summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub id: Uuid,
    pub request_id: String,
    pub status: LedgerStatus,
    pub duplicate_reason: Option<DuplicateReason>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub result_snapshot_id: Option<Uuid>,
    pub result_summary_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRow {
    pub fn received(request_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_id: request_id.to_string(),
            status: LedgerStatus::Received,
            duplicate_reason: None,
            error_code: None,
            error_message: None,
            result_snapshot_id: None,
            result_summary_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

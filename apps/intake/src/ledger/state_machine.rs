//! Ledger transitions. The guard is checked before any mutation; an unexpected state is
//! reported, never repaired.
//!
//! ```text
//! RECEIVED    --Summarizing--> SUMMARIZING
//! RECEIVED    --Duplicate----> DUPLICATE
//! RECEIVED    --Failed-------> FAILED
//! SUMMARIZING --Completed----> COMPLETED
//! SUMMARIZING --Failed-------> FAILED
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::dedup::DuplicateReason;
use crate::ledger::ErrorCode;
use crate::models::ledger::{LedgerRow, LedgerStatus};

/// Upper bound on stored error messages, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerTransition {
    Summarizing {
        snapshot_id: Uuid,
    },
    Duplicate {
        reason: DuplicateReason,
        existing_snapshot_id: Option<Uuid>,
        existing_summary_id: Option<Uuid>,
    },
    Failed {
        code: ErrorCode,
        message: String,
    },
    Completed {
        summary_id: Uuid,
    },
}

impl LedgerTransition {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerTransition::Summarizing { .. } => "mark_summarizing",
            LedgerTransition::Duplicate { .. } => "mark_duplicate",
            LedgerTransition::Failed { .. } => "mark_failed",
            LedgerTransition::Completed { .. } => "mark_completed",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid ledger transition {attempted} from {from}")]
pub struct InvalidTransition {
    pub from: LedgerStatus,
    pub attempted: &'static str,
}

/// Returns the status `transition` leads to from `from`, or the guard violation.
pub fn target_status(
    from: LedgerStatus,
    transition: &LedgerTransition,
) -> Result<LedgerStatus, InvalidTransition> {
    use LedgerStatus::*;
    let to = match (from, transition) {
        (Received, LedgerTransition::Summarizing { .. }) => Summarizing,
        (Received, LedgerTransition::Duplicate { .. }) => Duplicate,
        (Received | Summarizing, LedgerTransition::Failed { .. }) => Failed,
        (Summarizing, LedgerTransition::Completed { .. }) => Completed,
        _ => {
            return Err(InvalidTransition {
                from,
                attempted: transition.name(),
            })
        }
    };
    Ok(to)
}

/// Produces the next ledger row. `row` is left untouched; on error nothing changes.
///
/// Side data that does not describe the new status is cleared, so a row never carries
/// leftovers from a branch it did not end on.
pub fn apply(
    row: &LedgerRow,
    transition: LedgerTransition,
    now: DateTime<Utc>,
) -> Result<LedgerRow, InvalidTransition> {
    let status = target_status(row.status, &transition)?;
    let mut next = row.clone();
    next.status = status;
    next.updated_at = now;

    match transition {
        LedgerTransition::Summarizing { snapshot_id } => {
            next.result_snapshot_id = Some(snapshot_id);
            next.result_summary_id = None;
            next.duplicate_reason = None;
            next.error_code = None;
            next.error_message = None;
        }
        LedgerTransition::Duplicate {
            reason,
            existing_snapshot_id,
            existing_summary_id,
        } => {
            next.duplicate_reason = Some(reason);
            next.result_snapshot_id = existing_snapshot_id;
            next.result_summary_id = existing_summary_id;
            next.error_code = None;
            next.error_message = None;
        }
        LedgerTransition::Failed { code, message } => {
            next.error_code = Some(code);
            next.error_message = Some(truncate_message(&message));
            next.duplicate_reason = None;
            next.result_summary_id = None;
        }
        LedgerTransition::Completed { summary_id } => {
            next.result_summary_id = Some(summary_id);
            next.duplicate_reason = None;
            next.error_code = None;
            next.error_message = None;
        }
    }

    Ok(next)
}

/// Truncates on a char boundary to `MAX_ERROR_MESSAGE_CHARS`.
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

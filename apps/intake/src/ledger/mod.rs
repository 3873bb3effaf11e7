//! Processing Ledger — per-request progress record and its state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod state_machine;

pub use state_machine::{apply, InvalidTransition, LedgerTransition};

/// Stable failure codes recorded on FAILED ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LlmCallFailed,
    LlmParseFailed,
    LlmTimeout,
    FailedAtPostLlm,
    DuplicateCheckFailed,
    SnapshotWriteFailed,
    CompletionFailed,
    Interrupted,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LlmCallFailed => "LLM_CALL_FAILED",
            ErrorCode::LlmParseFailed => "LLM_PARSE_FAILED",
            ErrorCode::LlmTimeout => "LLM_TIMEOUT",
            ErrorCode::FailedAtPostLlm => "FAILED_AT_POST_LLM",
            ErrorCode::DuplicateCheckFailed => "DUPLICATE_CHECK_FAILED",
            ErrorCode::SnapshotWriteFailed => "SNAPSHOT_WRITE_FAILED",
            ErrorCode::CompletionFailed => "COMPLETION_FAILED",
            ErrorCode::Interrupted => "INTERRUPTED",
        }
    }

    /// Infra failures worth replaying. Contract and invariant failures are deterministic
    /// and replaying them only repeats the failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCode::LlmParseFailed | ErrorCode::FailedAtPostLlm)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LLM_CALL_FAILED" => Ok(ErrorCode::LlmCallFailed),
            "LLM_PARSE_FAILED" => Ok(ErrorCode::LlmParseFailed),
            "LLM_TIMEOUT" => Ok(ErrorCode::LlmTimeout),
            "FAILED_AT_POST_LLM" => Ok(ErrorCode::FailedAtPostLlm),
            "DUPLICATE_CHECK_FAILED" => Ok(ErrorCode::DuplicateCheckFailed),
            "SNAPSHOT_WRITE_FAILED" => Ok(ErrorCode::SnapshotWriteFailed),
            "COMPLETION_FAILED" => Ok(ErrorCode::CompletionFailed),
            "INTERRUPTED" => Ok(ErrorCode::Interrupted),
            other => Err(format!("unknown error code '{other}'")),
        }
    }
}

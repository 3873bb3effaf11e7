//! Summarization Orchestrator — one bounded call to the external summary provider.
//!
//! The provider runs as its own task; past the deadline the task is aborted and the
//! call counts as failed even if the provider would have answered later.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::canonical::SectionMap;
use crate::ledger::ErrorCode;

pub mod prompts;
pub mod provider;
pub mod result;

pub use provider::LlmSummaryProvider;
pub use result::SummaryResult;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(45);

/// Everything the provider gets to see for one JD.
#[derive(Debug, Clone)]
pub struct SummarizeInput {
    pub brand_name: String,
    pub position_name: String,
    pub position_candidates: Vec<String>,
    pub company_candidates: Vec<String>,
    pub section_map: SectionMap,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider call failed: {0}")]
    Call(String),

    #[error("Malformed provider output: {0}")]
    Malformed(String),
}

/// The external summary provider. Returns raw JSON; typing happens in the orchestrator.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, input: &SummarizeInput) -> Result<Value, ProviderError>;
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("LLM call failed: {0}")]
    CallFailed(String),

    #[error("LLM response rejected: {0}")]
    ParseFailed(String),

    #[error("LLM call exceeded the {0:?} deadline")]
    TimedOut(Duration),
}

impl SummarizeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SummarizeError::CallFailed(_) => ErrorCode::LlmCallFailed,
            SummarizeError::ParseFailed(_) => ErrorCode::LlmParseFailed,
            SummarizeError::TimedOut(_) => ErrorCode::LlmTimeout,
        }
    }
}

#[derive(Clone)]
pub struct Summarizer {
    provider: Arc<dyn SummaryProvider>,
    deadline: Duration,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn SummaryProvider>, deadline: Duration) -> Self {
        Self { provider, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn summarize(&self, input: SummarizeInput) -> Result<SummaryResult, SummarizeError> {
        let provider = Arc::clone(&self.provider);
        let mut task = tokio::spawn(async move { provider.summarize(&input).await });

        let raw = match tokio::time::timeout(self.deadline, &mut task).await {
            Err(_) => {
                task.abort();
                warn!("Summary provider exceeded {:?}; call aborted", self.deadline);
                return Err(SummarizeError::TimedOut(self.deadline));
            }
            Ok(Err(join_error)) => {
                return Err(SummarizeError::CallFailed(format!(
                    "provider task did not finish: {join_error}"
                )))
            }
            Ok(Ok(Err(ProviderError::Call(message)))) => {
                return Err(SummarizeError::CallFailed(message))
            }
            Ok(Ok(Err(ProviderError::Malformed(message)))) => {
                return Err(SummarizeError::ParseFailed(message))
            }
            Ok(Ok(Ok(raw))) => raw,
        };

        let result = SummaryResult::from_value(raw).map_err(SummarizeError::ParseFailed)?;
        debug!(
            "Summary parsed: brand={}, position={}",
            result.brand_name, result.position_name
        );
        Ok(result)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn input() -> SummarizeInput {
        let mut section_map = SectionMap::new();
        section_map.insert("responsibilities".into(), vec!["Build APIs".into()]);
        SummarizeInput {
            brand_name: "Acme".into(),
            position_name: "Backend Engineer".into(),
            position_candidates: vec!["Backend Engineer".into()],
            company_candidates: vec![],
            section_map,
        }
    }

    fn summarizer(script: Script) -> Summarizer {
        Summarizer::new(Arc::new(ScriptedProvider::new(script)), DEFAULT_DEADLINE)
    }

    #[tokio::test]
    async fn test_success_returns_typed_result() {
        let result = summarizer(Script::Respond(valid_response("Backend Engineer")))
            .summarize(input())
            .await
            .unwrap();
        assert_eq!(result.position_name, "Backend Engineer");
        assert_eq!(result.company_name.as_deref(), Some("Acme Payments Ltd"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_is_timed_out() {
        let err = summarizer(Script::Stall(Duration::from_secs(60)))
            .summarize(input())
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::TimedOut(d) if d == DEFAULT_DEADLINE));
        assert_eq!(err.error_code(), ErrorCode::LlmTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_just_inside_deadline_is_accepted() {
        let result = summarizer(Script::Stall(Duration::from_secs(44)))
            .summarize(input())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_provider_error_is_call_failed() {
        let err = summarizer(Script::Fail("HTTP 502".into()))
            .summarize(input())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::LlmCallFailed);
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn test_malformed_output_is_parse_failed() {
        let err = summarizer(Script::Malformed("not json".into()))
            .summarize(input())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::LlmParseFailed);
    }

    #[tokio::test]
    async fn test_missing_mandatory_field_is_parse_failed() {
        let mut response = valid_response("Backend Engineer");
        response.as_object_mut().unwrap().remove("responsibilities");
        let err = summarizer(Script::Respond(response))
            .summarize(input())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::LlmParseFailed);
        assert!(err.to_string().contains("responsibilities"));
    }

    #[tokio::test]
    async fn test_provider_panic_is_call_failed() {
        let err = summarizer(Script::Panic)
            .summarize(input())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::LlmCallFailed);
    }
}

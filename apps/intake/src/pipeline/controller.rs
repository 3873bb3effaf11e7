//! Pipeline Controller — admission, scheduling and the per-request flow.
//!
//! Canonicalize -> decide -> [snapshot write] -> SUMMARIZING -> summarize -> complete.
//! Every outcome lands on the ledger; a run only returns `Err` when the ledger itself
//! could not be written.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::canonical::{self, Fingerprints};
use crate::completion::{CompletionTarget, CompletionWriter};
use crate::dedup::{Decision, DecisionMode, DuplicateDetector, DuplicateReason};
use crate::intake::validation::{validate_request, ContentPolicy, ValidationFailure};
use crate::intake::IntakeRequest;
use crate::ledger::{ErrorCode, LedgerTransition};
use crate::models::catalog::{normalize_name, PositionRow, UNKNOWN_POSITION};
use crate::models::ledger::LedgerRow;
use crate::models::snapshot::SnapshotRow;
use crate::store::{LedgerAdmission, SnapshotInsert, Store, StoreError};
use crate::summarize::{SummarizeInput, Summarizer};

const INTERRUPTED_MESSAGE: &str = "process stopped before the request finished";

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
enum PositionError {
    #[error("position catalog has no UNKNOWN entry")]
    MissingUnknown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of admitting a request. `fresh` is false on redelivery of a known `request_id`.
#[derive(Debug, Clone)]
pub struct Admission {
    pub ledger: LedgerRow,
    pub fresh: bool,
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn Store>,
    detector: DuplicateDetector,
    summarizer: Summarizer,
    writer: CompletionWriter,
    policy: ContentPolicy,
    workers: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        detector: DuplicateDetector,
        summarizer: Summarizer,
        policy: ContentPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            writer: CompletionWriter::new(Arc::clone(&store)),
            store,
            detector,
            summarizer,
            policy,
            workers: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn with_completion_writer(mut self, writer: CompletionWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Validates and records the request at RECEIVED. Invalid input never gets a ledger.
    pub async fn admit(&self, request: &IntakeRequest) -> Result<Admission, AdmissionError> {
        validate_request(request, &self.policy)?;

        match self.store.create_ledger(&request.request_id).await? {
            LedgerAdmission::Created(ledger) => {
                info!(
                    "Admitted request {} as ledger {}",
                    request.request_id, ledger.id
                );
                Ok(Admission {
                    ledger,
                    fresh: true,
                })
            }
            LedgerAdmission::Existing(ledger) => {
                info!(
                    "Request {} already admitted as ledger {} ({})",
                    request.request_id, ledger.id, ledger.status
                );
                Ok(Admission {
                    ledger,
                    fresh: false,
                })
            }
        }
    }

    /// Admits and schedules. Returns as soon as RECEIVED is durable; redeliveries are not rerun.
    pub async fn submit(
        &self,
        request: IntakeRequest,
        mode: DecisionMode,
    ) -> Result<Admission, AdmissionError> {
        let admission = self.admit(&request).await?;
        if admission.fresh {
            self.dispatch(admission.ledger.id, request, mode);
        }
        Ok(admission)
    }

    /// Runs the request on worker capacity, decoupled from the caller.
    pub fn dispatch(
        &self,
        ledger_id: Uuid,
        request: IntakeRequest,
        mode: DecisionMode,
    ) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let _permit = match Arc::clone(&pipeline.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Worker pool closed; ledger {ledger_id} left at RECEIVED");
                    return;
                }
            };
            if let Err(e) = pipeline.run(ledger_id, &request, mode).await {
                error!("Ledger {ledger_id} could not be advanced: {e}");
            }
        })
    }

    /// The whole flow for one admitted request.
    pub async fn run(
        &self,
        ledger_id: Uuid,
        request: &IntakeRequest,
        mode: DecisionMode,
    ) -> Result<LedgerRow, StoreError> {
        let fingerprints = canonical::fingerprint(&request.section_map);

        let decision = match self.classify(request, &fingerprints, mode).await {
            Ok(decision) => decision,
            Err(e) => return self.fail(ledger_id, ErrorCode::DuplicateCheckFailed, e.to_string()).await,
        };

        let snapshot_id = match decision {
            Decision::Duplicate {
                reason,
                existing_snapshot_id,
                existing_summary_id,
            } => {
                return self
                    .mark_duplicate(ledger_id, reason, existing_snapshot_id, existing_summary_id)
                    .await
            }
            Decision::Reprocessable {
                existing_snapshot_id,
            } => existing_snapshot_id,
            Decision::NotDuplicate => {
                let snapshot = SnapshotRow::capture(request, &fingerprints);
                match self.store.insert_snapshot(&snapshot).await {
                    Ok(SnapshotInsert::Inserted(row)) => row.id,
                    Ok(SnapshotInsert::HashConflict {
                        existing_snapshot_id,
                        existing_summary_id,
                    }) => {
                        info!(
                            "Ledger {ledger_id} lost the snapshot race to {existing_snapshot_id}"
                        );
                        return self
                            .mark_duplicate(
                                ledger_id,
                                DuplicateReason::Hash,
                                existing_snapshot_id,
                                existing_summary_id,
                            )
                            .await;
                    }
                    Err(e) => {
                        return self
                            .fail(ledger_id, ErrorCode::SnapshotWriteFailed, e.to_string())
                            .await
                    }
                }
            }
        };

        if let Err(e) = self
            .store
            .transition_ledger(ledger_id, LedgerTransition::Summarizing { snapshot_id })
            .await
        {
            return self
                .fail(ledger_id, ErrorCode::SnapshotWriteFailed, e.to_string())
                .await;
        }
        info!("Ledger {ledger_id} SUMMARIZING snapshot {snapshot_id}");

        let input = match self.summarize_input(request).await {
            Ok(input) => input,
            Err(e) => return self.fail(ledger_id, ErrorCode::LlmCallFailed, e.to_string()).await,
        };

        let result = match self.summarizer.summarize(input).await {
            Ok(result) => result,
            Err(e) => return self.fail(ledger_id, e.error_code(), e.to_string()).await,
        };

        let position = match self.resolve_position(&result.position_name).await {
            Ok(position) => position,
            Err(PositionError::MissingUnknown) => {
                error!(
                    "Position catalog is missing the {UNKNOWN_POSITION} sentinel; ledger {ledger_id} cannot complete"
                );
                return self
                    .fail(
                        ledger_id,
                        ErrorCode::FailedAtPostLlm,
                        PositionError::MissingUnknown.to_string(),
                    )
                    .await;
            }
            Err(PositionError::Store(e)) => {
                return self.fail(ledger_id, ErrorCode::CompletionFailed, e.to_string()).await
            }
        };

        let target = CompletionTarget {
            ledger_id,
            snapshot_id,
            source_url: request.url_source(),
        };
        match self.writer.complete(target, &position, &result).await {
            Ok(done) => Ok(done.ledger),
            Err(e) => self.fail(ledger_id, ErrorCode::CompletionFailed, e.to_string()).await,
        }
    }

    /// Fails ledgers a previous process left non-terminal. Only rows untouched since
    /// `older_than` are considered, so live runs elsewhere are left alone.
    pub async fn recover_interrupted(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let stale = self.store.list_stale_ledgers(older_than).await?;
        let mut recovered = 0;
        for ledger in stale {
            let transition = LedgerTransition::Failed {
                code: ErrorCode::Interrupted,
                message: INTERRUPTED_MESSAGE.to_string(),
            };
            match self.store.transition_ledger(ledger.id, transition).await {
                Ok(_) => {
                    warn!(
                        "Ledger {} ({}) was left at {}; marked FAILED",
                        ledger.id, ledger.request_id, ledger.status
                    );
                    recovered += 1;
                }
                Err(StoreError::InvalidTransition(e)) => {
                    info!("Ledger {} finished while recovering: {e}", ledger.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    async fn classify(
        &self,
        request: &IntakeRequest,
        fingerprints: &Fingerprints,
        mode: DecisionMode,
    ) -> Result<Decision, StoreError> {
        let queries = self.store.as_ref();
        let suspects = self.detector.collect_suspects(queries, request).await?;
        self.detector
            .decide(queries, request, fingerprints, &suspects, mode)
            .await
    }

    async fn summarize_input(&self, request: &IntakeRequest) -> Result<SummarizeInput, StoreError> {
        Ok(SummarizeInput {
            brand_name: request.brand_name.clone(),
            position_name: request.position_name.clone(),
            position_candidates: self.store.list_position_names().await?,
            company_candidates: self
                .store
                .list_company_candidates(&request.brand_name)
                .await?,
            section_map: request.section_map.clone(),
        })
    }

    /// Catalog entry by normalized name, else UNKNOWN. A missing UNKNOWN is a deployment defect.
    async fn resolve_position(&self, name: &str) -> Result<PositionRow, PositionError> {
        if let Some(position) = self
            .store
            .find_position_by_normalized_name(&normalize_name(name))
            .await?
        {
            return Ok(position);
        }
        warn!("Position '{name}' is not in the catalog; using {UNKNOWN_POSITION}");
        self.store
            .find_position_by_normalized_name(&normalize_name(UNKNOWN_POSITION))
            .await?
            .ok_or(PositionError::MissingUnknown)
    }

    async fn mark_duplicate(
        &self,
        ledger_id: Uuid,
        reason: DuplicateReason,
        existing_snapshot_id: Uuid,
        existing_summary_id: Option<Uuid>,
    ) -> Result<LedgerRow, StoreError> {
        let ledger = self
            .store
            .transition_ledger(
                ledger_id,
                LedgerTransition::Duplicate {
                    reason,
                    existing_snapshot_id: Some(existing_snapshot_id),
                    existing_summary_id,
                },
            )
            .await?;
        info!("Ledger {ledger_id} DUPLICATE ({reason}) of snapshot {existing_snapshot_id}");
        Ok(ledger)
    }

    async fn fail(
        &self,
        ledger_id: Uuid,
        code: ErrorCode,
        message: String,
    ) -> Result<LedgerRow, StoreError> {
        warn!("Ledger {ledger_id} FAILED with {code}: {message}");
        self.store
            .transition_ledger(ledger_id, LedgerTransition::Failed { code, message })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::canonical::SectionMap;
    use crate::completion::FaultHook;
    use crate::dedup::DedupThresholds;
    use crate::intake::{RecruitmentPeriodType, SourceType};
    use crate::models::ledger::LedgerStatus;
    use crate::models::outbox::OutboxEventRow;
    use crate::models::snapshot::SnapshotMatch;
    use crate::store::{MemoryStore, SimilarSnapshot, SnapshotQueries, UnitOfWork};
    use crate::summarize::testing::{valid_response, Script, ScriptedProvider};
    use crate::summarize::DEFAULT_DEADLINE;

    fn sections(pairs: &[(&str, &[&str])]) -> SectionMap {
        pairs
            .iter()
            .map(|(k, lines)| (k.to_string(), lines.iter().map(|l| l.to_string()).collect()))
            .collect()
    }

    fn request(request_id: &str, section_map: SectionMap) -> IntakeRequest {
        IntakeRequest {
            request_id: request_id.into(),
            brand_name: "Acme".into(),
            position_name: "Backend Engineer".into(),
            source: SourceType::Text,
            source_url: None,
            section_map,
            recruitment_period_type: RecruitmentPeriodType::Ongoing,
            opened_date: None,
            closed_date: None,
        }
    }

    fn minimal_jd(request_id: &str) -> IntakeRequest {
        request(
            request_id,
            sections(&[
                ("responsibilities", &["Build APIs"]),
                ("requirements", &["3y Java"]),
                ("preferred", &["AWS"]),
            ]),
        )
    }

    fn pipeline_with(store: &MemoryStore, provider: Arc<ScriptedProvider>) -> Pipeline {
        Pipeline::new(
            Arc::new(store.clone()),
            DuplicateDetector::new(DedupThresholds::default()),
            Summarizer::new(provider, DEFAULT_DEADLINE),
            ContentPolicy::default(),
            4,
        )
    }

    async fn admit(pipeline: &Pipeline, request: &IntakeRequest) -> Uuid {
        let admission = pipeline.admit(request).await.unwrap();
        assert!(admission.fresh);
        admission.ledger.id
    }

    /// Delegates to a `MemoryStore`, optionally hiding content lookups or refusing SUMMARIZING.
    #[derive(Clone, Default)]
    struct FaultyStore {
        inner: MemoryStore,
        blind_content_lookups: bool,
        refuse_summarizing: bool,
    }

    #[async_trait::async_trait]
    impl SnapshotQueries for FaultyStore {
        async fn find_by_canonical_hash(&self, hash: &str) -> Result<Option<SnapshotMatch>, StoreError> {
            if self.blind_content_lookups {
                return Ok(None);
            }
            self.inner.find_by_canonical_hash(hash).await
        }

        async fn find_by_url(&self, url: &str, limit: usize) -> Result<Vec<SnapshotMatch>, StoreError> {
            self.inner.find_by_url(url, limit).await
        }

        async fn find_overlapping_date_range(
            &self,
            opened: Option<chrono::NaiveDate>,
            closed: Option<chrono::NaiveDate>,
            limit: usize,
        ) -> Result<Vec<SnapshotMatch>, StoreError> {
            self.inner.find_overlapping_date_range(opened, closed, limit).await
        }

        async fn find_similar_by_core_text(
            &self,
            text: &str,
            threshold: f64,
        ) -> Result<Option<SimilarSnapshot>, StoreError> {
            if self.blind_content_lookups {
                return Ok(None);
            }
            self.inner.find_similar_by_core_text(text, threshold).await
        }
    }

    #[async_trait::async_trait]
    impl Store for FaultyStore {
        async fn create_ledger(&self, request_id: &str) -> Result<LedgerAdmission, StoreError> {
            self.inner.create_ledger(request_id).await
        }

        async fn get_ledger(&self, id: Uuid) -> Result<Option<LedgerRow>, StoreError> {
            self.inner.get_ledger(id).await
        }

        async fn transition_ledger(
            &self,
            id: Uuid,
            transition: LedgerTransition,
        ) -> Result<LedgerRow, StoreError> {
            if self.refuse_summarizing && matches!(transition, LedgerTransition::Summarizing { .. }) {
                return Err(StoreError::Corrupt("ledger row unreadable".into()));
            }
            self.inner.transition_ledger(id, transition).await
        }

        async fn list_stale_ledgers(
            &self,
            older_than: DateTime<Utc>,
        ) -> Result<Vec<LedgerRow>, StoreError> {
            self.inner.list_stale_ledgers(older_than).await
        }

        async fn insert_snapshot(&self, snapshot: &SnapshotRow) -> Result<SnapshotInsert, StoreError> {
            self.inner.insert_snapshot(snapshot).await
        }

        async fn list_position_names(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_position_names().await
        }

        async fn find_position_by_normalized_name(
            &self,
            normalized: &str,
        ) -> Result<Option<PositionRow>, StoreError> {
            self.inner.find_position_by_normalized_name(normalized).await
        }

        async fn list_company_candidates(&self, brand_name: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_company_candidates(brand_name).await
        }

        async fn record_company_candidate(
            &self,
            brand_name: &str,
            company_name: &str,
        ) -> Result<(), StoreError> {
            self.inner.record_company_candidate(brand_name, company_name).await
        }

        async fn fetch_pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEventRow>, StoreError> {
            self.inner.fetch_pending_outbox(limit).await
        }

        async fn mark_outbox_dispatched(&self, ids: &[i64]) -> Result<(), StoreError> {
            self.inner.mark_outbox_dispatched(ids).await
        }

        async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
            self.inner.begin().await
        }
    }

    fn pipeline_over(store: FaultyStore, provider: Arc<ScriptedProvider>) -> Pipeline {
        Pipeline::new(
            Arc::new(store),
            DuplicateDetector::new(DedupThresholds::default()),
            Summarizer::new(provider, DEFAULT_DEADLINE),
            ContentPolicy::default(),
            4,
        )
    }

    async fn wait_for_terminal(store: &MemoryStore, id: Uuid) -> LedgerRow {
        for _ in 0..100 {
            let ledger = store.get_ledger(id).await.unwrap().unwrap();
            if ledger.status.is_terminal() {
                return ledger;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ledger {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_new_jd_completes_with_one_outbox_event() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_with(&store, provider.clone());
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Completed);
        let snapshots = store.snapshots().await;
        let summaries = store.summaries().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(summaries.len(), 1);
        assert_eq!(store.outbox().await.len(), 1);
        assert_eq!(ledger.result_snapshot_id, Some(snapshots[0].id));
        assert_eq!(ledger.result_summary_id, Some(summaries[0].id));
        assert_eq!(summaries[0].snapshot_id, snapshots[0].id);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_identical_payload_is_hash_duplicate() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_with(&store, provider.clone());

        let first = minimal_jd("req-1");
        let first_id = admit(&pipeline, &first).await;
        let completed = pipeline
            .run(first_id, &first, DecisionMode::Standard)
            .await
            .unwrap();

        let second = minimal_jd("req-2");
        let second_id = admit(&pipeline, &second).await;
        let ledger = pipeline
            .run(second_id, &second, DecisionMode::Standard)
            .await
            .unwrap();

        assert_eq!(ledger.status, LedgerStatus::Duplicate);
        assert_eq!(ledger.duplicate_reason, Some(DuplicateReason::Hash));
        assert_eq!(ledger.result_snapshot_id, completed.result_snapshot_id);
        assert_eq!(ledger.result_summary_id, completed.result_summary_id);
        assert_eq!(store.snapshots().await.len(), 1);
        assert_eq!(store.summaries().await.len(), 1);
        assert_eq!(store.outbox().await.len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_similar_core_text_is_trgm_duplicate() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_with(&store, provider);

        let base = request(
            "req-1",
            sections(&[
                (
                    "responsibilities",
                    &["Design, build and operate the payment platform APIs used by merchants worldwide"],
                ),
                (
                    "requirements",
                    &["Three years of production Java or Kotlin experience with distributed systems"],
                ),
            ]),
        );
        let base_id = admit(&pipeline, &base).await;
        pipeline.run(base_id, &base, DecisionMode::Standard).await.unwrap();

        let near = request(
            "req-2",
            sections(&[
                (
                    "responsibilities",
                    &["Design, build and operate the payment platform APIs used by merchants worldwide"],
                ),
                (
                    "requirements",
                    &["Three years of production Java or Kotlin experience with distributed systems"],
                ),
                ("preferred", &["AWS"]),
            ]),
        );
        let near_id = admit(&pipeline, &near).await;
        let ledger = pipeline.run(near_id, &near, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Duplicate);
        assert_eq!(ledger.duplicate_reason, Some(DuplicateReason::Trgm));
        assert_eq!(store.snapshots().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_timeout_fails_without_summary() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::new(Script::Stall(Duration::from_secs(120))));
        let pipeline = pipeline_with(&store, provider);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Failed);
        assert_eq!(ledger.error_code, Some(ErrorCode::LlmTimeout));
        assert_eq!(store.snapshots().await.len(), 1);
        assert!(store.summaries().await.is_empty());
        assert!(store.outbox().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_responsibilities_is_parse_failure() {
        let store = MemoryStore::new();
        let mut response = valid_response("UNKNOWN");
        response.as_object_mut().unwrap().remove("responsibilities");
        let provider = Arc::new(ScriptedProvider::new(Script::Respond(response)));
        let pipeline = pipeline_with(&store, provider);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Failed);
        assert_eq!(ledger.error_code, Some(ErrorCode::LlmParseFailed));
        assert!(ledger.error_message.unwrap().contains("responsibilities"));
        assert!(store.summaries().await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_is_call_failure() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::new(Script::Fail("503 overloaded".into())));
        let pipeline = pipeline_with(&store, provider);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.error_code, Some(ErrorCode::LlmCallFailed));
        assert!(ErrorCode::LlmCallFailed.is_retryable());
    }

    #[tokio::test]
    async fn test_concurrent_identical_payloads_write_one_snapshot() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_with(&store, provider);
        let a = minimal_jd("req-a");
        let b = minimal_jd("req-b");
        let a_id = admit(&pipeline, &a).await;
        let b_id = admit(&pipeline, &b).await;

        let (ra, rb) = tokio::join!(
            pipeline.run(a_id, &a, DecisionMode::Standard),
            pipeline.run(b_id, &b, DecisionMode::Standard),
        );
        let outcomes = [ra.unwrap(), rb.unwrap()];

        assert_eq!(store.snapshots().await.len(), 1);
        assert_eq!(store.summaries().await.len(), 1);
        let statuses: HashSet<LedgerStatus> = outcomes.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            HashSet::from([LedgerStatus::Completed, LedgerStatus::Duplicate])
        );
        let duplicate = outcomes
            .iter()
            .find(|l| l.status == LedgerStatus::Duplicate)
            .unwrap();
        assert_eq!(duplicate.duplicate_reason, Some(DuplicateReason::Hash));
    }

    #[tokio::test]
    async fn test_unknown_position_falls_back_to_sentinel() {
        let store = MemoryStore::with_positions(&["Backend Engineer", UNKNOWN_POSITION]);
        let provider = Arc::new(ScriptedProvider::answering_for("Wizard of Payments"));
        let pipeline = pipeline_with(&store, provider);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Completed);
        assert_eq!(store.summaries().await[0].position_name, UNKNOWN_POSITION);
    }

    #[tokio::test]
    async fn test_known_position_resolved_by_normalized_name() {
        let store = MemoryStore::with_positions(&["Backend Engineer", UNKNOWN_POSITION]);
        let provider = Arc::new(ScriptedProvider::answering_for("backend-engineer"));
        let pipeline = pipeline_with(&store, provider);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(store.summaries().await[0].position_name, "Backend Engineer");
    }

    #[tokio::test]
    async fn test_missing_unknown_sentinel_fails_at_post_llm() {
        let store = MemoryStore::with_positions(&["Backend Engineer"]);
        let provider = Arc::new(ScriptedProvider::answering_for("Data Scientist"));
        let pipeline = pipeline_with(&store, provider);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Failed);
        assert_eq!(ledger.error_code, Some(ErrorCode::FailedAtPostLlm));
        assert!(!ErrorCode::FailedAtPostLlm.is_retryable());
        assert!(store.summaries().await.is_empty());
    }

    struct CrashBeforeOutbox;

    impl FaultHook for CrashBeforeOutbox {
        fn before_outbox(&self) -> Result<(), String> {
            Err("injected".into())
        }
    }

    #[tokio::test]
    async fn test_completion_fault_leaves_no_summary_or_event() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let writer = CompletionWriter::new(Arc::new(store.clone()))
            .with_fault_hook(Arc::new(CrashBeforeOutbox));
        let pipeline = pipeline_with(&store, provider).with_completion_writer(writer);
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Failed);
        assert_eq!(ledger.error_code, Some(ErrorCode::CompletionFailed));
        assert!(ledger.result_summary_id.is_none());
        assert!(store.summaries().await.is_empty());
        assert!(store.outbox().await.is_empty());
    }

    #[tokio::test]
    async fn test_admin_reprocess_reuses_unsummarized_snapshot() {
        let store = MemoryStore::new();
        let failing = pipeline_with(
            &store,
            Arc::new(ScriptedProvider::new(Script::Fail("connection reset".into()))),
        );
        let req = minimal_jd("req-1");
        let id = admit(&failing, &req).await;
        let failed = failing.run(id, &req, DecisionMode::Standard).await.unwrap();
        assert_eq!(failed.status, LedgerStatus::Failed);
        let snapshot_id = failed.result_snapshot_id.unwrap();

        let healthy = pipeline_with(&store, Arc::new(ScriptedProvider::answering_for("UNKNOWN")));

        let replay = minimal_jd("req-1-replay");
        let replay_id = admit(&healthy, &replay).await;
        let ledger = healthy
            .run(replay_id, &replay, DecisionMode::Standard)
            .await
            .unwrap();
        assert_eq!(ledger.status, LedgerStatus::Duplicate);
        assert_eq!(ledger.result_summary_id, None);

        let reprocess = minimal_jd("req-1-reprocess");
        let reprocess_id = admit(&healthy, &reprocess).await;
        let ledger = healthy
            .run(reprocess_id, &reprocess, DecisionMode::AdminReprocess)
            .await
            .unwrap();

        assert_eq!(ledger.status, LedgerStatus::Completed);
        assert_eq!(ledger.result_snapshot_id, Some(snapshot_id));
        assert_eq!(store.snapshots().await.len(), 1);
        assert_eq!(store.summaries().await[0].snapshot_id, snapshot_id);
    }

    #[tokio::test]
    async fn test_invalid_request_never_gets_a_ledger() {
        let store = MemoryStore::new();
        let pipeline = pipeline_with(&store, Arc::new(ScriptedProvider::answering_for("UNKNOWN")));
        let req = request("req-1", sections(&[("benefits", &["Free lunch every day"])]));

        let err = pipeline.admit(&req).await.unwrap_err();

        assert!(matches!(err, AdmissionError::Validation(_)));
        assert!(store.ledgers().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_runs_in_background_and_ignores_redelivery() {
        let store = MemoryStore::new();
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_with(&store, provider.clone());

        let first = pipeline
            .submit(minimal_jd("req-1"), DecisionMode::Standard)
            .await
            .unwrap();
        assert!(first.fresh);
        let ledger = wait_for_terminal(&store, first.ledger.id).await;
        assert_eq!(ledger.status, LedgerStatus::Completed);

        let again = pipeline
            .submit(minimal_jd("req-1"), DecisionMode::Standard)
            .await
            .unwrap();
        assert!(!again.fresh);
        assert_eq!(again.ledger.id, first.ledger.id);
        assert_eq!(again.ledger.status, LedgerStatus::Completed);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_recover_interrupted_fails_stale_ledgers() {
        let store = MemoryStore::new();
        let pipeline = pipeline_with(&store, Arc::new(ScriptedProvider::answering_for("UNKNOWN")));
        let stale_id = admit(&pipeline, &minimal_jd("req-stale")).await;
        let live_id = admit(&pipeline, &minimal_jd("req-live")).await;
        store
            .backdate_ledger(stale_id, Utc::now() - chrono::Duration::hours(1))
            .await;

        let recovered = pipeline
            .recover_interrupted(Utc::now() - chrono::Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(recovered, 1);
        let stale = store.get_ledger(stale_id).await.unwrap().unwrap();
        assert_eq!(stale.status, LedgerStatus::Failed);
        assert_eq!(stale.error_code, Some(ErrorCode::Interrupted));
        let live = store.get_ledger(live_id).await.unwrap().unwrap();
        assert_eq!(live.status, LedgerStatus::Received);
    }

    #[tokio::test]
    async fn test_url_duplicate_of_summarized_posting() {
        let store = MemoryStore::new();
        let pipeline = pipeline_with(&store, Arc::new(ScriptedProvider::answering_for("UNKNOWN")));
        let mut first = minimal_jd("req-1");
        first.source = SourceType::Url;
        first.source_url = Some("https://jobs.acme.test/42".into());
        let first_id = admit(&pipeline, &first).await;
        pipeline.run(first_id, &first, DecisionMode::Standard).await.unwrap();

        let mut edited = request(
            "req-2",
            sections(&[
                ("responsibilities", &["Plan quarterly marketing campaigns"]),
                ("requirements", &["Five years in brand strategy"]),
            ]),
        );
        edited.source = SourceType::Url;
        edited.source_url = Some("https://jobs.acme.test/42".into());
        let edited_id = admit(&pipeline, &edited).await;
        let ledger = pipeline
            .run(edited_id, &edited, DecisionMode::Standard)
            .await
            .unwrap();

        assert_eq!(ledger.status, LedgerStatus::Duplicate);
        assert_eq!(ledger.duplicate_reason, Some(DuplicateReason::Url));
        let outbox = store.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].payload["source_url"], json!("https://jobs.acme.test/42"));
    }

    #[tokio::test]
    async fn test_lost_snapshot_race_folds_into_hash_duplicate() {
        let inner = MemoryStore::new();
        let req = minimal_jd("req-2");
        let winner = SnapshotRow::capture(&req, &canonical::fingerprint(&req.section_map));
        inner.insert_snapshot(&winner).await.unwrap();

        let store = FaultyStore {
            inner: inner.clone(),
            blind_content_lookups: true,
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_over(store, provider.clone());
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Duplicate);
        assert_eq!(ledger.duplicate_reason, Some(DuplicateReason::Hash));
        assert_eq!(ledger.result_snapshot_id, Some(winner.id));
        assert_eq!(ledger.result_summary_id, None);
        assert_eq!(inner.snapshots().await.len(), 1);
        assert!(inner.summaries().await.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_summarizing_write_failure_fails_the_ledger() {
        let inner = MemoryStore::new();
        let store = FaultyStore {
            inner: inner.clone(),
            refuse_summarizing: true,
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::answering_for("UNKNOWN"));
        let pipeline = pipeline_over(store, provider.clone());
        let req = minimal_jd("req-1");
        let id = admit(&pipeline, &req).await;

        let ledger = pipeline.run(id, &req, DecisionMode::Standard).await.unwrap();

        assert_eq!(ledger.status, LedgerStatus::Failed);
        assert_eq!(ledger.error_code, Some(ErrorCode::SnapshotWriteFailed));
        assert_eq!(inner.snapshots().await.len(), 1);
        assert_eq!(provider.call_count(), 0);
    }
}

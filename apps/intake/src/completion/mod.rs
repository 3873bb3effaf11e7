//! Completion Writer — summary, outbox event and the COMPLETED transition commit together.
//!
//! Steps inside the unit of work:
//! 1. get-or-create brand and brand-position
//! 2. insert the summary (1:1 with the snapshot)
//! 3. append the `JD_SUMMARY_CREATED` outbox event
//! 4. move the ledger to COMPLETED
//!
//! Any error drops the unit of work, which rolls all of it back. The company-candidate
//! side action runs only after commit, on its own task.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::LedgerTransition;
use crate::models::catalog::PositionRow;
use crate::models::ledger::LedgerRow;
use crate::models::outbox::{NewOutboxEvent, AGGREGATE_JD_SUMMARY, EVENT_JD_SUMMARY_CREATED};
use crate::models::summary::{SummaryProjection, SummaryRow};
use crate::store::{Store, StoreError};
use crate::summarize::SummaryResult;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Injected fault: {0}")]
    Injected(String),
}

/// Fault injection point between the summary insert and the outbox append.
pub trait FaultHook: Send + Sync {
    fn before_outbox(&self) -> Result<(), String>;
}

/// What a successful completion produced.
#[derive(Debug, Clone)]
pub struct Completed {
    pub summary: SummaryRow,
    pub outbox_event_id: i64,
    pub ledger: LedgerRow,
}

/// Where the summary gets bound.
#[derive(Debug, Clone, Copy)]
pub struct CompletionTarget<'a> {
    pub ledger_id: Uuid,
    pub snapshot_id: Uuid,
    pub source_url: Option<&'a str>,
}

#[derive(Clone)]
pub struct CompletionWriter {
    store: Arc<dyn Store>,
    fault_hook: Option<Arc<dyn FaultHook>>,
}

impl CompletionWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            fault_hook: None,
        }
    }

    pub fn with_fault_hook(mut self, hook: Arc<dyn FaultHook>) -> Self {
        self.fault_hook = Some(hook);
        self
    }

    pub async fn complete(
        &self,
        target: CompletionTarget<'_>,
        position: &PositionRow,
        result: &SummaryResult,
    ) -> Result<Completed, CompletionError> {
        let mut uow = self.store.begin().await?;

        let brand = uow.get_or_create_brand(&result.brand_name).await?;
        let brand_position_id = uow
            .get_or_create_brand_position(brand.id, position.id)
            .await?;

        let summary = SummaryRow {
            id: Uuid::new_v4(),
            snapshot_id: target.snapshot_id,
            brand_id: brand.id,
            brand_name: brand.name.clone(),
            position_id: position.id,
            position_name: position.name.clone(),
            brand_position_id,
            category_name: result.category_name.clone(),
            career_type: result.career_type.clone(),
            career_min_years: result.career_min_years,
            summary_text: result.summary.clone(),
            responsibilities: result.responsibilities.clone(),
            required_qualifications: result.required_qualifications.clone(),
            preferred_qualifications: result.preferred_qualifications.clone(),
            source_url: target.source_url.map(String::from),
            insight: result.insight.clone(),
            created_at: Utc::now(),
        };
        uow.insert_summary(&summary).await?;

        if let Some(hook) = &self.fault_hook {
            hook.before_outbox().map_err(CompletionError::Injected)?;
        }

        let payload = serde_json::to_value(SummaryProjection::from(&summary))
            .map_err(StoreError::from)?;
        let outbox_event_id = uow
            .append_outbox(&NewOutboxEvent {
                aggregate_type: AGGREGATE_JD_SUMMARY.to_string(),
                aggregate_id: summary.id,
                event_type: EVENT_JD_SUMMARY_CREATED.to_string(),
                payload,
                occurred_at: summary.created_at,
            })
            .await?;

        let ledger = uow
            .transition_ledger(
                target.ledger_id,
                LedgerTransition::Completed {
                    summary_id: summary.id,
                },
            )
            .await?;

        uow.commit().await?;
        info!(
            "Ledger {} COMPLETED: summary {} for snapshot {} (outbox #{})",
            target.ledger_id, summary.id, summary.snapshot_id, outbox_event_id
        );

        if let Some(company) = &result.company_name {
            self.spawn_company_candidate(&result.brand_name, company);
        }

        Ok(Completed {
            summary,
            outbox_event_id,
            ledger,
        })
    }

    /// Fire-and-forget. Failure is logged and never reaches the ledger.
    fn spawn_company_candidate(&self, brand_name: &str, company_name: &str) {
        let store = Arc::clone(&self.store);
        let brand = brand_name.to_string();
        let company = company_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.record_company_candidate(&brand, &company).await {
                warn!("Could not record company candidate '{company}' for {brand}: {e}");
            }
        });
    }
}

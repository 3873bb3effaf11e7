//! Storage seam for the pipeline.
//!
//! `Store` is carried as `Arc<dyn Store>`; Postgres in production, in-memory for local
//! runs and tests. Multi-row writes that must land together go through `UnitOfWork`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{InvalidTransition, LedgerTransition};
use crate::models::catalog::{BrandRow, PositionRow};
use crate::models::ledger::LedgerRow;
use crate::models::outbox::{NewOutboxEvent, OutboxEventRow};
use crate::models::snapshot::{SnapshotMatch, SnapshotRow};
use crate::models::summary::SummaryRow;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Bound on candidate rows returned by suspect queries.
pub const MAX_SUSPECTS: usize = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger {0} not found")]
    LedgerNotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of creating a ledger for a `request_id`.
#[derive(Debug, Clone)]
pub enum LedgerAdmission {
    Created(LedgerRow),
    /// The request was delivered before; the original ledger is returned untouched.
    Existing(LedgerRow),
}

/// Outcome of the write-once snapshot insert.
#[derive(Debug, Clone)]
pub enum SnapshotInsert {
    Inserted(SnapshotRow),
    /// Lost a race on `canonical_hash`; the caller folds this into the duplicate path.
    HashConflict {
        existing_snapshot_id: Uuid,
        existing_summary_id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarSnapshot {
    pub matched: SnapshotMatch,
    pub score: f64,
}

/// Read-only lookups used by the duplicate decision engine.
#[async_trait]
pub trait SnapshotQueries: Send + Sync {
    async fn find_by_canonical_hash(&self, hash: &str)
        -> Result<Option<SnapshotMatch>, StoreError>;

    async fn find_by_url(&self, url: &str, limit: usize)
        -> Result<Vec<SnapshotMatch>, StoreError>;

    async fn find_overlapping_date_range(
        &self,
        opened: Option<NaiveDate>,
        closed: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<SnapshotMatch>, StoreError>;

    /// Best trigram match on `core_text` at or above `threshold`.
    async fn find_similar_by_core_text(
        &self,
        text: &str,
        threshold: f64,
    ) -> Result<Option<SimilarSnapshot>, StoreError>;
}

#[async_trait]
pub trait Store: SnapshotQueries {
    /// Creates a RECEIVED ledger, or returns the existing one for a redelivered `request_id`.
    async fn create_ledger(&self, request_id: &str) -> Result<LedgerAdmission, StoreError>;

    async fn get_ledger(&self, id: Uuid) -> Result<Option<LedgerRow>, StoreError>;

    /// Applies a transition under a row lock. Fails without writing if the guard rejects it.
    async fn transition_ledger(
        &self,
        id: Uuid,
        transition: LedgerTransition,
    ) -> Result<LedgerRow, StoreError>;

    /// Non-terminal ledgers last touched before `older_than`.
    async fn list_stale_ledgers(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<LedgerRow>, StoreError>;

    async fn insert_snapshot(&self, snapshot: &SnapshotRow) -> Result<SnapshotInsert, StoreError>;

    async fn list_position_names(&self) -> Result<Vec<String>, StoreError>;

    async fn find_position_by_normalized_name(
        &self,
        normalized: &str,
    ) -> Result<Option<PositionRow>, StoreError>;

    async fn list_company_candidates(&self, brand_name: &str) -> Result<Vec<String>, StoreError>;

    /// Idempotent; a repeated candidate is a no-op.
    async fn record_company_candidate(
        &self,
        brand_name: &str,
        company_name: &str,
    ) -> Result<(), StoreError>;

    /// Undispatched outbox rows in append order.
    async fn fetch_pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEventRow>, StoreError>;

    async fn mark_outbox_dispatched(&self, ids: &[i64]) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// A set of writes that commit together or not at all.
///
/// Dropping a unit of work without calling `commit` rolls everything back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Get-or-create by normalized name; tolerant of concurrent creators.
    async fn get_or_create_brand(&mut self, name: &str) -> Result<BrandRow, StoreError>;

    async fn get_or_create_brand_position(
        &mut self,
        brand_id: Uuid,
        position_id: Uuid,
    ) -> Result<Uuid, StoreError>;

    /// Fails with `Conflict` if the snapshot already has a summary.
    async fn insert_summary(&mut self, summary: &SummaryRow) -> Result<(), StoreError>;

    async fn append_outbox(&mut self, event: &NewOutboxEvent) -> Result<i64, StoreError>;

    async fn transition_ledger(
        &mut self,
        id: Uuid,
        transition: LedgerTransition,
    ) -> Result<LedgerRow, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

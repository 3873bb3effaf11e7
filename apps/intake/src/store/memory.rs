//! In-memory store for local runs and tests. Not durable.
//!
//! All state sits behind one async mutex. A unit of work holds that mutex for its whole
//! lifetime and edits a private copy; `commit` swaps the copy in, dropping discards it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::canonical::trigram;
use crate::ledger::{self, LedgerTransition};
use crate::models::catalog::{normalize_name, BrandRow, PositionRow, UNKNOWN_POSITION};
use crate::models::ledger::{LedgerRow, LedgerStatus};
use crate::models::outbox::{NewOutboxEvent, OutboxEventRow};
use crate::models::snapshot::{SnapshotMatch, SnapshotRow};
use crate::models::summary::SummaryRow;
use crate::store::{
    LedgerAdmission, SimilarSnapshot, SnapshotInsert, SnapshotQueries, Store, StoreError,
    UnitOfWork,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    ledgers: HashMap<Uuid, LedgerRow>,
    ledger_by_request: HashMap<String, Uuid>,
    snapshots: Vec<SnapshotRow>,
    summaries: Vec<SummaryRow>,
    outbox: Vec<OutboxEventRow>,
    next_outbox_id: i64,
    brands: Vec<BrandRow>,
    positions: Vec<PositionRow>,
    /// (id, brand_id, position_id)
    brand_positions: Vec<(Uuid, Uuid, Uuid)>,
    /// (normalized brand, company name)
    company_candidates: Vec<(String, String)>,
}

impl MemoryState {
    fn matched(&self, snapshot: &SnapshotRow) -> SnapshotMatch {
        SnapshotMatch {
            snapshot: snapshot.clone(),
            summary_id: self
                .summaries
                .iter()
                .find(|s| s.snapshot_id == snapshot.id)
                .map(|s| s.id),
        }
    }

    fn transition(&mut self, id: Uuid, transition: LedgerTransition) -> Result<LedgerRow, StoreError> {
        let current = self.ledgers.get(&id).ok_or(StoreError::LedgerNotFound(id))?;
        let next = ledger::apply(current, transition, Utc::now())?;
        self.ledgers.insert(id, next.clone());
        Ok(next)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store whose position catalog holds only the UNKNOWN sentinel.
    pub fn new() -> Self {
        Self::with_positions(&[UNKNOWN_POSITION])
    }

    pub fn with_positions(names: &[&str]) -> Self {
        let state = MemoryState {
            positions: names
                .iter()
                .map(|name| PositionRow {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    normalized_name: normalize_name(name),
                })
                .collect(),
            next_outbox_id: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

#[async_trait]
impl SnapshotQueries for MemoryStore {
    async fn find_by_canonical_hash(&self, hash: &str) -> Result<Option<SnapshotMatch>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .find(|s| s.canonical_hash == hash)
            .map(|s| state.matched(s)))
    }

    async fn find_by_url(&self, url: &str, limit: usize) -> Result<Vec<SnapshotMatch>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.source_url.as_deref() == Some(url))
            .take(limit)
            .map(|s| state.matched(s))
            .collect())
    }

    async fn find_overlapping_date_range(
        &self,
        opened: Option<NaiveDate>,
        closed: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<SnapshotMatch>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.overlaps(opened, closed))
            .take(limit)
            .map(|s| state.matched(s))
            .collect())
    }

    async fn find_similar_by_core_text(
        &self,
        text: &str,
        threshold: f64,
    ) -> Result<Option<SimilarSnapshot>, StoreError> {
        let state = self.state.lock().await;
        let best = state
            .snapshots
            .iter()
            .map(|s| (s, trigram::similarity(&s.core_text, text)))
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best.map(|(s, score)| SimilarSnapshot {
            matched: state.matched(s),
            score,
        }))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_ledger(&self, request_id: &str) -> Result<LedgerAdmission, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.ledger_by_request.get(request_id) {
            let existing = state.ledgers.get(id).cloned().ok_or(StoreError::LedgerNotFound(*id))?;
            return Ok(LedgerAdmission::Existing(existing));
        }
        let row = LedgerRow::received(request_id);
        state.ledger_by_request.insert(request_id.to_string(), row.id);
        state.ledgers.insert(row.id, row.clone());
        Ok(LedgerAdmission::Created(row))
    }

    async fn get_ledger(&self, id: Uuid) -> Result<Option<LedgerRow>, StoreError> {
        Ok(self.state.lock().await.ledgers.get(&id).cloned())
    }

    async fn transition_ledger(
        &self,
        id: Uuid,
        transition: LedgerTransition,
    ) -> Result<LedgerRow, StoreError> {
        self.state.lock().await.transition(id, transition)
    }

    async fn list_stale_ledgers(&self, older_than: DateTime<Utc>) -> Result<Vec<LedgerRow>, StoreError> {
        let state = self.state.lock().await;
        let mut stale: Vec<LedgerRow> = state
            .ledgers
            .values()
            .filter(|l| {
                matches!(l.status, LedgerStatus::Received | LedgerStatus::Summarizing)
                    && l.updated_at < older_than
            })
            .cloned()
            .collect();
        stale.sort_by_key(|l| l.created_at);
        Ok(stale)
    }

    async fn insert_snapshot(&self, snapshot: &SnapshotRow) -> Result<SnapshotInsert, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .snapshots
            .iter()
            .find(|s| s.canonical_hash == snapshot.canonical_hash)
        {
            let matched = state.matched(existing);
            return Ok(SnapshotInsert::HashConflict {
                existing_snapshot_id: matched.snapshot.id,
                existing_summary_id: matched.summary_id,
            });
        }
        state.snapshots.push(snapshot.clone());
        Ok(SnapshotInsert::Inserted(snapshot.clone()))
    }

    async fn list_position_names(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.positions.iter().map(|p| p.name.clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn find_position_by_normalized_name(
        &self,
        normalized: &str,
    ) -> Result<Option<PositionRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .iter()
            .find(|p| p.normalized_name == normalized)
            .cloned())
    }

    async fn list_company_candidates(&self, brand_name: &str) -> Result<Vec<String>, StoreError> {
        let brand = normalize_name(brand_name);
        let state = self.state.lock().await;
        Ok(state
            .company_candidates
            .iter()
            .filter(|(b, _)| *b == brand)
            .map(|(_, company)| company.clone())
            .collect())
    }

    async fn record_company_candidate(
        &self,
        brand_name: &str,
        company_name: &str,
    ) -> Result<(), StoreError> {
        let brand = normalize_name(brand_name);
        let company = normalize_name(company_name);
        let mut state = self.state.lock().await;
        let known = state
            .company_candidates
            .iter()
            .any(|(b, c)| *b == brand && normalize_name(c) == company);
        if !known {
            state
                .company_candidates
                .push((brand, company_name.trim().to_string()));
        }
        Ok(())
    }

    async fn fetch_pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEventRow>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.dispatched_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_outbox_dispatched(&self, ids: &[i64]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for event in state.outbox.iter_mut().filter(|e| ids.contains(&e.id)) {
            event.dispatched_at.get_or_insert(now);
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, work }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn get_or_create_brand(&mut self, name: &str) -> Result<BrandRow, StoreError> {
        let normalized = normalize_name(name);
        if let Some(brand) = self.work.brands.iter().find(|b| b.normalized_name == normalized) {
            return Ok(brand.clone());
        }
        let brand = BrandRow {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            normalized_name: normalized,
        };
        self.work.brands.push(brand.clone());
        Ok(brand)
    }

    async fn get_or_create_brand_position(
        &mut self,
        brand_id: Uuid,
        position_id: Uuid,
    ) -> Result<Uuid, StoreError> {
        if let Some((id, _, _)) = self
            .work
            .brand_positions
            .iter()
            .find(|(_, b, p)| *b == brand_id && *p == position_id)
        {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        self.work.brand_positions.push((id, brand_id, position_id));
        Ok(id)
    }

    async fn insert_summary(&mut self, summary: &SummaryRow) -> Result<(), StoreError> {
        if self
            .work
            .summaries
            .iter()
            .any(|s| s.snapshot_id == summary.snapshot_id)
        {
            return Err(StoreError::Conflict(format!(
                "summary for snapshot {} already exists",
                summary.snapshot_id
            )));
        }
        self.work.summaries.push(summary.clone());
        Ok(())
    }

    async fn append_outbox(&mut self, event: &NewOutboxEvent) -> Result<i64, StoreError> {
        let id = self.work.next_outbox_id;
        self.work.next_outbox_id += 1;
        self.work.outbox.push(OutboxEventRow {
            id,
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            occurred_at: event.occurred_at,
            dispatched_at: None,
        });
        Ok(id)
    }

    async fn transition_ledger(
        &mut self,
        id: Uuid,
        transition: LedgerTransition,
    ) -> Result<LedgerRow, StoreError> {
        self.work.transition(id, transition)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut guard = this.guard;
        *guard = this.work;
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn snapshots(&self) -> Vec<SnapshotRow> {
        self.state.lock().await.snapshots.clone()
    }

    pub async fn summaries(&self) -> Vec<SummaryRow> {
        self.state.lock().await.summaries.clone()
    }

    pub async fn outbox(&self) -> Vec<OutboxEventRow> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn ledgers(&self) -> Vec<LedgerRow> {
        self.state.lock().await.ledgers.values().cloned().collect()
    }

    pub async fn brands(&self) -> Vec<BrandRow> {
        self.state.lock().await.brands.clone()
    }

    /// Backdates a ledger so restart recovery treats it as stale.
    pub async fn backdate_ledger(&self, id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(row) = self.state.lock().await.ledgers.get_mut(&id) {
            row.updated_at = updated_at;
        }
    }
}

//! Postgres store. Schema lives in `migrations/`.
//!
//! Enum-valued columns are stored as TEXT and parsed on read; a value the code does not
//! recognize surfaces as `StoreError::Corrupt` instead of a panic.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::canonical::SectionMap;
use crate::ledger::{self, LedgerTransition};
use crate::models::catalog::{normalize_name, BrandRow, PositionRow};
use crate::models::ledger::LedgerRow;
use crate::models::outbox::{NewOutboxEvent, OutboxEventRow};
use crate::models::snapshot::{SnapshotMatch, SnapshotRow};
use crate::models::summary::SummaryRow;
use crate::store::{
    LedgerAdmission, SimilarSnapshot, SnapshotInsert, SnapshotQueries, Store, StoreError,
    UnitOfWork,
};

const SNAPSHOT_MATCH_SELECT: &str = r#"
    SELECT s.id, s.source_type, s.source_url, s.canonical_section_map, s.core_text,
           s.canonical_hash, s.sim_fingerprint, s.recruitment_period_type,
           s.opened_date, s.closed_date, s.captured_at, m.id AS summary_id
    FROM jd_snapshots s
    LEFT JOIN jd_summaries m ON m.snapshot_id = s.id
"#;

#[derive(Debug, FromRow)]
struct LedgerRecord {
    id: Uuid,
    request_id: String,
    status: String,
    duplicate_reason: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    result_snapshot_id: Option<Uuid>,
    result_summary_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerRecord> for LedgerRow {
    type Error = StoreError;

    fn try_from(r: LedgerRecord) -> Result<Self, Self::Error> {
        Ok(LedgerRow {
            id: r.id,
            request_id: r.request_id,
            status: r.status.parse().map_err(StoreError::Corrupt)?,
            duplicate_reason: r
                .duplicate_reason
                .map(|v| v.parse())
                .transpose()
                .map_err(StoreError::Corrupt)?,
            error_code: r
                .error_code
                .map(|v| v.parse())
                .transpose()
                .map_err(StoreError::Corrupt)?,
            error_message: r.error_message,
            result_snapshot_id: r.result_snapshot_id,
            result_summary_id: r.result_summary_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotMatchRecord {
    id: Uuid,
    source_type: String,
    source_url: Option<String>,
    canonical_section_map: Json<SectionMap>,
    core_text: String,
    canonical_hash: String,
    sim_fingerprint: i64,
    recruitment_period_type: String,
    opened_date: Option<NaiveDate>,
    closed_date: Option<NaiveDate>,
    captured_at: DateTime<Utc>,
    summary_id: Option<Uuid>,
}

impl TryFrom<SnapshotMatchRecord> for SnapshotMatch {
    type Error = StoreError;

    fn try_from(r: SnapshotMatchRecord) -> Result<Self, Self::Error> {
        Ok(SnapshotMatch {
            snapshot: SnapshotRow {
                id: r.id,
                source_type: r.source_type.parse().map_err(StoreError::Corrupt)?,
                source_url: r.source_url,
                canonical_section_map: r.canonical_section_map.0,
                core_text: r.core_text,
                canonical_hash: r.canonical_hash,
                // BIGINT holds the fingerprint bit pattern.
                sim_fingerprint: r.sim_fingerprint as u64,
                recruitment_period_type: r
                    .recruitment_period_type
                    .parse()
                    .map_err(StoreError::Corrupt)?,
                opened_date: r.opened_date,
                closed_date: r.closed_date,
                captured_at: r.captured_at,
            },
            summary_id: r.summary_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct SimilarRecord {
    #[sqlx(flatten)]
    snapshot: SnapshotMatchRecord,
    score: f32,
}

fn matches_from(records: Vec<SnapshotMatchRecord>) -> Result<Vec<SnapshotMatch>, StoreError> {
    records.into_iter().map(SnapshotMatch::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Locks the ledger row, runs the transition guard, writes the result.
async fn transition_locked(
    conn: &mut PgConnection,
    id: Uuid,
    transition: LedgerTransition,
) -> Result<LedgerRow, StoreError> {
    let record: Option<LedgerRecord> =
        sqlx::query_as("SELECT * FROM intake_ledger WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    let current = LedgerRow::try_from(record.ok_or(StoreError::LedgerNotFound(id))?)?;
    let next = ledger::apply(&current, transition, Utc::now())?;

    sqlx::query(
        r#"
        UPDATE intake_ledger
        SET status = $2, duplicate_reason = $3, error_code = $4, error_message = $5,
            result_snapshot_id = $6, result_summary_id = $7, updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(next.id)
    .bind(next.status.as_str())
    .bind(next.duplicate_reason.map(|r| r.as_str()))
    .bind(next.error_code.map(|c| c.as_str()))
    .bind(next.error_message.as_deref())
    .bind(next.result_snapshot_id)
    .bind(next.result_summary_id)
    .bind(next.updated_at)
    .execute(&mut *conn)
    .await?;

    debug!("Ledger {} {} -> {}", id, current.status, next.status);
    Ok(next)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SIMILAR_SELECT: &str = r#"
    SELECT s.id, s.source_type, s.source_url, s.canonical_section_map, s.core_text,
           s.canonical_hash, s.sim_fingerprint, s.recruitment_period_type,
           s.opened_date, s.closed_date, s.captured_at, m.id AS summary_id,
           similarity(s.core_text, $1) AS score
    FROM jd_snapshots s
    LEFT JOIN jd_summaries m ON m.snapshot_id = s.id
    WHERE s.core_text % $1
    ORDER BY score DESC
    LIMIT 1
"#;

#[async_trait]
impl SnapshotQueries for PgStore {
    async fn find_by_canonical_hash(&self, hash: &str) -> Result<Option<SnapshotMatch>, StoreError> {
        let record: Option<SnapshotMatchRecord> =
            sqlx::query_as(&format!("{SNAPSHOT_MATCH_SELECT} WHERE s.canonical_hash = $1"))
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;
        record.map(SnapshotMatch::try_from).transpose()
    }

    async fn find_by_url(&self, url: &str, limit: usize) -> Result<Vec<SnapshotMatch>, StoreError> {
        let records: Vec<SnapshotMatchRecord> = sqlx::query_as(&format!(
            "{SNAPSHOT_MATCH_SELECT} WHERE s.source_url = $1 ORDER BY s.captured_at DESC LIMIT $2"
        ))
        .bind(url)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        matches_from(records)
    }

    async fn find_overlapping_date_range(
        &self,
        opened: Option<NaiveDate>,
        closed: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<SnapshotMatch>, StoreError> {
        let records: Vec<SnapshotMatchRecord> = sqlx::query_as(&format!(
            r#"{SNAPSHOT_MATCH_SELECT}
            WHERE (s.opened_date IS NOT NULL OR s.closed_date IS NOT NULL)
              AND COALESCE(s.opened_date, '-infinity'::date) <= COALESCE($2, 'infinity'::date)
              AND COALESCE($1, '-infinity'::date) <= COALESCE(s.closed_date, 'infinity'::date)
            ORDER BY s.captured_at DESC
            LIMIT $3"#
        ))
        .bind(opened)
        .bind(closed)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        matches_from(records)
    }

    async fn find_similar_by_core_text(
        &self,
        text: &str,
        threshold: f64,
    ) -> Result<Option<SimilarSnapshot>, StoreError> {
        // `%` uses the GIN trigram index; its cutoff is the session's similarity_threshold.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('pg_trgm.similarity_threshold', $1, true)")
            .bind(threshold.to_string())
            .execute(&mut *tx)
            .await?;
        let record: Option<SimilarRecord> = sqlx::query_as(SIMILAR_SELECT)
            .bind(text)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        record
            .map(|r| {
                Ok(SimilarSnapshot {
                    matched: SnapshotMatch::try_from(r.snapshot)?,
                    score: f64::from(r.score),
                })
            })
            .transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_ledger(&self, request_id: &str) -> Result<LedgerAdmission, StoreError> {
        let row = LedgerRow::received(request_id);
        let inserted: Option<LedgerRecord> = sqlx::query_as(
            r#"
            INSERT INTO intake_ledger (id, request_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (request_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(row.id)
        .bind(&row.request_id)
        .bind(row.status.as_str())
        .bind(row.created_at)
        .bind(row.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(record) => Ok(LedgerAdmission::Created(record.try_into()?)),
            None => {
                let existing: LedgerRecord =
                    sqlx::query_as("SELECT * FROM intake_ledger WHERE request_id = $1")
                        .bind(request_id)
                        .fetch_one(&self.pool)
                        .await?;
                Ok(LedgerAdmission::Existing(existing.try_into()?))
            }
        }
    }

    async fn get_ledger(&self, id: Uuid) -> Result<Option<LedgerRow>, StoreError> {
        let record: Option<LedgerRecord> =
            sqlx::query_as("SELECT * FROM intake_ledger WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(LedgerRow::try_from).transpose()
    }

    async fn transition_ledger(
        &self,
        id: Uuid,
        transition: LedgerTransition,
    ) -> Result<LedgerRow, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = transition_locked(&mut tx, id, transition).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn list_stale_ledgers(&self, older_than: DateTime<Utc>) -> Result<Vec<LedgerRow>, StoreError> {
        let records: Vec<LedgerRecord> = sqlx::query_as(
            r#"
            SELECT * FROM intake_ledger
            WHERE status IN ('RECEIVED', 'SUMMARIZING') AND updated_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(LedgerRow::try_from).collect()
    }

    async fn insert_snapshot(&self, snapshot: &SnapshotRow) -> Result<SnapshotInsert, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jd_snapshots
                (id, source_type, source_url, canonical_section_map, core_text, canonical_hash,
                 sim_fingerprint, recruitment_period_type, opened_date, closed_date, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (canonical_hash) DO NOTHING
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.source_type.as_str())
        .bind(snapshot.source_url.as_deref())
        .bind(Json(&snapshot.canonical_section_map))
        .bind(&snapshot.core_text)
        .bind(&snapshot.canonical_hash)
        .bind(snapshot.sim_fingerprint as i64)
        .bind(snapshot.recruitment_period_type.as_str())
        .bind(snapshot.opened_date)
        .bind(snapshot.closed_date)
        .bind(snapshot.captured_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(SnapshotInsert::Inserted(snapshot.clone()));
        }
        let existing = self
            .find_by_canonical_hash(&snapshot.canonical_hash)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "hash {} conflicted but no snapshot holds it",
                    snapshot.canonical_hash
                ))
            })?;
        Ok(SnapshotInsert::HashConflict {
            existing_snapshot_id: existing.snapshot.id,
            existing_summary_id: existing.summary_id,
        })
    }

    async fn list_position_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(sqlx::query_scalar("SELECT name FROM positions ORDER BY name")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_position_by_normalized_name(
        &self,
        normalized: &str,
    ) -> Result<Option<PositionRow>, StoreError> {
        Ok(sqlx::query_as::<_, PositionRow>(
            "SELECT id, name, normalized_name FROM positions WHERE normalized_name = $1",
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_company_candidates(&self, brand_name: &str) -> Result<Vec<String>, StoreError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT company_name FROM company_candidates
            WHERE brand_normalized_name = $1
            ORDER BY created_at
            "#,
        )
        .bind(normalize_name(brand_name))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_company_candidate(
        &self,
        brand_name: &str,
        company_name: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO company_candidates (brand_normalized_name, company_name, normalized_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (brand_normalized_name, normalized_name) DO NOTHING
            "#,
        )
        .bind(normalize_name(brand_name))
        .bind(company_name.trim())
        .bind(normalize_name(company_name))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEventRow>, StoreError> {
        Ok(sqlx::query_as::<_, OutboxEventRow>(
            r#"
            SELECT * FROM outbox_events
            WHERE dispatched_at IS NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn mark_outbox_dispatched(&self, ids: &[i64]) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox_events SET dispatched_at = now() WHERE id = ANY($1) AND dispatched_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(PgUnitOfWork {
            tx: self.pool.begin().await?,
        }))
    }
}

/// One Postgres transaction. Dropping it without `commit` rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn get_or_create_brand(&mut self, name: &str) -> Result<BrandRow, StoreError> {
        let normalized = normalize_name(name);
        let inserted: Option<BrandRow> = sqlx::query_as(
            r#"
            INSERT INTO brands (id, name, normalized_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (normalized_name) DO NOTHING
            RETURNING id, name, normalized_name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name.trim())
        .bind(&normalized)
        .fetch_optional(&mut *self.tx)
        .await?;

        match inserted {
            Some(brand) => Ok(brand),
            None => Ok(sqlx::query_as(
                "SELECT id, name, normalized_name FROM brands WHERE normalized_name = $1",
            )
            .bind(&normalized)
            .fetch_one(&mut *self.tx)
            .await?),
        }
    }

    async fn get_or_create_brand_position(
        &mut self,
        brand_id: Uuid,
        position_id: Uuid,
    ) -> Result<Uuid, StoreError> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO brand_positions (id, brand_id, position_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (brand_id, position_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(brand_id)
        .bind(position_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match inserted {
            Some(id) => Ok(id),
            None => Ok(sqlx::query_scalar(
                "SELECT id FROM brand_positions WHERE brand_id = $1 AND position_id = $2",
            )
            .bind(brand_id)
            .bind(position_id)
            .fetch_one(&mut *self.tx)
            .await?),
        }
    }

    async fn insert_summary(&mut self, summary: &SummaryRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jd_summaries
                (id, snapshot_id, brand_id, brand_name, position_id, position_name,
                 brand_position_id, category_name, career_type, career_min_years, summary_text,
                 responsibilities, required_qualifications, preferred_qualifications,
                 source_url, insight, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(summary.id)
        .bind(summary.snapshot_id)
        .bind(summary.brand_id)
        .bind(&summary.brand_name)
        .bind(summary.position_id)
        .bind(&summary.position_name)
        .bind(summary.brand_position_id)
        .bind(summary.category_name.as_deref())
        .bind(summary.career_type.as_deref())
        .bind(summary.career_min_years)
        .bind(&summary.summary_text)
        .bind(&summary.responsibilities)
        .bind(&summary.required_qualifications)
        .bind(summary.preferred_qualifications.as_deref())
        .bind(summary.source_url.as_deref())
        .bind(summary.insight.as_ref().map(Json))
        .bind(summary.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "summary for snapshot {} already exists",
                    summary.snapshot_id
                ))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    async fn append_outbox(&mut self, event: &NewOutboxEvent) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (aggregate_type, aggregate_id, event_type, payload, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn transition_ledger(
        &mut self,
        id: Uuid,
        transition: LedgerTransition,
    ) -> Result<LedgerRow, StoreError> {
        transition_locked(&mut self.tx, id, transition).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}

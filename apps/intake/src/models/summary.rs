use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::summarize::result::Insight;

/// Structured summary bound 1:1 to a snapshot (unique `snapshot_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub brand_id: Uuid,
    pub brand_name: String,
    pub position_id: Uuid,
    pub position_name: String,
    pub brand_position_id: Uuid,
    pub category_name: Option<String>,
    pub career_type: Option<String>,
    pub career_min_years: Option<i32>,
    pub summary_text: String,
    pub responsibilities: String,
    pub required_qualifications: String,
    pub preferred_qualifications: Option<String>,
    pub source_url: Option<String>,
    pub insight: Option<Insight>,
    pub created_at: DateTime<Utc>,
}

/// Projection carried in the outbox payload for downstream indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryProjection {
    pub summary_id: Uuid,
    pub snapshot_id: Uuid,
    pub brand_id: Uuid,
    pub brand_name: String,
    pub position_id: Uuid,
    pub position_name: String,
    pub category_name: Option<String>,
    pub career_type: Option<String>,
    pub summary_text: String,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&SummaryRow> for SummaryProjection {
    fn from(row: &SummaryRow) -> Self {
        Self {
            summary_id: row.id,
            snapshot_id: row.snapshot_id,
            brand_id: row.brand_id,
            brand_name: row.brand_name.clone(),
            position_id: row.position_id,
            position_name: row.position_name.clone(),
            category_name: row.category_name.clone(),
            career_type: row.career_type.clone(),
            summary_text: row.summary_text.clone(),
            source_url: row.source_url.clone(),
            created_at: row.created_at,
        }
    }
}

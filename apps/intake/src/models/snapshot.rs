use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::{Fingerprints, SectionMap};
use crate::intake::{IntakeRequest, RecruitmentPeriodType, SourceType};

/// Immutable record of an accepted submission. `canonical_hash` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: Uuid,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub canonical_section_map: SectionMap,
    pub core_text: String,
    pub canonical_hash: String,
    pub sim_fingerprint: u64,
    pub recruitment_period_type: RecruitmentPeriodType,
    pub opened_date: Option<NaiveDate>,
    pub closed_date: Option<NaiveDate>,
    pub captured_at: DateTime<Utc>,
}

impl SnapshotRow {
    pub fn capture(request: &IntakeRequest, fingerprints: &Fingerprints) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_type: request.source,
            source_url: request.url_source().map(String::from),
            canonical_section_map: request.section_map.clone(),
            core_text: fingerprints.core_text.clone(),
            canonical_hash: fingerprints.canonical_hash.clone(),
            sim_fingerprint: fingerprints.sim_fingerprint,
            recruitment_period_type: request.recruitment_period_type,
            opened_date: request.opened_date,
            closed_date: request.closed_date,
            captured_at: Utc::now(),
        }
    }

    /// Open-ended ranges extend to the far past/future, same as an unset end date.
    pub fn overlaps(&self, opened: Option<NaiveDate>, closed: Option<NaiveDate>) -> bool {
        if self.opened_date.is_none() && self.closed_date.is_none() {
            return false;
        }
        let self_start = self.opened_date.unwrap_or(NaiveDate::MIN);
        let self_end = self.closed_date.unwrap_or(NaiveDate::MAX);
        let start = opened.unwrap_or(NaiveDate::MIN);
        let end = closed.unwrap_or(NaiveDate::MAX);
        self_start <= end && start <= self_end
    }
}

/// A snapshot plus the summary bound to it, if one has been completed.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMatch {
    pub snapshot: SnapshotRow,
    pub summary_id: Option<Uuid>,
}

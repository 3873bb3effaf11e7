use tracing::{debug, info};

use crate::canonical::simhash::hamming_distance;
use crate::canonical::trigram;
use crate::canonical::Fingerprints;
use crate::dedup::{Decision, DecisionMode, DuplicateReason};
use crate::intake::IntakeRequest;
use crate::models::snapshot::SnapshotMatch;
use crate::store::{SnapshotQueries, StoreError, MAX_SUSPECTS};

/// SimHash matches when the Hamming distance is at most this many bits.
pub const DEFAULT_SIMHASH_MAX_DISTANCE: u32 = 3;

#[derive(Debug, Clone)]
pub struct DedupThresholds {
    pub simhash_max_distance: u32,
    pub trgm_threshold: f64,
}

impl Default for DedupThresholds {
    fn default() -> Self {
        Self {
            simhash_max_distance: DEFAULT_SIMHASH_MAX_DISTANCE,
            trgm_threshold: trigram::DEFAULT_THRESHOLD,
        }
    }
}

/// Cascade:
/// 1. exact canonical hash (all snapshots)
/// 2. same source URL already summarized
/// 3. SimHash distance over the suspect set
/// 4. trigram similarity on core text
///
/// The first rule that matches wins; later rules are never evaluated.
#[derive(Debug, Clone, Default)]
pub struct DuplicateDetector {
    thresholds: DedupThresholds,
}

impl DuplicateDetector {
    pub fn new(thresholds: DedupThresholds) -> Self {
        Self { thresholds }
    }

    /// Bounded candidate set: same-URL snapshots plus snapshots whose posting dates
    /// overlap the request's. Undated, non-URL submissions get no suspects.
    pub async fn collect_suspects<Q: SnapshotQueries + ?Sized>(
        &self,
        queries: &Q,
        request: &IntakeRequest,
    ) -> Result<Vec<SnapshotMatch>, StoreError> {
        let mut suspects: Vec<SnapshotMatch> = Vec::new();

        if let Some(url) = request.url_source() {
            suspects.extend(queries.find_by_url(url, MAX_SUSPECTS).await?);
        }

        if request.is_dated() {
            let dated = queries
                .find_overlapping_date_range(request.opened_date, request.closed_date, MAX_SUSPECTS)
                .await?;
            for candidate in dated {
                if !suspects.iter().any(|s| s.snapshot.id == candidate.snapshot.id) {
                    suspects.push(candidate);
                }
            }
        }

        suspects.truncate(MAX_SUSPECTS);
        debug!(
            "Collected {} suspects for request {}",
            suspects.len(),
            request.request_id
        );
        Ok(suspects)
    }

    pub async fn decide<Q: SnapshotQueries + ?Sized>(
        &self,
        queries: &Q,
        request: &IntakeRequest,
        fingerprints: &Fingerprints,
        suspects: &[SnapshotMatch],
        mode: DecisionMode,
    ) -> Result<Decision, StoreError> {
        // 1. Exact content
        if let Some(hit) = queries
            .find_by_canonical_hash(&fingerprints.canonical_hash)
            .await?
        {
            if hit.summary_id.is_none() && mode == DecisionMode::AdminReprocess {
                info!(
                    "Snapshot {} has no summary; reusing it for reprocess of {}",
                    hit.snapshot.id, request.request_id
                );
                return Ok(Decision::Reprocessable {
                    existing_snapshot_id: hit.snapshot.id,
                });
            }
            return Ok(duplicate(DuplicateReason::Hash, &hit));
        }

        // 2. Same URL, already summarized
        if let Some(url) = request.url_source() {
            if let Some(hit) = suspects.iter().find(|s| {
                s.summary_id.is_some() && s.snapshot.source_url.as_deref() == Some(url)
            }) {
                return Ok(duplicate(DuplicateReason::Url, hit));
            }
        }

        // 3. Near-identical by fingerprint
        if let Some((hit, distance)) = self.nearest_by_fingerprint(fingerprints.sim_fingerprint, suspects) {
            debug!("SimHash match at distance {distance} for {}", request.request_id);
            return Ok(duplicate(DuplicateReason::Simhash, hit));
        }

        // 4. Fuzzy text, most expensive
        if !fingerprints.core_text.is_empty() {
            if let Some(similar) = queries
                .find_similar_by_core_text(&fingerprints.core_text, self.thresholds.trgm_threshold)
                .await?
            {
                debug!(
                    "Trigram match {:.3} for {}",
                    similar.score, request.request_id
                );
                return Ok(duplicate(DuplicateReason::Trgm, &similar.matched));
            }
        }

        Ok(Decision::NotDuplicate)
    }

    /// Closest suspect within the SimHash threshold, if any.
    pub fn nearest_by_fingerprint<'a>(
        &self,
        fingerprint: u64,
        suspects: &'a [SnapshotMatch],
    ) -> Option<(&'a SnapshotMatch, u32)> {
        suspects
            .iter()
            .map(|s| (s, hamming_distance(fingerprint, s.snapshot.sim_fingerprint)))
            .filter(|(_, distance)| *distance <= self.thresholds.simhash_max_distance)
            .min_by_key(|(_, distance)| *distance)
    }
}

fn duplicate(reason: DuplicateReason, hit: &SnapshotMatch) -> Decision {
    Decision::Duplicate {
        reason,
        existing_snapshot_id: hit.snapshot.id,
        existing_summary_id: hit.summary_id,
    }
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::dedup::DecisionMode;
use crate::errors::AppError;
use crate::intake::IntakeRequest;
use crate::models::ledger::{LedgerRow, LedgerStatus};
use crate::pipeline::Admission;
use crate::state::AppState;
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub ledger_id: Uuid,
    pub status: LedgerStatus,
    /// True when the `request_id` was already known and no new run was started.
    pub redelivered: bool,
}

impl From<Admission> for AcceptedResponse {
    fn from(admission: Admission) -> Self {
        Self {
            ledger_id: admission.ledger.id,
            status: admission.ledger.status,
            redelivered: !admission.fresh,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    #[serde(flatten)]
    pub ledger: LedgerRow,
    pub terminal: bool,
    /// Present on FAILED ledgers: whether replaying the request may succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// POST /api/v1/intake
pub async fn handle_intake(
    State(state): State<AppState>,
    Json(req): Json<IntakeRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let admission = state.pipeline.submit(req, DecisionMode::Standard).await?;
    Ok((StatusCode::ACCEPTED, Json(admission.into())))
}

/// POST /api/v1/admin/reprocess
///
/// The body is a full intake request carrying a fresh `request_id`; a hash hit on a
/// snapshot without a summary reuses that snapshot.
pub async fn handle_reprocess(
    State(state): State<AppState>,
    Json(req): Json<IntakeRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let admission = state
        .pipeline
        .submit(req, DecisionMode::AdminReprocess)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(admission.into())))
}

/// GET /api/v1/intake/:id
pub async fn handle_get_ledger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LedgerResponse>, AppError> {
    let ledger = state
        .store
        .get_ledger(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ledger {id} not found")))?;
    let retryable = ledger.error_code.map(|code| code.is_retryable());
    Ok(Json(LedgerResponse {
        terminal: ledger.status.is_terminal(),
        ledger,
        retryable,
    }))
}

//! services/api/src/web/checkins.rs
//!
//! Check-in submission and the per-day review listing.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use checkin_core::{CheckIn, CheckInStatus, ProofUpload};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::web::rest::ensure_member;
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct CheckInResponse {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub status: String,
    pub screenshot_ref: Option<String>,
    pub locked: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CheckIn> for CheckInResponse {
    fn from(c: CheckIn) -> Self {
        Self {
            id: c.id,
            challenge_id: c.challenge_id,
            user_id: c.user_id,
            date: c.date,
            status: c.status.as_str().to_string(),
            screenshot_ref: c.screenshot_ref,
            locked: c.locked,
            source: c.source.as_str().to_string(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// One row of the day review, with the author's name and a short-lived proof link.
#[derive(Serialize, ToSchema)]
pub struct DayCheckInResponse {
    pub user_id: Uuid,
    pub display_name: String,
    pub status: String,
    pub locked: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub proof_url: Option<String>,
}

/// Record today's check-in for the caller.
///
/// Accepts multipart/form-data with a `status` text part (`success` or `fail`)
/// and an optional `proof` file part.
#[utoipa::path(
    post,
    path = "/challenges/{id}/check-ins",
    params(("id" = Uuid, Path, description = "Challenge id")),
    request_body(content_type = "multipart/form-data", description = "`status` and an optional `proof` image."),
    responses(
        (status = 201, description = "Check-in recorded", body = CheckInResponse),
        (status = 400, description = "Missing or unknown status"),
        (status = 403, description = "Caller is not a member"),
        (status = 409, description = "The day is already judged (CHECKIN_LOCKED_FINAL)"),
        (status = 422, description = "Deadline passed or screenshot missing"),
        (status = 502, description = "Proof upload failed")
    )
)]
pub async fn submit_check_in_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(challenge_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut status = None;
    let mut proof = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart data: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("status") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read status: {}", e)))?;
                let parsed = text
                    .trim()
                    .parse::<CheckInStatus>()
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                status = Some(parsed);
            }
            Some("proof") => {
                let file_name = field.file_name().unwrap_or("proof").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("Failed to read file bytes: {}", e))
                })?;
                // An empty file part means no proof was attached.
                if !bytes.is_empty() {
                    proof = Some(ProofUpload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    let status =
        status.ok_or_else(|| ApiError::BadRequest("the `status` field is required".to_string()))?;

    let check_in = state
        .submitter
        .submit(user_id, challenge_id, status, proof)
        .await?;

    Ok((StatusCode::CREATED, Json(CheckInResponse::from(check_in))))
}

/// Every check-in of one challenge day, for members to review each other's proofs.
#[utoipa::path(
    get,
    path = "/challenges/{id}/days/{date}/check-ins",
    params(
        ("id" = Uuid, Path, description = "Challenge id"),
        ("date" = NaiveDate, Path, description = "Calendar date, YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Check-ins in submission order", body = [DayCheckInResponse]),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn list_day_check_ins_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((challenge_id, date)): Path<(Uuid, NaiveDate)>,
) -> ApiResult<Json<Vec<DayCheckInResponse>>> {
    ensure_member(&state, challenge_id, user_id).await?;

    let names: HashMap<Uuid, String> = state
        .members
        .list_members(challenge_id)
        .await?
        .into_iter()
        .map(|m| (m.user_id, m.display_name))
        .collect();
    let check_ins = state.ledger.list_check_ins_for_date(challenge_id, date).await?;

    let mut rows = Vec::with_capacity(check_ins.len());
    for check_in in check_ins {
        let proof_url = match &check_in.screenshot_ref {
            Some(blob_ref) => {
                match state
                    .blobs
                    .signed_url(blob_ref, state.config.signed_url_ttl)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(%challenge_id, user_id = %check_in.user_id, "Could not sign proof URL: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        rows.push(DayCheckInResponse {
            display_name: names
                .get(&check_in.user_id)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
            user_id: check_in.user_id,
            status: check_in.status.as_str().to_string(),
            locked: check_in.locked,
            source: check_in.source.as_str().to_string(),
            created_at: check_in.created_at,
            proof_url,
        });
    }

    Ok(Json(rows))
}

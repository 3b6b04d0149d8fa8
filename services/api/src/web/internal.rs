//! services/api/src/web/internal.rs
//!
//! Service-to-service endpoints. An external scheduler calls `/internal/evaluate`
//! to trigger a deadline evaluation pass; operators provision accounts through
//! `/internal/users`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use checkin_core::{EvaluationRun, PassSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::web::auth::{display_name_or_default, hash_password, normalize_email, MIN_PASSWORD_LEN};
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct EvaluationRunResponse {
    pub challenge_id: Uuid,
    /// Absent when nothing was due for this challenge.
    pub evaluation_date: Option<NaiveDate>,
    pub members_processed: usize,
    pub fails_created: usize,
    pub already_final: usize,
    pub errors: usize,
}

impl From<&EvaluationRun> for EvaluationRunResponse {
    fn from(run: &EvaluationRun) -> Self {
        Self {
            challenge_id: run.challenge_id,
            evaluation_date: run.evaluation_date,
            members_processed: run.members_processed,
            fails_created: run.fails_created,
            already_final: run.already_final,
            errors: run.errors,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PassSummaryResponse {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_fails_created: usize,
    pub errors: usize,
    pub runs: Vec<EvaluationRunResponse>,
}

impl From<&PassSummary> for PassSummaryResponse {
    fn from(summary: &PassSummary) -> Self {
        Self {
            started_at: summary.started_at,
            duration_ms: u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            total_fails_created: summary.total_fails_created,
            errors: summary.errors,
            runs: summary.runs.iter().map(EvaluationRunResponse::from).collect(),
        }
    }
}

/// Run one deadline evaluation pass now.
#[utoipa::path(
    post,
    path = "/internal/evaluate",
    params(("x-service-key" = String, Header, description = "Shared service key")),
    responses(
        (status = 200, description = "Pass summary", body = PassSummaryResponse),
        (status = 401, description = "Missing or wrong service key"),
        (status = 403, description = "No service key configured"),
        (status = 500, description = "Challenges could not be listed")
    )
)]
pub async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<PassSummaryResponse>> {
    let summary = state.evaluator.run_pass().await?;
    Ok(Json(PassSummaryResponse::from(&summary)))
}

#[derive(Deserialize, ToSchema)]
pub struct ProvisionUserRequest {
    pub email: String,
    /// A random password is generated when this is missing or too short.
    pub password: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ProvisionedUserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    /// Only present when the password was generated here.
    pub generated_password: Option<String>,
}

/// Create a ready-to-use account without going through signup.
#[utoipa::path(
    post,
    path = "/internal/users",
    params(("x-service-key" = String, Header, description = "Shared service key")),
    request_body = ProvisionUserRequest,
    responses(
        (status = 201, description = "Account created", body = ProvisionedUserResponse),
        (status = 400, description = "Missing or invalid email"),
        (status = 401, description = "Missing or wrong service key"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn provision_user_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProvisionUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = normalize_email(&req.email)?;
    let display_name = display_name_or_default(req.display_name, &email);

    let (password, generated_password) = match req.password {
        Some(p) if p.len() >= MIN_PASSWORD_LEN => (p, None),
        _ => {
            let generated = Uuid::new_v4().simple().to_string();
            (generated.clone(), Some(generated))
        }
    };
    let password_hash = hash_password(&password)?;

    let user = state
        .accounts
        .create_user_with_email(&email, &password_hash, &display_name)
        .await?;
    info!(user_id = %user.user_id, "User provisioned");

    Ok((
        StatusCode::CREATED,
        Json(ProvisionedUserResponse {
            user_id: user.user_id,
            email,
            display_name: user.display_name,
            generated_password,
        }),
    ))
}

//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the challenge endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use checkin_core::deadline::{parse_checkin_time, progress};
use checkin_core::{Challenge, ChallengeProgress, CheckInStatus, NewChallenge, Stake, StakeRule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::web::{auth, checkins, internal, state::AppState};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        create_challenge_handler,
        list_challenges_handler,
        preview_challenge_handler,
        get_challenge_handler,
        join_challenge_handler,
        rotate_join_code_handler,
        delete_challenge_handler,
        list_members_handler,
        challenge_stats_handler,
        checkins::submit_check_in_handler,
        checkins::list_day_check_ins_handler,
        internal::evaluate_handler,
        internal::provision_user_handler,
    ),
    components(
        schemas(
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            CreateChallengeRequest,
            ChallengeResponse,
            ChallengePreviewResponse,
            ProgressResponse,
            JoinChallengeRequest,
            JoinCodeResponse,
            MemberResponse,
            StatsResponse,
            MemberStatsResponse,
            CalendarDayResponse,
            checkins::CheckInResponse,
            checkins::DayCheckInResponse,
            internal::PassSummaryResponse,
            internal::EvaluationRunResponse,
            internal::ProvisionUserRequest,
            internal::ProvisionedUserResponse,
        )
    ),
    tags(
        (name = "Habit Check-in API", description = "Challenges, daily check-ins and their deadline evaluation.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateChallengeRequest {
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    /// Daily deadline in UTC, `HH:MM` or `HH:MM:SS`.
    pub checkin_time: String,
    #[serde(default)]
    pub screenshot_required: bool,
    pub stake_description: Option<String>,
    pub stake_amount: Option<i64>,
    pub stake_unit: Option<String>,
    /// `per_missed_day` (default) or `overall_fail`.
    pub stake_rule: Option<String>,
}

impl CreateChallengeRequest {
    fn into_domain(self) -> ApiResult<NewChallenge> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::BadRequest("title must not be empty".to_string()));
        }
        if self.start_date > self.end_date {
            return Err(ApiError::BadRequest(
                "start_date must not be after end_date".to_string(),
            ));
        }
        let checkin_time = parse_checkin_time(&self.checkin_time).map_err(|_| {
            ApiError::BadRequest(format!("'{}' is not a valid check-in time", self.checkin_time))
        })?;
        let stake_rule = match self.stake_rule.as_deref() {
            None => StakeRule::PerMissedDay,
            Some(raw) => raw
                .parse::<StakeRule>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        };

        Ok(NewChallenge {
            title,
            description: self.description.filter(|d| !d.trim().is_empty()),
            start_date: self.start_date,
            end_date: self.end_date,
            checkin_time,
            screenshot_required: self.screenshot_required,
            stake: Stake {
                description: self.stake_description,
                amount: self.stake_amount,
                unit: self.stake_unit,
            },
            stake_rule,
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    pub total_days: i64,
    pub days_elapsed: i64,
    pub percent: u8,
}

impl From<ChallengeProgress> for ProgressResponse {
    fn from(p: ChallengeProgress) -> Self {
        Self {
            total_days: p.total,
            days_elapsed: p.elapsed,
            percent: p.percent,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ChallengeResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub checkin_time: String,
    pub screenshot_required: bool,
    pub stake_description: Option<String>,
    pub stake_amount: Option<i64>,
    pub stake_unit: Option<String>,
    pub stake_rule: String,
    pub join_code: String,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub progress: ProgressResponse,
}

impl ChallengeResponse {
    fn new(challenge: Challenge, today: NaiveDate) -> Self {
        let progress = progress(today, challenge.start_date, challenge.end_date).into();
        Self {
            id: challenge.id,
            title: challenge.title,
            description: challenge.description,
            start_date: challenge.start_date,
            end_date: challenge.end_date,
            checkin_time: challenge.checkin_time.format("%H:%M:%S").to_string(),
            screenshot_required: challenge.screenshot_required,
            stake_description: challenge.stake.description,
            stake_amount: challenge.stake.amount,
            stake_unit: challenge.stake.unit,
            stake_rule: challenge.stake_rule.as_str().to_string(),
            join_code: challenge.join_code,
            creator_id: challenge.creator_id,
            created_at: challenge.created_at,
            progress,
        }
    }
}

/// What a prospective member sees before joining. Leaves out the join code and creator.
#[derive(Serialize, ToSchema)]
pub struct ChallengePreviewResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub checkin_time: String,
    pub screenshot_required: bool,
    pub stake_description: Option<String>,
    pub stake_rule: String,
    pub member_count: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct JoinChallengeRequest {
    pub join_code: String,
}

#[derive(Serialize, ToSchema)]
pub struct JoinCodeResponse {
    pub join_code: String,
}

#[derive(Serialize, ToSchema)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub display_name: String,
}

#[derive(Serialize, ToSchema)]
pub struct CalendarDayResponse {
    pub date: NaiveDate,
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct MemberStatsResponse {
    pub user_id: Uuid,
    pub display_name: String,
    pub success_days: i64,
    pub fail_days: i64,
}

#[derive(Serialize, ToSchema)]
pub struct StatsResponse {
    pub challenge_id: Uuid,
    pub progress: ProgressResponse,
    /// Ordered by success days, best first.
    pub leaderboard: Vec<MemberStatsResponse>,
    /// The caller's own days.
    pub calendar: Vec<CalendarDayResponse>,
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Rejects callers who are not members of the challenge.
pub(crate) async fn ensure_member(
    state: &AppState,
    challenge_id: Uuid,
    user_id: Uuid,
) -> ApiResult<()> {
    if state.members.is_member(challenge_id, user_id).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "You are not a member of this challenge.".to_string(),
        ))
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a challenge. The caller becomes its creator and first member.
#[utoipa::path(
    post,
    path = "/challenges",
    request_body = CreateChallengeRequest,
    responses(
        (status = 201, description = "Challenge created", body = ChallengeResponse),
        (status = 400, description = "Invalid dates, time or stake rule"),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn create_challenge_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateChallengeRequest>,
) -> ApiResult<impl IntoResponse> {
    let new = req.into_domain()?;
    let challenge = state.challenges.create_challenge(user_id, new).await?;
    info!(challenge_id = %challenge.id, creator_id = %user_id, "Challenge created");

    let today = state.clock.now().date_naive();
    Ok((
        StatusCode::CREATED,
        Json(ChallengeResponse::new(challenge, today)),
    ))
}

/// The caller's challenges, created or joined, newest first.
#[utoipa::path(
    get,
    path = "/challenges",
    responses(
        (status = 200, description = "The caller's challenges", body = [ChallengeResponse]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_challenges_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> ApiResult<Json<Vec<ChallengeResponse>>> {
    let today = state.clock.now().date_naive();
    let challenges = state.challenges.list_for_user(user_id).await?;
    Ok(Json(
        challenges
            .into_iter()
            .map(|c| ChallengeResponse::new(c, today))
            .collect(),
    ))
}

/// Look a challenge up by its invite code without joining it.
#[utoipa::path(
    get,
    path = "/challenges/by-code/{code}",
    params(("code" = String, Path, description = "Join code, any case")),
    responses(
        (status = 200, description = "Challenge preview", body = ChallengePreviewResponse),
        (status = 404, description = "Unknown join code")
    )
)]
pub async fn preview_challenge_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<ChallengePreviewResponse>> {
    let challenge = state.challenges.get_challenge_by_join_code(&code).await?;
    let member_count = state.members.list_members(challenge.id).await?.len();

    Ok(Json(ChallengePreviewResponse {
        id: challenge.id,
        title: challenge.title,
        description: challenge.description,
        start_date: challenge.start_date,
        end_date: challenge.end_date,
        checkin_time: challenge.checkin_time.format("%H:%M:%S").to_string(),
        screenshot_required: challenge.screenshot_required,
        stake_description: challenge.stake.description,
        stake_rule: challenge.stake_rule.as_str().to_string(),
        member_count,
    }))
}

#[utoipa::path(
    get,
    path = "/challenges/{id}",
    params(("id" = Uuid, Path, description = "Challenge id")),
    responses(
        (status = 200, description = "The challenge", body = ChallengeResponse),
        (status = 403, description = "Caller is not a member"),
        (status = 404, description = "No such challenge")
    )
)]
pub async fn get_challenge_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(challenge_id): Path<Uuid>,
) -> ApiResult<Json<ChallengeResponse>> {
    let challenge = state.challenges.get_challenge(challenge_id).await?;
    ensure_member(&state, challenge_id, user_id).await?;

    let today = state.clock.now().date_naive();
    Ok(Json(ChallengeResponse::new(challenge, today)))
}

/// Join a challenge by its invite code. Joining twice is harmless.
#[utoipa::path(
    post,
    path = "/challenges/join",
    request_body = JoinChallengeRequest,
    responses(
        (status = 200, description = "Joined", body = ChallengeResponse),
        (status = 404, description = "Unknown join code")
    )
)]
pub async fn join_challenge_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<JoinChallengeRequest>,
) -> ApiResult<Json<ChallengeResponse>> {
    let challenge = state
        .challenges
        .get_challenge_by_join_code(&req.join_code)
        .await?;
    state.members.join_challenge(challenge.id, user_id).await?;
    info!(challenge_id = %challenge.id, %user_id, "Member joined");

    let today = state.clock.now().date_naive();
    Ok(Json(ChallengeResponse::new(challenge, today)))
}

/// Issue a new join code; the old one stops working.
#[utoipa::path(
    post,
    path = "/challenges/{id}/join-code",
    params(("id" = Uuid, Path, description = "Challenge id")),
    responses(
        (status = 200, description = "The new code", body = JoinCodeResponse),
        (status = 403, description = "Only the creator may rotate the code")
    )
)]
pub async fn rotate_join_code_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(challenge_id): Path<Uuid>,
) -> ApiResult<Json<JoinCodeResponse>> {
    let join_code = state
        .challenges
        .rotate_join_code(challenge_id, user_id)
        .await?;
    Ok(Json(JoinCodeResponse { join_code }))
}

#[utoipa::path(
    delete,
    path = "/challenges/{id}",
    params(("id" = Uuid, Path, description = "Challenge id")),
    responses(
        (status = 204, description = "Deleted with its members and check-ins"),
        (status = 403, description = "Only the creator may delete")
    )
)]
pub async fn delete_challenge_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(challenge_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .challenges
        .delete_challenge(challenge_id, user_id)
        .await?;
    info!(%challenge_id, "Challenge deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/challenges/{id}/members",
    params(("id" = Uuid, Path, description = "Challenge id")),
    responses(
        (status = 200, description = "Members in join order", body = [MemberResponse]),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn list_members_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(challenge_id): Path<Uuid>,
) -> ApiResult<Json<Vec<MemberResponse>>> {
    ensure_member(&state, challenge_id, user_id).await?;
    let members = state.members.list_members(challenge_id).await?;
    Ok(Json(
        members
            .into_iter()
            .map(|m| MemberResponse {
                user_id: m.user_id,
                display_name: m.display_name,
            })
            .collect(),
    ))
}

/// Progress, the success leaderboard and the caller's own calendar.
#[utoipa::path(
    get,
    path = "/challenges/{id}/stats",
    params(("id" = Uuid, Path, description = "Challenge id")),
    responses(
        (status = 200, description = "Challenge statistics", body = StatsResponse),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn challenge_stats_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(challenge_id): Path<Uuid>,
) -> ApiResult<Json<StatsResponse>> {
    let challenge = state.challenges.get_challenge(challenge_id).await?;
    ensure_member(&state, challenge_id, user_id).await?;

    let members = state.members.list_members(challenge_id).await?;
    let successes: HashMap<Uuid, i64> = state
        .ledger
        .status_counts(challenge_id, CheckInStatus::Success)
        .await?
        .into_iter()
        .map(|c| (c.user_id, c.days))
        .collect();
    let fails: HashMap<Uuid, i64> = state
        .ledger
        .status_counts(challenge_id, CheckInStatus::Fail)
        .await?
        .into_iter()
        .map(|c| (c.user_id, c.days))
        .collect();

    let mut leaderboard: Vec<MemberStatsResponse> = members
        .into_iter()
        .map(|m| MemberStatsResponse {
            success_days: successes.get(&m.user_id).copied().unwrap_or(0),
            fail_days: fails.get(&m.user_id).copied().unwrap_or(0),
            user_id: m.user_id,
            display_name: m.display_name,
        })
        .collect();
    leaderboard.sort_by(|a, b| {
        b.success_days
            .cmp(&a.success_days)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });

    let calendar = state
        .ledger
        .user_calendar(challenge_id, user_id)
        .await?
        .into_iter()
        .map(|e| CalendarDayResponse {
            date: e.date,
            status: e.status.as_str().to_string(),
        })
        .collect();

    let today = state.clock.now().date_naive();
    Ok(Json(StatsResponse {
        challenge_id,
        progress: progress(today, challenge.start_date, challenge.end_date).into(),
        leaderboard,
        calendar,
    }))
}

//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkin_core::ledger::LedgerError;
use checkin_core::ports::PortError;
use checkin_core::{EvaluatorError, SubmissionError};
use serde_json::json;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

type Classified = (StatusCode, &'static str, String);

fn internal(err: &dyn std::fmt::Display) -> Classified {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_port(err: &PortError) -> Classified {
    match err {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        PortError::Invalid(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        PortError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        PortError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        PortError::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Authentication required".to_string(),
        ),
        PortError::Unexpected(_) => internal(err),
    }
}

fn classify_ledger(err: &LedgerError) -> Classified {
    let code = err.code();
    match err {
        LedgerError::CheckinLockedFinal => (
            StatusCode::CONFLICT,
            code,
            "This day has already been judged and can no longer be changed.".to_string(),
        ),
        LedgerError::CheckinDeadlinePassed { deadline } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            format!(
                "The check-in deadline for today passed at {}.",
                deadline.format("%H:%M UTC")
            ),
        ),
        LedgerError::OutsideChallengeWindow { start, end, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            format!("This challenge only accepts check-ins from {} to {}.", start, end),
        ),
        LedgerError::ScreenshotRequiredForSuccess => (
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            "This challenge requires a screenshot to check in as done.".to_string(),
        ),
        LedgerError::WriteConflict => (
            StatusCode::CONFLICT,
            code,
            "Your check-in was saved at the same time elsewhere. Please try again.".to_string(),
        ),
        LedgerError::ChallengeNotFound(id) => (
            StatusCode::NOT_FOUND,
            code,
            format!("Challenge {} not found", id),
        ),
        LedgerError::Port(port) => {
            tracing::error!(error = %port, "Ledger unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "The check-in could not be saved. Please try again.".to_string(),
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Port(err) => classify_port(err),
            ApiError::Ledger(err) => classify_ledger(err),
            ApiError::Submission(err) => match err {
                SubmissionError::Ledger(ledger) => classify_ledger(ledger),
                SubmissionError::NotAMember => (
                    StatusCode::FORBIDDEN,
                    "NOT_A_MEMBER",
                    "You are not a member of this challenge.".to_string(),
                ),
                SubmissionError::UploadFailed(source) => {
                    tracing::error!(error = %source, "Proof upload failed");
                    (
                        StatusCode::BAD_GATEWAY,
                        "UPLOAD_FAILED",
                        "The screenshot could not be uploaded. Please try again.".to_string(),
                    )
                }
                SubmissionError::MembershipLookupFailed(source) => internal(source),
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::Evaluator(err) => internal(err),
            ApiError::Config(err) => internal(err),
            ApiError::Database(err) => internal(err),
            ApiError::Migration(err) => internal(err),
            ApiError::Io(err) => internal(err),
            ApiError::Internal(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn ledger_failures_keep_their_codes() {
        let locked = ApiError::Ledger(LedgerError::CheckinLockedFinal).into_response();
        assert_eq!(locked.status(), StatusCode::CONFLICT);

        let deadline = Utc.with_ymd_and_hms(2024, 1, 10, 22, 0, 0).unwrap();
        let (status, code, message) =
            classify_ledger(&LedgerError::CheckinDeadlinePassed { deadline });
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "CHECKIN_DEADLINE_PASSED");
        assert!(message.contains("22:00"));
    }

    #[test]
    fn submission_errors_map_to_client_statuses() {
        let not_member = ApiError::Submission(SubmissionError::NotAMember).into_response();
        assert_eq!(not_member.status(), StatusCode::FORBIDDEN);

        let upload = ApiError::Submission(SubmissionError::UploadFailed(PortError::Unexpected(
            "bucket".to_string(),
        )))
        .into_response();
        assert_eq!(upload.status(), StatusCode::BAD_GATEWAY);

        let screenshot = ApiError::Submission(SubmissionError::Ledger(
            LedgerError::ScreenshotRequiredForSuccess,
        ))
        .into_response();
        assert_eq!(screenshot.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let (status, code, message) = classify_ledger(&LedgerError::OutsideChallengeWindow {
            date: "2024-02-05".parse().unwrap(),
            start: "2024-01-01".parse().unwrap(),
            end: "2024-01-31".parse().unwrap(),
        });
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "OUTSIDE_CHALLENGE_WINDOW");
        assert!(message.contains("2024-01-31"));
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let (status, code, message) = internal(&"password=hunter2");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "INTERNAL_ERROR");
        assert!(!message.contains("hunter2"));
    }
}

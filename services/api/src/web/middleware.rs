//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Reads the auth session id out of the `session` cookie.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie and extracts the user_id.
///
/// If valid, inserts the user_id into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_session_id = session_cookie(req.headers()).ok_or(ApiError::Unauthorized)?;

    let user_id = state
        .accounts
        .validate_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            debug!("Rejected auth session: {}", e);
            ApiError::Unauthorized
        })?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}

/// Guards the `/internal` routes with the shared service key.
pub async fn require_service_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state
        .config
        .service_key
        .as_deref()
        .ok_or_else(|| ApiError::Forbidden("internal endpoints are disabled".to_string()))?;

    let presented = req
        .headers()
        .get("x-service-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if !keys_match(presented, expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

/// Constant-time comparison of a presented key against the configured one.
fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_keys_must_match_exactly() {
        assert!(keys_match("test-service-key", "test-service-key"));
        assert!(!keys_match("test-service-kex", "test-service-key"));
        assert!(!keys_match("test-service", "test-service-key"));
        assert!(!keys_match("", "test-service-key"));
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark; session=abc123".parse().unwrap());
        assert_eq!(session_cookie(&headers), Some("abc123"));

        headers.insert(header::COOKIE, "session=".parse().unwrap());
        assert_eq!(session_cookie(&headers), None);
    }
}

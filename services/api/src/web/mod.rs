pub mod auth;
pub mod checkins;
pub mod files;
pub mod internal;
pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::{require_auth, require_service_key};
pub use state::{AppState, Stores};

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::{ApiError, ApiResult};
use rest::ApiDoc;

/// Proof images are capped at this size.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Builds the complete application router.
pub fn router(state: Arc<AppState>) -> ApiResult<Router> {
    let origin = state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {}", e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route(
            "/challenges/by-code/{code}",
            get(rest::preview_challenge_handler),
        )
        .route("/files/{*path}", get(files::serve_file_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/challenges",
            get(rest::list_challenges_handler).post(rest::create_challenge_handler),
        )
        .route("/challenges/join", post(rest::join_challenge_handler))
        .route(
            "/challenges/{id}",
            get(rest::get_challenge_handler).delete(rest::delete_challenge_handler),
        )
        .route(
            "/challenges/{id}/join-code",
            post(rest::rotate_join_code_handler),
        )
        .route("/challenges/{id}/members", get(rest::list_members_handler))
        .route("/challenges/{id}/stats", get(rest::challenge_stats_handler))
        .route(
            "/challenges/{id}/check-ins",
            post(checkins::submit_check_in_handler),
        )
        .route(
            "/challenges/{id}/days/{date}/check-ins",
            get(checkins::list_day_check_ins_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Service routes (shared key required)
    let internal_routes = Router::new()
        .route("/internal/evaluate", post(internal::evaluate_handler))
        .route("/internal/users", post(internal::provision_user_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_service_key,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(internal_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Merge the API router with the Swagger UI router for a complete application.
    Ok(Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())))
}

//! services/api/src/web/files.rs
//!
//! Serves proof images behind the signed links issued by `FsBlobStore`.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::web::state::AppState;
use checkin_core::ports::PortError;

#[derive(Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub sig: String,
}

fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

pub async fn serve_file_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<impl IntoResponse> {
    let files = state
        .proof_files
        .as_ref()
        .ok_or_else(|| ApiError::Port(PortError::NotFound("file serving is disabled".to_string())))?;

    files.verify(&path, query.expires, &query.sig)?;
    let bytes = files.read(&path).await?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&path)),
            (header::CACHE_CONTROL, "private, max-age=300"),
        ],
        bytes,
    ))
}

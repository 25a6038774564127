use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;

use super::super::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

/// Newest-first history of published (and dry-run) posts.
pub async fn list_threads(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT);
    let offset = params
        .get("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    match state.storage.list_posts(limit, offset).await {
        Ok(posts) => {
            let count = posts.len();
            Json(serde_json::json!({
                "success": true,
                "count": count,
                "threads": posts,
                "pagination": {
                    "limit": limit,
                    "offset": offset,
                    // A short page means we ran out of rows.
                    "has_more": count == limit,
                }
            }))
            .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

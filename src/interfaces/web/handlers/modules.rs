use axum::{
    Json,
    extract::{Query, State},
};
use std::collections::HashMap;

use super::super::AppState;

const DEFAULT_LIMIT: usize = 10;

/// Substring search over the module catalog. Tolerant of junk input: a
/// missing query matches everything, a malformed limit falls back to 10.
pub async fn search_modules(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let query = params.get("q").map(String::as_str).unwrap_or("");
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);

    let results = state.registry.search(query, limit);
    Json(serde_json::json!({
        "total": results.len(),
        "results": results,
    }))
}

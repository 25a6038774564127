use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_derive::Deserialize;
use tracing::info;

use super::super::AppState;
use super::super::auth::AuthedUser;

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    name: String,
}

/// Mint a bearer token for the caller. The raw token is returned exactly
/// once; only its hash is stored.
pub async fn create_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<CreateTokenRequest>,
) -> Response {
    if payload.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "success": false, "error": "token name must not be empty" })),
        )
            .into_response();
    }

    match state.storage.create_api_token(&user.0, &payload.name).await {
        Ok(token) => {
            info!(name = payload.name, "created API token");
            Json(serde_json::json!({ "success": true, "token": token })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_derive::Deserialize;
use std::collections::HashMap;
use tracing::info;

use super::super::AppState;
use super::super::auth::AuthedUser;
use crate::core::credentials::Platform;

/// The platform catalog: every platform the engine knows, its field
/// descriptors, and nothing secret.
pub async fn list_platforms() -> Json<serde_json::Value> {
    let platforms: Vec<serde_json::Value> = Platform::ALL
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id(),
                "display_name": p.display_name(),
                "fields": p.fields(),
            })
        })
        .collect();
    Json(serde_json::json!({ "success": true, "platforms": platforms }))
}

/// Which platforms the caller has stored credentials for. Values are never
/// returned, only presence.
pub async fn list_credentials(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    match state.vault.list_platforms(&user.0).await {
        Ok(configured) => {
            let platforms: Vec<serde_json::Value> = Platform::ALL
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id(),
                        "display_name": p.display_name(),
                        "configured": configured.iter().any(|c| c == p.id()),
                    })
                })
                .collect();
            Json(serde_json::json!({ "success": true, "credentials": platforms })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
pub struct StoreCredentialsRequest {
    platform: String,
    fields: HashMap<String, String>,
}

/// Store (replace) the caller's credential fields for one platform.
pub async fn store_credentials(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<StoreCredentialsRequest>,
) -> Response {
    let Some(platform) = Platform::parse(&payload.platform) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": format!("unknown platform '{}'", payload.platform)
            })),
        )
            .into_response();
    };

    let missing: Vec<&str> = platform
        .fields()
        .iter()
        .filter(|f| f.required)
        .map(|f| f.key)
        .filter(|key| {
            !payload
                .fields
                .get(*key)
                .is_some_and(|v| !v.trim().is_empty())
        })
        .collect();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": format!("missing required fields: {}", missing.join(", "))
            })),
        )
            .into_response();
    }

    match state
        .vault
        .store_fields(&user.0, platform, &payload.fields)
        .await
    {
        Ok(()) => {
            info!(platform = platform.id(), "stored credentials");
            Json(serde_json::json!({ "success": true, "platform": platform.id() }))
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn delete_credentials(
    Path(platform): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    let Some(platform) = Platform::parse(&platform) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": format!("unknown platform '{platform}'")
            })),
        )
            .into_response();
    };

    match state.vault.delete(&user.0, platform).await {
        Ok(deleted) => Json(serde_json::json!({ "success": true, "deleted": deleted })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

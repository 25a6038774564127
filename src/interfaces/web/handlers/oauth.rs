use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_derive::Deserialize;
use tracing::warn;

use super::super::AppState;
use super::super::auth::AuthedUser;
use crate::core::error::EngineError;
use crate::core::oauth;

pub async fn authorize_endpoint(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    let Some(provider) = oauth::provider(&provider) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "success": false, "error": format!("unknown provider '{provider}'") })),
        )
            .into_response();
    };

    let callback_url = state.callback_url(provider.name);
    match oauth::begin_authorization(&state.storage, &state.resolver, &provider, &user.0, &callback_url)
        .await
    {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            warn!(provider = provider.name, "authorization start failed: {e:#}");
            // Missing app credentials is the common operator mistake; the
            // error text already says which field to configure.
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct CallbackParams {
    state: String,
    code: String,
}

pub async fn callback_endpoint(
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(provider) = oauth::provider(&provider) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "success": false, "error": format!("unknown provider '{provider}'") })),
        )
            .into_response();
    };

    let callback_url = state.callback_url(provider.name);
    match oauth::complete_authorization(
        &state.storage,
        &state.vault,
        &state.resolver,
        &provider,
        &params.state,
        &params.code,
        &callback_url,
    )
    .await
    {
        Ok(user_id) => Json(serde_json::json!({
            "success": true,
            "provider": provider.name,
            "user_id": user_id,
            "message": "Authorization complete. Tokens stored."
        }))
        .into_response(),
        Err(e) => {
            warn!(provider = provider.name, "authorization callback failed: {e:#}");
            let status = match e.downcast_ref::<EngineError>() {
                Some(EngineError::InvalidState) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

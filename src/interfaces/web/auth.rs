use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

/// The user a request acts on behalf of, attached by `require_auth`.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

/// Loopback-only open access until at least one API token exists, bearer
/// tokens afterwards.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    // Bearer token, if presented, always wins.
    let raw_token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    if let Some(raw_token) = raw_token {
        return match state.storage.lookup_api_token(&raw_token).await {
            Ok(Some(user_id)) => {
                req.extensions_mut().insert(AuthedUser(user_id));
                next.run(req).await
            }
            _ => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Invalid or unauthorized API token" })),
            )
                .into_response(),
        };
    }

    let any_tokens_exist = state.storage.has_any_api_tokens().await.unwrap_or(false);

    // No tokens configured → allow open access only on loopback (safe for local dev)
    if !any_tokens_exist {
        let is_loopback = state.api_host == "127.0.0.1"
            || state.api_host == "::1"
            || state.api_host == "localhost";
        if is_loopback {
            req.extensions_mut().insert(AuthedUser("local".to_string()));
            return next.run(req).await;
        }
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "No API tokens configured. Create a token before exposing on a non-loopback address."
            })),
        )
            .into_response();
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Missing or invalid Authorization header. Use: Bearer <token>" })),
    )
        .into_response()
}

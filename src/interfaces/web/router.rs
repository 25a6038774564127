use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{chat, credentials, modules, oauth, threads, tokens, workflows};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    // Public routes that bypass auth: the OAuth provider redirects the
    // user-agent to the callback without any token, and module search is
    // read-only catalog data.
    let public_routes = Router::new()
        .route(
            "/api/auth/{provider}/callback",
            get(oauth::callback_endpoint),
        )
        .route("/api/modules/search", get(modules::search_modules))
        .layer(middleware::from_fn(security_headers))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route(
            "/api/auth/{provider}/authorize",
            get(oauth::authorize_endpoint),
        )
        .route("/api/threads", get(threads::list_threads))
        .route("/api/workflows", post(workflows::upsert_workflow))
        .route("/api/workflows/{id}", get(workflows::get_workflow))
        .route("/api/workflows/{id}/run", post(workflows::run_workflow))
        .route("/api/workflows/{id}/chat", post(chat::workflow_chat_endpoint))
        .route(
            "/api/credentials",
            get(credentials::list_credentials).post(credentials::store_credentials),
        )
        .route(
            "/api/credentials/platforms",
            get(credentials::list_platforms),
        )
        .route(
            "/api/credentials/{platform}",
            axum::routing::delete(credentials::delete_credentials),
        )
        .route("/api/tokens", post(tokens::create_token))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state.clone());

    public_routes.merge(authed_routes)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
        ),
    );
    response
}

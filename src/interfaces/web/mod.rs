pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::Result;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::credentials::CredentialResolver;
use crate::core::registry::ModuleRegistry;
use crate::core::storage::Storage;
use crate::core::vault::CredentialVault;
use crate::core::workflow::executor::WorkflowExecutor;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) storage: Storage,
    pub(crate) registry: Arc<ModuleRegistry>,
    pub(crate) executor: Arc<WorkflowExecutor>,
    pub(crate) resolver: CredentialResolver,
    pub(crate) vault: CredentialVault,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    /// Externally reachable base URL, when fronted by a proxy or tunnel.
    pub(crate) public_url: Option<String>,
    /// Alternate OpenAI-compatible endpoint for chat generation.
    pub(crate) llm_base_url: Option<String>,
}

impl AppState {
    /// Where the OAuth provider should send the user back to.
    pub(crate) fn callback_url(&self, provider: &str) -> String {
        let base = match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.api_host, self.api_port),
        };
        format!("{base}/api/auth/{provider}/callback")
    }
}

pub struct ApiServerConfig {
    pub storage: Storage,
    pub registry: Arc<ModuleRegistry>,
    pub executor: Arc<WorkflowExecutor>,
    pub resolver: CredentialResolver,
    pub vault: CredentialVault,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub public_url: Option<String>,
    pub llm_base_url: Option<String>,
}

pub async fn serve(config: ApiServerConfig) -> Result<()> {
    let addr = format!("{}:{}", config.api_host, config.api_port);
    let state = AppState {
        storage: config.storage,
        registry: config.registry,
        executor: config.executor,
        resolver: config.resolver,
        vault: config.vault,
        log_tx: config.log_tx,
        api_host: config.api_host,
        api_port: config.api_port,
        public_url: config.public_url,
        llm_base_url: config.llm_base_url,
    };
    let app = router::build_api_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server running at http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

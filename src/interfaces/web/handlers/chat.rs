use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use super::super::AppState;
use super::super::auth::AuthedUser;
use crate::core::credentials::Platform;
use crate::core::llm::{ChatMessage, DEFAULT_MODEL, OpenAiGenerator, TextGenerator};
use crate::core::workflow::executor::RunOptions;

#[derive(serde_derive::Deserialize)]
pub struct ChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    dry_run: bool,
}

/// Chat against a stored workflow: stream the generated assistant response
/// over SSE, then kick off the workflow with the raw user input as context.
/// The workflow run is decoupled from the stream; its failures are logged,
/// not surfaced mid-conversation.
pub async fn workflow_chat_endpoint(
    Path(workflow_id): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let workflow = match state.storage.get_workflow(&workflow_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "success": false,
                    "error": format!("workflow '{workflow_id}' not found")
                })),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let user_input = payload
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(32);
    let executor = state.executor.clone();
    let resolver = state.resolver.clone();
    let llm_base_url = state.llm_base_url.clone();
    let messages = payload.messages;
    let dry_run = payload.dry_run;
    let user_id = user.0;

    tokio::spawn(async move {
        match generate_response(&resolver, llm_base_url.as_deref(), &user_id, &messages).await {
            Ok(text) => {
                let _ = tx
                    .send(serde_json::json!({ "type": "response", "text": text }).to_string())
                    .await;
            }
            Err(e) => {
                let _ = tx
                    .send(
                        serde_json::json!({ "type": "error", "message": e.to_string() })
                            .to_string(),
                    )
                    .await;
            }
        }
        let _ = tx
            .send(serde_json::json!({ "type": "done" }).to_string())
            .await;
        // Close the stream here: the client has its response, and the
        // workflow below should not keep the connection open.
        drop(tx);

        // The workflow runs regardless of how generation went; the chat
        // input is what it was waiting for.
        let options = RunOptions {
            dry_run,
            context: Some(user_input),
        };
        let report = executor.run(&workflow.config, &user_id, &options).await;
        match &report.error {
            Some(error) => error!(
                workflow = workflow.id,
                "chat-triggered workflow failed: {error}"
            ),
            None => info!(
                workflow = workflow.id,
                status = ?report.status,
                "chat-triggered workflow finished"
            ),
        }
    });

    let stream = ReceiverStream::new(rx).map(|msg| Ok::<Event, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream).into_response()
}

async fn generate_response(
    resolver: &crate::core::credentials::CredentialResolver,
    base_url: Option<&str>,
    user_id: &str,
    messages: &[ChatMessage],
) -> anyhow::Result<String> {
    let credentials = resolver.resolve(user_id, Platform::OpenAi, None).await?;
    let api_key = credentials
        .get("api_key")
        .ok_or_else(|| anyhow::anyhow!("missing 'api_key' credential"))?;
    let generator = match base_url {
        Some(url) => OpenAiGenerator::with_base_url(api_key.clone(), url.to_string()),
        None => OpenAiGenerator::new(api_key.clone()),
    };
    generator.generate(DEFAULT_MODEL, messages).await
}

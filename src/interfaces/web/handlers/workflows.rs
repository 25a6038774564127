use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_derive::Deserialize;
use tracing::info;

use super::super::AppState;
use super::super::auth::AuthedUser;
use crate::core::storage::WorkflowRecord;
use crate::core::workflow::WorkflowConfig;
use crate::core::workflow::executor::RunOptions;

#[derive(Deserialize)]
pub struct UpsertWorkflowRequest {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    config: WorkflowConfig,
}

pub async fn upsert_workflow(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<UpsertWorkflowRequest>,
) -> Response {
    let record = WorkflowRecord {
        id: payload
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: payload.name,
        description: payload.description,
        user_id: user.0,
        config: payload.config,
    };

    match state.storage.upsert_workflow(&record).await {
        Ok(()) => {
            info!(workflow = record.id, "saved workflow");
            Json(serde_json::json!({ "success": true, "id": record.id })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn get_workflow(
    Path(workflow_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.storage.get_workflow(&workflow_id).await {
        Ok(Some(record)) => Json(serde_json::json!({
            "success": true,
            "id": record.id,
            "name": record.name,
            "description": record.description,
            "config": record.config,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "success": false,
                "error": format!("workflow '{workflow_id}' not found")
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Deserialize, Default)]
pub struct RunWorkflowRequest {
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    context: Option<String>,
}

/// Run a stored workflow synchronously and return the full step report.
pub async fn run_workflow(
    Path(workflow_id): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<RunWorkflowRequest>,
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

    let options = RunOptions {
        dry_run: payload.dry_run,
        context: payload.context,
    };
    let report = state.executor.run(&workflow.config, &user.0, &options).await;
    Json(serde_json::json!({ "success": true, "report": report })).into_response()
}

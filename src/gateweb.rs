//! HTTP interface for the gateway protocol
//!
//! Thin handlers over the progression engine and the completion recorder.
//! Every route runs the rate limiter first; errors map through the
//! `GateError` response conversion, except `AlreadyCompleted` on the
//! advance route, which resolves to 200 "already done".

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::analytics::{EventMetadata, TaskAction};
use crate::app_state::AppState;
use crate::errors::{GateError, GateResult};
use crate::gateway::GatewayDirectory;
use crate::session_store::SessionStore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub gateway_id: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub session_id: Option<String>,
    pub token: String,
    pub next_stage: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResponse {
    pub token: String,
    pub stage: u32,
    pub completed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub session_id: Option<String>,
    pub gateway_id: String,
    pub task_id: String,
    pub action: Option<TaskAction>,
    pub creator_id: Option<String>,
}

/// Build the gateway router with current and versioned routes plus health
/// endpoints.
pub fn build_gateway_router(state: Arc<AppState>) -> Router {
    Router::new()
        // current endpoints
        .route("/api/gateway/session", post(create_session))
        .route("/api/gateway/session/{id}", get(get_session))
        .route("/api/gateway/advance", post(advance_stage))
        .route("/api/gateway/task", post(record_task))
        // versioned aliases
        .route("/v1/gateway/session", post(create_session))
        .route("/v1/gateway/session/{id}", get(get_session))
        .route("/v1/gateway/advance", post(advance_stage))
        .route("/v1/gateway/task", post(record_task))
        // health endpoints
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}

/// Rate-limit key: forwarded client IP when present, otherwise one shared
/// anonymous bucket.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn request_metadata(headers: &HeaderMap, creator_id: Option<String>) -> EventMetadata {
    EventMetadata {
        user_agent: headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        ip: headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|ip| ip.trim().to_string()),
        creator_id,
    }
}

async fn guard(state: &AppState, headers: &HeaderMap) -> GateResult<()> {
    state.rate_limiter.check(&client_key(headers)).await
}

#[axum::debug_handler]
async fn create_session(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, GateError> {
    guard(&state, &headers).await?;

    let started = state.engine.begin(&req.gateway_id, req.user_id.as_deref())?;
    Ok(Json(CreateSessionResponse {
        session_id: started.session.id,
        token: started.token,
        expires_at: started.expires_at,
    }))
}

#[axum::debug_handler]
async fn advance_stage(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AdvanceRequest>,
) -> Response {
    if let Err(e) = guard(&state, &headers).await {
        return e.into_response();
    }

    match state
        .engine
        .advance(req.session_id.as_deref(), &req.token, req.next_stage)
    {
        Ok(outcome) => {
            if outcome.completed {
                // completion webhook is best-effort and never blocks the reply
                if let Ok(Some(gateway)) = state.directory.lookup(&outcome.session.gateway_id) {
                    state.notifier.notify_completion(&outcome.session, &gateway);
                }
            }
            Json(AdvanceResponse {
                token: outcome.token,
                stage: outcome.session.current_stage,
                completed: outcome.completed,
            })
            .into_response()
        }
        // idempotent terminal rejection reads as success to the visitor
        Err(GateError::AlreadyCompleted { .. }) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "alreadyCompleted" })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[axum::debug_handler]
async fn record_task(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Result<Json<serde_json::Value>, GateError> {
    guard(&state, &headers).await?;

    let metadata = request_metadata(&headers, req.creator_id);
    let action = req.action.unwrap_or(TaskAction::TaskComplete);

    match (action, req.session_id.as_deref()) {
        (TaskAction::TaskComplete, Some(session_id)) => {
            state
                .recorder
                .record_completion(session_id, &req.gateway_id, &req.task_id, metadata)?;
        }
        // start events, and completions with no session to merge into,
        // are append-only
        (action, session_id) => {
            state
                .recorder
                .record_event(session_id, &req.gateway_id, &req.task_id, action, metadata);
        }
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[axum::debug_handler]
async fn get_session(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<crate::session::GatewaySession>, GateError> {
    guard(&state, &headers).await?;
    Ok(Json(state.engine.session(&id)?))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readyz(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    // a store round-trip on a key that cannot exist proves the backend is up
    let ready = state.store.get("00000000-0000-0000-0000-000000000000").is_ok();
    Json(serde_json::json!({ "ready": ready }))
}

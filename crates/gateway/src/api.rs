//! Handlers for the `/api` routes.
//!
//! - `POST /api/chat`                - Send a message, get the coach's reply
//! - `POST /api/chat/reset`          - Discard a user's conversation
//! - `GET  /api/health`              - Liveness plus tool channel readiness
//! - `GET  /api/tools`               - The tool catalog
//! - `GET  /api/summaries/{userId}`  - Latest weekly summary for a user
//! - `GET  /api/events`              - SSE stream of domain events

use std::convert::Infallible;

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use learnpath_core::error::Error;
use learnpath_core::message::UserId;
use learnpath_core::tool::ToolDescriptor;
use learnpath_workflow::BatchSummary;

use crate::SharedState;

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatRequest {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetRequest {
    #[serde(default)]
    user_id: Option<UserId>,
}

#[derive(Serialize)]
pub(crate) struct ChatResponse {
    response: String,
    success: bool,
}

#[derive(Serialize)]
pub(crate) struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tools_ready: bool,
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
    success: bool,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn fail(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            success: false,
        }),
    )
}

/// Status code for a failed orchestrator call.
fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub(crate) async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| fail(StatusCode::BAD_REQUEST, e.body_text()))?;

    let (Some(user_id), Some(message)) = (payload.user_id, payload.message) else {
        return Err(fail(StatusCode::BAD_REQUEST, "message and userId are required"));
    };
    if message.trim().is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "message and userId are required"));
    }

    info!(user_id, message_len = message.len(), "api/chat request");

    match state.orchestrator.process_message(user_id, &message).await {
        Ok(response) => Ok(Json(ChatResponse {
            response,
            success: true,
        })),
        Err(e) => {
            error!(user_id, error = %e, "Chat request failed");
            Err(fail(status_for(&e), e.to_string()))
        }
    }
}

pub(crate) async fn reset_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| fail(StatusCode::BAD_REQUEST, e.body_text()))?;
    let user_id = payload
        .user_id
        .ok_or_else(|| fail(StatusCode::BAD_REQUEST, "userId is required"))?;

    state.orchestrator.reset(user_id).await;
    Ok(Json(SuccessResponse { success: true }))
}

pub(crate) async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let tools_ready = state.orchestrator.gateway().is_connected();
    Json(HealthResponse {
        status: if tools_ready { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        tools_ready,
    })
}

pub(crate) async fn list_tools_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<ToolDescriptor>>, ApiError> {
    state
        .orchestrator
        .gateway()
        .list_tools()
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "Tool catalog requested while not connected");
            fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        })
}

pub(crate) async fn summary_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<BatchSummary>, ApiError> {
    state.summaries.get(user_id).map(Json).ok_or_else(|| {
        fail(
            StatusCode::NOT_FOUND,
            format!("No summary yet for user {user_id}"),
        )
    })
}

/// Domain events as they are published. Lagging clients skip what they missed.
pub(crate) async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    debug!("Event stream subscriber connected");
    let rx = state.orchestrator.event_bus().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.kind()).data(data))
        });

    Sse::new(stream)
}

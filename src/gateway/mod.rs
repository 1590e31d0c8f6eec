//! C7's HTTP surface: axum router, shared application state, and the three
//! JSON handlers (create message, replay, active list). The SSE handler
//! itself lives in [`sse`] since its response type and wire format are
//! distinct enough to warrant its own module, mirroring how the teacher
//! splits its gateway's plain JSON handlers from its SSE handler.

pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

use crate::agent::AgentRoutine;
use crate::config::AgentCoreConfig;
use crate::events::store::EventStore;
use crate::events::writer::RobustWriter;
use crate::registry::TaskRegistry;
use crate::stream::StreamWatcher;
use crate::agent::executor::AgentExecutor;

/// Shared handles threaded through every handler. Cloned per-request by
/// axum's `State` extractor — everything inside is already `Arc`'d.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub writer: Arc<RobustWriter>,
    pub registry: Arc<TaskRegistry>,
    pub executor: Arc<AgentExecutor>,
    pub watcher: Arc<StreamWatcher>,
    pub routine_factory: Arc<dyn Fn() -> Arc<dyn AgentRoutine> + Send + Sync>,
    pub config: Arc<AgentCoreConfig>,
}

pub fn router(state: AppState, max_body_bytes: usize, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chats/{chat_id}/messages", post(handle_create_message))
        .route(
            "/api/chats/{chat_id}/messages/{message_id}/stream",
            get(sse::handle_stream),
        )
        .route("/api/messages/{message_id}/events", get(handle_replay_events))
        .route("/api/agents/active", get(handle_active_agents))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CreateMessageResponse {
    pub message_id: String,
    pub stream_url: String,
}

/// POST /api/chats/{chat_id}/messages — the message-creation handler.
/// Persisting the user/assistant message pair itself belongs to the
/// chat/message CRUD surface, explicitly out of scope; this handler only
/// allocates a `message_id` and synchronously registers the background
/// task, returning before the agent has produced any event.
async fn handle_create_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(_req): Json<CreateMessageRequest>,
) -> impl IntoResponse {
    let message_id = Uuid::new_v4().to_string();
    let routine = (state.routine_factory)();

    state.registry.start(
        message_id.clone(),
        Some(chat_id.clone()),
        state.executor.clone(),
        routine,
    );

    let stream_url = format!("/api/chats/{chat_id}/messages/{message_id}/stream");
    Json(CreateMessageResponse {
        message_id,
        stream_url,
    })
}

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    pub since: Option<String>,
}

/// GET /api/messages/{message_id}/events — synchronous replay, for debug
/// and as a polling fallback when SSE is unavailable to the client.
async fn handle_replay_events(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<ReplayQuery>,
) -> impl IntoResponse {
    let since_seq = query
        .since
        .as_deref()
        .and_then(crate::events::parse_seq_from_id)
        .unwrap_or(0);

    match state.store.read_since(&message_id, since_seq, usize::MAX) {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            tracing::warn!(message_id = %message_id, error = %e, "replay read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to read events").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct ActiveAgent {
    message_id: String,
    chat_id: Option<String>,
    watchers: usize,
    completed: bool,
}

#[derive(Debug, Serialize)]
struct ActiveAgentsResponse {
    count: usize,
    agents: Vec<ActiveAgent>,
}

/// GET /api/agents/active — lists RunningTasks regardless of completion,
/// matching the registry's own `list` contract (completed tasks remain
/// until GC, so late joiners can still see them here).
async fn handle_active_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents: Vec<ActiveAgent> = state
        .registry
        .list()
        .into_iter()
        .map(|t| ActiveAgent {
            message_id: t.message_id,
            chat_id: t.chat_id,
            watchers: t.watchers,
            completed: t.completed,
        })
        .collect();
    Json(ActiveAgentsResponse {
        count: agents.len(),
        agents,
    })
}

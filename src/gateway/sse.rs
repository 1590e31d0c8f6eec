//! C7 — translates a Watcher's event stream into the SSE wire format for
//! one HTTP connection: `retry: 3000`, then `event:`/`id:`/`data:` per
//! event, blank-line terminated, flushed per event.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio_stream::StreamExt;
use uuid::Uuid;

use super::AppState;
use crate::events::parse_seq_from_id;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub since: Option<String>,
}

/// GET /api/chats/{chat_id}/messages/{message_id}/stream
pub async fn handle_stream(
    State(state): State<AppState>,
    Path((_chat_id, message_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let since_seq = resolve_since_seq(&headers, &query);

    let watcher_id = Uuid::new_v4().to_string();
    state.registry.register_watcher(&message_id, watcher_id.clone());

    let max_wait = Duration::from_secs(state.config.watcher_max_wait_s);
    let events = state.watcher.watch(message_id.clone(), since_seq, max_wait);

    let registry = state.registry.clone();
    let cleanup_message_id = message_id.clone();
    let cleanup_watcher_id = watcher_id.clone();

    // `inspect` fires as the stream is actually polled to exhaustion; the
    // Drop guard below covers the case where the client disconnects before
    // the stream naturally ends (write failure, request cancellation).
    // Every event carries the `retry: 3000` field per the wire format —
    // clients that reconnect after any individual event still get the
    // correct backoff hint, not just the very first one.
    let sse_stream = events.map(move |event| {
        let sse_event = SseEvent::default()
            .event(event.type_name())
            .id(event.id.clone())
            .retry(Duration::from_millis(3000))
            .data(serde_json::to_string(&event).unwrap_or_default());
        Ok::<_, std::convert::Infallible>(sse_event)
    });

    let guarded = WatcherCleanupGuard {
        registry,
        message_id: cleanup_message_id,
        watcher_id: cleanup_watcher_id,
        inner: Some(sse_stream),
    };

    Sse::new(guarded).keep_alive(KeepAlive::default())
}

/// `Last-Event-ID` wins over `?since=`; parse failure on either defaults to
/// 0 rather than rejecting the request (malformed-cursor error class: log
/// at info, never a 4xx).
fn resolve_since_seq(headers: &HeaderMap, query: &StreamQuery) -> u64 {
    if let Some(last_event_id) = headers.get("Last-Event-ID").and_then(|v| v.to_str().ok()) {
        return match parse_seq_from_id(last_event_id) {
            Some(seq) => seq,
            None => {
                tracing::info!(last_event_id, "malformed Last-Event-ID, resuming from 0");
                0
            }
        };
    }
    if let Some(since) = &query.since {
        return match parse_seq_from_id(since) {
            Some(seq) => seq,
            None => {
                tracing::info!(since, "malformed ?since cursor, resuming from 0");
                0
            }
        };
    }
    0
}

/// Unregisters the watcher when the underlying stream is dropped, whether
/// that happens because it ran to completion (terminal event delivered)
/// or because the client disconnected mid-stream. Never aborts the
/// RunningTask — only this watcher's bookkeeping is cleaned up.
struct WatcherCleanupGuard<S> {
    registry: std::sync::Arc<crate::registry::TaskRegistry>,
    message_id: String,
    watcher_id: String,
    inner: Option<S>,
}

impl<S> Drop for WatcherCleanupGuard<S> {
    fn drop(&mut self) {
        self.registry.unregister_watcher(&self.message_id, &self.watcher_id);
    }
}

impl<S, T> tokio_stream::Stream for WatcherCleanupGuard<S>
where
    S: tokio_stream::Stream<Item = T> + Unpin,
{
    type Item = T;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.inner {
            Some(inner) => std::pin::Pin::new(inner).poll_next(cx),
            None => std::task::Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_event_id_wins_over_since_query() {
        let mut headers = HeaderMap::new();
        headers.insert("Last-Event-ID", "1000_0005_ab12cd34".parse().unwrap());
        let query = StreamQuery {
            since: Some("1000_0002_ffffffff".to_string()),
        };
        assert_eq!(resolve_since_seq(&headers, &query), 5);
    }

    #[test]
    fn falls_back_to_since_query_without_header() {
        let headers = HeaderMap::new();
        let query = StreamQuery {
            since: Some("1000_0003_ffffffff".to_string()),
        };
        assert_eq!(resolve_since_seq(&headers, &query), 3);
    }

    #[test]
    fn malformed_last_event_id_resumes_from_zero() {
        let mut headers = HeaderMap::new();
        headers.insert("Last-Event-ID", "garbage".parse().unwrap());
        let query = StreamQuery { since: None };
        assert_eq!(resolve_since_seq(&headers, &query), 0);
    }

    #[test]
    fn absent_cursor_defaults_to_zero() {
        let headers = HeaderMap::new();
        let query = StreamQuery { since: None };
        assert_eq!(resolve_since_seq(&headers, &query), 0);
    }
}

//! C6 — per-client reader that polls the Event Store from a given
//! sequence, emits heartbeats implicitly via new `status` events written
//! by the executor, and terminates on the terminal event.
//!
//! `watch` returns a lazy, finite stream: callers consume it with
//! `StreamExt`/`next()` or hand it straight to the SSE endpoint. It is not
//! restartable — dropping it (client disconnect) requires a fresh call to
//! resume, matching the Watcher entity's cursor-only ownership.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_stream::Stream;

use crate::events::store::EventStore;
use crate::events::Event;
use crate::registry::TaskRegistry;

pub struct StreamWatcher {
    store: Arc<dyn EventStore>,
    registry: Arc<TaskRegistry>,
    poll_interval: Duration,
}

impl StreamWatcher {
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<TaskRegistry>, poll_interval: Duration) -> Self {
        Self {
            store,
            registry,
            poll_interval,
        }
    }

    /// Begins with a catch-up phase (all persisted events with
    /// `seq > since_seq`), then polls for new events until a terminal
    /// event is emitted, `max_wait` elapses without new events, or the
    /// consumer drops the stream.
    pub fn watch(
        &self,
        message_id: String,
        since_seq: u64,
        max_wait: Duration,
    ) -> Pin<Box<dyn Stream<Item = Event> + Send>> {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let poll_interval = self.poll_interval;

        Box::pin(async_stream::stream! {
            let mut cursor = since_seq;
            let start = Instant::now();
            let deadline = start + max_wait;
            let grace_deadline = start + (max_wait / 60);
            let mut seen_anything = false;

            loop {
                match store.read_since(&message_id, cursor, 1024) {
                    Ok(events) if !events.is_empty() => {
                        seen_anything = true;
                        for event in events {
                            cursor = event.seq;
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(message_id = %message_id, error = %e, "watcher read_since failed");
                    }
                }

                if !seen_anything
                    && !registry.is_running(&message_id)
                    && registry.snapshot(&message_id).is_none()
                    && Instant::now() >= grace_deadline
                {
                    // Nothing has ever been observed for this message and
                    // the grace window for "still initializing" has
                    // elapsed — there is nothing left to watch for.
                    return;
                }

                if Instant::now() >= deadline {
                    return;
                }

                tokio::time::sleep(poll_interval).await;
            }
        })
    }
}

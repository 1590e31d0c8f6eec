//! C4 — runs one agent routine to completion for one `message_id`,
//! capturing every observable event and persisting them in order.
//!
//! The executor is a pure awaitable: no generator/yield interface is
//! exposed. It returns once the terminal event has been written. Prior
//! designs that streamed events through a generator shared with the HTTP
//! response propagated client disconnects into the agent and killed work
//! in progress — this redesign inverts that coupling. Implementers must
//! not reintroduce a shared generator here.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::agent::{AgentContext, AgentRoutine};
use crate::events::emitter::{self, channel};
use crate::events::writer::RobustWriter;
use crate::events::{EndStatus, EventPayload, PartialEvent};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorOutcome {
    Completed,
    Interrupted,
    Error,
}

pub struct AgentExecutor {
    writer: Arc<RobustWriter>,
    heartbeat_interval: Duration,
}

impl AgentExecutor {
    pub fn new(writer: Arc<RobustWriter>, heartbeat_interval: Duration) -> Self {
        Self {
            writer,
            heartbeat_interval,
        }
    }

    /// Runs `routine` for `message_id`, shielded from the caller's
    /// cancellation: the caller should invoke this inside a detached task
    /// (see the Task Registry's `start`), never directly awaited from a
    /// future that an HTTP handler could drop. `cancel` is the one
    /// cooperative cancellation signal this loop honors — the Task
    /// Registry's administrative `abort`, never an observer disconnecting.
    /// Cancellation never skips the terminal write: the loop stops polling
    /// the agent routine, drains whatever it already emitted, and writes an
    /// `end` event with `status: interrupted` before returning, same as any
    /// other exit path.
    pub async fn run(
        &self,
        message_id: String,
        chat_id: Option<String>,
        routine: Arc<dyn AgentRoutine>,
        cancel: CancellationToken,
    ) -> ExecutorOutcome {
        let started_at = Instant::now();
        let (emitter, mut drain) = channel();

        self.writer
            .write(make_partial(&message_id, &chat_id, EventPayload::start()))
            .await;

        let ctx = AgentContext {
            message_id: message_id.clone(),
            chat_id: chat_id.clone(),
            emitter: emitter.clone(),
        };

        let tool_calls = Arc::new(AtomicU32::new(0));
        let routine_future = emitter::with_emitter(emitter, routine.run(ctx));
        tokio::pin!(routine_future);

        let mut routine_result = None;
        let mut interrupted = false;
        let mut last_event_at = Instant::now();

        loop {
            tokio::select! {
                biased;
                result = &mut routine_future, if routine_result.is_none() => {
                    routine_result = Some(result);
                }
                () = cancel.cancelled(), if routine_result.is_none() => {
                    tracing::info!(message_id = %message_id, "executor cancelled administratively, draining before terminal write");
                    interrupted = true;
                }
                drained = drain.recv_timeout(DRAIN_POLL_INTERVAL), if !interrupted => {
                    if let Some(payload) = drained {
                        count_tool_call(&tool_calls, &payload);
                        self.writer
                            .write(make_partial(&message_id, &chat_id, payload))
                            .await;
                        last_event_at = Instant::now();
                    } else if routine_result.is_some() {
                        break;
                    } else if last_event_at.elapsed() >= self.heartbeat_interval {
                        let elapsed_s = started_at.elapsed().as_secs();
                        self.writer
                            .write(make_partial(&message_id, &chat_id, EventPayload::heartbeat(elapsed_s)))
                            .await;
                        last_event_at = Instant::now();
                    }
                }
            }

            if interrupted || routine_result.is_some() {
                for payload in drain.drain_remaining() {
                    count_tool_call(&tool_calls, &payload);
                    self.writer
                        .write(make_partial(&message_id, &chat_id, payload))
                        .await;
                }
                break;
            }
        }

        let ms_total = started_at.elapsed().as_millis() as u64;
        let tool_calls = tool_calls.load(Ordering::Relaxed);

        let (terminal_payload, outcome) = if interrupted {
            (
                EventPayload::end(EndStatus::Interrupted, ms_total, tool_calls),
                ExecutorOutcome::Interrupted,
            )
        } else {
            match routine_result {
                Some(Ok(())) => (
                    EventPayload::end(EndStatus::Completed, ms_total, tool_calls),
                    ExecutorOutcome::Completed,
                ),
                Some(Err(e)) => {
                    tracing::warn!(message_id = %message_id, error = %e, "agent routine failed");
                    (EventPayload::error(e.to_string()), ExecutorOutcome::Error)
                }
                None => (
                    EventPayload::error("executor exited without a routine result"),
                    ExecutorOutcome::Error,
                ),
            }
        };

        self.writer
            .write_terminal_sync(make_partial(&message_id, &chat_id, terminal_payload))
            .await;

        outcome
    }
}

fn make_partial(message_id: &str, chat_id: &Option<String>, payload: EventPayload) -> PartialEvent {
    let mut partial = PartialEvent::new(message_id, payload);
    if let Some(chat_id) = chat_id {
        partial = partial.with_chat_id(chat_id.clone());
    }
    partial
}

fn count_tool_call(counter: &AtomicU32, payload: &EventPayload) {
    if matches!(payload, EventPayload::ToolEnd { .. }) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

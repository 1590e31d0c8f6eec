//! C3 — the in-process queue the agent routine writes to.
//!
//! The emitter never persists; it only preserves emission order between
//! the agent routine (producer, possibly several nested sub-agents all
//! running within the same task tree) and the executor's drain loop
//! (single consumer). An unbounded queue is deliberate: the producer side
//! is always slower than persistence, so backpressure is not needed here
//! (see the Executor's cancellation shield for the rest of that story).

use std::time::Duration;

use tokio::sync::mpsc;

use crate::events::EventPayload;

/// Sender half, cheaply cloneable, handed to the agent routine and
/// installed as the ambient "current emitter" for its execution context.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<EventPayload>,
}

impl Emitter {
    /// Enqueues non-blockingly. A closed receiver (executor already
    /// finished draining) is not an error for the caller — the agent
    /// routine must never be disrupted by the fact that nobody is
    /// listening anymore.
    pub fn emit(&self, payload: EventPayload) {
        let _ = self.tx.send(payload);
    }
}

/// Receiver half, owned exclusively by the executor's drain loop.
pub struct EmitterDrain {
    rx: mpsc::UnboundedReceiver<EventPayload>,
}

impl EmitterDrain {
    /// Cooperative dequeue with a timeout; `None` on timeout as well as on
    /// a closed/empty channel after all senders are dropped.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<EventPayload> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    /// Drains whatever is immediately available without waiting, used once
    /// the agent routine has finished and the remaining queue must be
    /// flushed before the terminal event is written.
    pub fn drain_remaining(&mut self) -> Vec<EventPayload> {
        let mut drained = Vec::new();
        while let Ok(payload) = self.rx.try_recv() {
            drained.push(payload);
        }
        drained
    }
}

pub fn channel() -> (Emitter, EmitterDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Emitter { tx }, EmitterDrain { rx })
}

tokio::task_local! {
    static CURRENT_EMITTER: Emitter;
}

/// Runs `fut` with `emitter` installed as the ambient current emitter for
/// the lifetime of that future. Agent-internal instrumentation (tool-call
/// hooks, planning hooks, content streaming hooks) calls [`emit`] without
/// needing the emitter threaded through every call signature.
pub async fn with_emitter<F>(emitter: Emitter, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_EMITTER.scope(emitter, fut).await
}

/// Emits into the ambient current emitter, if one is installed for this
/// task. A no-op outside of an `agentcore`-managed execution context.
pub fn emit(payload: EventPayload) {
    let _ = CURRENT_EMITTER.try_with(|emitter| emitter.emit(payload));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_preserves_fifo_order() {
        let (emitter, mut drain) = channel();
        emitter.emit(EventPayload::Content { md: "a".into() });
        emitter.emit(EventPayload::Content { md: "b".into() });
        emitter.emit(EventPayload::Content { md: "c".into() });

        let first = drain.recv_timeout(Duration::from_millis(50)).await.unwrap();
        let second = drain.recv_timeout(Duration::from_millis(50)).await.unwrap();
        let third = drain.recv_timeout(Duration::from_millis(50)).await.unwrap();

        assert!(matches!(first, EventPayload::Content { md } if md == "a"));
        assert!(matches!(second, EventPayload::Content { md } if md == "b"));
        assert!(matches!(third, EventPayload::Content { md } if md == "c"));
    }

    #[tokio::test]
    async fn recv_timeout_returns_none_when_idle() {
        let (_emitter, mut drain) = channel();
        let result = drain.recv_timeout(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn ambient_emit_reaches_installed_emitter() {
        let (emitter, mut drain) = channel();
        with_emitter(emitter, async {
            emit(EventPayload::Thinking {
                text: "considering".into(),
                agent_type: None,
                agent_id: None,
            });
        })
        .await;

        let received = drain.recv_timeout(Duration::from_millis(50)).await;
        assert!(matches!(received, Some(EventPayload::Thinking { .. })));
    }

    #[tokio::test]
    async fn emit_outside_ambient_context_is_a_silent_noop() {
        // No with_emitter scope active — must not panic.
        emit(EventPayload::Content { md: "lost".into() });
    }

    #[tokio::test]
    async fn drain_remaining_collects_without_blocking() {
        let (emitter, mut drain) = channel();
        emitter.emit(EventPayload::Content { md: "a".into() });
        emitter.emit(EventPayload::Content { md: "b".into() });
        let remaining = drain.drain_remaining();
        assert_eq!(remaining.len(), 2);
    }
}

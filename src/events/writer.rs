//! C2 — wraps the Event Store with retries, exponential backoff, and a
//! bounded in-memory fallback queue. Persistence failure never interrupts
//! the agent: `write` never returns an error to its caller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::events::store::{AppendOutcome, EventStore};
use crate::events::{format_event_id, Event, PartialEvent, SCHEMA_VERSION};

pub struct RobustWriter {
    store: Arc<dyn EventStore>,
    retry_schedule_ms: Vec<u64>,
    fallback: Mutex<VecDeque<Event>>,
    fallback_capacity: usize,
}

impl RobustWriter {
    pub fn new(store: Arc<dyn EventStore>, retry_schedule_ms: Vec<u64>, fallback_capacity: usize) -> Self {
        Self {
            store,
            retry_schedule_ms,
            fallback: Mutex::new(VecDeque::new()),
            fallback_capacity,
        }
    }

    /// Allocates `seq`, normalizes `id`, stamps `ts`, and appends — retrying
    /// on transient failure per the configured backoff schedule. On
    /// exhaustion, the event is queued in the bounded fallback buffer
    /// instead of raising into the caller.
    pub async fn write(&self, partial: PartialEvent) {
        let event = match self.stamp(&partial) {
            Some(event) => event,
            None => return,
        };
        self.write_stamped(event).await;
    }

    async fn write_stamped(&self, event: Event) {
        if self.try_append(&event) {
            return;
        }

        for backoff_ms in &self.retry_schedule_ms {
            tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            if self.try_append(&event) {
                return;
            }
        }

        tracing::warn!(
            message_id = %event.message_id,
            seq = event.seq,
            "event persistence exhausted retries, queuing to fallback"
        );
        self.enqueue_fallback(event);
    }

    /// The terminal event gets one additional best-effort synchronous write
    /// attempt before the executor returns, per the Failure semantics —
    /// this is the same path as `write` but named so callers are explicit
    /// about why they're calling it at shutdown.
    pub async fn write_terminal_sync(&self, partial: PartialEvent) {
        self.write(partial).await;
    }

    fn stamp(&self, partial: &PartialEvent) -> Option<Event> {
        let seq = match self.store.allocate_seq(&partial.message_id) {
            Ok(seq) => seq,
            Err(e) => {
                tracing::warn!(message_id = %partial.message_id, error = %e, "failed to allocate seq");
                return None;
            }
        };
        let ts = Utc::now();
        let id = format_event_id(ts.timestamp_millis(), seq);
        Some(Event {
            v: SCHEMA_VERSION,
            payload: partial.payload.clone(),
            id,
            ts,
            message_id: partial.message_id.clone(),
            chat_id: partial.chat_id.clone(),
            seq,
        })
    }

    fn try_append(&self, event: &Event) -> bool {
        match self.store.append(event) {
            Ok(AppendOutcome::Ok) => true,
            // Already persisted under this (message_id, seq) — treat as success,
            // this happens if a prior attempt succeeded but the response was lost.
            Ok(AppendOutcome::Conflict) => true,
            Err(e) => {
                tracing::debug!(message_id = %event.message_id, seq = event.seq, error = %e, "append attempt failed");
                false
            }
        }
    }

    fn enqueue_fallback(&self, event: Event) {
        let mut fallback = self.fallback.lock();
        if fallback.len() >= self.fallback_capacity {
            tracing::warn!(
                capacity = self.fallback_capacity,
                "writer fallback queue full, dropping oldest event"
            );
            fallback.pop_front();
        }
        fallback.push_back(event);
    }

    /// Periodic re-drain attempt for anything sitting in the fallback
    /// queue. Intended to be driven by a background interval task at the
    /// cadence of the writer's longest backoff step.
    pub fn redrain_fallback(&self) {
        let pending: Vec<Event> = {
            let mut fallback = self.fallback.lock();
            fallback.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }
        let mut still_failing = Vec::new();
        for event in pending {
            if !self.try_append(&event) {
                still_failing.push(event);
            }
        }
        if !still_failing.is_empty() {
            let mut fallback = self.fallback.lock();
            for event in still_failing {
                fallback.push_back(event);
            }
        }
    }

    pub fn fallback_len(&self) -> usize {
        self.fallback.lock().len()
    }
}

//! The event model shared by the store, writer, emitter and SSE endpoint.
//!
//! An [`Event`] is the durable, ordered unit that everything else in this
//! crate revolves around: the emitter produces [`PartialEvent`]s (payload
//! only, no `seq`/`id`/`ts` yet), the writer stamps them into full `Event`s
//! as it persists them, and the store/watcher/SSE layer only ever deal in
//! fully-stamped events.

pub mod emitter;
pub mod store;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observable step of agent execution, fully stamped and durable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub v: u32,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub seq: u64,
}

impl Event {
    /// SSE `event:` line value — the payload's own tag.
    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Whether this event is the terminal event for its message (I2).
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, EventPayload::End { .. } | EventPayload::Error { .. })
    }
}

/// A not-yet-persisted event: payload and optional chat_id only. The writer
/// fills in `message_id`, allocates `seq`, and stamps `id`/`ts`.
#[derive(Debug, Clone)]
pub struct PartialEvent {
    pub message_id: String,
    pub chat_id: Option<String>,
    pub payload: EventPayload,
}

impl PartialEvent {
    pub fn new(message_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            message_id: message_id.into(),
            chat_id: None,
            payload,
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Start {
        status: String,
    },
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    Plan {
        items: Vec<PlanItem>,
    },
    ToolStart {
        call_id: String,
        name: String,
        args_summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args_display: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    ToolEnd {
        call_id: String,
        name: String,
        status: ToolEndStatus,
        ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_summary: Option<String>,
    },
    SubagentStart {
        agent_id: String,
        parent_call_id: String,
        subagent_description: String,
    },
    SubagentEnd {
        agent_id: String,
        parent_call_id: String,
        ms: u64,
    },
    ContentStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    Content {
        md: String,
    },
    ContentEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    Status {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        md: Option<String>,
    },
    End {
        status: EndStatus,
        ms_total: u64,
        tool_calls: u32,
    },
    Error {
        error: String,
    },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Start { .. } => "start",
            EventPayload::Thinking { .. } => "thinking",
            EventPayload::Plan { .. } => "plan",
            EventPayload::ToolStart { .. } => "tool_start",
            EventPayload::ToolEnd { .. } => "tool_end",
            EventPayload::SubagentStart { .. } => "subagent_start",
            EventPayload::SubagentEnd { .. } => "subagent_end",
            EventPayload::ContentStart { .. } => "content_start",
            EventPayload::Content { .. } => "content",
            EventPayload::ContentEnd { .. } => "content_end",
            EventPayload::Status { .. } => "status",
            EventPayload::End { .. } => "end",
            EventPayload::Error { .. } => "error",
        }
    }

    pub fn start() -> Self {
        EventPayload::Start {
            status: "processing".to_string(),
        }
    }

    pub fn heartbeat(elapsed_s: u64) -> Self {
        EventPayload::Status {
            text: format!("Processing... ({elapsed_s}s elapsed)"),
            md: None,
        }
    }

    pub fn end(status: EndStatus, ms_total: u64, tool_calls: u32) -> Self {
        EventPayload::End {
            status,
            ms_total,
            tool_calls,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        EventPayload::Error { error: error.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolEndStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    Completed,
    Interrupted,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanItem {
    pub id: String,
    pub text: String,
    pub status: PlanItemStatus,
}

/// Normalized event id: `{unix_ms}_{seq:04}_{random8hex}`. Globally unique,
/// also the SSE Last-Event-ID value. `seq` is embedded so a client-supplied
/// Last-Event-ID can be converted back into a resume cursor without a store
/// round-trip (see [`parse_seq_from_id`]).
pub fn format_event_id(unix_ms: i64, seq: u64) -> String {
    let suffix: u32 = rand::random();
    format!("{unix_ms}_{seq:04}_{suffix:08x}")
}

/// Extracts the `seq` component from an event id of the form
/// `{ts_ms}_{seq}_{rand}`. Returns `None` on any malformed input — callers
/// treat that as "resume from 0" per the malformed-cursor error class.
pub fn parse_seq_from_id(id: &str) -> Option<u64> {
    let mut parts = id.split('_');
    let _ts = parts.next()?;
    let seq = parts.next()?;
    let _rand = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    seq.parse::<u64>().ok()
}

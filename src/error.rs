//! Structured error taxonomy for the core, mapped to the six fault classes:
//! transient persistence faults, agent runtime faults, watcher disconnects,
//! malformed resume cursors, registry inconsistency, and fatal faults.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("event conflict for message {message_id} seq {seq}")]
    SeqConflict { message_id: String, seq: u64 },

    #[error("agent routine failed: {0}")]
    AgentFault(#[source] anyhow::Error),

    #[error("task already running for message {0}")]
    AlreadyRunning(String),

    #[error("no such message {0}")]
    NotFound(String),

    #[error("fallback queue full ({capacity} events)")]
    FallbackQueueFull { capacity: usize },

    #[error("config error: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

//! C4's external boundary: the agent reasoning engine itself (LLM calls,
//! tool execution, planning middleware) is explicitly out of scope for
//! this crate and is invoked only through [`AgentRoutine`].

pub mod executor;

use async_trait::async_trait;

use crate::events::emitter::Emitter;

/// Everything an externally-supplied agent routine needs to emit events
/// for one message run. Handed to the routine by the executor; the routine
/// may use it directly or rely on the ambient emitter installed via
/// [`crate::events::emitter::with_emitter`] — both reach the same queue.
#[derive(Clone)]
pub struct AgentContext {
    pub message_id: String,
    pub chat_id: Option<String>,
    pub emitter: Emitter,
}

/// The single asynchronous entry point through which the core invokes the
/// agent. Implementations live outside this crate in production; this
/// crate only depends on the trait boundary plus the demo implementation
/// below for tests and local runs.
#[async_trait]
pub trait AgentRoutine: Send + Sync {
    async fn run(&self, ctx: AgentContext) -> anyhow::Result<()>;
}

/// Minimal stand-in agent routine used by the binary's default configuration
/// and by integration tests: emits a short thinking/content/plan sequence
/// and completes. Exercises every event type the executor needs to shepherd
/// without depending on an actual LLM backend.
pub struct EchoAgentRoutine {
    pub reply: String,
}

impl EchoAgentRoutine {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl AgentRoutine for EchoAgentRoutine {
    async fn run(&self, ctx: AgentContext) -> anyhow::Result<()> {
        use crate::events::EventPayload;

        ctx.emitter.emit(EventPayload::Thinking {
            text: "composing a reply".to_string(),
            agent_type: None,
            agent_id: None,
        });
        ctx.emitter.emit(EventPayload::ContentStart {
            agent_type: None,
            agent_id: None,
        });
        ctx.emitter.emit(EventPayload::Content {
            md: self.reply.clone(),
        });
        ctx.emitter.emit(EventPayload::ContentEnd {
            agent_type: None,
            agent_id: None,
        });
        Ok(())
    }
}

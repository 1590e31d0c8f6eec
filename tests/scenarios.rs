//! End-to-end scenarios exercising the full stack: registry, executor,
//! writer, store, and stream watcher wired together the way `main.rs`
//! wires them for the real binary.

use std::sync::Arc;
use std::time::Duration;

use agentcore::agent::executor::AgentExecutor;
use agentcore::agent::{AgentContext, AgentRoutine, EchoAgentRoutine};
use agentcore::events::store::{EventStore, SqliteEventStore};
use agentcore::events::writer::RobustWriter;
use agentcore::registry::TaskRegistry;
use agentcore::stream::StreamWatcher;
use async_trait::async_trait;
use tokio_stream::StreamExt;

struct Harness {
    store: Arc<dyn EventStore>,
    writer: Arc<RobustWriter>,
    registry: Arc<TaskRegistry>,
    executor: Arc<AgentExecutor>,
    watcher: Arc<StreamWatcher>,
}

impl Harness {
    fn new() -> Self {
        let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open_in_memory().unwrap());
        let writer = Arc::new(RobustWriter::new(store.clone(), vec![10, 20, 40], 1024));
        let registry = Arc::new(TaskRegistry::new());
        let executor = Arc::new(AgentExecutor::new(writer.clone(), Duration::from_millis(200)));
        let watcher = Arc::new(StreamWatcher::new(store.clone(), registry.clone(), Duration::from_millis(20)));
        Self {
            store,
            writer,
            registry,
            executor,
            watcher,
        }
    }

    fn start(&self, message_id: &str, routine: Arc<dyn AgentRoutine>) {
        self.registry
            .start(message_id.to_string(), Some("chat-1".to_string()), self.executor.clone(), routine);
    }

    async fn wait_until_completed(&self, message_id: &str) {
        for _ in 0..500 {
            if !self.registry.is_running(message_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {message_id} did not complete in time");
    }
}

/// Scenario 1 — single watcher, happy path.
#[tokio::test]
async fn single_watcher_happy_path() {
    let harness = Harness::new();
    harness.start("m1", Arc::new(EchoAgentRoutine::new("ping back")));

    let mut stream = harness.watcher.watch("m1".to_string(), 0, Duration::from_secs(5));
    let mut types = Vec::new();
    while let Some(event) = stream.next().await {
        types.push(event.type_name().to_string());
    }

    assert_eq!(types.first().map(String::as_str), Some("start"));
    assert!(types.contains(&"content".to_string()));
    assert_eq!(types.last().map(String::as_str), Some("end"));
}

/// Scenario 2 — join-late: a watcher that opens after the run has already
/// finished still sees the whole log from seq=1.
#[tokio::test]
async fn join_late_replays_from_the_beginning() {
    let harness = Harness::new();
    harness.start("m1", Arc::new(EchoAgentRoutine::new("already done")));
    harness.wait_until_completed("m1").await;

    let mut stream = harness.watcher.watch("m1".to_string(), 0, Duration::from_secs(5));
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    assert_eq!(events.first().unwrap().seq, 1);
    assert_eq!(events.first().unwrap().type_name(), "start");
    assert_eq!(events.last().unwrap().type_name(), "end");
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
}

/// Scenario 4 — two concurrent watchers observe identical seq order.
#[tokio::test]
async fn two_concurrent_watchers_see_identical_sequences() {
    let harness = Harness::new();
    harness.start("m1", Arc::new(EchoAgentRoutine::new("fan out")));

    let watcher_a = harness.watcher.clone();
    let watcher_b = harness.watcher.clone();
    let (stream_a, stream_b) = (
        watcher_a.watch("m1".to_string(), 0, Duration::from_secs(5)),
        watcher_b.watch("m1".to_string(), 0, Duration::from_secs(5)),
    );

    let collect = |mut s: std::pin::Pin<Box<dyn tokio_stream::Stream<Item = agentcore::events::Event> + Send>>| async move {
        let mut ids = Vec::new();
        while let Some(event) = s.next().await {
            ids.push((event.seq, event.id));
        }
        ids
    };

    let (a, b) = tokio::join!(collect(stream_a), collect(stream_b));
    assert_eq!(a, b);
}

/// Scenario 5 — killing all watchers mid-run does not change the final
/// persisted log; the replay endpoint (here, a direct store read) still
/// sees a complete ordered log ending in `end`.
#[tokio::test]
async fn watchers_can_be_abandoned_without_affecting_the_task() {
    struct SlowRoutine;

    #[async_trait]
    impl AgentRoutine for SlowRoutine {
        async fn run(&self, ctx: AgentContext) -> anyhow::Result<()> {
            use agentcore::events::EventPayload;
            for i in 0..3 {
                ctx.emitter.emit(EventPayload::Content { md: format!("part-{i}") });
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(())
        }
    }

    let harness = Harness::new();
    harness.start("m1", Arc::new(SlowRoutine));

    {
        // Open then immediately drop a watcher.
        let stream = harness.watcher.watch("m1".to_string(), 0, Duration::from_secs(5));
        drop(stream);
    }

    harness.wait_until_completed("m1").await;

    let events = harness.store.read_all("m1").unwrap();
    assert_eq!(events.first().unwrap().type_name(), "start");
    assert_eq!(events.last().unwrap().type_name(), "end");
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
}

/// Scenario 6 — malformed Last-Event-ID is treated as 0, not rejected.
#[test]
fn malformed_event_id_parses_to_none_and_callers_default_to_zero() {
    use agentcore::events::parse_seq_from_id;
    assert_eq!(parse_seq_from_id("garbage"), None);
    let since_seq = parse_seq_from_id("garbage").unwrap_or(0);
    assert_eq!(since_seq, 0);
}

/// P1 — persisted events for one message_id are seq = 1..N contiguous,
/// no duplicates, across a run that emits several distinct event types.
#[tokio::test]
async fn seq_sequence_is_contiguous_with_no_duplicates() {
    struct RichRoutine;

    #[async_trait]
    impl AgentRoutine for RichRoutine {
        async fn run(&self, ctx: AgentContext) -> anyhow::Result<()> {
            use agentcore::events::{EventPayload, ToolEndStatus};
            ctx.emitter.emit(EventPayload::Thinking {
                text: "planning".into(),
                agent_type: None,
                agent_id: None,
            });
            ctx.emitter.emit(EventPayload::ToolStart {
                call_id: "c1".into(),
                name: "lookup".into(),
                args_summary: "x".into(),
                args_display: None,
                agent_type: None,
                agent_id: None,
            });
            ctx.emitter.emit(EventPayload::ToolEnd {
                call_id: "c1".into(),
                name: "lookup".into(),
                status: ToolEndStatus::Ok,
                ms: 3,
                result_summary: None,
            });
            ctx.emitter.emit(EventPayload::Content { md: "done".into() });
            Ok(())
        }
    }

    let harness = Harness::new();
    harness.start("m1", Arc::new(RichRoutine));
    harness.wait_until_completed("m1").await;

    let events = harness.store.read_all("m1").unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);

    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1);
    assert_eq!(events.last().unwrap().seq, events.len() as u64);
}

/// P4 — resuming with Last-Event-ID = id_k yields events with seq > k only.
#[tokio::test]
async fn resume_from_last_event_id_yields_only_newer_events() {
    let harness = Harness::new();
    harness.start("m1", Arc::new(EchoAgentRoutine::new("resumed")));
    harness.wait_until_completed("m1").await;

    let all = harness.store.read_all("m1").unwrap();
    let midpoint = &all[all.len() / 2];
    let resume_seq = agentcore::events::parse_seq_from_id(&midpoint.id).unwrap();

    let mut stream = harness.watcher.watch("m1".to_string(), resume_seq, Duration::from_secs(5));
    let mut resumed = Vec::new();
    while let Some(event) = stream.next().await {
        resumed.push(event);
    }
    assert!(resumed.iter().all(|e| e.seq > resume_seq));
}

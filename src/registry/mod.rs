//! C5 — process-wide mapping of message-id to running task.
//!
//! A single mutex guards the map, matching the teacher's registry pattern
//! of a `Mutex`-guarded cache plus secondary index; per-task state (the
//! watcher set) is mutated under the same lock since critical sections
//! here are O(1) and never hold across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::executor::{AgentExecutor, ExecutorOutcome};
use crate::agent::AgentRoutine;

/// Process-memory record for one in-flight or recently finished message run.
pub struct RunningTask {
    pub message_id: String,
    pub chat_id: Option<String>,
    pub started_at: Instant,
    pub completed: bool,
    pub error: Option<String>,
    pub watchers: HashSet<String>,
    completed_at: Option<Instant>,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RunningTask {
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

struct Inner {
    tasks: HashMap<String, RunningTask>,
}

/// Constructed once per process (see `main`'s initialization hook) and
/// shared behind an `Arc` rather than a global singleton, so shutdown has a
/// well-defined owner to drain.
pub struct TaskRegistry {
    inner: Mutex<Inner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
            }),
        }
    }

    /// Creates a RunningTask if none exists for `message_id` and spawns the
    /// executor in a detached task — cancellation from the calling HTTP
    /// handler must not propagate into it. Idempotent: a second `start`
    /// call for an already-running message_id is a no-op (registry
    /// inconsistency error class 5: return the existing handle).
    pub fn start(
        self: &Arc<Self>,
        message_id: String,
        chat_id: Option<String>,
        executor: Arc<AgentExecutor>,
        routine: Arc<dyn AgentRoutine>,
    ) {
        {
            let inner = self.inner.lock();
            if inner.tasks.contains_key(&message_id) {
                tracing::debug!(message_id = %message_id, "start called for already-running message, ignoring");
                return;
            }
        }

        let registry = Arc::clone(self);
        let task_message_id = message_id.clone();
        let task_chat_id = chat_id.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        // Shielded from the caller: spawning detaches the execution from
        // whatever future called `start`, so an HTTP handler returning (or
        // its connection dropping) cannot cancel this task. The only
        // cancellation signal the executor honors is `cancel`, flipped by
        // `TaskRegistry::abort` — cooperative, so the terminal event is
        // still written before the task actually stops.
        let handle = tokio::spawn(async move {
            let outcome = executor
                .run(task_message_id.clone(), task_chat_id, routine, task_cancel)
                .await;
            registry.mark_completed(&task_message_id, outcome);
        });

        let mut inner = self.inner.lock();
        inner.tasks.insert(
            message_id.clone(),
            RunningTask {
                message_id,
                chat_id,
                started_at: Instant::now(),
                completed: false,
                error: None,
                watchers: HashSet::new(),
                completed_at: None,
                handle: Some(handle),
                cancel,
            },
        );
    }

    fn mark_completed(&self, message_id: &str, outcome: ExecutorOutcome) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(message_id) {
            task.completed = true;
            task.completed_at = Some(Instant::now());
            task.error = match outcome {
                ExecutorOutcome::Completed => None,
                ExecutorOutcome::Interrupted => Some("aborted by administrator".to_string()),
                ExecutorOutcome::Error => Some("agent routine returned an error".to_string()),
            };
        }
    }

    pub fn is_running(&self, message_id: &str) -> bool {
        self.inner
            .lock()
            .tasks
            .get(message_id)
            .map(|t| !t.completed)
            .unwrap_or(false)
    }

    pub fn register_watcher(&self, message_id: &str, watcher_id: String) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(message_id) {
            task.watchers.insert(watcher_id);
        }
    }

    pub fn unregister_watcher(&self, message_id: &str, watcher_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(message_id) {
            task.watchers.remove(watcher_id);
        }
    }

    pub fn watcher_count(&self, message_id: &str) -> usize {
        self.inner
            .lock()
            .tasks
            .get(message_id)
            .map(|t| t.watchers.len())
            .unwrap_or(0)
    }

    pub fn snapshot(&self, message_id: &str) -> Option<TaskSnapshot> {
        self.inner.lock().tasks.get(message_id).map(TaskSnapshot::from)
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.inner.lock().tasks.values().map(TaskSnapshot::from).collect()
    }

    /// Administrative-only termination. Reserved for operator use. This
    /// flips the task's `CancellationToken` rather than calling
    /// `JoinHandle::abort` — a hard Tokio abort could land mid-write and
    /// skip the terminal event entirely, which the contract forbids ("even
    /// then, the terminal event is written first"). The executor's drain
    /// loop observes the cancellation cooperatively, drains whatever the
    /// routine already emitted, writes an `end` event with
    /// `status: interrupted`, and only then returns — `mark_completed`
    /// flips `completed` at that point, not here.
    pub fn abort(&self, message_id: &str) -> bool {
        let inner = self.inner.lock();
        match inner.tasks.get(message_id) {
            Some(task) if !task.completed => {
                task.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Removes RunningTasks that completed more than `max_age` ago.
    pub fn gc(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, task| match task.completed_at {
            Some(completed_at) => completed_at.elapsed() < max_age,
            None => true,
        });
        before - inner.tasks.len()
    }

    /// Best-effort graceful shutdown: waits up to `grace` for running tasks
    /// to reach their terminal event, then returns regardless.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock();
            inner
                .tasks
                .values_mut()
                .filter(|t| !t.completed)
                .filter_map(|t| t.handle.take())
                .collect()
        };
        if handles.is_empty() {
            return;
        }
        let wait_all = futures_join_all(handles);
        if tokio::time::timeout(grace, wait_all).await.is_err() {
            tracing::warn!("registry shutdown grace period elapsed with tasks still running");
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub message_id: String,
    pub chat_id: Option<String>,
    pub watchers: usize,
    pub completed: bool,
}

impl From<&RunningTask> for TaskSnapshot {
    fn from(task: &RunningTask) -> Self {
        Self {
            message_id: task.message_id.clone(),
            chat_id: task.chat_id.clone(),
            watchers: task.watchers.len(),
            completed: task.completed,
        }
    }
}

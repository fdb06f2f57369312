//! TaskRegistry - actor that owns every Task record
//!
//! Commands are handled one at a time, so finalization is atomic: when a
//! deadline timer and a result race, whichever command arrives first wins.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{RegistryCommand, RegistryError, RegistryResponse, RegistryStats};
use super::task::{Task, TaskFailure, TaskHandle, TaskStatus};
use crate::config::{ConcurrencyConfig, OverflowPolicy};
use crate::events::{Emitter, LogLevel};

/// Handle to send commands to the registry actor
#[derive(Clone)]
pub struct TaskRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

impl TaskRegistry {
    /// Spawn a new registry actor
    pub fn spawn(config: &ConcurrencyConfig, emitter: Emitter) -> Self {
        debug!(max_tasks = config.max_tasks, overflow = ?config.overflow, "spawn: called");
        let (tx, rx) = mpsc::channel(256);

        let actor = RegistryActor {
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            active: 0,
            max_tasks: config.max_tasks.max(1),
            overflow: config.overflow,
            emitter,
            timer_tx: tx.downgrade(),
        };
        tokio::spawn(actor_loop(actor, rx));

        info!("TaskRegistry spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<RegistryResponse<T>>) -> RegistryCommand,
    ) -> RegistryResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| RegistryError::ChannelError)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelError)?
    }

    /// Register a new task, waiting for a slot if the registry queues
    ///
    /// The deadline starts at admission. `None` or a zero duration disables it.
    pub async fn begin_task(&self, kind: &str, timeout: Option<Duration>) -> RegistryResponse<TaskHandle> {
        debug!(%kind, ?timeout, "begin_task: called");
        self.request(|reply| RegistryCommand::Begin {
            kind: kind.to_string(),
            timeout,
            reply,
        })
        .await
    }

    /// Record a stream session opened under a task
    pub async fn attach_session(&self, task_id: &str, session_id: &str) -> RegistryResponse<()> {
        debug!(%task_id, %session_id, "attach_session: called");
        self.tx
            .send(RegistryCommand::AttachSession {
                task_id: task_id.to_string(),
                session_id: session_id.to_string(),
            })
            .await
            .map_err(|_| RegistryError::ChannelError)
    }

    /// Report progress without waiting
    ///
    /// Dropped if the command channel is full; a later update supersedes it.
    pub fn update_progress(&self, task_id: &str, progress: u8) {
        if let Err(e) = self.tx.try_send(RegistryCommand::UpdateProgress {
            task_id: task_id.to_string(),
            progress,
        }) {
            debug!(%task_id, progress, error = %e, "update_progress: dropped");
        }
    }

    /// Finalize as completed; returns the winning status
    pub async fn complete_task(&self, task_id: &str, result: Value) -> RegistryResponse<TaskStatus> {
        debug!(%task_id, "complete_task: called");
        self.request(|reply| RegistryCommand::Complete {
            task_id: task_id.to_string(),
            result,
            reply,
        })
        .await
    }

    /// Finalize as failed; returns the winning status
    pub async fn fail_task(&self, task_id: &str, failure: TaskFailure) -> RegistryResponse<TaskStatus> {
        debug!(%task_id, kind = %failure.kind, "fail_task: called");
        self.request(|reply| RegistryCommand::Fail {
            task_id: task_id.to_string(),
            failure,
            reply,
        })
        .await
    }

    /// Finalize as timed out; returns the winning status
    pub async fn expire_task(&self, task_id: &str) -> RegistryResponse<TaskStatus> {
        debug!(%task_id, "expire_task: called");
        self.request(|reply| RegistryCommand::Expire {
            task_id: task_id.to_string(),
            reply: Some(reply),
        })
        .await
    }

    /// Finalize as cancelled and fire the task's token; no-op if terminal
    pub async fn cancel_task(&self, task_id: &str) -> RegistryResponse<TaskStatus> {
        debug!(%task_id, "cancel_task: called");
        self.request(|reply| RegistryCommand::Cancel {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> RegistryResponse<Option<Task>> {
        debug!(%task_id, "get_task: called");
        self.request(|reply| RegistryCommand::Get {
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    /// All known tasks, oldest first
    pub async fn list_tasks(&self) -> RegistryResponse<Vec<Task>> {
        debug!("list_tasks: called");
        self.request(|reply| RegistryCommand::List { reply }).await
    }

    pub async fn stats(&self) -> RegistryResponse<RegistryStats> {
        debug!("stats: called");
        self.request(|reply| RegistryCommand::Stats { reply }).await
    }

    /// Drop terminal tasks that ended more than `older_than` ago
    pub async fn prune_finished(&self, older_than: Duration) -> RegistryResponse<usize> {
        debug!(?older_than, "prune_finished: called");
        self.request(|reply| RegistryCommand::PruneFinished { older_than, reply })
            .await
    }

    /// Stop the actor, cancelling any task still in progress
    pub async fn shutdown(&self) -> RegistryResponse<()> {
        debug!("shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| RegistryError::ChannelError)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelError)
    }
}

struct TaskEntry {
    task: Task,
    token: CancellationToken,
    timer: Option<AbortHandle>,
}

struct PendingBegin {
    kind: String,
    timeout: Option<Duration>,
    reply: oneshot::Sender<RegistryResponse<TaskHandle>>,
}

struct RegistryActor {
    tasks: HashMap<String, TaskEntry>,
    queue: VecDeque<PendingBegin>,
    active: usize,
    max_tasks: usize,
    overflow: OverflowPolicy,
    emitter: Emitter,
    /// Weak so that timers alone do not keep the actor alive
    timer_tx: mpsc::WeakSender<RegistryCommand>,
}

impl RegistryActor {
    fn begin(&mut self, pending: PendingBegin) {
        if self.active < self.max_tasks {
            let handle = self.admit(&pending.kind, pending.timeout);
            let _ = pending.reply.send(Ok(handle));
            return;
        }

        match self.overflow {
            OverflowPolicy::Reject => {
                warn!(kind = %pending.kind, limit = self.max_tasks, "begin: throttled");
                self.emitter.log(
                    LogLevel::Warn,
                    format!("{} throttled: {} tasks already in progress", pending.kind, self.max_tasks),
                );
                let _ = pending
                    .reply
                    .send(Err(RegistryError::Throttled { limit: self.max_tasks }));
            }
            OverflowPolicy::Queue => {
                debug!(kind = %pending.kind, queued = self.queue.len() + 1, "begin: queueing");
                self.queue.push_back(pending);
            }
        }
    }

    fn admit(&mut self, kind: &str, timeout: Option<Duration>) -> TaskHandle {
        let timeout = timeout.filter(|d| !d.is_zero());
        let task = Task::new(kind, timeout);
        let id = task.id.clone();
        let token = CancellationToken::new();

        let timer = timeout.map(|duration| {
            let tx = self.timer_tx.clone();
            let task_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(RegistryCommand::Expire { task_id, reply: None }).await;
                }
            })
            .abort_handle()
        });

        self.active += 1;
        info!(task_id = %id, %kind, active = self.active, "Task started");
        self.tasks.insert(
            id.clone(),
            TaskEntry {
                task,
                token: token.clone(),
                timer,
            },
        );
        TaskHandle { id, token }
    }

    /// Apply a terminal status; the slot is released only on the first call
    fn finalize(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        failure: Option<TaskFailure>,
    ) -> RegistryResponse<TaskStatus> {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return Err(RegistryError::NotFound(task_id.to_string()));
        };

        if entry.task.is_terminal() {
            if entry.task.status == TaskStatus::Timeout && status == TaskStatus::Completed {
                warn!(%task_id, "finalize: result arrived after expiry, ignored");
            } else {
                debug!(%task_id, current = %entry.task.status, requested = %status, "finalize: already terminal");
            }
            return Ok(entry.task.status);
        }

        let winner = entry.task.finalize(status, result, failure);
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        if matches!(winner, TaskStatus::Timeout | TaskStatus::Cancelled) {
            entry.token.cancel();
        }
        info!(%task_id, kind = %entry.task.kind, status = %winner, "Task finalized");

        self.active = self.active.saturating_sub(1);
        self.promote();
        Ok(winner)
    }

    /// Admit queued requests while slots are free
    fn promote(&mut self) {
        while self.active < self.max_tasks {
            let Some(pending) = self.queue.pop_front() else {
                break;
            };
            if pending.reply.is_closed() {
                debug!(kind = %pending.kind, "promote: caller gone, skipping");
                continue;
            }
            debug!(kind = %pending.kind, "promoting from queue");
            let handle = self.admit(&pending.kind, pending.timeout);
            if let Err(Ok(handle)) = pending.reply.send(Ok(handle)) {
                // Caller went away between the check and the send
                let _ = self.finalize(&handle.id, TaskStatus::Cancelled, None, None);
            }
        }
    }

    fn expire(&mut self, task_id: &str) -> RegistryResponse<TaskStatus> {
        let was_running = self.tasks.get(task_id).is_some_and(|e| !e.task.is_terminal());
        let failure = TaskFailure {
            kind: crate::error::ErrorKind::Timeout,
            message: "deadline elapsed".to_string(),
        };
        let status = self.finalize(task_id, TaskStatus::Timeout, None, Some(failure))?;
        if was_running && status == TaskStatus::Timeout {
            warn!(%task_id, "Task timed out");
            self.emitter.correlated(task_id).timeout(task_id);
        }
        Ok(status)
    }

    fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            active: self.active,
            queued: self.queue.len(),
            ..Default::default()
        };
        for entry in self.tasks.values() {
            match entry.task.status {
                TaskStatus::InProgress => {}
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Error => stats.error += 1,
                TaskStatus::Timeout => stats.timeout += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    fn prune(&mut self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
        let before = self.tasks.len();
        self.tasks
            .retain(|_, entry| !(entry.task.is_terminal() && entry.task.ended_at.is_some_and(|t| t <= cutoff)));
        before - self.tasks.len()
    }

    fn shutdown(&mut self) {
        let running: Vec<String> = self
            .tasks
            .values()
            .filter(|e| !e.task.is_terminal())
            .map(|e| e.task.id.clone())
            .collect();
        self.queue.clear();
        for id in running {
            let _ = self.finalize(&id, TaskStatus::Cancelled, None, None);
        }
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut actor: RegistryActor, mut rx: mpsc::Receiver<RegistryCommand>) {
    debug!("actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Begin { kind, timeout, reply } => {
                debug!(%kind, "actor_loop: Begin command");
                actor.begin(PendingBegin { kind, timeout, reply });
            }

            RegistryCommand::AttachSession { task_id, session_id } => {
                debug!(%task_id, %session_id, "actor_loop: AttachSession command");
                match actor.tasks.get_mut(&task_id) {
                    Some(entry) => entry.task.sessions.push(session_id),
                    None => debug!(%task_id, "actor_loop: AttachSession for unknown task"),
                }
            }

            RegistryCommand::UpdateProgress { task_id, progress } => {
                if let Some(entry) = actor.tasks.get_mut(&task_id) {
                    entry.task.set_progress(progress);
                }
            }

            RegistryCommand::Complete { task_id, result, reply } => {
                debug!(%task_id, "actor_loop: Complete command");
                let status = actor.finalize(&task_id, TaskStatus::Completed, Some(result), None);
                let _ = reply.send(status);
            }

            RegistryCommand::Fail { task_id, failure, reply } => {
                debug!(%task_id, "actor_loop: Fail command");
                let status = TaskStatus::for_failure(failure.kind);
                let result = actor.finalize(&task_id, status, None, Some(failure));
                let _ = reply.send(result);
            }

            RegistryCommand::Expire { task_id, reply } => {
                debug!(%task_id, "actor_loop: Expire command");
                let result = actor.expire(&task_id);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            RegistryCommand::Cancel { task_id, reply } => {
                debug!(%task_id, "actor_loop: Cancel command");
                let failure = TaskFailure {
                    kind: crate::error::ErrorKind::Cancelled,
                    message: "cancelled by caller".to_string(),
                };
                let result = actor.finalize(&task_id, TaskStatus::Cancelled, None, Some(failure));
                let _ = reply.send(result);
            }

            RegistryCommand::Get { task_id, reply } => {
                debug!(%task_id, "actor_loop: Get command");
                let task = actor.tasks.get(&task_id).map(|e| e.task.clone());
                let _ = reply.send(Ok(task));
            }

            RegistryCommand::List { reply } => {
                debug!("actor_loop: List command");
                let mut tasks: Vec<Task> = actor.tasks.values().map(|e| e.task.clone()).collect();
                tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
                let _ = reply.send(Ok(tasks));
            }

            RegistryCommand::Stats { reply } => {
                debug!("actor_loop: Stats command");
                let _ = reply.send(Ok(actor.stats()));
            }

            RegistryCommand::PruneFinished { older_than, reply } => {
                debug!(?older_than, "actor_loop: PruneFinished command");
                let removed = actor.prune(older_than);
                info!(removed, "Pruned finished tasks");
                let _ = reply.send(Ok(removed));
            }

            RegistryCommand::Shutdown { reply } => {
                info!("TaskRegistry shutting down");
                actor.shutdown();
                let _ = reply.send(());
                break;
            }
        }
    }

    debug!("TaskRegistry actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::{Event, EventBus};
    use serde_json::json;

    fn registry(max_tasks: usize, overflow: OverflowPolicy) -> (TaskRegistry, EventBus) {
        let bus = EventBus::new(100);
        let config = ConcurrencyConfig { max_tasks, overflow };
        (TaskRegistry::spawn(&config, bus.emitter_for("test-run")), bus)
    }

    #[tokio::test]
    async fn test_begin_and_complete() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);

        let handle = registry.begin_task("requirements.extract", None).await.unwrap();
        registry.update_progress(&handle.id, 40);
        registry.attach_session(&handle.id, "s1").await.unwrap();

        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.progress, 40);
        assert_eq!(task.sessions, vec!["s1".to_string()]);

        let status = registry.complete_task(&handle.id, json!({"ok": true})).await.unwrap();
        assert_eq!(status, TaskStatus::Completed);

        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert_eq!(task.progress, 100);
        assert!(task.ended_at.is_some());
        assert!(!handle.token.is_cancelled());
    }

    #[tokio::test]
    async fn test_progress_after_terminal_is_ignored() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let handle = registry.begin_task("x", None).await.unwrap();
        registry.update_progress(&handle.id, 30);
        registry
            .fail_task(
                &handle.id,
                TaskFailure {
                    kind: ErrorKind::Backend,
                    message: "boom".to_string(),
                },
            )
            .await
            .unwrap();
        registry.update_progress(&handle.id, 80);

        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, 30);
    }

    #[tokio::test]
    async fn test_deadline_expires_task_and_fires_token() {
        let (registry, bus) = registry(4, OverflowPolicy::Queue);
        let mut rx = bus.subscribe();

        let handle = registry
            .begin_task("codegen.file", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle.token.cancelled())
            .await
            .unwrap();

        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Timeout);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.correlation_id, handle.id);
        assert!(matches!(envelope.event, Event::Timeout { ref task_id } if *task_id == handle.id));

        // The losing completion is a no-op that reports the winner
        let status = registry.complete_task(&handle.id, json!("late")).await.unwrap();
        assert_eq!(status, TaskStatus::Timeout);
        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert!(task.result.is_none());
    }

    #[tokio::test]
    async fn test_completion_before_deadline_wins() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let handle = registry
            .begin_task("x", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(
            registry.complete_task(&handle.id, json!(1)).await.unwrap(),
            TaskStatus::Completed
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!handle.token.is_cancelled());

        assert_eq!(registry.expire_task(&handle.id).await.unwrap(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_deadline() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let handle = registry.begin_task("x", Some(Duration::ZERO)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let task = registry.get_task(&handle.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.deadline.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_distinct_and_idempotent() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let handle = registry.begin_task("x", None).await.unwrap();

        assert_eq!(registry.cancel_task(&handle.id).await.unwrap(), TaskStatus::Cancelled);
        assert!(handle.token.is_cancelled());
        assert_eq!(registry.cancel_task(&handle.id).await.unwrap(), TaskStatus::Cancelled);

        let done = registry.begin_task("y", None).await.unwrap();
        registry.complete_task(&done.id, json!(null)).await.unwrap();
        assert_eq!(registry.cancel_task(&done.id).await.unwrap(), TaskStatus::Completed);
        assert!(!done.token.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let err = registry.complete_task("missing", json!(1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        assert!(registry.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_overflow() {
        let (registry, bus) = registry(1, OverflowPolicy::Reject);
        let mut rx = bus.subscribe();

        let first = registry.begin_task("a", None).await.unwrap();
        let err = registry.begin_task("b", None).await.unwrap_err();
        assert!(matches!(err, RegistryError::Throttled { limit: 1 }));

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, Event::Log { level: LogLevel::Warn, .. }));

        registry.complete_task(&first.id, json!(1)).await.unwrap();
        assert!(registry.begin_task("c", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_overflow_is_fifo() {
        let (registry, _bus) = registry(1, OverflowPolicy::Queue);
        let first = registry.begin_task("first", None).await.unwrap();

        let r2 = registry.clone();
        let second = tokio::spawn(async move { r2.begin_task("second", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r3 = registry.clone();
        let third = tokio::spawn(async move { r3.begin_task("third", None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.queued, 2);

        registry.complete_task(&first.id, json!(1)).await.unwrap();
        let second = second.await.unwrap().unwrap();
        let task = registry.get_task(&second.id).await.unwrap().unwrap();
        assert_eq!(task.kind, "second");

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.queued, 1);

        registry.complete_task(&second.id, json!(2)).await.unwrap();
        let third = third.await.unwrap().unwrap();
        assert_eq!(registry.get_task(&third.id).await.unwrap().unwrap().kind, "third");
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let a = registry.begin_task("a", None).await.unwrap();
        let b = registry.begin_task("b", None).await.unwrap();
        let c = registry.begin_task("c", None).await.unwrap();
        registry.complete_task(&a.id, json!(1)).await.unwrap();
        registry
            .fail_task(
                &b.id,
                TaskFailure {
                    kind: ErrorKind::Timeout,
                    message: "slow".to_string(),
                },
            )
            .await
            .unwrap();

        let kinds: Vec<String> = registry
            .list_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(kinds, vec!["a", "b", "c"]);

        let stats = registry.stats().await.unwrap();
        assert_eq!(
            stats,
            RegistryStats {
                active: 1,
                queued: 0,
                completed: 1,
                error: 0,
                timeout: 1,
                cancelled: 0,
            }
        );
        let _ = c;
    }

    #[tokio::test]
    async fn test_prune_finished() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let a = registry.begin_task("a", None).await.unwrap();
        let _b = registry.begin_task("b", None).await.unwrap();
        registry.complete_task(&a.id, json!(1)).await.unwrap();

        assert_eq!(registry.prune_finished(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(registry.prune_finished(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(registry.list_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running() {
        let (registry, _bus) = registry(4, OverflowPolicy::Queue);
        let handle = registry.begin_task("a", None).await.unwrap();
        registry.shutdown().await.unwrap();
        assert!(handle.token.is_cancelled());
        assert!(matches!(
            registry.get_task(&handle.id).await,
            Err(RegistryError::ChannelError)
        ));
    }
}

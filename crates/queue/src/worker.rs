//! Task worker with retry and backoff logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::store::TaskStore;
use super::task::{Task, TaskError, TaskKind, TaskStatus};

/// Async task handler.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for new tasks
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "task-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<tokio::task::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(()).await;
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Background task worker.
///
/// Polls a task store for pending tasks, executes them with registered
/// handlers, and applies retry/backoff or dead-lettering on failure.
pub struct Worker<S: TaskStore> {
    store: S,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl<S: TaskStore + 'static> Worker<S> {
    /// Create a new worker with the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task kind pattern.
    pub fn register_handler(&mut self, kind_pattern: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind_pattern.into(), handler);
    }

    /// Get the handler for a task kind.
    fn get_handler(&self, kind: &TaskKind) -> Option<&Arc<dyn TaskHandler>> {
        // Try exact match first
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        // Try category match (e.g., "report.*" matches "report.weekly")
        for (pattern, handler) in &self.handlers {
            if pattern.ends_with(".*") {
                let prefix = &pattern[..pattern.len() - 2];
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        // Try wildcard
        self.handlers.get("*")
    }

    /// Spawn the worker onto the runtime.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(worker_loop(self, config, shutdown_rx, stats_clone));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Execute a single task (also used directly in tests).
    pub async fn execute_one(&self, task: &mut Task) -> Result<(), String> {
        let handler = match self.get_handler(&task.kind) {
            Some(h) => h.clone(),
            None => {
                let error = format!("no handler for task kind: {:?}", task.kind);
                warn!(task_id = %task.id, error = %error, "no handler for task");
                task.mark_failed(error.clone(), Utc::now());
                self.store.update(task).ok();
                return Err(error);
            }
        };

        let started = Utc::now();

        match handler.handle(task).await {
            Ok(()) => {
                task.mark_completed(started);
                self.store.update(task).map_err(|e| e.to_string())?;
                debug!(task_id = %task.id, "task completed");
                Ok(())
            }
            Err(e) if e.retryable => {
                task.mark_failed(e.message.clone(), started);
                self.store.update(task).map_err(|e| e.to_string())?;

                if matches!(task.status, TaskStatus::DeadLettered { .. }) {
                    warn!(task_id = %task.id, error = %e, "task dead-lettered");
                    self.store.dead_letter(task.clone(), e.message.clone()).ok();
                }

                Err(e.message)
            }
            Err(e) => {
                // Permanent: another attempt would fail identically.
                task.mark_dead(e.message.clone(), started);
                self.store.update(task).map_err(|e| e.to_string())?;
                warn!(task_id = %task.id, error = %e, "task failed permanently");
                self.store.dead_letter(task.clone(), e.message.clone()).ok();
                Err(e.message)
            }
        }
    }
}

async fn worker_loop<S: TaskStore>(
    worker: Worker<S>,
    config: WorkerConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) where
    S: 'static,
{
    info!(worker = %config.name, "task worker started");
    let start_time = Instant::now();

    loop {
        // Check for shutdown
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        {
            let mut s = stats.lock().unwrap();
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        // Try to claim a task
        match worker.store.claim_next() {
            Ok(Some(mut task)) => {
                debug!(
                    worker = %config.name,
                    task_id = %task.id,
                    kind = ?task.kind,
                    "claimed task"
                );

                let result = worker.execute_one(&mut task).await;

                let mut s = stats.lock().unwrap();
                s.tasks_processed += 1;
                match result {
                    Ok(()) => s.tasks_succeeded += 1,
                    Err(_) => {
                        s.tasks_failed += 1;
                        if matches!(task.status, TaskStatus::DeadLettered { .. }) {
                            s.tasks_dead_lettered += 1;
                        }
                    }
                }
            }
            Ok(None) => {
                // No tasks available, sleep
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(e) => {
                error!(worker = %config.name, error = ?e, "failed to claim task");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }

    info!(worker = %config.name, "task worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTaskStore;
    use crate::task::RetryPolicy;

    struct Succeed;

    #[async_trait]
    impl TaskHandler for Succeed {
        async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
            Ok(())
        }
    }

    struct FailWith(TaskError);

    #[async_trait]
    impl TaskHandler for FailWith {
        async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
            Err(self.0.clone())
        }
    }

    #[tokio::test]
    async fn execute_successful_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut worker = Worker::new(store.clone());

        worker.register_handler("test", Arc::new(Succeed));

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}));
        store.enqueue(task).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        let result = worker.execute_one(&mut claimed).await;

        assert!(result.is_ok());
        assert!(matches!(claimed.status, TaskStatus::Completed));
    }

    #[tokio::test]
    async fn retryable_failure_backs_off_then_dead_letters() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut worker = Worker::new(store.clone());

        worker.register_handler(
            "test",
            Arc::new(FailWith(TaskError::retryable("provider timeout"))),
        );

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}))
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                ..Default::default()
            });
        store.enqueue(task).unwrap();

        // First attempt
        let mut claimed = store.claim_next().unwrap().unwrap();
        let result = worker.execute_one(&mut claimed).await;
        assert!(result.is_err());
        assert!(matches!(claimed.status, TaskStatus::Failed { .. }));
        assert!(claimed.scheduled_at.is_some());

        // Second attempt (skip the backoff)
        claimed.scheduled_at = None;
        store.update(&claimed).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        let result = worker.execute_one(&mut claimed).await;
        assert!(result.is_err());
        assert!(matches!(claimed.status, TaskStatus::DeadLettered { .. }));
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut worker = Worker::new(store.clone());

        worker.register_handler(
            "test",
            Arc::new(FailWith(TaskError::permanent("query must not be empty"))),
        );

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}))
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                ..Default::default()
            });
        let task_id = task.id;
        store.enqueue(task).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        let result = worker.execute_one(&mut claimed).await;

        assert!(result.is_err());
        assert!(matches!(claimed.status, TaskStatus::DeadLettered { .. }));

        // Straight to the DLQ, nothing left to claim.
        assert!(store.get(task_id).unwrap().is_none());
        assert_eq!(store.list_dead_letters(10).unwrap().len(), 1);
        assert!(store.claim_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn wildcard_handler() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut worker = Worker::new(store.clone());

        worker.register_handler("*", Arc::new(Succeed));

        let task = Task::new(TaskKind::custom("anything"), serde_json::json!({}));
        store.enqueue(task).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        let result = worker.execute_one(&mut claimed).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn category_handler() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut worker = Worker::new(store.clone());

        worker.register_handler("report.*", Arc::new(Succeed));

        let task = Task::new(TaskKind::custom("report.weekly"), serde_json::json!({}));
        store.enqueue(task).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        let result = worker.execute_one(&mut claimed).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn spawned_worker_drains_the_queue() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut worker = Worker::new(store.clone());
        worker.register_handler("*", Arc::new(Succeed));

        for _ in 0..3 {
            store
                .enqueue(Task::new(TaskKind::custom("test"), serde_json::json!({})))
                .unwrap();
        }

        let handle = worker.spawn(
            WorkerConfig::default()
                .with_name("test-worker")
                .with_poll_interval(Duration::from_millis(5)),
        );

        // Poll until the queue drains.
        for _ in 0..100 {
            if handle.stats().tasks_processed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.tasks_processed, 3);
        assert_eq!(stats.tasks_succeeded, 3);
        assert_eq!(store.stats().unwrap().completed, 3);
    }
}

//! Task storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use jobforge_core::RunId;

use super::task::{DeadLetterEntry, Task, TaskId, TaskStatus};

/// Task store abstraction.
pub trait TaskStore: Send + Sync {
    /// Enqueue a new task.
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError>;

    /// Get a task by ID.
    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    /// Update a task.
    fn update(&self, task: &Task) -> Result<(), TaskStoreError>;

    /// Claim the next pending task that is ready to execute.
    /// Returns None if no tasks are available.
    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError>;

    /// List tasks attached to a run.
    fn list_for_run(&self, run_id: RunId, limit: usize) -> Result<Vec<Task>, TaskStoreError>;

    /// Move a task to the dead-letter queue.
    fn dead_letter(&self, task: Task, reason: String) -> Result<(), TaskStoreError>;

    /// List dead-lettered tasks.
    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TaskStoreError>;

    /// Retry a dead-lettered task (move back to pending with a fresh budget).
    fn retry_dead_letter(&self, task_id: TaskId) -> Result<Task, TaskStoreError>;

    /// Delete a dead-lettered task.
    fn delete_dead_letter(&self, task_id: TaskId) -> Result<(), TaskStoreError>;

    /// Get queue statistics.
    fn stats(&self) -> Result<QueueStats, TaskStoreError>;
}

/// Task store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Queue statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// In-memory task store for tests/dev.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    dead_letters: RwLock<HashMap<TaskId, DeadLetterEntry>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            dead_letters: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        let id = task.id;
        tasks.insert(id, task);
        Ok(id)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.get(&task_id).cloned())
    }

    fn update(&self, task: &Task) -> Result<(), TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(TaskStoreError::NotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();

        // Find the oldest ready pending task
        let mut candidates: Vec<_> = tasks
            .values()
            .filter(|t| {
                matches!(t.status, TaskStatus::Pending | TaskStatus::Failed { .. }) && t.is_ready()
            })
            .collect();

        // Sort by created_at to ensure FIFO
        candidates.sort_by_key(|t| t.created_at);

        if let Some(task) = candidates.first() {
            let task_id = task.id;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.mark_running();
                return Ok(Some(task.clone()));
            }
        }

        Ok(None)
    }

    fn list_for_run(&self, run_id: RunId, limit: usize) -> Result<Vec<Task>, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        let mut result: Vec<_> = tasks
            .values()
            .filter(|t| t.run_id == Some(run_id))
            .cloned()
            .collect();

        result.sort_by_key(|t| t.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn dead_letter(&self, mut task: Task, reason: String) -> Result<(), TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let mut dls = self.dead_letters.write().unwrap();

        task.status = TaskStatus::DeadLettered {
            error: reason.clone(),
            attempts: task.attempt,
        };
        task.updated_at = Utc::now();

        tasks.remove(&task.id);
        dls.insert(task.id, DeadLetterEntry::new(task, reason));

        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TaskStoreError> {
        let dls = self.dead_letters.read().unwrap();
        let mut result: Vec<_> = dls.values().cloned().collect();

        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(&self, task_id: TaskId) -> Result<Task, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let mut dls = self.dead_letters.write().unwrap();

        let entry = dls
            .remove(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;

        let mut task = entry.task;
        task.status = TaskStatus::Pending;
        task.attempt = 0;
        task.scheduled_at = None;
        task.updated_at = Utc::now();
        task.history.clear();

        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn delete_dead_letter(&self, task_id: TaskId) -> Result<(), TaskStoreError> {
        let mut dls = self.dead_letters.write().unwrap();

        if dls.remove(&task_id).is_none() {
            return Err(TaskStoreError::NotFound(task_id));
        }
        Ok(())
    }

    fn stats(&self) -> Result<QueueStats, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        let dls = self.dead_letters.read().unwrap();

        let mut stats = QueueStats::default();

        for task in tasks.values() {
            match &task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }

        stats.dead_lettered += dls.len();

        Ok(stats)
    }
}

impl TaskStore for Arc<InMemoryTaskStore> {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        (**self).enqueue(task)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        (**self).get(task_id)
    }

    fn update(&self, task: &Task) -> Result<(), TaskStoreError> {
        (**self).update(task)
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        (**self).claim_next()
    }

    fn list_for_run(&self, run_id: RunId, limit: usize) -> Result<Vec<Task>, TaskStoreError> {
        (**self).list_for_run(run_id, limit)
    }

    fn dead_letter(&self, task: Task, reason: String) -> Result<(), TaskStoreError> {
        (**self).dead_letter(task, reason)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, TaskStoreError> {
        (**self).list_dead_letters(limit)
    }

    fn retry_dead_letter(&self, task_id: TaskId) -> Result<Task, TaskStoreError> {
        (**self).retry_dead_letter(task_id)
    }

    fn delete_dead_letter(&self, task_id: TaskId) -> Result<(), TaskStoreError> {
        (**self).delete_dead_letter(task_id)
    }

    fn stats(&self) -> Result<QueueStats, TaskStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryTaskStore::new();

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}));
        let task_id = store.enqueue(task).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, task_id);
        assert!(matches!(claimed.status, TaskStatus::Running));
        assert_eq!(claimed.attempt, 1);

        // No more tasks
        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn claim_is_fifo() {
        let store = InMemoryTaskStore::new();

        let mut ids = Vec::new();
        for i in 0..3 {
            let mut task = Task::new(TaskKind::custom("test"), serde_json::json!({"i": i}));
            // Force distinct timestamps so ordering is unambiguous.
            task.created_at = task.created_at + chrono::Duration::milliseconds(i as i64);
            ids.push(task.id);
            store.enqueue(task).unwrap();
        }

        for expected in ids {
            let claimed = store.claim_next().unwrap().unwrap();
            assert_eq!(claimed.id, expected);
        }
    }

    #[test]
    fn backed_off_task_is_not_ready() {
        let store = InMemoryTaskStore::new();

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}))
            .delayed(std::time::Duration::from_secs(3600));
        store.enqueue(task).unwrap();

        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn dead_letter_flow() {
        let store = InMemoryTaskStore::new();

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}));
        let task_id = task.id;
        store.enqueue(task).unwrap();

        let mut claimed = store.claim_next().unwrap().unwrap();
        claimed.mark_failed("test error".to_string(), Utc::now());

        store
            .dead_letter(claimed, "max retries exceeded".to_string())
            .unwrap();

        // Task is no longer in the main queue
        assert!(store.get(task_id).unwrap().is_none());

        // Task is in the DLQ
        let dls = store.list_dead_letters(10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].task.id, task_id);

        // Retry the task
        let retried = store.retry_dead_letter(task_id).unwrap();
        assert!(matches!(retried.status, TaskStatus::Pending));
        assert_eq!(retried.attempt, 0);

        // DLQ is now empty
        let dls = store.list_dead_letters(10).unwrap();
        assert!(dls.is_empty());
    }

    #[test]
    fn deleted_dead_letter_is_discarded() {
        let store = InMemoryTaskStore::new();

        let task = Task::new(TaskKind::custom("test"), serde_json::json!({}));
        let task_id = task.id;
        store.enqueue(task).unwrap();
        let claimed = store.claim_next().unwrap().unwrap();
        store.dead_letter(claimed, "poison payload".to_string()).unwrap();

        store.delete_dead_letter(task_id).unwrap();
        assert!(store.list_dead_letters(10).unwrap().is_empty());

        // Gone for good, not requeued.
        assert!(store.get(task_id).unwrap().is_none());
        assert!(matches!(
            store.retry_dead_letter(task_id),
            Err(TaskStoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_for_run_filters_by_run() {
        let store = InMemoryTaskStore::new();
        let run_id = RunId::new();

        let task = Task::new(TaskKind::JobSearch, serde_json::json!({})).for_run(run_id);
        let task_id = task.id;
        store.enqueue(task).unwrap();
        store
            .enqueue(Task::new(TaskKind::Profiling, serde_json::json!({})))
            .unwrap();

        let listed = store.list_for_run(run_id, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, task_id);
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryTaskStore::new();

        for i in 0..5 {
            let task = Task::new(TaskKind::custom("test"), serde_json::json!({"i": i}));
            store.enqueue(task).unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 5);

        store.claim_next().unwrap();
        store.claim_next().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
    }
}

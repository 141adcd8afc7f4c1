//! Core task types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobforge_core::RunId;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task kind for routing to the appropriate handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Full job-search pipeline run
    JobSearch,
    /// Profile structuring run
    Profiling,
    /// Generic/custom task
    Custom { kind: String },
}

impl TaskKind {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            TaskKind::JobSearch => "job_search",
            TaskKind::Profiling => "profiling",
            TaskKind::Custom { kind } => kind,
        }
    }
}

/// Task execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    /// Completed successfully
    Completed,
    /// Failed, will be retried
    Failed { error: String, attempt: u32 },
    /// Exhausted retries (or failed permanently), moved to DLQ
    DeadLettered { error: String, attempts: u32 },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLettered { .. })
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. })
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = single attempt, no retries)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// The pipeline standard: three attempts, one minute apart doubling,
    /// capped at ten minutes.
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(60), Duration::from_secs(600))
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        // Apply jitter
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            // Simple deterministic "jitter" based on attempt
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Check if more retries are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A queued pipeline task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Task kind for routing
    pub kind: TaskKind,
    /// JSON payload (the serialized workflow context)
    pub payload: serde_json::Value,
    /// Owning run, when the task drives one
    pub run_id: Option<RunId>,
    /// Current status
    pub status: TaskStatus,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Current attempt number (starts at 0)
    pub attempt: u32,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task was last updated
    pub updated_at: DateTime<Utc>,
    /// When the task should next be executed (for backoff/delayed tasks)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Execution history (previous attempts)
    pub history: Vec<TaskAttemptRecord>,
}

/// Record of a task execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Task {
    /// Create a new task.
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind,
            payload,
            run_id: None,
            status: TaskStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            history: Vec::new(),
        }
    }

    /// Attach the run this task drives.
    pub fn for_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Schedule the task with a delay from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_at =
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        self
    }

    /// Check if the task is ready to execute.
    pub fn is_ready(&self) -> bool {
        match self.scheduled_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }

    /// Mark task as running.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Mark task as completed.
    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.updated_at = now;
        self.history.push(TaskAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: true,
            error: None,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    /// Mark task as failed: back off and retry, or dead-letter when the
    /// attempt budget is spent.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(TaskAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error.clone()),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });

        if self.retry_policy.should_retry(self.attempt) {
            // Schedule retry with backoff
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = TaskStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            // Move to dead letter
            self.status = TaskStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }

    /// Mark task as permanently failed, skipping any remaining attempts.
    ///
    /// Used for non-retryable errors (a 4xx from a provider, an invalid
    /// payload) where another attempt would fail identically.
    pub fn mark_dead(&mut self, error: String, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(TaskAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error.clone()),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
        self.status = TaskStatus::DeadLettered {
            error,
            attempts: self.attempt,
        };
    }
}

/// Error returned by a task handler.
///
/// `retryable` decides the path: `true` consults the retry policy (backoff,
/// then DLQ once the budget is spent), `false` dead-letters immediately.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskError {}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: Task,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(task: Task, reason: String) -> Self {
        Self {
            task,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(480));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(600));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(600));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn task_lifecycle() {
        let mut task = Task::new(TaskKind::custom("test"), serde_json::json!({"key": "value"}));

        assert!(matches!(task.status, TaskStatus::Pending));
        assert_eq!(task.attempt, 0);

        task.mark_running();
        assert!(matches!(task.status, TaskStatus::Running));
        assert_eq!(task.attempt, 1);

        let started = Utc::now();
        task.mark_completed(started);
        assert!(matches!(task.status, TaskStatus::Completed));
        assert_eq!(task.history.len(), 1);
        assert!(task.history[0].success);
    }

    #[test]
    fn task_failure_and_retry() {
        let mut task = Task::new(TaskKind::custom("test"), serde_json::json!({}))
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                ..Default::default()
            });

        task.mark_running();
        let started = Utc::now();
        task.mark_failed("error 1".to_string(), started);

        assert!(matches!(task.status, TaskStatus::Failed { .. }));
        assert!(task.scheduled_at.is_some());

        task.mark_running();
        let started = Utc::now();
        task.mark_failed("error 2".to_string(), started);

        assert!(matches!(task.status, TaskStatus::DeadLettered { .. }));
    }

    #[test]
    fn mark_dead_skips_remaining_budget() {
        let mut task = Task::new(TaskKind::JobSearch, serde_json::json!({}))
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                ..Default::default()
            });

        task.mark_running();
        assert_eq!(task.attempt, 1);

        task.mark_dead("search query must not be empty".to_string(), Utc::now());
        assert!(matches!(
            task.status,
            TaskStatus::DeadLettered { attempts: 1, .. }
        ));
        assert_eq!(task.history.len(), 1);
    }
}

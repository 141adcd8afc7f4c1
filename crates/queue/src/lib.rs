//! Background task queue.
//!
//! Pipeline runs execute off-request: the API enqueues a [`Task`], a
//! [`Worker`] claims it FIFO and drives the registered handler, and failures
//! either back off and retry or land in the dead-letter queue.

pub mod store;
pub mod task;
pub mod worker;

pub use store::{InMemoryTaskStore, QueueStats, TaskStore, TaskStoreError};
pub use task::{
    BackoffStrategy, DeadLetterEntry, RetryPolicy, Task, TaskAttemptRecord, TaskError, TaskId,
    TaskKind, TaskStatus,
};
pub use worker::{TaskHandler, Worker, WorkerConfig, WorkerHandle, WorkerStats};

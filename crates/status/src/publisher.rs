//! Publisher abstraction and the in-process bus.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::update::StatusUpdate;

#[derive(Debug, Error, Clone)]
pub enum StatusError {
    #[error("status transport error: {0}")]
    Transport(String),

    #[error("status serialize error: {0}")]
    Serialize(String),
}

/// Publish run status updates.
///
/// Publication is advisory. The pipeline calls [`StatusPublisher::emit`],
/// which logs and swallows failures, so a broken channel can never fail a
/// run or change its stored state.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, update: &StatusUpdate) -> Result<(), StatusError>;

    /// Fire-and-forget publish.
    fn emit(&self, update: &StatusUpdate) {
        if let Err(error) = self.publish(update) {
            warn!(run_id = %update.run_id, %error, "status publish failed, continuing");
        }
    }
}

impl<P> StatusPublisher for Arc<P>
where
    P: StatusPublisher + ?Sized,
{
    fn publish(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        (**self).publish(update)
    }
}

/// Publish to several transports at once (in-process bus plus Redis, say).
///
/// Every target is attempted even when an earlier one fails; the error is
/// the joined failure text.
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn StatusPublisher>>,
}

impl FanoutPublisher {
    pub fn new(targets: Vec<Arc<dyn StatusPublisher>>) -> Self {
        Self { targets }
    }
}

impl StatusPublisher for FanoutPublisher {
    fn publish(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        let mut failures = Vec::new();
        for target in &self.targets {
            if let Err(e) = target.publish(update) {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StatusError::Transport(failures.join("; ")))
        }
    }
}

/// In-process broadcast bus, the backing channel of the live run stream.
///
/// Subscribers that fall behind lose the oldest updates (broadcast
/// semantics); the stored run row stays the source of truth.
#[derive(Debug)]
pub struct InMemoryStatusBus {
    tx: broadcast::Sender<StatusUpdate>,
}

impl InMemoryStatusBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

impl Default for InMemoryStatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher for InMemoryStatusBus {
    fn publish(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        // No live subscriber is not a failure.
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}

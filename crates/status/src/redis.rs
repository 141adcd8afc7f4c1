//! Redis pub/sub status transport (optional).
//!
//! Note: Redis pub/sub is not durable (updates published while no subscriber
//! is connected are dropped). The stored run row remains the source of truth;
//! this channel only feeds live streams in other processes.

use std::sync::Arc;
use std::thread;

use redis::Commands;

use crate::publisher::{InMemoryStatusBus, StatusError, StatusPublisher};
use crate::update::StatusUpdate;

/// Publishes one JSON message per update on `run:status:{run_id}`.
#[derive(Debug, Clone)]
pub struct RedisStatusPublisher {
    client: redis::Client,
}

impl RedisStatusPublisher {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StatusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StatusError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Forward updates published by other processes into a local bus.
    ///
    /// Spawns a background thread subscribed to `run:status:*`; the thread
    /// exits when the connection drops.
    pub fn bridge_into(&self, bus: Arc<InMemoryStatusBus>) {
        let client = self.client.clone();

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(_) => return,
            };

            let mut pubsub = conn.as_pubsub();
            if pubsub.psubscribe("run:status:*").is_err() {
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let update: StatusUpdate = match serde_json::from_str(&payload) {
                    Ok(u) => u,
                    Err(_) => continue,
                };

                let _ = bus.publish(&update);
            }
        });
    }
}

impl StatusPublisher for RedisStatusPublisher {
    fn publish(&self, update: &StatusUpdate) -> Result<(), StatusError> {
        let payload =
            serde_json::to_string(update).map_err(|e| StatusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| StatusError::Transport(e.to_string()))?;

        let _: i64 = conn
            .publish(update.channel(), payload)
            .map_err(|e| StatusError::Transport(e.to_string()))?;

        Ok(())
    }
}

//! Live run-status publication.
//!
//! Pipeline nodes snapshot the run row into a [`StatusUpdate`] and emit it
//! fire-and-forget; the API's stream endpoint subscribes and forwards them.

pub mod publisher;
#[cfg(feature = "redis")]
pub mod redis;
pub mod update;

pub use publisher::{FanoutPublisher, InMemoryStatusBus, StatusError, StatusPublisher};
#[cfg(feature = "redis")]
pub use redis::RedisStatusPublisher;
pub use update::{channel_for, StatusUpdate, HEARTBEAT_INTERVAL};

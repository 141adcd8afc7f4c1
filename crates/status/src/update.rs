//! Status update payloads and channel naming.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobforge_core::{Run, RunId, RunStatus};

/// How often a live stream emits a heartbeat when no update arrived.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Per-run channel name, shared by every transport.
pub fn channel_for(run_id: RunId) -> String {
    format!("run:status:{run_id}")
}

/// One point-in-time snapshot of a run, published on every status-relevant
/// write and forwarded verbatim to stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Node that just finished, on per-node progress updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_matched_jobs: u32,
    pub research_completed: u32,
    pub research_failed: u32,
    pub fabrication_completed: u32,
    pub fabrication_failed: u32,
    pub delivery_triggered: bool,
    pub occurred_at: DateTime<Utc>,
}

impl StatusUpdate {
    /// Snapshot a run row into a publishable update.
    pub fn of_run(run: &Run) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            node: None,
            message: None,
            error: run.error_message.clone(),
            total_matched_jobs: run.total_matched_jobs,
            research_completed: run.research_completed_count,
            research_failed: run.research_failed_count,
            fabrication_completed: run.fabrication_completed_count,
            fabrication_failed: run.fabrication_failed_count,
            delivery_triggered: run.delivery_triggered,
            occurred_at: Utc::now(),
        }
    }

    /// Per-node progress update: the run snapshot plus which node finished.
    pub fn progress(run: &Run, node: &str, message: impl Into<String>) -> Self {
        let mut update = Self::of_run(run);
        update.node = Some(node.to_string());
        update.message = Some(message.into());
        update
    }

    pub fn channel(&self) -> String {
        channel_for(self.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_embeds_the_run_id() {
        let run = Run::new(None);
        let update = StatusUpdate::of_run(&run);
        assert_eq!(update.channel(), format!("run:status:{}", run.id));
    }

    #[test]
    fn error_field_is_omitted_when_absent() {
        let run = Run::new(None);
        let update = StatusUpdate::of_run(&run);
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn failed_run_snapshot_carries_the_message() {
        let mut run = Run::new(None);
        run.mark_failed("search provider timed out");
        let update = StatusUpdate::of_run(&run);
        assert_eq!(update.status, RunStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("search provider timed out"));
    }

    #[test]
    fn progress_update_names_the_node() {
        let mut run = Run::new(None);
        run.mark_processing();
        let update = StatusUpdate::progress(&run, "research", "research finished");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["node"], "research");
        assert_eq!(json["message"], "research finished");
        assert_eq!(json["status"], "processing");
    }
}

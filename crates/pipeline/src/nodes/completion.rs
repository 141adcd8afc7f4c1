//! Completion: detect when every matched item has resolved.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jobforge_status::{StatusPublisher, StatusUpdate};
use jobforge_store::{MatchedJobStore, RunStore};

use crate::context::{JobSearchContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Marks the run completed once both stages of every matched job are
/// terminal. A run with zero matched jobs is vacuously complete. The write
/// happens at most once; only the first transition publishes.
pub struct CompletionNode {
    matches: Arc<dyn MatchedJobStore>,
    runs: Arc<dyn RunStore>,
    publisher: Arc<dyn StatusPublisher>,
}

impl CompletionNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            matches: deps.stores.matches.clone(),
            runs: deps.stores.runs.clone(),
            publisher: deps.publisher.clone(),
        }
    }
}

#[async_trait]
impl Node<JobSearchContext> for CompletionNode {
    fn name(&self) -> &'static str {
        "completion"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        let Some(run_id) = ctx.run_id else {
            ctx.record_error("completion requires a run id");
            return Ok(ctx);
        };

        let items = self.matches.list_for_run(run_id).await?;
        if !items.iter().all(|job| job.both_resolved()) {
            info!(run_id = %run_id, "matched items still open, leaving the run in processing");
            return Ok(ctx);
        }

        if self.runs.complete_once(run_id).await? {
            info!(run_id = %run_id, items = items.len(), "run completed");
            if let Some(run) = self.runs.get(run_id).await? {
                self.publisher.emit(&StatusUpdate::of_run(&run));
            }
        }
        Ok(ctx)
    }
}

//! Node contract.

use async_trait::async_trait;

use crate::context::WorkflowContext;
use crate::error::PipelineResult;

/// One pipeline stage: take the context, do the stage's work, hand the
/// mutated context on.
///
/// Expected domain failures (missing inputs, nothing found) are recorded via
/// [`WorkflowContext::record_error`] and the node returns `Ok`; the workflow
/// halts after it. `Err` is reserved for infrastructure failures the task
/// adapter should classify and possibly retry. A node re-invoked over state
/// that already reflects success must detect it and short-circuit without
/// repeating external calls.
#[async_trait]
pub trait Node<C: WorkflowContext>: Send + Sync {
    /// Short stable name, used in spans, traces and gates.
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: C) -> PipelineResult<C>;
}

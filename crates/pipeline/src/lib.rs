//! `jobforge-pipeline` — the workflow engine and its nodes.
//!
//! A [`Workflow`] is an ordered list of [`Node`]s sharing a typed context.
//! Nodes record domain failures on the context (halting the rest of the
//! chain) and propagate infrastructure failures as [`PipelineError`]; every
//! node short-circuits over work a previous drive already persisted, so a
//! re-enqueued task converges instead of repeating side effects.
//!
//! Two workflows are wired here: the job-search pipeline
//! (`profile_retrieval → discovery → matching → research → fabrication →
//! completion → delivery`, with an early-completion gate when nothing
//! matched) and the profiling pipeline (`validation → structuring`). The
//! [`WorkflowRunner`] adapts both to the task queue and owns the run's
//! terminal status.

pub mod context;
pub mod error;
pub mod node;
pub mod nodes;
pub mod presets;
pub mod runner;
pub mod workflow;


pub use context::{JobSearchContext, LoadedProfile, ProfilingContext, WorkflowContext};
pub use error::{PipelineError, PipelineResult};
pub use node::Node;
pub use nodes::{
    CompletionNode, DeliveryNode, DiscoveryNode, FabricationNode, MatchingNode,
    ProfileRetrievalNode, ProfileStructuringNode, ProfileValidationNode, ResearchNode,
};
pub use presets::{job_search_workflow, profiling_workflow, PipelineDeps};
pub use runner::WorkflowRunner;
pub use workflow::{NodeObserver, NodeTrace, StopReason, Workflow, WorkflowOutcome};

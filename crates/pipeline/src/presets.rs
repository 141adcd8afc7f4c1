//! Canonical workflow wiring.

use std::sync::Arc;

use jobforge_providers::ProviderSet;
use jobforge_status::StatusPublisher;
use jobforge_store::StoreSet;

use crate::context::{JobSearchContext, ProfilingContext};
use crate::nodes::{
    CompletionNode, DeliveryNode, DiscoveryNode, FabricationNode, MatchingNode,
    ProfileRetrievalNode, ProfileStructuringNode, ProfileValidationNode, ResearchNode,
};
use crate::workflow::Workflow;

/// Everything the nodes of one workflow execution work against.
///
/// Stores and the publisher are process-wide; the provider set is scoped to
/// one task execution and dropped with the deps.
#[derive(Clone)]
pub struct PipelineDeps {
    pub stores: StoreSet,
    pub providers: ProviderSet,
    pub publisher: Arc<dyn StatusPublisher>,
}

/// The job-search workflow.
///
/// Gated after matching: zero matched items end the run successfully without
/// driving the per-item stages.
pub fn job_search_workflow(deps: &PipelineDeps) -> Workflow<JobSearchContext> {
    Workflow::new("job_search")
        .node(ProfileRetrievalNode::new(deps))
        .node(DiscoveryNode::new(deps))
        .node(MatchingNode::new(deps))
        .node(ResearchNode::new(deps))
        .node(FabricationNode::new(deps))
        .node(CompletionNode::new(deps))
        .node(DeliveryNode::new(deps))
        .complete_early_after("matching", |ctx: &JobSearchContext| {
            ctx.matched_job_ids.is_empty()
        })
}

/// The profiling workflow.
pub fn profiling_workflow(deps: &PipelineDeps) -> Workflow<ProfilingContext> {
    Workflow::new("profiling")
        .node(ProfileValidationNode::new(deps))
        .node(ProfileStructuringNode::new(deps))
}


#[cfg(test)]
mod tests {
    use super::test_support::stub_deps;
    use super::*;

    #[test]
    fn job_search_node_order() {
        let workflow = job_search_workflow(&stub_deps(vec![]));
        assert_eq!(
            workflow.node_names(),
            vec![
                "profile_retrieval",
                "discovery",
                "matching",
                "research",
                "fabrication",
                "completion",
                "delivery",
            ]
        );
        assert_eq!(workflow.name(), "job_search");
    }

    #[test]
    fn profiling_node_order() {
        let workflow = profiling_workflow(&stub_deps(vec![]));
        assert_eq!(workflow.node_names(), vec!["validation", "structuring"]);
    }
}

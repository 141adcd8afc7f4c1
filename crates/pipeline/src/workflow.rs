//! Workflow orchestration over an ordered node list.
//!
//! - Nodes run strictly in declared order; any recorded context error halts
//!   the run before the next node.
//! - An early-exit gate can end a run successfully after a named node (the
//!   job-search workflow gates on "zero items matched" after matching).
//! - Each node call runs inside a `tracing` span carrying workflow, node and
//!   run id; observers are told after every node so progress can be published
//!   without the workflow knowing about stores or brokers.
//!
//! The workflow itself owns no persistence. Run rows are managed by the task
//! adapter around `execute`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::context::WorkflowContext;
use crate::error::PipelineResult;
use crate::node::Node;

/// Observer invoked after every node execution with the mutated context.
///
/// Observers are advisory: they must swallow their own failures.
#[async_trait]
pub trait NodeObserver<C: WorkflowContext>: Send + Sync {
    async fn node_finished(&self, ctx: &C, node: &'static str);
}

/// Why a workflow invocation stopped where it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every node ran.
    Finished,
    /// The named node recorded context errors; the rest were skipped.
    Halted { after: &'static str },
    /// The early-exit gate after the named node fired; the rest were
    /// skipped and the run counts as successfully finished.
    CompletedEarly { after: &'static str },
}

/// One executed node, as recorded in the in-memory trace.
#[derive(Debug, Clone)]
pub struct NodeTrace {
    pub node: &'static str,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Context error count after the node returned.
    pub errors_after: usize,
}

/// Final context plus how and where the invocation stopped.
#[derive(Debug)]
pub struct WorkflowOutcome<C> {
    pub ctx: C,
    pub stop: StopReason,
    pub trace: Vec<NodeTrace>,
}

type GatePredicate<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

/// An ordered node list with optional early-exit gates.
pub struct Workflow<C: WorkflowContext> {
    name: &'static str,
    nodes: Vec<Arc<dyn Node<C>>>,
    gates: HashMap<&'static str, GatePredicate<C>>,
    observers: Vec<Arc<dyn NodeObserver<C>>>,
}

impl<C: WorkflowContext> Workflow<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            nodes: Vec::new(),
            gates: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn node(mut self, node: impl Node<C> + 'static) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    /// End the run successfully after `node_name` when `predicate` holds on
    /// the context it produced. Never fires on a context carrying errors.
    pub fn complete_early_after(
        mut self,
        node_name: &'static str,
        predicate: impl Fn(&C) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.gates.insert(node_name, Box::new(predicate));
        self
    }

    pub fn observe(mut self, observer: Arc<dyn NodeObserver<C>>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub async fn execute(&self, mut ctx: C) -> PipelineResult<WorkflowOutcome<C>> {
        let mut trace = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let started_at = Utc::now();
            let started = Instant::now();
            let run_field = ctx.run_id().map(|id| id.to_string()).unwrap_or_default();
            let span = info_span!(
                "node",
                workflow = self.name,
                node = node.name(),
                run_id = %run_field
            );

            ctx = node.execute(ctx).instrument(span).await?;

            let duration_ms = started.elapsed().as_millis() as u64;
            trace.push(NodeTrace {
                node: node.name(),
                started_at,
                duration_ms,
                errors_after: ctx.errors().len(),
            });
            debug!(
                workflow = self.name,
                node = node.name(),
                duration_ms,
                errors = ctx.errors().len(),
                "node finished"
            );

            for observer in &self.observers {
                observer.node_finished(&ctx, node.name()).await;
            }

            if ctx.has_errors() {
                warn!(
                    workflow = self.name,
                    node = node.name(),
                    errors = ?ctx.errors(),
                    "node recorded errors, halting"
                );
                return Ok(WorkflowOutcome {
                    ctx,
                    stop: StopReason::Halted { after: node.name() },
                    trace,
                });
            }

            if let Some(gate) = self.gates.get(node.name()) {
                if gate(&ctx) {
                    info!(
                        workflow = self.name,
                        node = node.name(),
                        "early-exit gate fired, skipping remaining nodes"
                    );
                    return Ok(WorkflowOutcome {
                        ctx,
                        stop: StopReason::CompletedEarly { after: node.name() },
                        trace,
                    });
                }
            }
        }

        Ok(WorkflowOutcome {
            ctx,
            stop: StopReason::Finished,
            trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use jobforge_core::{ProfileId, RunId};
    use jobforge_providers::ProviderError;

    use super::*;
    use crate::error::PipelineError;

    #[derive(Debug, Default)]
    struct ToyCtx {
        run_id: Option<RunId>,
        errors: Vec<String>,
        visited: Vec<&'static str>,
        matched: usize,
    }

    impl WorkflowContext for ToyCtx {
        fn run_id(&self) -> Option<RunId> {
            self.run_id
        }

        fn set_run_id(&mut self, run_id: RunId) {
            self.run_id = Some(run_id);
        }

        fn profile_id(&self) -> Option<ProfileId> {
            None
        }

        fn errors(&self) -> &[String] {
            &self.errors
        }

        fn record_error(&mut self, error: impl Into<String>) {
            self.errors.push(error.into());
        }
    }

    /// Scripted step: visits, optionally errors or blows up, sets `matched`.
    struct Step {
        name: &'static str,
        record: Option<&'static str>,
        explode: bool,
        matched: Option<usize>,
    }

    impl Step {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                record: None,
                explode: false,
                matched: None,
            }
        }

        fn erroring(name: &'static str, message: &'static str) -> Self {
            Self {
                record: Some(message),
                ..Self::ok(name)
            }
        }

        fn exploding(name: &'static str) -> Self {
            Self {
                explode: true,
                ..Self::ok(name)
            }
        }

        fn matching(name: &'static str, matched: usize) -> Self {
            Self {
                matched: Some(matched),
                ..Self::ok(name)
            }
        }
    }

    #[async_trait]
    impl Node<ToyCtx> for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, mut ctx: ToyCtx) -> PipelineResult<ToyCtx> {
            if self.explode {
                return Err(PipelineError::Provider(ProviderError::timeout("boom")));
            }
            ctx.visited.push(self.name);
            if let Some(message) = self.record {
                ctx.record_error(message);
            }
            if let Some(matched) = self.matched {
                ctx.matched = matched;
            }
            Ok(ctx)
        }
    }

    #[tokio::test]
    async fn nodes_run_in_declared_order() {
        let workflow = Workflow::new("toy")
            .node(Step::ok("first"))
            .node(Step::ok("second"))
            .node(Step::ok("third"));

        let outcome = workflow.execute(ToyCtx::default()).await.unwrap();
        assert_eq!(outcome.ctx.visited, vec!["first", "second", "third"]);
        assert_eq!(outcome.stop, StopReason::Finished);
    }

    #[tokio::test]
    async fn recorded_error_halts_following_nodes() {
        let workflow = Workflow::new("toy")
            .node(Step::ok("first"))
            .node(Step::erroring("second", "nothing to work with"))
            .node(Step::ok("third"));

        let outcome = workflow.execute(ToyCtx::default()).await.unwrap();
        assert_eq!(outcome.ctx.visited, vec!["first", "second"]);
        assert_eq!(outcome.stop, StopReason::Halted { after: "second" });
        assert_eq!(outcome.ctx.joined_errors(), "nothing to work with");
    }

    #[tokio::test]
    async fn gate_skips_remaining_nodes() {
        let workflow = Workflow::new("toy")
            .node(Step::matching("screen", 0))
            .node(Step::ok("research"))
            .complete_early_after("screen", |ctx: &ToyCtx| ctx.matched == 0);

        let outcome = workflow.execute(ToyCtx::default()).await.unwrap();
        assert_eq!(outcome.ctx.visited, vec!["screen"]);
        assert_eq!(outcome.stop, StopReason::CompletedEarly { after: "screen" });
    }

    #[tokio::test]
    async fn gate_stays_closed_when_predicate_is_false() {
        let workflow = Workflow::new("toy")
            .node(Step::matching("screen", 2))
            .node(Step::ok("research"))
            .complete_early_after("screen", |ctx: &ToyCtx| ctx.matched == 0);

        let outcome = workflow.execute(ToyCtx::default()).await.unwrap();
        assert_eq!(outcome.ctx.visited, vec!["screen", "research"]);
        assert_eq!(outcome.stop, StopReason::Finished);
    }

    #[tokio::test]
    async fn infrastructure_errors_propagate() {
        let workflow = Workflow::new("toy")
            .node(Step::ok("first"))
            .node(Step::exploding("second"));

        let error = workflow.execute(ToyCtx::default()).await.unwrap_err();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn trace_records_each_executed_node() {
        let workflow = Workflow::new("toy")
            .node(Step::ok("first"))
            .node(Step::erroring("second", "stop here"))
            .node(Step::ok("third"));

        let outcome = workflow.execute(ToyCtx::default()).await.unwrap();
        let nodes: Vec<_> = outcome.trace.iter().map(|t| t.node).collect();
        assert_eq!(nodes, vec!["first", "second"]);
        assert_eq!(outcome.trace[0].errors_after, 0);
        assert_eq!(outcome.trace[1].errors_after, 1);
    }

    #[tokio::test]
    async fn observers_see_every_node() {
        struct Recorder(Mutex<Vec<&'static str>>);

        #[async_trait]
        impl NodeObserver<ToyCtx> for Recorder {
            async fn node_finished(&self, _ctx: &ToyCtx, node: &'static str) {
                self.0.lock().unwrap().push(node);
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let workflow = Workflow::new("toy")
            .node(Step::ok("first"))
            .node(Step::ok("second"))
            .observe(recorder.clone());

        workflow.execute(ToyCtx::default()).await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["first", "second"]);
    }
}

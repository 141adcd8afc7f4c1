//! Task-queue adapter: executes workflows off the queue and reconciles the
//! run's terminal status.
//!
//! Contract with the queue:
//! - A context that finished with recorded errors marks the run failed and
//!   consumes the task (`Ok`): domain failures are never retried.
//! - An escaping infrastructure error is handed back classified; the worker
//!   applies backoff or dead-letters. On a permanent error, or when the retry
//!   budget is spent, the run is marked failed before handing back.
//! - Provider clients are built fresh per execution through the factory and
//!   dropped at the end, so a retried task never sees a half-closed client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use jobforge_core::{Run, RunId};
use jobforge_providers::ProviderFactory;
use jobforge_queue::{Task, TaskError, TaskHandler, TaskKind};
use jobforge_status::{StatusPublisher, StatusUpdate};
use jobforge_store::{RunStore, StoreError, StoreSet};

use crate::context::WorkflowContext;
use crate::error::PipelineError;
use crate::presets::{job_search_workflow, profiling_workflow, PipelineDeps};
use crate::workflow::{NodeObserver, StopReason, Workflow};

/// Publishes a progress update after every node.
struct ProgressPublisher {
    runs: Arc<dyn RunStore>,
    publisher: Arc<dyn StatusPublisher>,
}

#[async_trait]
impl<C: WorkflowContext> NodeObserver<C> for ProgressPublisher {
    async fn node_finished(&self, ctx: &C, node: &'static str) {
        let Some(run_id) = ctx.run_id() else {
            return;
        };
        let Ok(Some(run)) = self.runs.get(run_id).await else {
            return;
        };
        self.publisher
            .emit(&StatusUpdate::progress(&run, node, format!("{node} finished")));
    }
}

/// Executes the pipeline workflows as queue task handlers.
pub struct WorkflowRunner {
    stores: StoreSet,
    factory: Arc<dyn ProviderFactory>,
    publisher: Arc<dyn StatusPublisher>,
}

impl WorkflowRunner {
    pub fn new(
        stores: StoreSet,
        factory: Arc<dyn ProviderFactory>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            stores,
            factory,
            publisher,
        }
    }

    fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            stores: self.stores.clone(),
            providers: self.factory.create(),
            publisher: self.publisher.clone(),
        }
    }

    async fn run_job_search(&self, task: &Task) -> Result<(), TaskError> {
        let ctx = self.decode(task).await?;
        let deps = self.deps();
        let workflow = job_search_workflow(&deps).observe(Arc::new(ProgressPublisher {
            runs: self.stores.runs.clone(),
            publisher: self.publisher.clone(),
        }));
        self.drive(workflow, ctx, task).await
    }

    async fn run_profiling(&self, task: &Task) -> Result<(), TaskError> {
        let ctx = self.decode(task).await?;
        let deps = self.deps();
        let workflow = profiling_workflow(&deps).observe(Arc::new(ProgressPublisher {
            runs: self.stores.runs.clone(),
            publisher: self.publisher.clone(),
        }));
        self.drive(workflow, ctx, task).await
    }

    /// Deserialize the payload; an undecodable payload is permanent and
    /// fails the run named on the task, if any.
    async fn decode<C>(&self, task: &Task) -> Result<C, TaskError>
    where
        C: WorkflowContext + DeserializeOwned,
    {
        match serde_json::from_value::<C>(task.payload.clone()) {
            Ok(mut ctx) => {
                if ctx.run_id().is_none() {
                    if let Some(run_id) = task.run_id {
                        ctx.set_run_id(run_id);
                    }
                }
                Ok(ctx)
            }
            Err(e) => {
                let message = format!("undecodable task payload: {e}");
                if let Some(run_id) = task.run_id {
                    self.fail_run_quietly(run_id, &message).await;
                }
                Err(TaskError::permanent(message))
            }
        }
    }

    async fn drive<C: WorkflowContext>(
        &self,
        workflow: Workflow<C>,
        mut ctx: C,
        task: &Task,
    ) -> Result<(), TaskError> {
        let run_id = self
            .ensure_run(&mut ctx)
            .await
            .map_err(|e| classify(&PipelineError::Store(e)))?;
        self.emit_run(run_id).await;

        match workflow.execute(ctx).await {
            Ok(outcome) => {
                if outcome.ctx.has_errors() {
                    let message = outcome.ctx.joined_errors();
                    self.stores
                        .runs
                        .mark_failed(run_id, &message)
                        .await
                        .map_err(|e| classify(&PipelineError::Store(e)))?;
                    self.emit_run(run_id).await;
                    warn!(run_id = %run_id, %message, "run failed");
                    return Ok(());
                }

                if let StopReason::CompletedEarly { after } = outcome.stop {
                    info!(run_id = %run_id, after, "no matched items, completing the run");
                }

                // The job-search completion node normally completed the run
                // already; the zero-match gate and the profiling workflow
                // complete it here.
                if self
                    .stores
                    .runs
                    .complete_once(run_id)
                    .await
                    .map_err(|e| classify(&PipelineError::Store(e)))?
                {
                    self.emit_run(run_id).await;
                }

                info!(run_id = %run_id, workflow = workflow.name(), "workflow finished");
                Ok(())
            }
            Err(workflow_error) => {
                let retryable = workflow_error.is_retryable();
                let budget_spent = !task.retry_policy.should_retry(task.attempt);
                if !retryable || budget_spent {
                    // No further attempt is coming; park the run as failed.
                    self.fail_run_quietly(run_id, &workflow_error.to_string())
                        .await;
                }
                error!(
                    run_id = %run_id,
                    error = %workflow_error,
                    retryable,
                    "workflow escaped with an infrastructure error"
                );
                Err(classify(&workflow_error))
            }
        }
    }

    /// Create the run row when the context carries none, then mark it
    /// processing either way.
    async fn ensure_run<C: WorkflowContext>(&self, ctx: &mut C) -> Result<RunId, StoreError> {
        match ctx.run_id() {
            Some(run_id) => {
                self.stores.runs.mark_processing(run_id).await?;
                Ok(run_id)
            }
            None => {
                let mut run = Run::new(ctx.profile_id());
                run.mark_processing();
                let run_id = self.stores.runs.create(run).await?;
                ctx.set_run_id(run_id);
                Ok(run_id)
            }
        }
    }

    async fn emit_run(&self, run_id: RunId) {
        if let Ok(Some(run)) = self.stores.runs.get(run_id).await {
            self.publisher.emit(&StatusUpdate::of_run(&run));
        }
    }

    async fn fail_run_quietly(&self, run_id: RunId, message: &str) {
        if let Err(store_error) = self.stores.runs.mark_failed(run_id, message).await {
            error!(run_id = %run_id, %store_error, "could not record run failure");
        }
        self.emit_run(run_id).await;
    }
}

fn classify(error: &PipelineError) -> TaskError {
    if error.is_retryable() {
        TaskError::retryable(error.to_string())
    } else {
        TaskError::permanent(error.to_string())
    }
}

#[async_trait]
impl TaskHandler for WorkflowRunner {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        match &task.kind {
            TaskKind::JobSearch => self.run_job_search(task).await,
            TaskKind::Profiling => self.run_profiling(task).await,
            TaskKind::Custom { kind } => {
                Err(TaskError::permanent(format!("no workflow for task kind {kind}")))
            }
        }
    }
}

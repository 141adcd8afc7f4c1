//! Research: investigate the company behind every matched posting.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use jobforge_core::{Research, RunCounter, StageKind};
use jobforge_providers::ResearchProvider;
use jobforge_store::{MatchedJobStore, PostingStore, ResearchStore, RunStore, StoreError};

use crate::context::{JobSearchContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Drives the research stage of every matched job to a terminal state.
///
/// Items are driven sequentially; one item's provider failures feed its own
/// stage machine and never abort the run. An existing `Research` row is the
/// short-circuit: the stage completes without a provider call.
pub struct ResearchNode {
    provider: Arc<dyn ResearchProvider>,
    matches: Arc<dyn MatchedJobStore>,
    research: Arc<dyn ResearchStore>,
    postings: Arc<dyn PostingStore>,
    runs: Arc<dyn RunStore>,
}

impl ResearchNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            provider: deps.providers.research.clone(),
            matches: deps.stores.matches.clone(),
            research: deps.stores.research.clone(),
            postings: deps.stores.postings.clone(),
            runs: deps.stores.runs.clone(),
        }
    }
}

#[async_trait]
impl Node<JobSearchContext> for ResearchNode {
    fn name(&self) -> &'static str {
        "research"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        let Some(run_id) = ctx.run_id else {
            ctx.record_error("research requires a run id");
            return Ok(ctx);
        };

        let items = self.matches.list_for_run(run_id).await?;
        let mut completed = 0usize;
        let mut failed = 0usize;

        for mut job in items {
            if job.research.is_terminal() {
                continue;
            }

            if self.research.get_for(job.id).await?.is_some() {
                // Persisted by an earlier drive; reconcile the stage record.
                if job.complete_stage(StageKind::Research) {
                    self.runs
                        .bump_counter(run_id, RunCounter::completed(StageKind::Research))
                        .await?;
                }
                self.matches.update(&job).await?;
                completed += 1;
                continue;
            }

            let Some(posting) = self.postings.get(job.posting_id).await? else {
                return Err(StoreError::not_found(format!(
                    "posting {} for matched job {}",
                    job.posting_id, job.id
                ))
                .into());
            };

            while !job.research.is_terminal() {
                job.begin_stage(StageKind::Research);
                self.matches.update(&job).await?;

                match self
                    .provider
                    .investigate(&posting.company, &posting.title)
                    .await
                {
                    Ok(answer) => {
                        let research = Research::new(
                            job.id,
                            posting.company.clone(),
                            answer.answer,
                            answer.citations,
                        );
                        self.research.upsert_for(research).await?;
                        if job.complete_stage(StageKind::Research) {
                            self.runs
                                .bump_counter(run_id, RunCounter::completed(StageKind::Research))
                                .await?;
                        }
                        self.matches.update(&job).await?;
                        completed += 1;
                    }
                    Err(error) => {
                        warn!(
                            company = %posting.company,
                            attempt = job.research.attempts,
                            %error,
                            "research attempt failed"
                        );
                        let outcome =
                            job.fail_stage(StageKind::Research, error.to_string(), ctx.max_retries);
                        if outcome.first_failure {
                            self.runs
                                .bump_counter(run_id, RunCounter::failed(StageKind::Research))
                                .await?;
                            failed += 1;
                        }
                        self.matches.update(&job).await?;
                    }
                }
            }
        }

        info!(run_id = %run_id, completed, failed, "research drive finished");
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use jobforge_core::{JobSearch, MatchedJob, MatchedJobId, Posting, Run, RunId, StageStatus};

    use super::*;
    use crate::presets::test_support::stub_harness;

    async fn seeded(deps: &PipelineDeps, company: &str) -> (RunId, MatchedJobId) {
        let run_id = deps.stores.runs.create(Run::new(None)).await.unwrap();
        let search = JobSearch::new("rust engineer", "Berlin", "google.com", "en", "us");
        deps.stores.searches.create(search.clone()).await.unwrap();
        let posting = deps
            .stores
            .postings
            .upsert_by_provider_id(Posting::new(search.id, "p1", "Backend Engineer", company))
            .await
            .unwrap();
        let job_id = deps
            .stores
            .matches
            .create(MatchedJob::new(run_id, posting.id, true, None))
            .await
            .unwrap();
        (run_id, job_id)
    }

    fn ctx_for(run_id: RunId) -> JobSearchContext {
        let mut ctx = JobSearchContext::new("rust engineer", "Berlin");
        ctx.run_id = Some(run_id);
        ctx
    }

    #[tokio::test]
    async fn existing_research_short_circuits_without_provider_calls() {
        let (deps, factory) = stub_harness(vec![]);
        let (run_id, job_id) = seeded(&deps, "Acme").await;
        deps.stores
            .research
            .upsert_for(Research::new(job_id, "Acme", "Acme ships anvils.", vec![]))
            .await
            .unwrap();

        ResearchNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        let job = deps.stores.matches.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.research.status, StageStatus::Completed);
        assert_eq!(job.research.attempts, 0);
        assert!(factory.research.calls().is_empty());

        let run = deps.stores.runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.research_completed_count, 1);
    }

    #[tokio::test]
    async fn failures_drive_the_item_to_the_ceiling() {
        let (deps, factory) = stub_harness(vec![]);
        factory.research.fail_times("Acme", 5);
        let (run_id, job_id) = seeded(&deps, "Acme").await;

        ResearchNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        let job = deps.stores.matches.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.research.status, StageStatus::Failed);
        assert_eq!(job.research.attempts, 3);
        assert_eq!(factory.research.calls_for("Acme"), 3);

        let run = deps.stores.runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.research_failed_count, 1);
        assert_eq!(run.research_completed_count, 0);
    }

    #[tokio::test]
    async fn redrive_never_double_counts() {
        let (deps, factory) = stub_harness(vec![]);
        let (run_id, _job_id) = seeded(&deps, "Acme").await;

        let node = ResearchNode::new(&deps);
        node.execute(ctx_for(run_id)).await.unwrap();
        node.execute(ctx_for(run_id)).await.unwrap();

        assert_eq!(factory.research.calls_for("Acme"), 1);
        let run = deps.stores.runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.research_completed_count, 1);
    }
}

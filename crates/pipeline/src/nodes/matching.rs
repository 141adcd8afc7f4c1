//! Matching: screen discovered postings against the profile.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use jobforge_core::MatchedJob;
use jobforge_providers::Generator;
use jobforge_store::{MatchedJobStore, RunStore, SearchStore, StoreError};

use crate::context::{JobSearchContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Screens up to `max_screening` postings and persists one `MatchedJob` per
/// positive verdict.
///
/// A failed screening call skips that posting rather than aborting the run.
/// Re-entry with rows already present keeps the prior verdicts and makes no
/// provider calls.
pub struct MatchingNode {
    generator: Arc<dyn Generator>,
    matches: Arc<dyn MatchedJobStore>,
    searches: Arc<dyn SearchStore>,
    runs: Arc<dyn RunStore>,
}

impl MatchingNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            generator: deps.providers.generator.clone(),
            matches: deps.stores.matches.clone(),
            searches: deps.stores.searches.clone(),
            runs: deps.stores.runs.clone(),
        }
    }
}

#[async_trait]
impl Node<JobSearchContext> for MatchingNode {
    fn name(&self) -> &'static str {
        "matching"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        let Some(run_id) = ctx.run_id else {
            ctx.record_error("matching requires a run id");
            return Ok(ctx);
        };
        let Some(profile) = ctx.profile.clone() else {
            ctx.record_error("matching requires a loaded profile");
            return Ok(ctx);
        };

        let existing = self.matches.list_for_run(run_id).await?;
        if !existing.is_empty() {
            ctx.matched_job_ids = existing.iter().map(|m| m.id).collect();
            info!(
                run_id = %run_id,
                matches = existing.len(),
                "matching already ran for this run, keeping prior verdicts"
            );
            return Ok(ctx);
        }

        let mut screened = 0u32;
        for posting in ctx.postings.iter().take(ctx.max_screening as usize) {
            screened += 1;
            match self.generator.screen_posting(&profile.text, posting).await {
                Ok(decision) => {
                    debug!(
                        posting = %posting.title,
                        is_match = decision.is_match,
                        reason = %decision.reason,
                        "screened posting"
                    );
                    if !decision.is_match {
                        continue;
                    }
                    let job = MatchedJob::new(run_id, posting.id, true, Some(decision.reason));
                    match self.matches.create(job).await {
                        Ok(_) => {}
                        Err(StoreError::Conflict(_)) => {
                            debug!(posting = %posting.title, "posting already matched in this run");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(error) => {
                    // One bad screening call skips the posting, not the run.
                    warn!(posting = %posting.title, %error, "screening failed, skipping posting");
                }
            }
        }

        let rows = self.matches.list_for_run(run_id).await?;
        ctx.matched_job_ids = rows.iter().map(|m| m.id).collect();
        let matches_found = ctx.matched_job_ids.len() as u32;

        self.runs.set_total_matched(run_id, matches_found).await?;
        if let Some(search_id) = ctx.search_id {
            self.searches
                .update_stats(search_id, None, Some(screened), Some(matches_found))
                .await?;
        }

        info!(run_id = %run_id, screened, matches = matches_found, "screening finished");
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use jobforge_core::Run;
    use jobforge_providers::stub::sample_posting;

    use super::*;
    use crate::context::LoadedProfile;
    use crate::nodes::DiscoveryNode;
    use crate::presets::test_support::stub_harness;

    async fn discovered_ctx(deps: &PipelineDeps) -> JobSearchContext {
        let run_id = deps
            .stores
            .runs
            .create(Run::new(None))
            .await
            .unwrap();
        let mut ctx = DiscoveryNode::new(deps)
            .execute(JobSearchContext::new("rust engineer", "Berlin"))
            .await
            .unwrap();
        ctx.run_id = Some(run_id);
        ctx.profile = Some(LoadedProfile {
            id: jobforge_core::ProfileId::new(),
            name: "Jane Doe".into(),
            email: "jane@example.com".into(),
            text: "Senior Rust engineer.".into(),
        });
        ctx
    }

    #[tokio::test]
    async fn persists_only_positive_verdicts() {
        let (deps, factory) = stub_harness(vec![
            sample_posting("p1", "Backend Engineer", "Acme"),
            sample_posting("p2", "Sales Associate", "Initech"),
        ]);
        factory.generator.reject_title("Sales Associate");

        let ctx = discovered_ctx(&deps).await;
        let ctx = MatchingNode::new(&deps).execute(ctx).await.unwrap();

        assert_eq!(ctx.matched_job_ids.len(), 1);
        let rows = deps
            .stores
            .matches
            .list_for_run(ctx.run_id.unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_match);
        assert!(rows[0].reason.as_deref().unwrap().contains("aligns"));

        let run = deps
            .stores
            .runs
            .get(ctx.run_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.total_matched_jobs, 1);
    }

    #[tokio::test]
    async fn screening_cap_limits_provider_calls() {
        let postings: Vec<_> = (0..8)
            .map(|i| sample_posting(&format!("p{i}"), &format!("Role {i}"), "Acme"))
            .collect();
        let (deps, factory) = stub_harness(postings);

        let mut ctx = discovered_ctx(&deps).await;
        ctx.max_screening = 3;
        let ctx = MatchingNode::new(&deps).execute(ctx).await.unwrap();

        assert_eq!(factory.generator.screen_calls().len(), 3);
        assert_eq!(ctx.matched_job_ids.len(), 3);

        let search = deps
            .stores
            .searches
            .get(ctx.search_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(search.jobs_screened, 3);
        assert_eq!(search.matches_found, 3);
    }

    #[tokio::test]
    async fn failed_screening_skips_that_posting() {
        let (deps, factory) = stub_harness(vec![
            sample_posting("p1", "Backend Engineer", "Acme"),
            sample_posting("p2", "Platform Engineer", "Initech"),
        ]);
        factory.generator.fail_screening("Backend Engineer", 1);

        let ctx = discovered_ctx(&deps).await;
        let ctx = MatchingNode::new(&deps).execute(ctx).await.unwrap();

        assert!(!ctx.has_errors());
        assert_eq!(ctx.matched_job_ids.len(), 1);
    }

    #[tokio::test]
    async fn reentry_keeps_prior_verdicts_without_provider_calls() {
        let (deps, factory) = stub_harness(vec![sample_posting("p1", "Backend Engineer", "Acme")]);

        let ctx = discovered_ctx(&deps).await;
        let node = MatchingNode::new(&deps);
        let first = node.execute(ctx).await.unwrap();
        let calls_after_first = factory.generator.screen_calls().len();

        // Re-enter with the same run: rows exist, so nothing is re-screened.
        let mut again = discovered_ctx(&deps).await;
        again.run_id = first.run_id;
        let second = node.execute(again).await.unwrap();

        assert_eq!(second.matched_job_ids, first.matched_job_ids);
        assert_eq!(factory.generator.screen_calls().len(), calls_after_first);
    }
}

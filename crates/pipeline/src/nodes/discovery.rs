//! Discovery: page the job-search provider and persist what it finds.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use jobforge_core::{JobSearch, Posting};
use jobforge_providers::{DiscoveredPosting, JobSearchProvider, SearchQuery};
use jobforge_store::{PostingStore, SearchStore};

use crate::context::{JobSearchContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Pages the provider until `num_results` postings are collected or no page
/// remains, then upserts each posting under the search row.
///
/// Provider and store failures propagate: the task adapter classifies and
/// retries them. Zero results is not an error; the run flows on to matching
/// and completes through the zero-match gate.
pub struct DiscoveryNode {
    provider: Arc<dyn JobSearchProvider>,
    searches: Arc<dyn SearchStore>,
    postings: Arc<dyn PostingStore>,
}

impl DiscoveryNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            provider: deps.providers.search.clone(),
            searches: deps.stores.searches.clone(),
            postings: deps.stores.postings.clone(),
        }
    }

    fn to_posting(search: &JobSearch, discovered: DiscoveredPosting) -> Posting {
        let mut posting = Posting::new(
            search.id,
            discovered.provider_job_id,
            discovered.title,
            discovered.company,
        );
        posting.location = discovered.location;
        posting.description = discovered.description;
        posting.url = discovered.url;
        posting.via = discovered.via;
        posting.extra = discovered.extra;
        posting
    }
}

#[async_trait]
impl Node<JobSearchContext> for DiscoveryNode {
    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        if ctx.query.trim().is_empty() {
            ctx.record_error("search query is empty");
            return Ok(ctx);
        }

        let search = match self
            .searches
            .find_by_params(&ctx.query, &ctx.location)
            .await?
        {
            Some(existing) => existing,
            None => {
                let search = JobSearch::new(
                    ctx.query.as_str(),
                    ctx.location.as_str(),
                    ctx.google_domain.as_str(),
                    ctx.hl.as_str(),
                    ctx.gl.as_str(),
                );
                self.searches.create(search.clone()).await?;
                debug!(search_id = %search.id, query = %search.query, "created search row");
                search
            }
        };
        ctx.search_id = Some(search.id);

        let query = SearchQuery {
            query: ctx.query.clone(),
            location: ctx.location.clone(),
            google_domain: ctx.google_domain.clone(),
            hl: ctx.hl.clone(),
            gl: ctx.gl.clone(),
        };

        let target = ctx.num_results as usize;
        let mut discovered: Vec<DiscoveredPosting> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.provider.search_page(&query, page_token.as_deref()).await?;
            if page.postings.is_empty() {
                break;
            }
            discovered.extend(page.postings);
            if discovered.len() >= target {
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        discovered.truncate(target);

        for item in discovered {
            let posting = Self::to_posting(&search, item);
            let stored = self.postings.upsert_by_provider_id(posting).await?;
            ctx.postings.push(stored);
        }

        self.searches
            .update_stats(search.id, Some(ctx.postings.len() as u32), None, None)
            .await?;

        info!(
            search_id = %search.id,
            query = %ctx.query,
            found = ctx.postings.len(),
            "discovery finished"
        );
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use jobforge_providers::stub::sample_posting;

    use super::*;
    use crate::presets::test_support::stub_harness;

    fn many_postings(n: usize) -> Vec<DiscoveredPosting> {
        (0..n)
            .map(|i| sample_posting(&format!("p{i}"), &format!("Role {i}"), "Acme"))
            .collect()
    }

    #[tokio::test]
    async fn pages_until_the_target_is_reached() {
        let (deps, factory) = stub_harness(many_postings(25));
        factory.search.fail_times(0);
        let node = DiscoveryNode::new(&deps);

        let mut ctx = JobSearchContext::new("rust engineer", "Berlin");
        ctx.num_results = 15;
        let ctx = node.execute(ctx).await.unwrap();

        assert_eq!(ctx.postings.len(), 15);
        // Stub pages hold 10 postings each.
        assert_eq!(factory.search.calls(), 2);

        let search = deps
            .stores
            .searches
            .get(ctx.search_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(search.total_jobs_found, 15);
    }

    #[tokio::test]
    async fn redrive_reuses_the_search_row_and_dedupes() {
        let (deps, _factory) = stub_harness(many_postings(4));
        let node = DiscoveryNode::new(&deps);

        let first = node
            .execute(JobSearchContext::new("rust engineer", "Berlin"))
            .await
            .unwrap();
        let second = node
            .execute(JobSearchContext::new("rust engineer", "Berlin"))
            .await
            .unwrap();

        assert_eq!(first.search_id, second.search_id);
        let rows = deps
            .stores
            .postings
            .list_for_search(first.search_id.unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        // The second drive returns the canonical stored rows.
        assert_eq!(
            first.postings.iter().map(|p| p.id).collect::<Vec<_>>(),
            second.postings.iter().map(|p| p.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn empty_query_is_a_context_error() {
        let (deps, factory) = stub_harness(many_postings(4));
        let node = DiscoveryNode::new(&deps);

        let ctx = node
            .execute(JobSearchContext::new("   ", "Berlin"))
            .await
            .unwrap();
        assert!(ctx.joined_errors().contains("query is empty"));
        assert_eq!(factory.search.calls(), 0);
    }

    #[tokio::test]
    async fn zero_results_flow_through_without_error() {
        let (deps, _factory) = stub_harness(vec![]);
        let node = DiscoveryNode::new(&deps);

        let ctx = node
            .execute(JobSearchContext::new("underwater basket weaver", ""))
            .await
            .unwrap();
        assert!(!ctx.has_errors());
        assert!(ctx.postings.is_empty());
        assert!(ctx.search_id.is_some());
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let (deps, factory) = stub_harness(many_postings(4));
        factory.search.fail_times(1);
        let node = DiscoveryNode::new(&deps);

        let error = node
            .execute(JobSearchContext::new("rust engineer", "Berlin"))
            .await
            .unwrap_err();
        assert!(error.is_retryable());
    }
}

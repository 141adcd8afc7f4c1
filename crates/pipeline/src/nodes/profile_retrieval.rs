//! Profile retrieval: load the owning profile into the context.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jobforge_store::ProfileStore;

use crate::context::{JobSearchContext, LoadedProfile, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Loads the profile named by `ctx.profile_id` and stamps `last_used_at`.
pub struct ProfileRetrievalNode {
    profiles: Arc<dyn ProfileStore>,
}

impl ProfileRetrievalNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            profiles: deps.stores.profiles.clone(),
        }
    }
}

#[async_trait]
impl Node<JobSearchContext> for ProfileRetrievalNode {
    fn name(&self) -> &'static str {
        "profile_retrieval"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        let Some(profile_id) = ctx.profile_id else {
            ctx.record_error("no profile selected; create or pick a profile first");
            return Ok(ctx);
        };

        let Some(profile) = self.profiles.get(profile_id).await? else {
            ctx.record_error(format!("profile {profile_id} not found"));
            return Ok(ctx);
        };

        if profile.profile_text.trim().is_empty() {
            ctx.record_error(format!("profile {profile_id} has no usable text"));
            return Ok(ctx);
        }

        self.profiles.touch_last_used(profile_id).await?;

        info!(profile_id = %profile_id, name = %profile.name, "profile loaded");
        ctx.profile = Some(LoadedProfile {
            id: profile.id,
            name: profile.name,
            email: profile.email,
            text: profile.profile_text,
        });
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use jobforge_core::Profile;

    use super::*;
    use crate::presets::test_support::stub_deps;

    #[tokio::test]
    async fn missing_profile_id_is_a_context_error() {
        let deps = stub_deps(vec![]);
        let node = ProfileRetrievalNode::new(&deps);

        let ctx = node
            .execute(JobSearchContext::new("rust engineer", "Berlin"))
            .await
            .unwrap();
        assert!(ctx.has_errors());
        assert!(ctx.joined_errors().contains("no profile selected"));
    }

    #[tokio::test]
    async fn unknown_profile_is_a_context_error() {
        let deps = stub_deps(vec![]);
        let node = ProfileRetrievalNode::new(&deps);

        let ctx = JobSearchContext::new("rust engineer", "Berlin")
            .for_profile(jobforge_core::ProfileId::new());
        let ctx = node.execute(ctx).await.unwrap();
        assert!(ctx.joined_errors().contains("not found"));
    }

    #[tokio::test]
    async fn loads_profile_and_touches_last_used() {
        let deps = stub_deps(vec![]);
        let profile = Profile::new("Jane Doe", "jane@example.com", "Senior Rust engineer.", vec![]);
        let profile_id = deps.stores.profiles.create(profile).await.unwrap();

        let node = ProfileRetrievalNode::new(&deps);
        let ctx = JobSearchContext::new("rust engineer", "Berlin").for_profile(profile_id);
        let ctx = node.execute(ctx).await.unwrap();

        assert!(!ctx.has_errors());
        let loaded = ctx.profile.unwrap();
        assert_eq!(loaded.email, "jane@example.com");

        let stored = deps.stores.profiles.get(profile_id).await.unwrap().unwrap();
        assert!(stored.last_used_at.is_some());
    }

    #[tokio::test]
    async fn empty_profile_text_is_a_context_error() {
        let deps = stub_deps(vec![]);
        let profile = Profile::new("Jane Doe", "jane@example.com", "   ", vec![]);
        let profile_id = deps.stores.profiles.create(profile).await.unwrap();

        let node = ProfileRetrievalNode::new(&deps);
        let ctx = JobSearchContext::new("rust engineer", "Berlin").for_profile(profile_id);
        let ctx = node.execute(ctx).await.unwrap();
        assert!(ctx.joined_errors().contains("no usable text"));
    }
}

//! Profiling workflow nodes: validate the submission, then structure it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jobforge_core::Profile;
use jobforge_providers::Generator;
use jobforge_store::ProfileStore;

use crate::context::{ProfilingContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Checks the submitted fields; every problem is recorded so the caller sees
/// the full list at once.
pub struct ProfileValidationNode;

impl ProfileValidationNode {
    pub fn new(_deps: &PipelineDeps) -> Self {
        Self
    }
}

#[async_trait]
impl Node<ProfilingContext> for ProfileValidationNode {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn execute(&self, mut ctx: ProfilingContext) -> PipelineResult<ProfilingContext> {
        if ctx.name.trim().is_empty() {
            ctx.record_error("name is required");
        }
        if !ctx.email.contains('@') {
            ctx.record_error(format!("invalid email address: {}", ctx.email));
        }
        if ctx.raw_profile_text.trim().is_empty() {
            ctx.record_error("profile text is required");
        }
        Ok(ctx)
    }
}

/// Reuses an existing profile for the same name + email, otherwise asks the
/// generation provider to structure the raw text and persists a new row.
pub struct ProfileStructuringNode {
    generator: Arc<dyn Generator>,
    profiles: Arc<dyn ProfileStore>,
}

impl ProfileStructuringNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            generator: deps.providers.generator.clone(),
            profiles: deps.stores.profiles.clone(),
        }
    }
}

#[async_trait]
impl Node<ProfilingContext> for ProfileStructuringNode {
    fn name(&self) -> &'static str {
        "structuring"
    }

    async fn execute(&self, mut ctx: ProfilingContext) -> PipelineResult<ProfilingContext> {
        if let Some(existing) = self.profiles.find_by_contact(&ctx.name, &ctx.email).await? {
            self.profiles.touch_last_used(existing.id).await?;
            info!(profile_id = %existing.id, "reusing stored profile for this contact");
            ctx.profile_id = Some(existing.id);
            ctx.profile_was_cached = true;
            return Ok(ctx);
        }

        let draft = self
            .generator
            .structure_profile(&ctx.name, &ctx.email, &ctx.raw_profile_text)
            .await?;

        let profile = Profile::new(
            ctx.name.clone(),
            ctx.email.clone(),
            draft.profile_text,
            ctx.reference_links.clone(),
        );
        let profile_id = self.profiles.create(profile).await?;
        info!(profile_id = %profile_id, "structured and stored a new profile");

        ctx.profile_id = Some(profile_id);
        ctx.profile_was_cached = false;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::test_support::stub_harness;

    #[tokio::test]
    async fn validation_collects_every_problem() {
        let (deps, _factory) = stub_harness(vec![]);
        let node = ProfileValidationNode::new(&deps);

        let ctx = node
            .execute(ProfilingContext::new(" ", "not-an-email", ""))
            .await
            .unwrap();
        assert_eq!(ctx.errors().len(), 3);
        assert!(ctx.joined_errors().contains("name is required"));
        assert!(ctx.joined_errors().contains("invalid email address"));
        assert!(ctx.joined_errors().contains("profile text is required"));
    }

    #[tokio::test]
    async fn well_formed_submission_passes_validation() {
        let (deps, _factory) = stub_harness(vec![]);
        let node = ProfileValidationNode::new(&deps);

        let ctx = node
            .execute(ProfilingContext::new(
                "Jane Doe",
                "jane@example.com",
                "Ten years of Rust.",
            ))
            .await
            .unwrap();
        assert!(!ctx.has_errors());
    }

    #[tokio::test]
    async fn structures_and_persists_a_new_profile() {
        let (deps, _factory) = stub_harness(vec![]);
        let node = ProfileStructuringNode::new(&deps);

        let ctx = node
            .execute(ProfilingContext::new(
                "Jane Doe",
                "jane@example.com",
                "Ten years of Rust.",
            ))
            .await
            .unwrap();

        assert!(!ctx.profile_was_cached);
        let profile_id = ctx.profile_id.unwrap();
        let stored = deps.stores.profiles.get(profile_id).await.unwrap().unwrap();
        // The stub prefixes the structured text with the name.
        assert_eq!(stored.profile_text, "Jane Doe: Ten years of Rust.");
    }

    #[tokio::test]
    async fn same_contact_reuses_the_stored_profile() {
        let (deps, _factory) = stub_harness(vec![]);
        let node = ProfileStructuringNode::new(&deps);

        let first = node
            .execute(ProfilingContext::new(
                "Jane Doe",
                "jane@example.com",
                "Ten years of Rust.",
            ))
            .await
            .unwrap();
        let second = node
            .execute(ProfilingContext::new(
                "Jane Doe",
                "jane@example.com",
                "Completely different text.",
            ))
            .await
            .unwrap();

        assert!(second.profile_was_cached);
        assert_eq!(second.profile_id, first.profile_id);

        let stored = deps
            .stores
            .profiles
            .get(first.profile_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.last_used_at.is_some());
        // The original structured text stands.
        assert_eq!(stored.profile_text, "Jane Doe: Ten years of Rust.");
    }
}

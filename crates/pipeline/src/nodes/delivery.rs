//! Delivery: one-shot dispatch of finished materials.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use jobforge_core::RunStatus;
use jobforge_providers::{Attachment, DeliveryPackage, MailSender};
use jobforge_status::{StatusPublisher, StatusUpdate};
use jobforge_store::{ArtifactStore, MatchedJobStore, PostingStore, ProfileStore, RunStore};

use crate::context::{JobSearchContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Mails every fully-succeeded item's materials to the profile owner.
///
/// Runs only against a completed run whose delivery flag is still unset. An
/// empty package is a no-op that leaves the flag untouched; so is a failed
/// send, which a later re-drive will retry. The flag flips only after the
/// provider acknowledged the send.
pub struct DeliveryNode {
    mail: Arc<dyn MailSender>,
    matches: Arc<dyn MatchedJobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    postings: Arc<dyn PostingStore>,
    profiles: Arc<dyn ProfileStore>,
    runs: Arc<dyn RunStore>,
    publisher: Arc<dyn StatusPublisher>,
}

impl DeliveryNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            mail: deps.providers.mail.clone(),
            matches: deps.stores.matches.clone(),
            artifacts: deps.stores.artifacts.clone(),
            postings: deps.stores.postings.clone(),
            profiles: deps.stores.profiles.clone(),
            runs: deps.stores.runs.clone(),
            publisher: deps.publisher.clone(),
        }
    }
}

#[async_trait]
impl Node<JobSearchContext> for DeliveryNode {
    fn name(&self) -> &'static str {
        "delivery"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        let Some(run_id) = ctx.run_id else {
            ctx.record_error("delivery requires a run id");
            return Ok(ctx);
        };
        let Some(run) = self.runs.get(run_id).await? else {
            ctx.record_error(format!("run {run_id} not found"));
            return Ok(ctx);
        };

        if run.status != RunStatus::Completed {
            info!(run_id = %run_id, status = run.status.as_str(), "run not completed, skipping delivery");
            return Ok(ctx);
        }
        if run.delivery_triggered {
            info!(run_id = %run_id, "delivery already triggered, skipping");
            return Ok(ctx);
        }

        let recipient = match &ctx.profile {
            Some(profile) => profile.email.clone(),
            None => {
                let Some(profile_id) = run.profile_id else {
                    ctx.record_error("delivery has no recipient: run owns no profile");
                    return Ok(ctx);
                };
                match self.profiles.get(profile_id).await? {
                    Some(profile) => profile.email,
                    None => {
                        ctx.record_error(format!("profile {profile_id} not found for delivery"));
                        return Ok(ctx);
                    }
                }
            }
        };

        let items = self.matches.list_for_run(run_id).await?;
        let mut sections = Vec::new();
        let mut attachments = Vec::new();
        for job in items.iter().filter(|job| job.fully_succeeded()) {
            let Some(artifact) = self.artifacts.get_for(job.id).await? else {
                continue;
            };
            if artifact.is_empty() {
                continue;
            }
            let Some(posting) = self.postings.get(job.posting_id).await? else {
                continue;
            };

            sections.push(format!(
                "## {} at {}\n\n{}\n",
                posting.title, posting.company, artifact.cover_letter_body
            ));
            if let Some(url) = &artifact.cv_pdf_url {
                attachments.push(Attachment {
                    filename: format!("{}-cv.pdf", posting.company.to_lowercase().replace(' ', "-")),
                    url: url.clone(),
                });
            }
        }

        if sections.is_empty() {
            info!(run_id = %run_id, "no fully-succeeded items, delivery is a no-op");
            return Ok(ctx);
        }

        let package = DeliveryPackage {
            recipient,
            subject: format!("{} tailored application(s) ready", sections.len()),
            body: sections.join("\n"),
            attachments,
        };

        match self.mail.send(&package).await {
            Ok(receipt) => {
                if self.runs.mark_delivery_triggered(run_id).await? {
                    info!(
                        run_id = %run_id,
                        message_id = %receipt.message_id,
                        items = sections.len(),
                        "delivery sent"
                    );
                    if let Some(run) = self.runs.get(run_id).await? {
                        self.publisher.emit(&StatusUpdate::of_run(&run));
                    }
                }
            }
            Err(error) => {
                // The flag stays down so a re-drive can retry the send.
                warn!(run_id = %run_id, %error, "delivery send failed");
            }
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use jobforge_core::{Artifact, JobSearch, MatchedJob, Posting, Profile, Run, RunId, StageKind};

    use super::*;
    use crate::presets::test_support::stub_harness;

    struct Seeded {
        run_id: RunId,
    }

    /// A completed run with one fully-succeeded item and its artifact.
    async fn completed_run(deps: &PipelineDeps, with_artifact: bool) -> Seeded {
        let profile = Profile::new("Jane Doe", "jane@example.com", "Rust.", vec![]);
        let profile_id = deps.stores.profiles.create(profile).await.unwrap();
        let run_id = deps
            .stores
            .runs
            .create(Run::new(Some(profile_id)))
            .await
            .unwrap();

        let search = JobSearch::new("q", "", "google.com", "en", "us");
        deps.stores.searches.create(search.clone()).await.unwrap();
        let posting = deps
            .stores
            .postings
            .upsert_by_provider_id(Posting::new(search.id, "p1", "Engineer", "Acme Systems"))
            .await
            .unwrap();

        let mut job = MatchedJob::new(run_id, posting.id, true, None);
        job.begin_stage(StageKind::Research);
        job.complete_stage(StageKind::Research);
        job.begin_stage(StageKind::Fabrication);
        job.complete_stage(StageKind::Fabrication);
        let job_id = deps.stores.matches.create(job).await.unwrap();

        if with_artifact {
            deps.stores
                .artifacts
                .upsert_for(Artifact::new(
                    job_id,
                    "Application for Engineer",
                    "Dear Acme team,",
                    Some("https://pdf.example.com/1.pdf".into()),
                ))
                .await
                .unwrap();
        }

        deps.stores.runs.complete_once(run_id).await.unwrap();
        Seeded { run_id }
    }

    fn ctx_for(run_id: RunId) -> JobSearchContext {
        let mut ctx = JobSearchContext::new("q", "");
        ctx.run_id = Some(run_id);
        ctx
    }

    #[tokio::test]
    async fn sends_once_and_flips_the_flag() {
        let (deps, factory) = stub_harness(vec![]);
        let seeded = completed_run(&deps, true).await;

        let node = DeliveryNode::new(&deps);
        node.execute(ctx_for(seeded.run_id)).await.unwrap();

        let sent = factory.mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "jane@example.com");
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(sent[0].attachments[0].filename, "acme-systems-cv.pdf");

        let run = deps.stores.runs.get(seeded.run_id).await.unwrap().unwrap();
        assert!(run.delivery_triggered);

        // Re-invocation is a guarded no-op.
        node.execute(ctx_for(seeded.run_id)).await.unwrap();
        assert_eq!(factory.mail.sent().len(), 1);
    }

    #[tokio::test]
    async fn empty_package_is_a_noop_without_flag() {
        let (deps, factory) = stub_harness(vec![]);
        let seeded = completed_run(&deps, false).await;

        DeliveryNode::new(&deps)
            .execute(ctx_for(seeded.run_id))
            .await
            .unwrap();

        assert!(factory.mail.sent().is_empty());
        let run = deps.stores.runs.get(seeded.run_id).await.unwrap().unwrap();
        assert!(!run.delivery_triggered);
    }

    #[tokio::test]
    async fn uncompleted_run_skips_delivery() {
        let (deps, factory) = stub_harness(vec![]);
        let profile_id = deps
            .stores
            .profiles
            .create(Profile::new("Jane", "jane@example.com", "Rust.", vec![]))
            .await
            .unwrap();
        let run_id = deps
            .stores
            .runs
            .create(Run::new(Some(profile_id)))
            .await
            .unwrap();

        DeliveryNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();
        assert!(factory.mail.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_send_leaves_the_flag_for_a_redrive() {
        let (deps, factory) = stub_harness(vec![]);
        factory.mail.fail_times(1);
        let seeded = completed_run(&deps, true).await;

        let node = DeliveryNode::new(&deps);
        node.execute(ctx_for(seeded.run_id)).await.unwrap();

        let run = deps.stores.runs.get(seeded.run_id).await.unwrap().unwrap();
        assert!(!run.delivery_triggered);
        assert!(factory.mail.sent().is_empty());

        // The re-drive retries the send and flips the flag.
        node.execute(ctx_for(seeded.run_id)).await.unwrap();
        let run = deps.stores.runs.get(seeded.run_id).await.unwrap().unwrap();
        assert!(run.delivery_triggered);
        assert_eq!(factory.mail.sent().len(), 1);
    }
}

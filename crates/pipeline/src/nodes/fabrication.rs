//! Fabrication: compose the cover letter and tailored CV per matched job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use jobforge_core::{Artifact, Posting, RunCounter, StageKind};
use jobforge_providers::{CoverLetterDraft, Generator, PdfRenderer, ProviderResult, RenderedPdf};
use jobforge_store::{ArtifactStore, MatchedJobStore, PostingStore, ResearchStore, RunStore, StoreError};

use crate::context::{JobSearchContext, WorkflowContext};
use crate::error::PipelineResult;
use crate::node::Node;
use crate::presets::PipelineDeps;

/// Drives the fabrication stage of every matched job to a terminal state.
///
/// Every matched item is driven, including those whose research failed: the
/// cover letter then falls back to the posting description, so the item can
/// still resolve and the run can complete. An existing `Artifact` row is the
/// short-circuit.
pub struct FabricationNode {
    generator: Arc<dyn Generator>,
    pdf: Arc<dyn PdfRenderer>,
    matches: Arc<dyn MatchedJobStore>,
    research: Arc<dyn ResearchStore>,
    postings: Arc<dyn PostingStore>,
    artifacts: Arc<dyn ArtifactStore>,
    runs: Arc<dyn RunStore>,
}

impl FabricationNode {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            generator: deps.providers.generator.clone(),
            pdf: deps.providers.pdf.clone(),
            matches: deps.stores.matches.clone(),
            research: deps.stores.research.clone(),
            postings: deps.stores.postings.clone(),
            artifacts: deps.stores.artifacts.clone(),
            runs: deps.stores.runs.clone(),
        }
    }

    async fn fabricate(
        &self,
        profile_text: &str,
        posting: &Posting,
        research: &str,
    ) -> ProviderResult<(CoverLetterDraft, RenderedPdf)> {
        let letter = self
            .generator
            .compose_cover_letter(profile_text, posting, research)
            .await?;
        let cv = self.generator.tailor_cv(profile_text, posting).await?;
        let pdf = self.pdf.render(&cv.html).await?;
        Ok((letter, pdf))
    }
}

#[async_trait]
impl Node<JobSearchContext> for FabricationNode {
    fn name(&self) -> &'static str {
        "fabrication"
    }

    async fn execute(&self, mut ctx: JobSearchContext) -> PipelineResult<JobSearchContext> {
        let Some(run_id) = ctx.run_id else {
            ctx.record_error("fabrication requires a run id");
            return Ok(ctx);
        };
        let Some(profile) = ctx.profile.clone() else {
            ctx.record_error("fabrication requires a loaded profile");
            return Ok(ctx);
        };

        let items = self.matches.list_for_run(run_id).await?;
        let mut completed = 0usize;
        let mut failed = 0usize;

        for mut job in items {
            if job.fabrication.is_terminal() {
                continue;
            }

            if self.artifacts.get_for(job.id).await?.is_some() {
                if job.complete_stage(StageKind::Fabrication) {
                    self.runs
                        .bump_counter(run_id, RunCounter::completed(StageKind::Fabrication))
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

            // Stored research when the axis succeeded, posting text otherwise.
            let research_text = match self.research.get_for(job.id).await? {
                Some(research) => research.answer,
                None => posting.description.clone().unwrap_or_default(),
            };

            while !job.fabrication.is_terminal() {
                job.begin_stage(StageKind::Fabrication);
                self.matches.update(&job).await?;

                match self
                    .fabricate(&profile.text, &posting, &research_text)
                    .await
                {
                    Ok((letter, pdf)) => {
                        let artifact =
                            Artifact::new(job.id, letter.topic, letter.body, Some(pdf.url));
                        self.artifacts.upsert_for(artifact).await?;
                        if job.complete_stage(StageKind::Fabrication) {
                            self.runs
                                .bump_counter(run_id, RunCounter::completed(StageKind::Fabrication))
                                .await?;
                        }
                        self.matches.update(&job).await?;
                        completed += 1;
                    }
                    Err(error) => {
                        warn!(
                            posting = %posting.title,
                            attempt = job.fabrication.attempts,
                            %error,
                            "fabrication attempt failed"
                        );
                        let outcome = job.fail_stage(
                            StageKind::Fabrication,
                            error.to_string(),
                            ctx.max_retries,
                        );
                        if outcome.first_failure {
                            self.runs
                                .bump_counter(run_id, RunCounter::failed(StageKind::Fabrication))
                                .await?;
                            failed += 1;
                        }
                        self.matches.update(&job).await?;
                    }
                }
            }
        }

        info!(run_id = %run_id, completed, failed, "fabrication drive finished");
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use jobforge_core::{
        JobSearch, MatchedJob, MatchedJobId, ProfileId, Research, Run, RunId, StageStatus,
    };

    use super::*;
    use crate::context::LoadedProfile;
    use crate::presets::test_support::stub_harness;

    async fn seeded(deps: &PipelineDeps, title: &str) -> (RunId, MatchedJobId) {
        let run_id = deps.stores.runs.create(Run::new(None)).await.unwrap();
        let search = JobSearch::new("rust engineer", "Berlin", "google.com", "en", "us");
        deps.stores.searches.create(search.clone()).await.unwrap();
        let posting = deps
            .stores
            .postings
            .upsert_by_provider_id(
                Posting::new(search.id, "p1", title, "Acme")
                    .with_description(format!("{title} role at Acme.")),
            )
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
        ctx.profile = Some(LoadedProfile {
            id: ProfileId::new(),
            name: "Jane".into(),
            email: "jane@example.com".into(),
            text: "Senior Rust engineer.".into(),
        });
        ctx
    }

    #[tokio::test]
    async fn fabricates_and_persists_the_artifact() {
        let (deps, factory) = stub_harness(vec![]);
        let (run_id, job_id) = seeded(&deps, "Backend Engineer").await;

        FabricationNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        let artifact = deps
            .stores
            .artifacts
            .get_for(job_id)
            .await
            .unwrap()
            .unwrap();
        assert!(artifact.cover_letter_topic.contains("Backend Engineer"));
        assert!(artifact.cv_pdf_url.is_some());
        assert_eq!(factory.pdf.renders(), 1);

        let run = deps.stores.runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.fabrication_completed_count, 1);
    }

    #[tokio::test]
    async fn existing_artifact_short_circuits() {
        let (deps, factory) = stub_harness(vec![]);
        let (run_id, job_id) = seeded(&deps, "Backend Engineer").await;
        deps.stores
            .artifacts
            .upsert_for(Artifact::new(job_id, "topic", "body", None))
            .await
            .unwrap();

        FabricationNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        assert!(factory.generator.letter_calls().is_empty());
        assert_eq!(factory.pdf.renders(), 0);
        let job = deps.stores.matches.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.fabrication.status, StageStatus::Completed);
        assert_eq!(job.fabrication.attempts, 0);
    }

    #[tokio::test]
    async fn letter_failures_park_the_item_at_the_ceiling() {
        let (deps, factory) = stub_harness(vec![]);
        factory.generator.fail_cover_letter("Backend Engineer", 5);
        let (run_id, job_id) = seeded(&deps, "Backend Engineer").await;

        FabricationNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        let job = deps.stores.matches.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.fabrication.status, StageStatus::Failed);
        assert_eq!(job.fabrication.attempts, 3);
        assert!(deps.stores.artifacts.get_for(job_id).await.unwrap().is_none());

        let run = deps.stores.runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.fabrication_failed_count, 1);
    }

    #[tokio::test]
    async fn missing_research_falls_back_to_the_posting_description() {
        let (deps, _factory) = stub_harness(vec![]);
        let (run_id, job_id) = seeded(&deps, "Backend Engineer").await;

        FabricationNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        let artifact = deps
            .stores
            .artifacts
            .get_for(job_id)
            .await
            .unwrap()
            .unwrap();
        // The stub letter quotes the first line of its research input.
        assert!(artifact.cover_letter_body.contains("Backend Engineer role at Acme."));
    }

    #[tokio::test]
    async fn stored_research_feeds_the_letter() {
        let (deps, _factory) = stub_harness(vec![]);
        let (run_id, job_id) = seeded(&deps, "Backend Engineer").await;
        deps.stores
            .research
            .upsert_for(Research::new(
                job_id,
                "Acme",
                "Acme just raised a Series B.",
                vec![],
            ))
            .await
            .unwrap();

        FabricationNode::new(&deps)
            .execute(ctx_for(run_id))
            .await
            .unwrap();

        let artifact = deps
            .stores
            .artifacts
            .get_for(job_id)
            .await
            .unwrap()
            .unwrap();
        assert!(artifact.cover_letter_body.contains("Series B"));
    }
}

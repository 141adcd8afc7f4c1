//! Per-entity store abstractions.

use async_trait::async_trait;

use jobforge_core::{
    Artifact, ArtifactId, JobSearch, MatchedJob, MatchedJobId, Posting, PostingId, Profile,
    ProfileId, Research, ResearchId, Run, RunCounter, RunId, SearchId,
};

use crate::error::StoreResult;

/// Run rows: lifecycle writes are modeled as named operations so their
/// idempotency guards live in one place per backend.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: Run) -> StoreResult<RunId>;

    async fn get(&self, id: RunId) -> StoreResult<Option<Run>>;

    async fn mark_processing(&self, id: RunId) -> StoreResult<()>;

    async fn mark_failed(&self, id: RunId, message: &str) -> StoreResult<()>;

    /// Set `status = completed` (+ timestamp) unless already completed.
    /// Returns `true` only when this call performed the transition.
    async fn complete_once(&self, id: RunId) -> StoreResult<bool>;

    /// Flip the one-shot delivery flag. Returns `true` only on the first flip.
    async fn mark_delivery_triggered(&self, id: RunId) -> StoreResult<bool>;

    /// Increment one of the run's aggregate counters.
    async fn bump_counter(&self, id: RunId, counter: RunCounter) -> StoreResult<()>;

    async fn set_total_matched(&self, id: RunId, total: u32) -> StoreResult<()>;
}

/// Job-search rows (search parameters + discovery/screening statistics).
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn create(&self, search: JobSearch) -> StoreResult<SearchId>;

    async fn get(&self, id: SearchId) -> StoreResult<Option<JobSearch>>;

    async fn find_by_params(&self, query: &str, location: &str) -> StoreResult<Option<JobSearch>>;

    /// Update only the statistics that are `Some`.
    async fn update_stats(
        &self,
        id: SearchId,
        total_jobs_found: Option<u32>,
        jobs_screened: Option<u32>,
        matches_found: Option<u32>,
    ) -> StoreResult<()>;
}

/// Posting rows, deduplicated by `(search_id, provider_job_id)`.
#[async_trait]
pub trait PostingStore: Send + Sync {
    /// Insert or return the existing row for the provider identity.
    /// The returned posting carries the canonical stored id.
    async fn upsert_by_provider_id(&self, posting: Posting) -> StoreResult<Posting>;

    async fn get(&self, id: PostingId) -> StoreResult<Option<Posting>>;

    async fn list_for_search(&self, search_id: SearchId) -> StoreResult<Vec<Posting>>;
}

/// Matched-job rows with their two stage machines.
#[async_trait]
pub trait MatchedJobStore: Send + Sync {
    /// Create a matched job; conflicts when the posting is already matched
    /// within the run.
    async fn create(&self, job: MatchedJob) -> StoreResult<MatchedJobId>;

    async fn get(&self, id: MatchedJobId) -> StoreResult<Option<MatchedJob>>;

    /// All matched jobs of a run, in creation order (the driving order).
    async fn list_for_run(&self, run_id: RunId) -> StoreResult<Vec<MatchedJob>>;

    async fn update(&self, job: &MatchedJob) -> StoreResult<()>;
}

/// Company research, one row per matched job.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn upsert_for(&self, research: Research) -> StoreResult<ResearchId>;

    async fn get_for(&self, matched_job_id: MatchedJobId) -> StoreResult<Option<Research>>;
}

/// Fabricated artifacts, one row per matched job.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upsert_for(&self, artifact: Artifact) -> StoreResult<ArtifactId>;

    async fn get_for(&self, matched_job_id: MatchedJobId) -> StoreResult<Option<Artifact>>;
}

/// User profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn create(&self, profile: Profile) -> StoreResult<ProfileId>;

    async fn get(&self, id: ProfileId) -> StoreResult<Option<Profile>>;

    /// Equality lookup on name + email, the cached-reuse key of the
    /// profiling workflow.
    async fn find_by_contact(&self, name: &str, email: &str) -> StoreResult<Option<Profile>>;

    async fn touch_last_used(&self, id: ProfileId) -> StoreResult<()>;
}

//! In-memory store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use jobforge_core::{
    Artifact, ArtifactId, JobSearch, MatchedJob, MatchedJobId, Posting, PostingId, Profile,
    ProfileId, Research, ResearchId, Run, RunCounter, RunId, SearchId,
};

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    ArtifactStore, MatchedJobStore, PostingStore, ProfileStore, ResearchStore, RunStore,
    SearchStore,
};

/// One lock-per-entity in-memory backend.
///
/// No IO and no awaits while a guard is held; the async trait surface exists
/// so callers are written once against both backends.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    runs: RwLock<HashMap<RunId, Run>>,
    searches: RwLock<HashMap<SearchId, JobSearch>>,
    postings: RwLock<HashMap<PostingId, Posting>>,
    matched: RwLock<HashMap<MatchedJobId, MatchedJob>>,
    research: RwLock<HashMap<MatchedJobId, Research>>,
    artifacts: RwLock<HashMap<MatchedJobId, Artifact>>,
    profiles: RwLock<HashMap<ProfileId, Profile>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(
        &self,
        id: RunId,
        f: impl FnOnce(&mut Run) -> T,
    ) -> StoreResult<T> {
        let mut runs = self.runs.write().unwrap();
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("run {id}")))?;
        Ok(f(run))
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn create(&self, run: Run) -> StoreResult<RunId> {
        let mut runs = self.runs.write().unwrap();
        let id = run.id;
        if runs.contains_key(&id) {
            return Err(StoreError::conflict(format!("run {id} already exists")));
        }
        runs.insert(id, run);
        Ok(id)
    }

    async fn get(&self, id: RunId) -> StoreResult<Option<Run>> {
        Ok(self.runs.read().unwrap().get(&id).cloned())
    }

    async fn mark_processing(&self, id: RunId) -> StoreResult<()> {
        self.with_run(id, |run| run.mark_processing())
    }

    async fn mark_failed(&self, id: RunId, message: &str) -> StoreResult<()> {
        self.with_run(id, |run| run.mark_failed(message))
    }

    async fn complete_once(&self, id: RunId) -> StoreResult<bool> {
        self.with_run(id, |run| run.mark_completed())
    }

    async fn mark_delivery_triggered(&self, id: RunId) -> StoreResult<bool> {
        self.with_run(id, |run| run.mark_delivery_triggered())
    }

    async fn bump_counter(&self, id: RunId, counter: RunCounter) -> StoreResult<()> {
        self.with_run(id, |run| run.bump(counter))
    }

    async fn set_total_matched(&self, id: RunId, total: u32) -> StoreResult<()> {
        self.with_run(id, |run| {
            run.total_matched_jobs = total;
            run.updated_at = chrono::Utc::now();
        })
    }
}

#[async_trait]
impl SearchStore for InMemoryStore {
    async fn create(&self, search: JobSearch) -> StoreResult<SearchId> {
        let mut searches = self.searches.write().unwrap();
        let id = search.id;
        searches.insert(id, search);
        Ok(id)
    }

    async fn get(&self, id: SearchId) -> StoreResult<Option<JobSearch>> {
        Ok(self.searches.read().unwrap().get(&id).cloned())
    }

    async fn find_by_params(&self, query: &str, location: &str) -> StoreResult<Option<JobSearch>> {
        Ok(self
            .searches
            .read()
            .unwrap()
            .values()
            .find(|s| s.query == query && s.location == location)
            .cloned())
    }

    async fn update_stats(
        &self,
        id: SearchId,
        total_jobs_found: Option<u32>,
        jobs_screened: Option<u32>,
        matches_found: Option<u32>,
    ) -> StoreResult<()> {
        let mut searches = self.searches.write().unwrap();
        let search = searches
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("job search {id}")))?;
        if let Some(total) = total_jobs_found {
            search.total_jobs_found = total;
        }
        if let Some(screened) = jobs_screened {
            search.jobs_screened = screened;
        }
        if let Some(matches) = matches_found {
            search.matches_found = matches;
        }
        search.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PostingStore for InMemoryStore {
    async fn upsert_by_provider_id(&self, posting: Posting) -> StoreResult<Posting> {
        let mut postings = self.postings.write().unwrap();

        if let Some(existing) = postings.values().find(|p| {
            p.search_id == posting.search_id && p.provider_job_id == posting.provider_job_id
        }) {
            return Ok(existing.clone());
        }

        let stored = posting.clone();
        postings.insert(posting.id, posting);
        Ok(stored)
    }

    async fn get(&self, id: PostingId) -> StoreResult<Option<Posting>> {
        Ok(self.postings.read().unwrap().get(&id).cloned())
    }

    async fn list_for_search(&self, search_id: SearchId) -> StoreResult<Vec<Posting>> {
        let postings = self.postings.read().unwrap();
        let mut result: Vec<_> = postings
            .values()
            .filter(|p| p.search_id == search_id)
            .cloned()
            .collect();
        // Id is a v7 uuid, so it breaks created_at ties in insertion order.
        result.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(result)
    }
}

#[async_trait]
impl MatchedJobStore for InMemoryStore {
    async fn create(&self, job: MatchedJob) -> StoreResult<MatchedJobId> {
        let mut matched = self.matched.write().unwrap();

        if matched
            .values()
            .any(|m| m.run_id == job.run_id && m.posting_id == job.posting_id)
        {
            return Err(StoreError::conflict(format!(
                "posting {} already matched in run {}",
                job.posting_id, job.run_id
            )));
        }

        let id = job.id;
        matched.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: MatchedJobId) -> StoreResult<Option<MatchedJob>> {
        Ok(self.matched.read().unwrap().get(&id).cloned())
    }

    async fn list_for_run(&self, run_id: RunId) -> StoreResult<Vec<MatchedJob>> {
        let matched = self.matched.read().unwrap();
        let mut result: Vec<_> = matched
            .values()
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(result)
    }

    async fn update(&self, job: &MatchedJob) -> StoreResult<()> {
        let mut matched = self.matched.write().unwrap();
        if !matched.contains_key(&job.id) {
            return Err(StoreError::not_found(format!("matched job {}", job.id)));
        }
        matched.insert(job.id, job.clone());
        Ok(())
    }
}

#[async_trait]
impl ResearchStore for InMemoryStore {
    async fn upsert_for(&self, research: Research) -> StoreResult<ResearchId> {
        let mut store = self.research.write().unwrap();
        let id = research.id;
        store.insert(research.matched_job_id, research);
        Ok(id)
    }

    async fn get_for(&self, matched_job_id: MatchedJobId) -> StoreResult<Option<Research>> {
        Ok(self.research.read().unwrap().get(&matched_job_id).cloned())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn upsert_for(&self, artifact: Artifact) -> StoreResult<ArtifactId> {
        let mut store = self.artifacts.write().unwrap();
        let id = artifact.id;
        store.insert(artifact.matched_job_id, artifact);
        Ok(id)
    }

    async fn get_for(&self, matched_job_id: MatchedJobId) -> StoreResult<Option<Artifact>> {
        Ok(self.artifacts.read().unwrap().get(&matched_job_id).cloned())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn create(&self, profile: Profile) -> StoreResult<ProfileId> {
        let mut profiles = self.profiles.write().unwrap();
        let id = profile.id;
        profiles.insert(id, profile);
        Ok(id)
    }

    async fn get(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
        Ok(self.profiles.read().unwrap().get(&id).cloned())
    }

    async fn find_by_contact(&self, name: &str, email: &str) -> StoreResult<Option<Profile>> {
        Ok(self
            .profiles
            .read()
            .unwrap()
            .values()
            .find(|p| p.name == name && p.email == email)
            .cloned())
    }

    async fn touch_last_used(&self, id: ProfileId) -> StoreResult<()> {
        let mut profiles = self.profiles.write().unwrap();
        let profile = profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("profile {id}")))?;
        profile.touch_last_used();
        Ok(())
    }
}

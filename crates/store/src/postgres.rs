//! Postgres-backed stores.
//!
//! One struct implements every store trait against a shared connection pool.
//! The schema is applied at startup through [`PostgresStore::ensure_schema`];
//! every statement is `IF NOT EXISTS` so restarts are safe.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Posting already matched in the run, duplicate id |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! `Storage` is the retryable class; the queue adapter re-enqueues on it.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use jobforge_core::{
    Artifact, ArtifactId, JobSearch, MatchedJob, MatchedJobId, Posting, PostingId, Profile,
    ProfileId, Research, ResearchId, Run, RunCounter, RunId, RunStatus, SearchId, StageProgress,
    StageStatus,
};

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    ArtifactStore, MatchedJobStore, PostingStore, ProfileStore, ResearchStore, RunStore,
    SearchStore,
};

/// Schema statements applied at startup, in order.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id                          UUID PRIMARY KEY,
        profile_id                  UUID NULL,
        status                      TEXT NOT NULL,
        error_message               TEXT NULL,
        total_matched_jobs          INTEGER NOT NULL DEFAULT 0,
        research_completed_count    INTEGER NOT NULL DEFAULT 0,
        research_failed_count       INTEGER NOT NULL DEFAULT 0,
        fabrication_completed_count INTEGER NOT NULL DEFAULT 0,
        fabrication_failed_count    INTEGER NOT NULL DEFAULT 0,
        delivery_triggered          BOOLEAN NOT NULL DEFAULT FALSE,
        delivery_triggered_at       TIMESTAMPTZ NULL,
        completed_at                TIMESTAMPTZ NULL,
        created_at                  TIMESTAMPTZ NOT NULL,
        updated_at                  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_searches (
        id               UUID PRIMARY KEY,
        query            TEXT NOT NULL,
        location         TEXT NOT NULL,
        google_domain    TEXT NOT NULL,
        hl               TEXT NOT NULL,
        gl               TEXT NOT NULL,
        total_jobs_found INTEGER NOT NULL DEFAULT 0,
        jobs_screened    INTEGER NOT NULL DEFAULT 0,
        matches_found    INTEGER NOT NULL DEFAULT 0,
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS postings (
        id              UUID PRIMARY KEY,
        search_id       UUID NOT NULL,
        provider_job_id TEXT NOT NULL,
        title           TEXT NOT NULL,
        company         TEXT NOT NULL,
        location        TEXT NULL,
        description     TEXT NULL,
        url             TEXT NULL,
        via             TEXT NULL,
        extra           JSONB NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        UNIQUE (search_id, provider_job_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS matched_jobs (
        id                       UUID PRIMARY KEY,
        run_id                   UUID NOT NULL,
        posting_id               UUID NOT NULL,
        is_match                 BOOLEAN NOT NULL,
        reason                   TEXT NULL,
        research_status          TEXT NOT NULL,
        research_attempts        INTEGER NOT NULL DEFAULT 0,
        research_error           TEXT NULL,
        research_completed_at    TIMESTAMPTZ NULL,
        fabrication_status       TEXT NOT NULL,
        fabrication_attempts     INTEGER NOT NULL DEFAULT 0,
        fabrication_error        TEXT NULL,
        fabrication_completed_at TIMESTAMPTZ NULL,
        created_at               TIMESTAMPTZ NOT NULL,
        updated_at               TIMESTAMPTZ NOT NULL,
        UNIQUE (run_id, posting_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS research (
        id             UUID PRIMARY KEY,
        matched_job_id UUID NOT NULL UNIQUE,
        company_name   TEXT NOT NULL,
        answer         TEXT NOT NULL,
        citations      JSONB NOT NULL,
        created_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artifacts (
        id                 UUID PRIMARY KEY,
        matched_job_id     UUID NOT NULL UNIQUE,
        cover_letter_topic TEXT NOT NULL,
        cover_letter_body  TEXT NOT NULL,
        cv_pdf_url         TEXT NULL,
        created_at         TIMESTAMPTZ NOT NULL,
        updated_at         TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id              UUID PRIMARY KEY,
        name            TEXT NOT NULL,
        email           TEXT NOT NULL,
        profile_text    TEXT NOT NULL,
        reference_links JSONB NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL,
        last_used_at    TIMESTAMPTZ NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_postings_search ON postings (search_id, created_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_matched_jobs_run ON matched_jobs (run_id, created_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_profiles_contact ON profiles (name, email)"#,
];

/// Postgres implementation of every store trait.
///
/// Thread-safe: the SQLx pool handles connection management, and all the
/// idempotency guards (`complete_once`, the delivery flag, counter bumps)
/// are single guarded UPDATE statements, so concurrent workers cannot
/// double-fire them.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the schema. Safe to call on every startup.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn run_exists(&self, id: RunId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("run_exists", e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RunStore for PostgresStore {
    #[instrument(skip(self, run), fields(run_id = %run.id.as_uuid()), err)]
    async fn create(&self, run: Run) -> StoreResult<RunId> {
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, profile_id, status, error_message, total_matched_jobs,
                research_completed_count, research_failed_count,
                fabrication_completed_count, fabrication_failed_count,
                delivery_triggered, delivery_triggered_at, completed_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.profile_id.map(|p| *p.as_uuid()))
        .bind(run.status.as_str())
        .bind(&run.error_message)
        .bind(run.total_matched_jobs as i32)
        .bind(run.research_completed_count as i32)
        .bind(run.research_failed_count as i32)
        .bind(run.fabrication_completed_count as i32)
        .bind(run.fabrication_failed_count as i32)
        .bind(run.delivery_triggered)
        .bind(run.delivery_triggered_at)
        .bind(run.completed_at)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_run", e))?;

        Ok(run.id)
    }

    #[instrument(skip(self), fields(run_id = %id.as_uuid()), err)]
    async fn get(&self, id: RunId) -> StoreResult<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_run", e))?;

        match row {
            Some(row) => {
                let parsed =
                    RunRow::from_row(&row).map_err(|e| map_sqlx_error("get_run", e))?;
                Ok(Some(parsed.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(run_id = %id.as_uuid()), err)]
    async fn mark_processing(&self, id: RunId) -> StoreResult<()> {
        // Terminal runs stay terminal; a re-drive must not reopen them.
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = CASE
                    WHEN status IN ('completed', 'failed') THEN status
                    ELSE 'processing'
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processing", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("run {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(run_id = %id.as_uuid()), err)]
    async fn mark_failed(&self, id: RunId, message: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(message)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("run {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(run_id = %id.as_uuid()), err)]
    async fn complete_once(&self, id: RunId) -> StoreResult<bool> {
        // The status guard makes this a single atomic compare-and-set.
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'completed',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_once", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.run_exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::not_found(format!("run {id}")))
        }
    }

    #[instrument(skip(self), fields(run_id = %id.as_uuid()), err)]
    async fn mark_delivery_triggered(&self, id: RunId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET delivery_triggered = TRUE,
                delivery_triggered_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND delivery_triggered = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_delivery_triggered", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.run_exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::not_found(format!("run {id}")))
        }
    }

    #[instrument(skip(self), fields(run_id = %id.as_uuid(), counter = counter.as_str()), err)]
    async fn bump_counter(&self, id: RunId, counter: RunCounter) -> StoreResult<()> {
        // Column names come from a closed enum, not caller input.
        let column = counter.as_str();
        let sql =
            format!("UPDATE runs SET {column} = {column} + 1, updated_at = NOW() WHERE id = $1");

        let result = sqlx::query(&sql)
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("bump_counter", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("run {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(run_id = %id.as_uuid()), err)]
    async fn set_total_matched(&self, id: RunId, total: u32) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE runs SET total_matched_jobs = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(total as i32)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_total_matched", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("run {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchStore for PostgresStore {
    #[instrument(skip(self, search), fields(search_id = %search.id.as_uuid()), err)]
    async fn create(&self, search: JobSearch) -> StoreResult<SearchId> {
        sqlx::query(
            r#"
            INSERT INTO job_searches (
                id, query, location, google_domain, hl, gl,
                total_jobs_found, jobs_screened, matches_found,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(search.id.as_uuid())
        .bind(&search.query)
        .bind(&search.location)
        .bind(&search.google_domain)
        .bind(&search.hl)
        .bind(&search.gl)
        .bind(search.total_jobs_found as i32)
        .bind(search.jobs_screened as i32)
        .bind(search.matches_found as i32)
        .bind(search.created_at)
        .bind(search.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_search", e))?;

        Ok(search.id)
    }

    #[instrument(skip(self), fields(search_id = %id.as_uuid()), err)]
    async fn get(&self, id: SearchId) -> StoreResult<Option<JobSearch>> {
        let row = sqlx::query("SELECT * FROM job_searches WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_search", e))?;

        match row {
            Some(row) => {
                let parsed =
                    JobSearchRow::from_row(&row).map_err(|e| map_sqlx_error("get_search", e))?;
                Ok(Some(parsed.into()))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn find_by_params(&self, query: &str, location: &str) -> StoreResult<Option<JobSearch>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM job_searches
            WHERE query = $1 AND location = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(query)
        .bind(location)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_search_by_params", e))?;

        match row {
            Some(row) => {
                let parsed = JobSearchRow::from_row(&row)
                    .map_err(|e| map_sqlx_error("find_search_by_params", e))?;
                Ok(Some(parsed.into()))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(search_id = %id.as_uuid()), err)]
    async fn update_stats(
        &self,
        id: SearchId,
        total_jobs_found: Option<u32>,
        jobs_screened: Option<u32>,
        matches_found: Option<u32>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_searches
            SET total_jobs_found = COALESCE($2, total_jobs_found),
                jobs_screened = COALESCE($3, jobs_screened),
                matches_found = COALESCE($4, matches_found),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(total_jobs_found.map(|v| v as i32))
        .bind(jobs_screened.map(|v| v as i32))
        .bind(matches_found.map(|v| v as i32))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_search_stats", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("job search {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl PostingStore for PostgresStore {
    #[instrument(
        skip(self, posting),
        fields(search_id = %posting.search_id.as_uuid(), provider_job_id = %posting.provider_job_id),
        err
    )]
    async fn upsert_by_provider_id(&self, posting: Posting) -> StoreResult<Posting> {
        // First write wins; a second sighting of the same provider id keeps
        // the stored row and its id.
        sqlx::query(
            r#"
            INSERT INTO postings (
                id, search_id, provider_job_id, title, company,
                location, description, url, via, extra, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (search_id, provider_job_id) DO NOTHING
            "#,
        )
        .bind(posting.id.as_uuid())
        .bind(posting.search_id.as_uuid())
        .bind(&posting.provider_job_id)
        .bind(&posting.title)
        .bind(&posting.company)
        .bind(&posting.location)
        .bind(&posting.description)
        .bind(&posting.url)
        .bind(&posting.via)
        .bind(&posting.extra)
        .bind(posting.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_posting", e))?;

        let row = sqlx::query(
            "SELECT * FROM postings WHERE search_id = $1 AND provider_job_id = $2",
        )
        .bind(posting.search_id.as_uuid())
        .bind(&posting.provider_job_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_posting", e))?;

        let parsed = PostingRow::from_row(&row).map_err(|e| map_sqlx_error("upsert_posting", e))?;
        Ok(parsed.into())
    }

    #[instrument(skip(self), fields(posting_id = %id.as_uuid()), err)]
    async fn get(&self, id: PostingId) -> StoreResult<Option<Posting>> {
        let row = sqlx::query("SELECT * FROM postings WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_posting", e))?;

        match row {
            Some(row) => {
                let parsed =
                    PostingRow::from_row(&row).map_err(|e| map_sqlx_error("get_posting", e))?;
                Ok(Some(parsed.into()))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(search_id = %search_id.as_uuid()), err)]
    async fn list_for_search(&self, search_id: SearchId) -> StoreResult<Vec<Posting>> {
        let rows = sqlx::query(
            "SELECT * FROM postings WHERE search_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(search_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_postings", e))?;

        let mut postings = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed =
                PostingRow::from_row(&row).map_err(|e| map_sqlx_error("list_postings", e))?;
            postings.push(parsed.into());
        }
        Ok(postings)
    }
}

#[async_trait]
impl MatchedJobStore for PostgresStore {
    #[instrument(
        skip(self, job),
        fields(run_id = %job.run_id.as_uuid(), posting_id = %job.posting_id.as_uuid()),
        err
    )]
    async fn create(&self, job: MatchedJob) -> StoreResult<MatchedJobId> {
        sqlx::query(
            r#"
            INSERT INTO matched_jobs (
                id, run_id, posting_id, is_match, reason,
                research_status, research_attempts, research_error, research_completed_at,
                fabrication_status, fabrication_attempts, fabrication_error, fabrication_completed_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.run_id.as_uuid())
        .bind(job.posting_id.as_uuid())
        .bind(job.is_match)
        .bind(&job.reason)
        .bind(job.research.status.as_str())
        .bind(job.research.attempts as i32)
        .bind(&job.research.error)
        .bind(job.research.completed_at)
        .bind(job.fabrication.status.as_str())
        .bind(job.fabrication.attempts as i32)
        .bind(&job.fabrication.error)
        .bind(job.fabrication.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_matched_job", e))?;

        Ok(job.id)
    }

    #[instrument(skip(self), fields(matched_job_id = %id.as_uuid()), err)]
    async fn get(&self, id: MatchedJobId) -> StoreResult<Option<MatchedJob>> {
        let row = sqlx::query("SELECT * FROM matched_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_matched_job", e))?;

        match row {
            Some(row) => {
                let parsed = MatchedJobRow::from_row(&row)
                    .map_err(|e| map_sqlx_error("get_matched_job", e))?;
                Ok(Some(parsed.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(run_id = %run_id.as_uuid()), err)]
    async fn list_for_run(&self, run_id: RunId) -> StoreResult<Vec<MatchedJob>> {
        let rows = sqlx::query(
            "SELECT * FROM matched_jobs WHERE run_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(run_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_matched_jobs", e))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed =
                MatchedJobRow::from_row(&row).map_err(|e| map_sqlx_error("list_matched_jobs", e))?;
            jobs.push(parsed.try_into()?);
        }
        Ok(jobs)
    }

    #[instrument(skip(self, job), fields(matched_job_id = %job.id.as_uuid()), err)]
    async fn update(&self, job: &MatchedJob) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE matched_jobs
            SET is_match = $2,
                reason = $3,
                research_status = $4,
                research_attempts = $5,
                research_error = $6,
                research_completed_at = $7,
                fabrication_status = $8,
                fabrication_attempts = $9,
                fabrication_error = $10,
                fabrication_completed_at = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.is_match)
        .bind(&job.reason)
        .bind(job.research.status.as_str())
        .bind(job.research.attempts as i32)
        .bind(&job.research.error)
        .bind(job.research.completed_at)
        .bind(job.fabrication.status.as_str())
        .bind(job.fabrication.attempts as i32)
        .bind(&job.fabrication.error)
        .bind(job.fabrication.completed_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_matched_job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("matched job {}", job.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ResearchStore for PostgresStore {
    #[instrument(
        skip(self, research),
        fields(matched_job_id = %research.matched_job_id.as_uuid()),
        err
    )]
    async fn upsert_for(&self, research: Research) -> StoreResult<ResearchId> {
        let citations = serde_json::to_value(&research.citations)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // RETURNING id keeps the stored id when a re-run overwrites the row.
        let row = sqlx::query(
            r#"
            INSERT INTO research (
                id, matched_job_id, company_name, answer, citations, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (matched_job_id)
            DO UPDATE SET
                company_name = EXCLUDED.company_name,
                answer = EXCLUDED.answer,
                citations = EXCLUDED.citations
            RETURNING id
            "#,
        )
        .bind(research.id.as_uuid())
        .bind(research.matched_job_id.as_uuid())
        .bind(&research.company_name)
        .bind(&research.answer)
        .bind(citations)
        .bind(research.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_research", e))?;

        let id: uuid::Uuid = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("upsert_research", e))?;
        Ok(ResearchId::from_uuid(id))
    }

    #[instrument(skip(self), fields(matched_job_id = %matched_job_id.as_uuid()), err)]
    async fn get_for(&self, matched_job_id: MatchedJobId) -> StoreResult<Option<Research>> {
        let row = sqlx::query("SELECT * FROM research WHERE matched_job_id = $1")
            .bind(matched_job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_research", e))?;

        match row {
            Some(row) => {
                let parsed =
                    ResearchRow::from_row(&row).map_err(|e| map_sqlx_error("get_research", e))?;
                Ok(Some(parsed.try_into()?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ArtifactStore for PostgresStore {
    #[instrument(
        skip(self, artifact),
        fields(matched_job_id = %artifact.matched_job_id.as_uuid()),
        err
    )]
    async fn upsert_for(&self, artifact: Artifact) -> StoreResult<ArtifactId> {
        let row = sqlx::query(
            r#"
            INSERT INTO artifacts (
                id, matched_job_id, cover_letter_topic, cover_letter_body,
                cv_pdf_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (matched_job_id)
            DO UPDATE SET
                cover_letter_topic = EXCLUDED.cover_letter_topic,
                cover_letter_body = EXCLUDED.cover_letter_body,
                cv_pdf_url = EXCLUDED.cv_pdf_url,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(artifact.id.as_uuid())
        .bind(artifact.matched_job_id.as_uuid())
        .bind(&artifact.cover_letter_topic)
        .bind(&artifact.cover_letter_body)
        .bind(&artifact.cv_pdf_url)
        .bind(artifact.created_at)
        .bind(artifact.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_artifact", e))?;

        let id: uuid::Uuid = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("upsert_artifact", e))?;
        Ok(ArtifactId::from_uuid(id))
    }

    #[instrument(skip(self), fields(matched_job_id = %matched_job_id.as_uuid()), err)]
    async fn get_for(&self, matched_job_id: MatchedJobId) -> StoreResult<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE matched_job_id = $1")
            .bind(matched_job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_artifact", e))?;

        match row {
            Some(row) => {
                let parsed =
                    ArtifactRow::from_row(&row).map_err(|e| map_sqlx_error("get_artifact", e))?;
                Ok(Some(parsed.into()))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProfileStore for PostgresStore {
    #[instrument(skip(self, profile), fields(profile_id = %profile.id.as_uuid()), err)]
    async fn create(&self, profile: Profile) -> StoreResult<ProfileId> {
        let links = serde_json::to_value(&profile.reference_links)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (
                id, name, email, profile_text, reference_links,
                created_at, updated_at, last_used_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(profile.id.as_uuid())
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.profile_text)
        .bind(links)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .bind(profile.last_used_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_profile", e))?;

        Ok(profile.id)
    }

    #[instrument(skip(self), fields(profile_id = %id.as_uuid()), err)]
    async fn get(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_profile", e))?;

        match row {
            Some(row) => {
                let parsed =
                    ProfileRow::from_row(&row).map_err(|e| map_sqlx_error("get_profile", e))?;
                Ok(Some(parsed.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, name, email), err)]
    async fn find_by_contact(&self, name: &str, email: &str) -> StoreResult<Option<Profile>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM profiles
            WHERE name = $1 AND email = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_profile_by_contact", e))?;

        match row {
            Some(row) => {
                let parsed = ProfileRow::from_row(&row)
                    .map_err(|e| map_sqlx_error("find_profile_by_contact", e))?;
                Ok(Some(parsed.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(profile_id = %id.as_uuid()), err)]
    async fn touch_last_used(&self, id: ProfileId) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET last_used_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch_profile", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("profile {id}")));
        }
        Ok(())
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if let Some(code) = db_err.code() {
                if code.as_ref() == "23505" {
                    // Unique violation
                    return StoreError::Conflict(msg);
                }
            }
            StoreError::Storage(msg)
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn parse_run_status(s: &str) -> StoreResult<RunStatus> {
    RunStatus::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_stage(
    status: &str,
    attempts: i32,
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
) -> StoreResult<StageProgress> {
    Ok(StageProgress {
        status: StageStatus::from_str(status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        attempts: attempts as u32,
        error,
        completed_at,
    })
}

// SQLx row types

#[derive(Debug)]
struct RunRow {
    id: uuid::Uuid,
    profile_id: Option<uuid::Uuid>,
    status: String,
    error_message: Option<String>,
    total_matched_jobs: i32,
    research_completed_count: i32,
    research_failed_count: i32,
    fabrication_completed_count: i32,
    fabrication_failed_count: i32,
    delivery_triggered: bool,
    delivery_triggered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for RunRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(RunRow {
            id: row.try_get("id")?,
            profile_id: row.try_get("profile_id")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            total_matched_jobs: row.try_get("total_matched_jobs")?,
            research_completed_count: row.try_get("research_completed_count")?,
            research_failed_count: row.try_get("research_failed_count")?,
            fabrication_completed_count: row.try_get("fabrication_completed_count")?,
            fabrication_failed_count: row.try_get("fabrication_failed_count")?,
            delivery_triggered: row.try_get("delivery_triggered")?,
            delivery_triggered_at: row.try_get("delivery_triggered_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Run {
            id: RunId::from_uuid(row.id),
            profile_id: row.profile_id.map(ProfileId::from_uuid),
            status: parse_run_status(&row.status)?,
            error_message: row.error_message,
            total_matched_jobs: row.total_matched_jobs as u32,
            research_completed_count: row.research_completed_count as u32,
            research_failed_count: row.research_failed_count as u32,
            fabrication_completed_count: row.fabrication_completed_count as u32,
            fabrication_failed_count: row.fabrication_failed_count as u32,
            delivery_triggered: row.delivery_triggered,
            delivery_triggered_at: row.delivery_triggered_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct JobSearchRow {
    id: uuid::Uuid,
    query: String,
    location: String,
    google_domain: String,
    hl: String,
    gl: String,
    total_jobs_found: i32,
    jobs_screened: i32,
    matches_found: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobSearchRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobSearchRow {
            id: row.try_get("id")?,
            query: row.try_get("query")?,
            location: row.try_get("location")?,
            google_domain: row.try_get("google_domain")?,
            hl: row.try_get("hl")?,
            gl: row.try_get("gl")?,
            total_jobs_found: row.try_get("total_jobs_found")?,
            jobs_screened: row.try_get("jobs_screened")?,
            matches_found: row.try_get("matches_found")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<JobSearchRow> for JobSearch {
    fn from(row: JobSearchRow) -> Self {
        JobSearch {
            id: SearchId::from_uuid(row.id),
            query: row.query,
            location: row.location,
            google_domain: row.google_domain,
            hl: row.hl,
            gl: row.gl,
            total_jobs_found: row.total_jobs_found as u32,
            jobs_screened: row.jobs_screened as u32,
            matches_found: row.matches_found as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct PostingRow {
    id: uuid::Uuid,
    search_id: uuid::Uuid,
    provider_job_id: String,
    title: String,
    company: String,
    location: Option<String>,
    description: Option<String>,
    url: Option<String>,
    via: Option<String>,
    extra: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PostingRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(PostingRow {
            id: row.try_get("id")?,
            search_id: row.try_get("search_id")?,
            provider_job_id: row.try_get("provider_job_id")?,
            title: row.try_get("title")?,
            company: row.try_get("company")?,
            location: row.try_get("location")?,
            description: row.try_get("description")?,
            url: row.try_get("url")?,
            via: row.try_get("via")?,
            extra: row.try_get("extra")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<PostingRow> for Posting {
    fn from(row: PostingRow) -> Self {
        Posting {
            id: PostingId::from_uuid(row.id),
            search_id: SearchId::from_uuid(row.search_id),
            provider_job_id: row.provider_job_id,
            title: row.title,
            company: row.company,
            location: row.location,
            description: row.description,
            url: row.url,
            via: row.via,
            extra: row.extra,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct MatchedJobRow {
    id: uuid::Uuid,
    run_id: uuid::Uuid,
    posting_id: uuid::Uuid,
    is_match: bool,
    reason: Option<String>,
    research_status: String,
    research_attempts: i32,
    research_error: Option<String>,
    research_completed_at: Option<DateTime<Utc>>,
    fabrication_status: String,
    fabrication_attempts: i32,
    fabrication_error: Option<String>,
    fabrication_completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MatchedJobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MatchedJobRow {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            posting_id: row.try_get("posting_id")?,
            is_match: row.try_get("is_match")?,
            reason: row.try_get("reason")?,
            research_status: row.try_get("research_status")?,
            research_attempts: row.try_get("research_attempts")?,
            research_error: row.try_get("research_error")?,
            research_completed_at: row.try_get("research_completed_at")?,
            fabrication_status: row.try_get("fabrication_status")?,
            fabrication_attempts: row.try_get("fabrication_attempts")?,
            fabrication_error: row.try_get("fabrication_error")?,
            fabrication_completed_at: row.try_get("fabrication_completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<MatchedJobRow> for MatchedJob {
    type Error = StoreError;

    fn try_from(row: MatchedJobRow) -> Result<Self, Self::Error> {
        Ok(MatchedJob {
            id: MatchedJobId::from_uuid(row.id),
            run_id: RunId::from_uuid(row.run_id),
            posting_id: PostingId::from_uuid(row.posting_id),
            is_match: row.is_match,
            reason: row.reason,
            research: parse_stage(
                &row.research_status,
                row.research_attempts,
                row.research_error,
                row.research_completed_at,
            )?,
            fabrication: parse_stage(
                &row.fabrication_status,
                row.fabrication_attempts,
                row.fabrication_error,
                row.fabrication_completed_at,
            )?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct ResearchRow {
    id: uuid::Uuid,
    matched_job_id: uuid::Uuid,
    company_name: String,
    answer: String,
    citations: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ResearchRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ResearchRow {
            id: row.try_get("id")?,
            matched_job_id: row.try_get("matched_job_id")?,
            company_name: row.try_get("company_name")?,
            answer: row.try_get("answer")?,
            citations: row.try_get("citations")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<ResearchRow> for Research {
    type Error = StoreError;

    fn try_from(row: ResearchRow) -> Result<Self, Self::Error> {
        Ok(Research {
            id: ResearchId::from_uuid(row.id),
            matched_job_id: MatchedJobId::from_uuid(row.matched_job_id),
            company_name: row.company_name,
            answer: row.answer,
            citations: serde_json::from_value(row.citations)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
struct ArtifactRow {
    id: uuid::Uuid,
    matched_job_id: uuid::Uuid,
    cover_letter_topic: String,
    cover_letter_body: String,
    cv_pdf_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ArtifactRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ArtifactRow {
            id: row.try_get("id")?,
            matched_job_id: row.try_get("matched_job_id")?,
            cover_letter_topic: row.try_get("cover_letter_topic")?,
            cover_letter_body: row.try_get("cover_letter_body")?,
            cv_pdf_url: row.try_get("cv_pdf_url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ArtifactRow> for Artifact {
    fn from(row: ArtifactRow) -> Self {
        Artifact {
            id: ArtifactId::from_uuid(row.id),
            matched_job_id: MatchedJobId::from_uuid(row.matched_job_id),
            cover_letter_topic: row.cover_letter_topic,
            cover_letter_body: row.cover_letter_body,
            cv_pdf_url: row.cv_pdf_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct ProfileRow {
    id: uuid::Uuid,
    name: String,
    email: String,
    profile_text: String,
    reference_links: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProfileRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProfileRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            profile_text: row.try_get("profile_text")?,
            reference_links: row.try_get("reference_links")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            id: ProfileId::from_uuid(row.id),
            name: row.name,
            email: row.email,
            profile_text: row.profile_text,
            reference_links: serde_json::from_value(row.reference_links)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_used_at: row.last_used_at,
        })
    }
}

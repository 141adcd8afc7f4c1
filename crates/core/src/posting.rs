//! Job searches and the postings they discover.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{PostingId, SearchId};

/// One set of search parameters plus discovery/screening statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSearch {
    pub id: SearchId,
    pub query: String,
    pub location: String,
    pub google_domain: String,
    pub hl: String,
    pub gl: String,
    pub total_jobs_found: u32,
    pub jobs_screened: u32,
    pub matches_found: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSearch {
    pub fn new(
        query: impl Into<String>,
        location: impl Into<String>,
        google_domain: impl Into<String>,
        hl: impl Into<String>,
        gl: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SearchId::new(),
            query: query.into(),
            location: location.into(),
            google_domain: google_domain.into(),
            hl: hl.into(),
            gl: gl.into(),
            total_jobs_found: 0,
            jobs_screened: 0,
            matches_found: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for JobSearch {
    type Id = SearchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A discovered job posting.
///
/// Postings are deduplicated within a search by `provider_job_id` (the
/// provider-assigned identity), so re-driving discovery never duplicates rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub search_id: SearchId,
    pub provider_job_id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Application link, when the provider exposes one.
    pub url: Option<String>,
    /// Listing source ("via LinkedIn" etc.).
    pub via: Option<String>,
    /// Provider fields we keep but do not model.
    pub extra: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Posting {
    pub fn new(
        search_id: SearchId,
        provider_job_id: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            id: PostingId::new(),
            search_id,
            provider_job_id: provider_job_id.into(),
            title: title.into(),
            company: company.into(),
            location: None,
            description: None,
            url: None,
            via: None,
            extra: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl Entity for Posting {
    type Id = PostingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

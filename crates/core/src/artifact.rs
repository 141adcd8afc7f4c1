//! Research records and fabricated artifacts, one-to-one with matched jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{ArtifactId, MatchedJobId, ResearchId};

/// Company research synthesized for one matched job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Research {
    pub id: ResearchId,
    pub matched_job_id: MatchedJobId,
    pub company_name: String,
    pub answer: String,
    pub citations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Research {
    pub fn new(
        matched_job_id: MatchedJobId,
        company_name: impl Into<String>,
        answer: impl Into<String>,
        citations: Vec<String>,
    ) -> Self {
        Self {
            id: ResearchId::new(),
            matched_job_id,
            company_name: company_name.into(),
            answer: answer.into(),
            citations,
            created_at: Utc::now(),
        }
    }
}

impl Entity for Research {
    type Id = ResearchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Fabricated application materials for one matched job.
///
/// Written once fabrication succeeds; re-fabrication upserts (overwrites,
/// never duplicates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub matched_job_id: MatchedJobId,
    pub cover_letter_topic: String,
    pub cover_letter_body: String,
    /// Hosted URL of the rendered CV.
    pub cv_pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        matched_job_id: MatchedJobId,
        cover_letter_topic: impl Into<String>,
        cover_letter_body: impl Into<String>,
        cv_pdf_url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ArtifactId::new(),
            matched_job_id,
            cover_letter_topic: cover_letter_topic.into(),
            cover_letter_body: cover_letter_body.into(),
            cv_pdf_url,
            created_at: now,
            updated_at: now,
        }
    }

    /// Delivery only ships artifacts with actual content.
    pub fn is_empty(&self) -> bool {
        self.cover_letter_topic.is_empty()
            && self.cover_letter_body.is_empty()
            && self.cv_pdf_url.is_none()
    }
}

impl Entity for Artifact {
    type Id = ArtifactId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

//! Trait boundaries for the five external collaborators.
//!
//! Each trait is the narrowest surface a node needs; payload shapes beyond
//! these structs are the provider's own concern. Implementations must be
//! cheap to construct: the task runner builds a fresh [`ProviderSet`] per
//! task execution and drops it when the task ends, so no client state leaks
//! across tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jobforge_core::Posting;

use crate::error::ProviderResult;

/// Search parameters as sent to the job-search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub location: String,
    pub google_domain: String,
    pub hl: String,
    pub gl: String,
}

/// A posting as returned by the job-search provider, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPosting {
    /// Provider-assigned posting identity; the dedupe key.
    pub provider_job_id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub via: Option<String>,
    pub extra: Option<serde_json::Value>,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub postings: Vec<DiscoveredPosting>,
    pub next_page_token: Option<String>,
}

/// Job-search API: paged posting discovery.
#[async_trait]
pub trait JobSearchProvider: Send + Sync {
    async fn search_page(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
    ) -> ProviderResult<SearchPage>;
}

/// Screening verdict for one posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub is_match: bool,
    pub reason: String,
}

/// A generated cover letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverLetterDraft {
    pub topic: String,
    pub body: String,
}

/// A tailored CV, rendered to HTML ready for the PDF renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvDraft {
    pub html: String,
}

/// Raw CV text structured into profile text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDraft {
    pub profile_text: String,
}

/// AI generation API: every structured-output call the pipeline makes.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Judge whether a posting fits the profile.
    async fn screen_posting(
        &self,
        profile_text: &str,
        posting: &Posting,
    ) -> ProviderResult<MatchDecision>;

    /// Compose a cover letter from profile, posting, and research context.
    async fn compose_cover_letter(
        &self,
        profile_text: &str,
        posting: &Posting,
        research: &str,
    ) -> ProviderResult<CoverLetterDraft>;

    /// Tailor the profile into a posting-specific CV.
    async fn tailor_cv(&self, profile_text: &str, posting: &Posting) -> ProviderResult<CvDraft>;

    /// Structure raw CV text into profile text.
    async fn structure_profile(
        &self,
        name: &str,
        email: &str,
        raw_text: &str,
    ) -> ProviderResult<ProfileDraft>;
}

/// Synthesized company research.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchAnswer {
    pub answer: String,
    pub citations: Vec<String>,
}

/// Company-research API.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn investigate(&self, company: &str, posting_title: &str)
    -> ProviderResult<ResearchAnswer>;
}

/// A rendered, hosted PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPdf {
    pub url: String,
}

/// HTML-to-PDF rendering API.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, html: &str) -> ProviderResult<RenderedPdf>;
}

/// A file attached to an outgoing delivery by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

/// Everything the mail provider needs for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPackage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Provider acknowledgement of a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Email-delivery API.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, package: &DeliveryPackage) -> ProviderResult<SendReceipt>;
}

/// The full provider bundle a single task execution works with.
#[derive(Clone)]
pub struct ProviderSet {
    pub search: Arc<dyn JobSearchProvider>,
    pub generator: Arc<dyn Generator>,
    pub research: Arc<dyn ResearchProvider>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub mail: Arc<dyn MailSender>,
}

/// Builds a [`ProviderSet`] scoped to one task execution.
///
/// Worker processes are reused across tasks; scoping clients per execution
/// keeps a retried task from observing half-closed state left behind by a
/// previous one.
pub trait ProviderFactory: Send + Sync {
    fn create(&self) -> ProviderSet;
}

impl<T: ProviderFactory + ?Sized> ProviderFactory for Arc<T> {
    fn create(&self) -> ProviderSet {
        (**self).create()
    }
}

//! `jobforge-providers` — external collaborator boundaries.
//!
//! The pipeline talks to five external services: a job-search API, an AI
//! generation API (screening, cover letters, CVs, profile structuring), a
//! company-research API, a PDF renderer, and a mail sender. This crate holds
//! their trait boundaries, the retryable/permanent error split the task queue
//! relies on, and scripted in-process implementations for tests/dev.

pub mod error;
pub mod stub;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use traits::{
    Attachment, CoverLetterDraft, CvDraft, DeliveryPackage, DiscoveredPosting, Generator,
    JobSearchProvider, MailSender, MatchDecision, PdfRenderer, ProfileDraft, ProviderFactory,
    ProviderSet, RenderedPdf, ResearchAnswer, ResearchProvider, SearchPage, SearchQuery,
    SendReceipt,
};

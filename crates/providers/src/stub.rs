//! Scripted in-process providers for tests/dev.
//!
//! Each stub answers deterministically and can be scripted to fail a given
//! number of times per key, which is how the retry paths are exercised
//! without leaving the process. The API binary also wires these when no real
//! providers are configured.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use jobforge_core::Posting;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{
    CoverLetterDraft, CvDraft, DeliveryPackage, DiscoveredPosting, Generator, JobSearchProvider,
    MailSender, MatchDecision, PdfRenderer, ProfileDraft, ProviderFactory, ProviderSet,
    RenderedPdf, ResearchAnswer, ResearchProvider, SearchPage, SearchQuery, SendReceipt,
};

/// Shorthand for building a scripted posting.
pub fn sample_posting(provider_job_id: &str, title: &str, company: &str) -> DiscoveredPosting {
    DiscoveredPosting {
        provider_job_id: provider_job_id.to_string(),
        title: title.to_string(),
        company: company.to_string(),
        location: Some("Remote".to_string()),
        description: Some(format!("{title} role at {company}.")),
        url: Some(format!("https://jobs.example.com/{provider_job_id}")),
        via: Some("via Example Jobs".to_string()),
        extra: None,
    }
}

/// Job-search stub serving a fixed posting list in pages.
pub struct StubSearchProvider {
    postings: Vec<DiscoveredPosting>,
    page_size: usize,
    calls: Mutex<u32>,
    fail_remaining: Mutex<u32>,
}

impl StubSearchProvider {
    pub fn new(postings: Vec<DiscoveredPosting>) -> Self {
        Self {
            postings,
            page_size: 10,
            calls: Mutex::new(0),
            fail_remaining: Mutex::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fail the next `times` calls with a timeout before serving pages.
    pub fn fail_times(&self, times: u32) {
        *self.fail_remaining.lock().unwrap() = times;
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl JobSearchProvider for StubSearchProvider {
    async fn search_page(
        &self,
        _query: &SearchQuery,
        page_token: Option<&str>,
    ) -> ProviderResult<SearchPage> {
        *self.calls.lock().unwrap() += 1;

        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::timeout("search request timed out"));
            }
        }

        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::invalid_response(format!("bad page token: {token}")))?,
            None => 0,
        };

        let end = (offset + self.page_size).min(self.postings.len());
        let postings = self.postings[offset.min(end)..end].to_vec();
        let next_page_token = if end < self.postings.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(SearchPage {
            postings,
            next_page_token,
        })
    }
}

/// Generation stub: match-all screening unless a title is scripted otherwise,
/// canned letters/CVs, per-title fabrication failure plans.
pub struct StubGenerator {
    rejected_titles: Mutex<Vec<String>>,
    screen_fail_plan: Mutex<HashMap<String, u32>>,
    letter_fail_plan: Mutex<HashMap<String, u32>>,
    screen_calls: Mutex<Vec<String>>,
    letter_calls: Mutex<Vec<String>>,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            rejected_titles: Mutex::new(Vec::new()),
            screen_fail_plan: Mutex::new(HashMap::new()),
            letter_fail_plan: Mutex::new(HashMap::new()),
            screen_calls: Mutex::new(Vec::new()),
            letter_calls: Mutex::new(Vec::new()),
        }
    }

    /// Screen the given title as a non-match.
    pub fn reject_title(&self, title: &str) {
        self.rejected_titles.lock().unwrap().push(title.to_string());
    }

    /// Fail the next `times` screening calls for the given title.
    pub fn fail_screening(&self, title: &str, times: u32) {
        self.screen_fail_plan
            .lock()
            .unwrap()
            .insert(title.to_string(), times);
    }

    /// Fail the next `times` cover-letter calls for the given title.
    pub fn fail_cover_letter(&self, title: &str, times: u32) {
        self.letter_fail_plan
            .lock()
            .unwrap()
            .insert(title.to_string(), times);
    }

    pub fn screen_calls(&self) -> Vec<String> {
        self.screen_calls.lock().unwrap().clone()
    }

    pub fn letter_calls(&self) -> Vec<String> {
        self.letter_calls.lock().unwrap().clone()
    }

    fn consume_failure(plan: &Mutex<HashMap<String, u32>>, key: &str) -> bool {
        let mut plan = plan.lock().unwrap();
        match plan.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for StubGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn screen_posting(
        &self,
        _profile_text: &str,
        posting: &Posting,
    ) -> ProviderResult<MatchDecision> {
        self.screen_calls.lock().unwrap().push(posting.title.clone());

        if Self::consume_failure(&self.screen_fail_plan, &posting.title) {
            return Err(ProviderError::timeout(format!(
                "screening timed out for {}",
                posting.title
            )));
        }

        let rejected = self
            .rejected_titles
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == &posting.title);

        Ok(MatchDecision {
            is_match: !rejected,
            reason: if rejected {
                format!("{} does not fit the profile", posting.title)
            } else {
                format!("{} aligns with the profile", posting.title)
            },
        })
    }

    async fn compose_cover_letter(
        &self,
        _profile_text: &str,
        posting: &Posting,
        research: &str,
    ) -> ProviderResult<CoverLetterDraft> {
        self.letter_calls.lock().unwrap().push(posting.title.clone());

        if Self::consume_failure(&self.letter_fail_plan, &posting.title) {
            return Err(ProviderError::upstream(
                503,
                format!("generation overloaded for {}", posting.title),
            ));
        }

        Ok(CoverLetterDraft {
            topic: format!("Application for {} at {}", posting.title, posting.company),
            body: format!(
                "Dear {} team,\n\nI am applying for the {} position. {}\n",
                posting.company,
                posting.title,
                research.lines().next().unwrap_or_default()
            ),
        })
    }

    async fn tailor_cv(&self, profile_text: &str, posting: &Posting) -> ProviderResult<CvDraft> {
        Ok(CvDraft {
            html: format!(
                "<html><body><h1>CV for {}</h1><p>{}</p></body></html>",
                posting.title, profile_text
            ),
        })
    }

    async fn structure_profile(
        &self,
        name: &str,
        _email: &str,
        raw_text: &str,
    ) -> ProviderResult<ProfileDraft> {
        Ok(ProfileDraft {
            profile_text: format!("{name}: {raw_text}"),
        })
    }
}

/// Research stub with a per-company failure plan and a call log.
pub struct StubResearchProvider {
    fail_plan: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl StubResearchProvider {
    pub fn new() -> Self {
        Self {
            fail_plan: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` calls for the given company.
    pub fn fail_times(&self, company: &str, times: u32) {
        self.fail_plan
            .lock()
            .unwrap()
            .insert(company.to_string(), times);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, company: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == company)
            .count()
    }
}

impl Default for StubResearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResearchProvider for StubResearchProvider {
    async fn investigate(
        &self,
        company: &str,
        posting_title: &str,
    ) -> ProviderResult<ResearchAnswer> {
        self.calls.lock().unwrap().push(company.to_string());

        let mut plan = self.fail_plan.lock().unwrap();
        if let Some(remaining) = plan.get_mut(company) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::timeout(format!(
                    "research timed out for {company}"
                )));
            }
        }

        Ok(ResearchAnswer {
            answer: format!("{company} is hiring for {posting_title}; growing team, recent funding."),
            citations: vec![format!("https://news.example.com/{company}")],
        })
    }
}

/// PDF renderer stub returning deterministic hosted URLs.
pub struct StubPdfRenderer {
    renders: Mutex<u32>,
    fail_remaining: Mutex<u32>,
}

impl StubPdfRenderer {
    pub fn new() -> Self {
        Self {
            renders: Mutex::new(0),
            fail_remaining: Mutex::new(0),
        }
    }

    pub fn fail_times(&self, times: u32) {
        *self.fail_remaining.lock().unwrap() = times;
    }

    pub fn renders(&self) -> u32 {
        *self.renders.lock().unwrap()
    }
}

impl Default for StubPdfRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdfRenderer for StubPdfRenderer {
    async fn render(&self, _html: &str) -> ProviderResult<RenderedPdf> {
        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::upstream(500, "render pool exhausted"));
            }
        }

        let mut renders = self.renders.lock().unwrap();
        *renders += 1;
        Ok(RenderedPdf {
            url: format!("https://pdf.example.com/render/{renders}.pdf"),
        })
    }
}

/// Mail stub recording every package it was asked to send.
pub struct StubMailSender {
    sent: Mutex<Vec<DeliveryPackage>>,
    fail_remaining: Mutex<u32>,
}

impl StubMailSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_remaining: Mutex::new(0),
        }
    }

    pub fn fail_times(&self, times: u32) {
        *self.fail_remaining.lock().unwrap() = times;
    }

    pub fn sent(&self) -> Vec<DeliveryPackage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for StubMailSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailSender for StubMailSender {
    async fn send(&self, package: &DeliveryPackage) -> ProviderResult<SendReceipt> {
        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::unavailable("smtp relay unreachable"));
            }
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(package.clone());
        Ok(SendReceipt {
            message_id: format!("msg-{}", sent.len()),
        })
    }
}

/// Factory handing out the same stub set to every task execution.
///
/// Real factories build fresh clients per call; the stubs are shared so tests
/// can script failures and read call logs across executions.
pub struct StubProviderFactory {
    pub search: Arc<StubSearchProvider>,
    pub generator: Arc<StubGenerator>,
    pub research: Arc<StubResearchProvider>,
    pub pdf: Arc<StubPdfRenderer>,
    pub mail: Arc<StubMailSender>,
}

impl StubProviderFactory {
    pub fn new(postings: Vec<DiscoveredPosting>) -> Self {
        Self {
            search: Arc::new(StubSearchProvider::new(postings)),
            generator: Arc::new(StubGenerator::new()),
            research: Arc::new(StubResearchProvider::new()),
            pdf: Arc::new(StubPdfRenderer::new()),
            mail: Arc::new(StubMailSender::new()),
        }
    }

    /// A small canned dataset for the dev server.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            sample_posting("dev-1", "Backend Engineer", "Acme Systems"),
            sample_posting("dev-2", "Platform Engineer", "Initech"),
            sample_posting("dev-3", "Site Reliability Engineer", "Globex"),
        ])
    }
}

impl ProviderFactory for StubProviderFactory {
    fn create(&self) -> ProviderSet {
        ProviderSet {
            search: self.search.clone(),
            generator: self.generator.clone(),
            research: self.research.clone(),
            pdf: self.pdf.clone(),
            mail: self.mail.clone(),
        }
    }
}

//! Typed workflow contexts.
//!
//! A context is the in-memory aggregate handed from node to node: the caller's
//! inputs, every optional field declared up front, plus the working state the
//! nodes agree on. It serializes as the task payload, so a re-enqueued task
//! re-enters the workflow with the same inputs; working state is always
//! re-derived from the stores on re-entry.

use serde::{Deserialize, Serialize};

use jobforge_core::{MatchedJobId, Posting, ProfileId, RunId, SearchId};

/// The accessors the orchestrator needs from any context.
pub trait WorkflowContext: Send + Sync + 'static {
    fn run_id(&self) -> Option<RunId>;

    fn set_run_id(&mut self, run_id: RunId);

    /// Owning profile, when the context knows one.
    fn profile_id(&self) -> Option<ProfileId>;

    fn errors(&self) -> &[String];

    /// Record an expected domain failure. The workflow halts after the
    /// current node once any error is recorded.
    fn record_error(&mut self, error: impl Into<String>);

    fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    /// One human-readable line, the shape stored in `Run.error_message`.
    fn joined_errors(&self) -> String {
        self.errors().join("; ")
    }
}

/// Profile snapshot loaded once by the retrieval node and read by the
/// screening, fabrication and delivery nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedProfile {
    pub id: ProfileId,
    pub name: String,
    pub email: String,
    pub text: String,
}

fn default_google_domain() -> String {
    "google.com".to_string()
}

fn default_hl() -> String {
    "en".to_string()
}

fn default_gl() -> String {
    "us".to_string()
}

fn default_num_results() -> u32 {
    10
}

fn default_max_screening() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

/// Context of the job-search workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSearchContext {
    pub query: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_google_domain")]
    pub google_domain: String,
    #[serde(default = "default_hl")]
    pub hl: String,
    #[serde(default = "default_gl")]
    pub gl: String,
    /// How many postings discovery collects before it stops paging.
    #[serde(default = "default_num_results")]
    pub num_results: u32,
    /// How many of the discovered postings are screened.
    #[serde(default = "default_max_screening")]
    pub max_screening: u32,
    /// Per-item attempt ceiling for the research and fabrication stages.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub errors: Vec<String>,

    // Working state, filled by the nodes in order.
    #[serde(default)]
    pub search_id: Option<SearchId>,
    #[serde(default)]
    pub postings: Vec<Posting>,
    #[serde(default)]
    pub profile: Option<LoadedProfile>,
    #[serde(default)]
    pub matched_job_ids: Vec<MatchedJobId>,
}

impl JobSearchContext {
    pub fn new(query: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            location: location.into(),
            google_domain: default_google_domain(),
            hl: default_hl(),
            gl: default_gl(),
            num_results: default_num_results(),
            max_screening: default_max_screening(),
            max_retries: default_max_retries(),
            profile_id: None,
            run_id: None,
            errors: Vec::new(),
            search_id: None,
            postings: Vec::new(),
            profile: None,
            matched_job_ids: Vec::new(),
        }
    }

    pub fn for_profile(mut self, profile_id: ProfileId) -> Self {
        self.profile_id = Some(profile_id);
        self
    }
}

impl WorkflowContext for JobSearchContext {
    fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    fn set_run_id(&mut self, run_id: RunId) {
        self.run_id = Some(run_id);
    }

    fn profile_id(&self) -> Option<ProfileId> {
        self.profile_id
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }

    fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

/// Context of the profiling workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingContext {
    pub name: String,
    pub email: String,
    /// Pre-extracted CV text as submitted by the caller.
    pub raw_profile_text: String,
    #[serde(default)]
    pub reference_links: Vec<String>,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub errors: Vec<String>,

    // Outputs of the processing node.
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    /// An existing profile with the same name + email was reused; the
    /// generation provider was not called.
    #[serde(default)]
    pub profile_was_cached: bool,
}

impl ProfilingContext {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        raw_profile_text: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            raw_profile_text: raw_profile_text.into(),
            reference_links: Vec::new(),
            run_id: None,
            errors: Vec::new(),
            profile_id: None,
            profile_was_cached: false,
        }
    }
}

impl WorkflowContext for ProfilingContext {
    fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    fn set_run_id(&mut self, run_id: RunId) {
        self.run_id = Some(run_id);
    }

    fn profile_id(&self) -> Option<ProfileId> {
        self.profile_id
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }

    fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_search_payload_defaults() {
        let ctx: JobSearchContext =
            serde_json::from_value(serde_json::json!({ "query": "rust engineer" })).unwrap();
        assert_eq!(ctx.query, "rust engineer");
        assert_eq!(ctx.location, "");
        assert_eq!(ctx.google_domain, "google.com");
        assert_eq!(ctx.hl, "en");
        assert_eq!(ctx.gl, "us");
        assert_eq!(ctx.num_results, 10);
        assert_eq!(ctx.max_screening, 5);
        assert_eq!(ctx.max_retries, 3);
        assert!(ctx.errors.is_empty());
        assert!(ctx.postings.is_empty());
    }

    #[test]
    fn explicit_limits_override_defaults() {
        let ctx: JobSearchContext = serde_json::from_value(serde_json::json!({
            "query": "rust engineer",
            "location": "Berlin",
            "num_results": 3,
            "max_screening": 2,
        }))
        .unwrap();
        assert_eq!(ctx.num_results, 3);
        assert_eq!(ctx.max_screening, 2);
        assert_eq!(ctx.location, "Berlin");
    }

    #[test]
    fn errors_join_into_one_line() {
        let mut ctx = JobSearchContext::new("rust", "");
        assert!(!ctx.has_errors());
        ctx.record_error("name is required");
        ctx.record_error("invalid email address");
        assert_eq!(
            ctx.joined_errors(),
            "name is required; invalid email address"
        );
    }

    #[test]
    fn run_id_round_trips_through_the_payload() {
        let mut ctx = ProfilingContext::new("Jane", "jane@example.com", "text");
        let run_id = RunId::new();
        ctx.set_run_id(run_id);

        let payload = serde_json::to_value(&ctx).unwrap();
        let back: ProfilingContext = serde_json::from_value(payload).unwrap();
        assert_eq!(back.run_id(), Some(run_id));
    }
}

//! Matched job: one posting judged relevant to a profile within a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{MatchedJobId, PostingId, RunId};
use crate::stage::{FailOutcome, StageKind, StageProgress};

/// A posting that matched a profile, with independent research and
/// fabrication stage machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedJob {
    pub id: MatchedJobId,
    pub run_id: RunId,
    pub posting_id: PostingId,
    pub is_match: bool,
    /// Screening rationale from the generation provider.
    pub reason: Option<String>,
    pub research: StageProgress,
    pub fabrication: StageProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchedJob {
    pub fn new(run_id: RunId, posting_id: PostingId, is_match: bool, reason: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MatchedJobId::new(),
            run_id,
            posting_id,
            is_match,
            reason,
            research: StageProgress::new(),
            fabrication: StageProgress::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, kind: StageKind) -> &StageProgress {
        match kind {
            StageKind::Research => &self.research,
            StageKind::Fabrication => &self.fabrication,
        }
    }

    /// Start an attempt on one stage. See [`StageProgress::begin_attempt`].
    pub fn begin_stage(&mut self, kind: StageKind) {
        self.stage_mut(kind).begin_attempt();
        self.updated_at = Utc::now();
    }

    /// Record success on one stage; `true` only on its first completion.
    pub fn complete_stage(&mut self, kind: StageKind) -> bool {
        let first = self.stage_mut(kind).complete();
        self.updated_at = Utc::now();
        first
    }

    /// Record a failed attempt on one stage. See [`StageProgress::fail`].
    pub fn fail_stage(
        &mut self,
        kind: StageKind,
        error: impl Into<String>,
        max_retries: u32,
    ) -> FailOutcome {
        let outcome = self.stage_mut(kind).fail(error, max_retries);
        self.updated_at = Utc::now();
        outcome
    }

    /// Both stages have reached a terminal state (completed or failed).
    pub fn both_resolved(&self) -> bool {
        self.research.is_terminal() && self.fabrication.is_terminal()
    }

    /// Both stages completed; the item is eligible for delivery.
    pub fn fully_succeeded(&self) -> bool {
        self.research.status == crate::stage::StageStatus::Completed
            && self.fabrication.status == crate::stage::StageStatus::Completed
    }

    fn stage_mut(&mut self, kind: StageKind) -> &mut StageProgress {
        match kind {
            StageKind::Research => &mut self.research,
            StageKind::Fabrication => &mut self.fabrication,
        }
    }
}

impl Entity for MatchedJob {
    type Id = MatchedJobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageStatus;

    fn test_job() -> MatchedJob {
        MatchedJob::new(RunId::new(), PostingId::new(), true, Some("strong fit".into()))
    }

    #[test]
    fn stages_are_independent() {
        let mut job = test_job();
        job.begin_stage(StageKind::Research);
        job.complete_stage(StageKind::Research);

        assert_eq!(job.research.status, StageStatus::Completed);
        assert_eq!(job.fabrication.status, StageStatus::Pending);
        assert_eq!(job.fabrication.attempts, 0);
        assert!(!job.both_resolved());
    }

    #[test]
    fn resolved_but_not_succeeded() {
        let mut job = test_job();
        job.begin_stage(StageKind::Research);
        job.begin_stage(StageKind::Research);
        job.begin_stage(StageKind::Research);
        job.fail_stage(StageKind::Research, "no answer", 3);
        job.begin_stage(StageKind::Fabrication);
        job.complete_stage(StageKind::Fabrication);

        assert!(job.both_resolved());
        assert!(!job.fully_succeeded());
    }
}

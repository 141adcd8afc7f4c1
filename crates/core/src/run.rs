//! Run lifecycle: one row per end-to-end pipeline invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::id::{ProfileId, RunId};
use crate::stage::StageKind;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, waiting for a worker to pick the task up.
    Pending,
    /// A worker is driving the pipeline.
    Processing,
    /// Every matched item reached a terminal stage state. Terminal.
    Completed,
    /// Validation or infrastructure failure ended the run. Terminal.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl core::str::FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// The run-level aggregate counters.
///
/// Counters only move on a *first* transition of the underlying stage, never
/// on re-observation; the stores take the counter name, the stage machines
/// decide when to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCounter {
    ResearchCompleted,
    ResearchFailed,
    FabricationCompleted,
    FabricationFailed,
}

impl RunCounter {
    pub fn completed(kind: StageKind) -> Self {
        match kind {
            StageKind::Research => RunCounter::ResearchCompleted,
            StageKind::Fabrication => RunCounter::FabricationCompleted,
        }
    }

    pub fn failed(kind: StageKind) -> Self {
        match kind {
            StageKind::Research => RunCounter::ResearchFailed,
            StageKind::Fabrication => RunCounter::FabricationFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunCounter::ResearchCompleted => "research_completed_count",
            RunCounter::ResearchFailed => "research_failed_count",
            RunCounter::FabricationCompleted => "fabrication_completed_count",
            RunCounter::FabricationFailed => "fabrication_failed_count",
        }
    }
}

/// One end-to-end pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// Owning profile; `None` for profiling runs that create the profile.
    pub profile_id: Option<ProfileId>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub total_matched_jobs: u32,
    pub research_completed_count: u32,
    pub research_failed_count: u32,
    pub fabrication_completed_count: u32,
    pub fabrication_failed_count: u32,
    /// One-shot delivery flag; set only after a reported send success.
    pub delivery_triggered: bool,
    pub delivery_triggered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(profile_id: Option<ProfileId>) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            profile_id,
            status: RunStatus::Pending,
            error_message: None,
            total_matched_jobs: 0,
            research_completed_count: 0,
            research_failed_count: 0,
            fabrication_completed_count: 0,
            fabrication_failed_count: 0,
            delivery_triggered: false,
            delivery_triggered_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn counter(&self, counter: RunCounter) -> u32 {
        match counter {
            RunCounter::ResearchCompleted => self.research_completed_count,
            RunCounter::ResearchFailed => self.research_failed_count,
            RunCounter::FabricationCompleted => self.fabrication_completed_count,
            RunCounter::FabricationFailed => self.fabrication_failed_count,
        }
    }

    pub fn bump(&mut self, counter: RunCounter) {
        match counter {
            RunCounter::ResearchCompleted => self.research_completed_count += 1,
            RunCounter::ResearchFailed => self.research_failed_count += 1,
            RunCounter::FabricationCompleted => self.fabrication_completed_count += 1,
            RunCounter::FabricationFailed => self.fabrication_failed_count += 1,
        }
        self.updated_at = Utc::now();
    }

    /// Move into `processing`. Terminal runs are left untouched so a
    /// re-drive cannot reopen them.
    pub fn mark_processing(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.status = RunStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Transition into `completed` exactly once.
    ///
    /// Returns `true` only on the first transition; re-observation leaves the
    /// row untouched so repeated completion checks never re-fire side effects.
    pub fn mark_completed(&mut self) -> bool {
        if self.status == RunStatus::Completed {
            return false;
        }
        let now = Utc::now();
        self.status = RunStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Flip the one-shot delivery flag.
    ///
    /// Returns `true` only on the first transition.
    pub fn mark_delivery_triggered(&mut self) -> bool {
        if self.delivery_triggered {
            return false;
        }
        let now = Utc::now();
        self.delivery_triggered = true;
        self.delivery_triggered_at = Some(now);
        self.updated_at = now;
        true
    }
}

impl Entity for Run {
    type Id = RunId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_exactly_once() {
        let mut run = Run::new(None);
        assert!(run.mark_completed());
        let stamped = run.completed_at;
        assert!(stamped.is_some());

        assert!(!run.mark_completed());
        assert_eq!(run.completed_at, stamped);
    }

    #[test]
    fn delivery_flag_is_one_shot() {
        let mut run = Run::new(None);
        assert!(run.mark_delivery_triggered());
        assert!(!run.mark_delivery_triggered());
        assert!(run.delivery_triggered_at.is_some());
    }

    #[test]
    fn failed_run_carries_message_and_timestamp() {
        let mut run = Run::new(None);
        run.mark_processing();
        run.mark_failed("user profile missing");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("user profile missing"));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn terminal_runs_cannot_be_reopened() {
        let mut run = Run::new(None);
        run.mark_processing();
        run.mark_completed();
        run.mark_processing();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn counters_map_to_stage_kinds() {
        assert_eq!(
            RunCounter::completed(StageKind::Research),
            RunCounter::ResearchCompleted
        );
        assert_eq!(
            RunCounter::failed(StageKind::Fabrication),
            RunCounter::FabricationFailed
        );
    }
}

//! Per-item stage state machine.
//!
//! Each matched job carries two independent stages (research and fabrication).
//! A stage moves `pending → processing → {completed | pending | failed}`:
//! starting an attempt increments the attempt counter, success is terminal,
//! and a failure either returns the stage to `pending` (eligible for a later
//! re-drive) or, once the attempt ceiling is reached, parks it in `failed`.
//!
//! The transition methods report whether a *first* genuine transition into a
//! terminal state happened, so run-level counters can stay idempotent under
//! repeated drives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which stage of a matched job is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Research,
    Fabrication,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::Fabrication => "fabrication",
        }
    }
}

impl core::fmt::Display for StageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet attempted, or returned after a failed attempt with budget left.
    Pending,
    /// An attempt is in flight.
    Processing,
    /// Succeeded. Terminal.
    Completed,
    /// Attempt ceiling reached without success. Terminal.
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl core::str::FromStr for StageStatus {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "processing" => Ok(StageStatus::Processing),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            other => Err(crate::error::DomainError::validation(format!(
                "unknown stage status: {other}"
            ))),
        }
    }
}

/// Outcome of [`StageProgress::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailOutcome {
    /// The stage went back to `pending` and may be driven again.
    pub retrying: bool,
    /// The stage transitioned into `failed` for the first time.
    pub first_failure: bool,
}

/// Progress of one stage of one matched job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub status: StageStatus,
    /// Number of attempts started. Only `begin_attempt` moves this.
    pub attempts: u32,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageProgress {
    pub fn new() -> Self {
        Self {
            status: StageStatus::Pending,
            attempts: 0,
            error: None,
            completed_at: None,
        }
    }

    /// Start an attempt: move to `processing` and consume one unit of budget.
    pub fn begin_attempt(&mut self) {
        self.status = StageStatus::Processing;
        self.attempts += 1;
    }

    /// Record success.
    ///
    /// Returns `true` only on the first transition into `completed`; callers
    /// use that to guard run-level counter increments.
    pub fn complete(&mut self) -> bool {
        let first = self.status != StageStatus::Completed;
        self.status = StageStatus::Completed;
        self.error = None;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        first
    }

    /// Record a failed attempt.
    ///
    /// Below the ceiling the stage returns to `pending` so a later drive can
    /// retry it. At the ceiling (`attempts >= max_retries`) it becomes
    /// `failed`; `first_failure` reports the first such transition.
    pub fn fail(&mut self, error: impl Into<String>, max_retries: u32) -> FailOutcome {
        let was_failed = self.status == StageStatus::Failed;
        self.error = Some(error.into());

        if self.attempts < max_retries {
            self.status = StageStatus::Pending;
            FailOutcome {
                retrying: true,
                first_failure: false,
            }
        } else {
            self.status = StageStatus::Failed;
            FailOutcome {
                retrying: false,
                first_failure: !was_failed,
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for StageProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_consumes_budget() {
        let mut stage = StageProgress::new();
        stage.begin_attempt();
        assert_eq!(stage.status, StageStatus::Processing);
        assert_eq!(stage.attempts, 1);
    }

    #[test]
    fn first_completion_reported_once() {
        let mut stage = StageProgress::new();
        stage.begin_attempt();
        assert!(stage.complete());
        let stamped = stage.completed_at;
        assert!(stamped.is_some());

        // Re-observing success must not report a transition or restamp.
        assert!(!stage.complete());
        assert_eq!(stage.completed_at, stamped);
    }

    #[test]
    fn failure_below_ceiling_returns_to_pending() {
        let mut stage = StageProgress::new();
        stage.begin_attempt();
        let outcome = stage.fail("timeout", 3);
        assert!(outcome.retrying);
        assert!(!outcome.first_failure);
        assert_eq!(stage.status, StageStatus::Pending);
        assert_eq!(stage.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn failure_at_ceiling_is_terminal_and_reported_once() {
        let mut stage = StageProgress::new();
        for _ in 0..3 {
            stage.begin_attempt();
        }
        let outcome = stage.fail("timeout", 3);
        assert!(!outcome.retrying);
        assert!(outcome.first_failure);
        assert_eq!(stage.status, StageStatus::Failed);

        let again = stage.fail("timeout", 3);
        assert!(!again.first_failure);
    }

    #[test]
    fn success_clears_prior_error() {
        let mut stage = StageProgress::new();
        stage.begin_attempt();
        stage.fail("flaky upstream", 3);
        stage.begin_attempt();
        stage.complete();
        assert!(stage.error.is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Drive a stage the way the per-item loop does: each round begins an
        /// attempt and either completes or fails, and terminal stages are
        /// skipped. `rounds` scripts the outcome of each attempt.
        fn drive(rounds: &[bool], max_retries: u32) -> StageProgress {
            let mut stage = StageProgress::new();
            for succeed in rounds {
                if stage.is_terminal() {
                    break;
                }
                stage.begin_attempt();
                if *succeed {
                    stage.complete();
                } else {
                    stage.fail("scripted failure", max_retries);
                }
            }
            stage
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// The attempt counter never exceeds the retry ceiling.
            #[test]
            fn attempts_bounded_by_ceiling(
                rounds in proptest::collection::vec(any::<bool>(), 0..16),
                max_retries in 1u32..5,
            ) {
                let stage = drive(&rounds, max_retries);
                prop_assert!(stage.attempts <= max_retries);
            }

            /// Running more driver rounds never shrinks the attempt counter.
            #[test]
            fn attempts_never_decrease(
                rounds in proptest::collection::vec(any::<bool>(), 0..16),
                cut in 0usize..16,
                max_retries in 1u32..5,
            ) {
                let cut = cut.min(rounds.len());
                let earlier = drive(&rounds[..cut], max_retries);
                let later = drive(&rounds, max_retries);
                prop_assert!(later.attempts >= earlier.attempts);
            }

            /// A stage is `failed` iff it burned exactly the full budget
            /// without a success.
            #[test]
            fn failed_means_budget_exhausted(
                rounds in proptest::collection::vec(any::<bool>(), 0..16),
                max_retries in 1u32..5,
            ) {
                let stage = drive(&rounds, max_retries);
                if stage.status == StageStatus::Failed {
                    prop_assert_eq!(stage.attempts, max_retries);
                    prop_assert!(stage.error.is_some());
                }
            }

            /// Completion implies a timestamp and no lingering error text.
            #[test]
            fn completed_is_clean(
                rounds in proptest::collection::vec(any::<bool>(), 0..16),
                max_retries in 1u32..5,
            ) {
                let stage = drive(&rounds, max_retries);
                if stage.status == StageStatus::Completed {
                    prop_assert!(stage.completed_at.is_some());
                    prop_assert!(stage.error.is_none());
                }
            }

            /// Once terminal, further driver rounds change nothing.
            #[test]
            fn terminal_states_are_stable(
                rounds in proptest::collection::vec(any::<bool>(), 1..16),
                extra in proptest::collection::vec(any::<bool>(), 1..8),
                max_retries in 1u32..5,
            ) {
                let stage = drive(&rounds, max_retries);
                if stage.is_terminal() {
                    let mut all = rounds.clone();
                    all.extend_from_slice(&extra);
                    let redriven = drive(&all, max_retries);
                    prop_assert_eq!(redriven.status, stage.status);
                    prop_assert_eq!(redriven.attempts, stage.attempts);
                }
            }
        }
    }
}

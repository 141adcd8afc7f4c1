//! `jobforge-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the run lifecycle, the per-item stage state machine, and the entities the
//! pipeline persists.

pub mod artifact;
pub mod entity;
pub mod error;
pub mod id;
pub mod matched_job;
pub mod posting;
pub mod profile;
pub mod run;
pub mod stage;

pub use artifact::{Artifact, Research};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{ArtifactId, MatchedJobId, PostingId, ProfileId, ResearchId, RunId, SearchId};
pub use matched_job::MatchedJob;
pub use posting::{JobSearch, Posting};
pub use profile::Profile;
pub use run::{Run, RunCounter, RunStatus};
pub use stage::{FailOutcome, StageKind, StageProgress, StageStatus};

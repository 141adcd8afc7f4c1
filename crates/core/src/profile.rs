//! User profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::ProfileId;

/// A structured user profile.
///
/// Name and email are profile *content*: the profiling workflow reuses an
/// existing profile when both match, and delivery addresses the email. They
/// are not identity keys; `ProfileId` is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub email: String,
    /// Structured profile text produced by the generation provider.
    pub profile_text: String,
    pub reference_links: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        profile_text: impl Into<String>,
        reference_links: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProfileId::new(),
            name: name.into(),
            email: email.into(),
            profile_text: profile_text.into(),
            reference_links,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        }
    }

    pub fn touch_last_used(&mut self) {
        let now = Utc::now();
        self.last_used_at = Some(now);
        self.updated_at = now;
    }
}

impl Entity for Profile {
    type Id = ProfileId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

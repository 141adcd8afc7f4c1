//! `jobforge-store` — persistence boundary for the pipeline entities.
//!
//! Per-entity async store traits, an in-memory implementation for tests/dev,
//! and a Postgres implementation on sqlx. The traits carry the contract
//! points the engine leans on: `complete_once` (at most one completed write
//! per run), `mark_delivery_triggered` (one-shot flag), `bump_counter`
//! (first-transition counters), and posting upsert by provider identity.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

use std::sync::Arc;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    ArtifactStore, MatchedJobStore, PostingStore, ProfileStore, ResearchStore, RunStore,
    SearchStore,
};

/// The full store bundle a workflow works against.
///
/// Cloning is cheap (trait-object handles); the in-memory constructor backs
/// every field with one shared [`InMemoryStore`].
#[derive(Clone)]
pub struct StoreSet {
    pub runs: Arc<dyn RunStore>,
    pub searches: Arc<dyn SearchStore>,
    pub postings: Arc<dyn PostingStore>,
    pub matches: Arc<dyn MatchedJobStore>,
    pub research: Arc<dyn ResearchStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl StoreSet {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::from_shared(store)
    }

    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self::from_shared(store)
    }

    fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: RunStore
            + SearchStore
            + PostingStore
            + MatchedJobStore
            + ResearchStore
            + ArtifactStore
            + ProfileStore
            + 'static,
    {
        Self {
            runs: store.clone(),
            searches: store.clone(),
            postings: store.clone(),
            matches: store.clone(),
            research: store.clone(),
            artifacts: store.clone(),
            profiles: store,
        }
    }
}

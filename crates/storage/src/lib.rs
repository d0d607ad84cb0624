pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

use std::sync::Arc;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    Generation, OverrideKind, OverrideStore, PostCatalog, PostOverrides, RebuildTarget,
    Relationship, RelationshipIndex, RuleStore,
};

/// The four stores the engine works against, as shared trait objects.
///
/// Tests swap individual members (for example a failing relationship index)
/// while the rest stay on the same backend.
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub index: Arc<dyn RelationshipIndex>,
    pub overrides: Arc<dyn OverrideStore>,
    pub posts: Arc<dyn PostCatalog>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RuleStore + RelationshipIndex + OverrideStore + PostCatalog + 'static,
    {
        Self {
            rules: backend.clone(),
            index: backend.clone(),
            overrides: backend.clone(),
            posts: backend,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn RelationshipIndex>) -> Self {
        self.index = index;
        self
    }
}

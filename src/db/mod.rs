//! Document database access
//!
//! The services depend on the [`DocumentStore`] contract only. [`MemoryStore`]
//! is the bundled implementation; any driver speaking the same vocabulary can
//! be wrapped in a [`Database`].

pub mod memory;
pub mod object_id;
pub mod pipeline;
pub mod query;
pub mod store;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use object_id::{InvalidObjectId, ObjectId};
pub use pipeline::{Accumulator, Expr, Stage};
pub use query::{Condition, Filter, FindOptions, SortDirection, SortKey, Update};
pub use store::{Document, DocumentStore, StoreError, StoreResult};

/// Database wrapper providing shared store access
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Wrap an existing store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create a database backed by a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Get the underlying store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}

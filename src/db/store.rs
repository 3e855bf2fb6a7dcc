//! Persistence driver contract
//!
//! Services talk to the document database only through [`DocumentStore`].
//! Every method is a suspension point; failures surface as [`StoreError`] and
//! are propagated to callers without retries.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::pipeline::Stage;
use super::query::{Filter, FindOptions, SortKey, Update};

/// A stored record: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a persistence driver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents matching `options.filter`, sorted, skipped and limited.
    async fn find(&self, collection: &str, options: &FindOptions) -> StoreResult<Vec<Document>>;

    /// First document matching `filter` under `sort` (insertion order when empty).
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[SortKey],
    ) -> StoreResult<Option<Document>>;

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Insert a document, assigning `_id` when absent. Returns the stored document.
    async fn insert(&self, collection: &str, doc: Document) -> StoreResult<Document>;

    /// Apply `update` to the first matching document, or to all of them when
    /// `multi` is set. Returns the number of matched documents.
    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> StoreResult<u64>;

    /// Remove the first matching document and return it.
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Option<Document>>;

    /// Run an aggregation pipeline rooted at `collection`.
    async fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> StoreResult<Vec<Document>>;
}

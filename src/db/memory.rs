//! In-memory document store
//!
//! Backs the services in tests and in the reporting binary. Collections are
//! kept in insertion order behind an async `RwLock`; every operation holds the
//! lock only for its own duration, so per-document atomicity is the only
//! consistency guarantee, as with a real document database.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::ObjectId;
use super::pipeline::{self, Stage};
use super::query::{Filter, FindOptions, SortKey, Update, compare_documents};
use super::store::{Document, DocumentStore, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection, in insertion order.
    pub async fn dump(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn select(docs: &[Document], filter: &Filter, sort: &[SortKey]) -> StoreResult<Vec<Document>> {
    let compiled = filter.compile()?;
    let mut out: Vec<Document> = docs.iter().filter(|d| compiled.matches(d)).cloned().collect();
    if !sort.is_empty() {
        // Stable sort keeps insertion order between equal keys.
        out.sort_by(|a, b| compare_documents(a, b, sort));
    }
    Ok(out)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, options: &FindOptions) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let docs = guard.get(collection).map(Vec::as_slice).unwrap_or_default();
        let selected = select(docs, &options.filter, &options.sort)?;
        let page = selected.into_iter().skip(options.skip as usize);
        Ok(match options.limit {
            Some(limit) => page.take(limit as usize).collect(),
            None => page.collect(),
        })
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &[SortKey],
    ) -> StoreResult<Option<Document>> {
        let guard = self.collections.read().await;
        let docs = guard.get(collection).map(Vec::as_slice).unwrap_or_default();
        Ok(select(docs, filter, sort)?.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let compiled = filter.compile()?;
        let guard = self.collections.read().await;
        Ok(guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| compiled.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, collection: &str, mut doc: Document) -> StoreResult<Document> {
        let id = match doc.get("_id") {
            None | Some(Value::Null) => ObjectId::new().to_string(),
            Some(Value::String(id)) => id.clone(),
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "_id must be a string, got {other}"
                )));
            }
        };

        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get("_id").and_then(Value::as_str) == Some(id.as_str())) {
            return Err(StoreError::InvalidDocument(format!(
                "duplicate _id {id} in {collection}"
            )));
        }

        doc.insert("_id".to_string(), Value::String(id));
        docs.push(doc.clone());
        tracing::trace!(collection, "Inserted document");
        Ok(doc)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> StoreResult<u64> {
        let compiled = filter.compile()?;
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(0);
        };

        let mut matched = 0;
        for doc in docs.iter_mut().filter(|d| compiled.matches(d)) {
            update.apply(doc);
            matched += 1;
            if !multi {
                break;
            }
        }
        tracing::trace!(collection, matched, "Updated documents");
        Ok(matched)
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Option<Document>> {
        let compiled = filter.compile()?;
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(None);
        };
        Ok(docs
            .iter()
            .position(|d| compiled.matches(d))
            .map(|index| docs.remove(index)))
    }

    async fn aggregate(&self, collection: &str, stages: &[Stage]) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().await;
        let root = guard.get(collection).cloned().unwrap_or_default();
        pipeline::run(root, stages, |from| guard.get(from).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_valid_id() {
        let store = MemoryStore::new();
        let stored = store.insert("member", doc(json!({"name": "Alpha"}))).await.unwrap();
        let id = stored["_id"].as_str().unwrap();
        assert!(ObjectId::is_valid(id));
        assert_eq!(store.count("member", &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryStore::new();
        store.insert("c", doc(json!({"_id": "x"}))).await.unwrap();
        let err = store.insert("c", doc(json!({"_id": "x"}))).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_update_single_vs_multi() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.insert("c", doc(json!({"flag": true}))).await.unwrap();
        }
        let update = Update::new().set("flag", false);
        let one = store.update("c", &Filter::eq("flag", true), &update, false).await.unwrap();
        assert_eq!(one, 1);
        let rest = store.update("c", &Filter::eq("flag", true), &update, true).await.unwrap();
        assert_eq!(rest, 2);
    }

    #[tokio::test]
    async fn test_find_paging() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store.insert("c", doc(json!({"n": n}))).await.unwrap();
        }
        let options = FindOptions {
            sort: vec![SortKey::desc("n")],
            skip: 1,
            limit: Some(2),
            ..Default::default()
        };
        let page = store.find("c", &options).await.unwrap();
        let ns: Vec<_> = page.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(ns, vec![json!(3), json!(2)]);
    }

    #[tokio::test]
    async fn test_find_one_and_delete_missing_is_none() {
        let store = MemoryStore::new();
        let gone = store.find_one_and_delete("c", &Filter::id("nope")).await.unwrap();
        assert!(gone.is_none());
    }
}

//! Generic record service
//!
//! One [`RecordService`] per entity combines filter translation, population,
//! relation writes, search and cascade cleanup behind the operations the
//! request layer calls.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::associations::{Associations, split_payload};
use super::cascade::RelationCascade;
use super::error::{ServiceError, ServiceResult};
use super::filters::{FilterTranslator, Params, coerce};
use super::search;
use crate::db::{Database, Document, Filter, FindOptions, Update};
use crate::schema::{AttributeKind, EntitySchema, SchemaRegistry};

#[derive(Clone, Debug)]
pub struct RecordService {
    db: Database,
    registry: Arc<SchemaRegistry>,
    schema: Arc<EntitySchema>,
    translator: FilterTranslator,
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl RecordService {
    pub fn new(
        db: Database,
        registry: Arc<SchemaRegistry>,
        entity: &str,
        translator: FilterTranslator,
    ) -> ServiceResult<Self> {
        let schema = registry
            .get(entity)
            .cloned()
            .ok_or_else(|| ServiceError::validation(format!("unknown entity `{entity}`")))?;
        Ok(Self {
            db,
            registry,
            schema,
            translator,
        })
    }

    fn collection(&self) -> &str {
        &self.schema.collection
    }

    fn associations(&self) -> Associations<'_> {
        Associations::new(self.db.store().as_ref(), &self.registry, &self.schema)
    }

    /// Equality filter over the identifying fields present in `params`
    /// (identifier, bookkeeping and declared attributes). Other keys are ignored.
    fn selector(&self, params: &Params) -> ServiceResult<Filter> {
        let mut filter = Filter::All;
        let mut picked = 0;
        for (key, value) in params {
            let field = if key == "id" { "_id" } else { key.as_str() };
            let kind = self.schema.attribute_kind(field);
            if kind.is_none() && !matches!(field, "_id" | "createdAt" | "updatedAt") {
                continue;
            }
            filter = filter.and(Filter::eq(field, coerce(field, kind, value)?));
            picked += 1;
        }

        if picked == 0 {
            return Err(ServiceError::validation(format!(
                "no identifying fields given for {}",
                self.schema.name
            )));
        }
        Ok(filter)
    }

    /// Cast declared scalar attributes to their kinds and drop caller-supplied
    /// identifiers and timestamps.
    fn normalize(&self, scalars: Document) -> ServiceResult<Document> {
        let mut out = Document::new();
        for (key, value) in scalars {
            if matches!(key.as_str(), "_id" | "id" | "createdAt" | "updatedAt") {
                continue;
            }
            let value = match self.schema.attribute_kind(&key) {
                Some(AttributeKind::Json) | None => value,
                Some(kind) => coerce(&key, Some(kind), &value)?,
            };
            out.insert(key, value);
        }
        Ok(out)
    }

    async fn fetch_by_id(&self, id: &str) -> ServiceResult<Option<Document>> {
        let found = self
            .db
            .store()
            .find_one(self.collection(), &Filter::id(id), &[])
            .await?;
        match found {
            Some(doc) => Ok(Some(self.associations().populate(doc).await?)),
            None => Ok(None),
        }
    }

    /// Page of records matching the translated filters, populated.
    pub async fn fetch_all(&self, params: &Params) -> ServiceResult<Vec<Document>> {
        let descriptor = self.translator.translate(&self.schema, params)?;
        let docs = self
            .db
            .store()
            .find(self.collection(), &descriptor.find_options())
            .await?;
        self.associations().populate_all(docs).await
    }

    /// Single record matching the identifying fields in `params`, populated.
    /// A missing record is `Ok(None)`.
    pub async fn fetch(&self, params: &Params) -> ServiceResult<Option<Document>> {
        let filter = self.selector(params)?;
        let found = self.db.store().find_one(self.collection(), &filter, &[]).await?;
        match found {
            Some(doc) => Ok(Some(self.associations().populate(doc).await?)),
            None => Ok(None),
        }
    }

    /// Number of records matching the translated filters; pagination is ignored.
    pub async fn count(&self, params: &Params) -> ServiceResult<u64> {
        let descriptor = self.translator.translate(&self.schema, params)?;
        Ok(self
            .db
            .store()
            .count(self.collection(), &descriptor.where_clause)
            .await?)
    }

    /// Create a record: scalars first, then relation writes keyed by the new id.
    pub async fn add(&self, payload: Document) -> ServiceResult<Document> {
        let (scalars, relations) = split_payload(&self.schema, payload);
        let mut data = self.normalize(scalars)?;
        let stamp = now();
        data.insert("createdAt".to_string(), stamp.clone());
        data.insert("updatedAt".to_string(), stamp);

        let entry = self.db.store().insert(self.collection(), data).await?;
        let id = entry
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::db::StoreError::InvalidDocument("insert returned no _id".into()))?;

        self.associations().update_relations(&id, &relations).await?;
        info!(entity = %self.schema.name, id = %id, "Created record");

        self.fetch_by_id(&id).await?.ok_or_else(|| ServiceError::NotFound {
            entity: self.schema.name.clone(),
            id,
        })
    }

    /// Update the record selected by `params`: scalars first, then relations.
    pub async fn edit(&self, params: &Params, payload: Document) -> ServiceResult<Document> {
        let filter = self.selector(params)?;
        let target = self.db.store().find_one(self.collection(), &filter, &[]).await?;
        let Some(id) = target
            .as_ref()
            .and_then(|doc| doc.get("_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Err(ServiceError::NotFound {
                entity: self.schema.name.clone(),
                id: describe(params),
            });
        };

        let (scalars, relations) = split_payload(&self.schema, payload);
        let data = self.normalize(scalars)?;
        let update = Update::new().set_all(data).set("updatedAt", now());
        self.db
            .store()
            .update(self.collection(), &Filter::id(&id), &update, false)
            .await?;

        self.associations().update_relations(&id, &relations).await?;
        info!(entity = %self.schema.name, id = %id, "Updated record");

        self.fetch_by_id(&id).await?.ok_or_else(|| ServiceError::NotFound {
            entity: self.schema.name.clone(),
            id,
        })
    }

    /// Delete the selected record and clear references to it. Returns the
    /// deleted record, populated, or `Ok(None)` when nothing matched.
    pub async fn remove(&self, params: &Params) -> ServiceResult<Option<Document>> {
        let filter = self.selector(params)?;
        let Some(deleted) = self
            .db
            .store()
            .find_one_and_delete(self.collection(), &filter)
            .await?
        else {
            debug!(entity = %self.schema.name, "Nothing to remove");
            return Ok(None);
        };

        let id = deleted
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::db::StoreError::InvalidDocument("deleted record has no _id".into()))?;

        // The delete has committed, so the cascade runs even if population fails.
        let populated = self.associations().populate(deleted).await;
        let cascaded = RelationCascade::new(self.db.store().as_ref(), &self.registry)
            .cascade_delete(&self.schema, &id)
            .await;
        let populated = populated?;
        cascaded?;

        info!(entity = %self.schema.name, id = %id, "Removed record");
        Ok(Some(populated))
    }

    /// Free-text search over `_q` with translated sort and pagination.
    pub async fn search(&self, params: &Params) -> ServiceResult<Vec<Document>> {
        let term = match params.get("_q") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let descriptor = self.translator.translate(&self.schema, params)?;
        let filter = search::compile(&self.schema, &term);
        if filter.matches_nothing() {
            debug!(entity = %self.schema.name, term = %term, "Search term matches no attribute");
            return Ok(Vec::new());
        }

        let options = FindOptions {
            filter,
            ..descriptor.find_options()
        };
        let docs = self.db.store().find(self.collection(), &options).await?;
        self.associations().populate_all(docs).await
    }

    /// Search when `_q` is present and non-empty, otherwise list.
    pub async fn find(&self, params: &Params) -> ServiceResult<Vec<Document>> {
        match params.get("_q") {
            Some(Value::String(s)) if !s.is_empty() => self.search(params).await,
            Some(Value::Null) | None | Some(Value::String(_)) => self.fetch_all(params).await,
            Some(_) => self.search(params).await,
        }
    }
}

fn describe(params: &Params) -> String {
    params
        .get("_id")
        .or_else(|| params.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Value::Object(params.clone()).to_string())
}

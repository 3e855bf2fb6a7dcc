//! Association handling: payload splitting, population and relation writes

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{ServiceError, ServiceResult};
use crate::db::{Condition, Document, DocumentStore, Filter, FindOptions, ObjectId, Update};
use crate::schema::{Association, EntitySchema, RelationNature, SchemaRegistry};

/// Aliases eager-loaded on read, in declaration order.
pub fn population_fields(schema: &EntitySchema) -> Vec<&str> {
    schema
        .associations
        .iter()
        .filter(|a| a.auto_populate)
        .map(|a| a.alias.as_str())
        .collect()
}

/// Partition a write payload into `(scalar_fields, relation_fields)`.
///
/// Keys matching a declared association alias are relational; everything
/// else, including undeclared keys, is scalar.
pub fn split_payload(schema: &EntitySchema, payload: Document) -> (Document, Document) {
    let mut scalars = Document::new();
    let mut relations = Document::new();
    for (key, value) in payload {
        if schema.find_association(&key).is_some() {
            relations.insert(key, value);
        } else {
            scalars.insert(key, value);
        }
    }
    (scalars, relations)
}

/// Extract referenced identifiers from a relation value: an id, an object
/// carrying `_id`/`id`, an array of those, or null.
pub fn relation_ids(alias: &str, value: &Value) -> ServiceResult<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| single_id(alias, item))
            .collect::<ServiceResult<Vec<_>>>()
            .map(|ids| ids.into_iter().flatten().collect()),
        other => Ok(single_id(alias, other)?.into_iter().collect()),
    }
}

fn single_id(alias: &str, value: &Value) -> ServiceResult<Option<String>> {
    let raw = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s.as_str(),
        Value::Object(obj) => match obj.get("_id").or_else(|| obj.get("id")) {
            Some(Value::String(s)) => s.as_str(),
            _ => {
                return Err(ServiceError::validation(format!(
                    "relation `{alias}` object is missing an identifier"
                )));
            }
        },
        other => {
            return Err(ServiceError::validation(format!(
                "relation `{alias}` cannot reference {other}"
            )));
        }
    };

    raw.parse::<ObjectId>()
        .map(|id| Some(id.to_string()))
        .map_err(|e| ServiceError::validation(e.to_string()))
}

fn record_id(doc: &Document) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

fn id_values(ids: &[String]) -> Vec<Value> {
    ids.iter().cloned().map(Value::String).collect()
}

/// Reads and writes association data on behalf of one entity.
pub struct Associations<'a> {
    store: &'a dyn DocumentStore,
    registry: &'a SchemaRegistry,
    schema: &'a EntitySchema,
}

impl<'a> Associations<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        registry: &'a SchemaRegistry,
        schema: &'a EntitySchema,
    ) -> Self {
        Self {
            store,
            registry,
            schema,
        }
    }

    fn target_collection(&self, association: &Association) -> Option<&'a str> {
        let target = self.registry.get(&association.target).map(|s| s.collection.as_str());
        if target.is_none() {
            warn!(
                entity = %self.schema.name,
                alias = %association.alias,
                target = %association.target,
                "Association target is not registered"
            );
        }
        target
    }

    /// Replace references with the referenced documents for every
    /// auto-populated association.
    pub async fn populate(&self, mut doc: Document) -> ServiceResult<Document> {
        let aliases = population_fields(self.schema);
        let loaded = try_join_all(
            self.schema
                .associations
                .iter()
                .filter(|a| aliases.contains(&a.alias.as_str()))
                .map(|a| self.load(a, &doc)),
        )
        .await?;

        for (alias, value) in loaded.into_iter().flatten() {
            doc.insert(alias, value);
        }
        Ok(doc)
    }

    pub async fn populate_all(&self, docs: Vec<Document>) -> ServiceResult<Vec<Document>> {
        try_join_all(docs.into_iter().map(|doc| self.populate(doc))).await
    }

    async fn load(
        &self,
        association: &Association,
        doc: &Document,
    ) -> ServiceResult<Option<(String, Value)>> {
        let Some(collection) = self.target_collection(association) else {
            return Ok(None);
        };
        let alias = association.alias.clone();

        if !association.nature.stored_locally() {
            let (Some(via), Some(id)) = (association.via.as_deref(), record_id(doc)) else {
                return Ok(None);
            };
            let related = self
                .store
                .find(collection, &FindOptions::filter(Filter::eq(via, id)))
                .await?;
            return Ok(Some((alias, Value::Array(related.into_iter().map(Value::Object).collect()))));
        }

        let stored = doc.get(&association.alias).cloned().unwrap_or(Value::Null);
        let ids = relation_ids(&association.alias, &stored).unwrap_or_default();

        let value = if association.nature.is_many() {
            let related = if ids.is_empty() {
                Vec::new()
            } else {
                let filter = Filter::field("_id", Condition::In(id_values(&ids)));
                self.store.find(collection, &FindOptions::filter(filter)).await?
            };
            Value::Array(related.into_iter().map(Value::Object).collect())
        } else {
            match ids.first() {
                Some(id) => self
                    .store
                    .find_one(collection, &Filter::id(id), &[])
                    .await?
                    .map_or(Value::Null, Value::Object),
                None => Value::Null,
            }
        };
        Ok(Some((alias, value)))
    }

    /// Apply relational payload fields for record `id`.
    pub async fn update_relations(&self, id: &str, relations: &Document) -> ServiceResult<()> {
        let mut own = Update::new();

        for (alias, value) in relations {
            let Some(association) = self.schema.find_association(alias) else {
                continue;
            };
            let ids = relation_ids(alias, value)?;
            if !association.nature.is_many() && ids.len() > 1 {
                return Err(ServiceError::validation(format!(
                    "relation `{alias}` accepts a single reference"
                )));
            }
            debug!(entity = %self.schema.name, id, alias = %alias, nature = %association.nature, "Updating relation");

            let single = ids.first().map_or(Value::Null, |t| Value::String(t.clone()));
            match association.nature {
                RelationNature::OneWay | RelationNature::ManyToOne => {
                    own = own.set(alias.clone(), single);
                }
                RelationNature::ManyWay => {
                    own = own.set(alias.clone(), Value::Array(id_values(&ids)));
                }
                RelationNature::OneToOne => {
                    own = own.set(alias.clone(), single);
                    self.sync_one_to_one(association, id, ids.first()).await?;
                }
                RelationNature::OneToMany => {
                    self.sync_one_to_many(association, id, &ids).await?;
                }
                RelationNature::ManyToMany => {
                    own = own.set(alias.clone(), Value::Array(id_values(&ids)));
                    self.sync_many_to_many(association, id, &ids).await?;
                }
            }
        }

        if !own.is_empty() {
            self.store
                .update(&self.schema.collection, &Filter::id(id), &own, false)
                .await?;
        }
        Ok(())
    }

    async fn sync_one_to_one(
        &self,
        association: &Association,
        id: &str,
        partner: Option<&String>,
    ) -> ServiceResult<()> {
        let (Some(collection), Some(via)) = (self.target_collection(association), association.via.as_deref()) else {
            return Ok(());
        };

        // Detach the previous partner of this record.
        self.store
            .update(collection, &Filter::eq(via, id), &Update::new().set(via, Value::Null), true)
            .await?;

        if let Some(partner) = partner {
            // The new partner may have been linked to another record of ours.
            let others = Filter::eq(association.alias.as_str(), partner.as_str())
                .and(Filter::field("_id", Condition::Ne(Value::String(id.to_string()))));
            self.store
                .update(
                    &self.schema.collection,
                    &others,
                    &Update::new().set(association.alias.clone(), Value::Null),
                    true,
                )
                .await?;
            self.store
                .update(collection, &Filter::id(partner), &Update::new().set(via, id), false)
                .await?;
        }
        Ok(())
    }

    async fn sync_one_to_many(
        &self,
        association: &Association,
        id: &str,
        ids: &[String],
    ) -> ServiceResult<()> {
        let (Some(collection), Some(via)) = (self.target_collection(association), association.via.as_deref()) else {
            return Ok(());
        };

        let dropped = Filter::eq(via, id).and(Filter::field("_id", Condition::Nin(id_values(ids))));
        self.store
            .update(collection, &dropped, &Update::new().set(via, Value::Null), true)
            .await?;

        if !ids.is_empty() {
            let listed = Filter::field("_id", Condition::In(id_values(ids)));
            self.store
                .update(collection, &listed, &Update::new().set(via, id), true)
                .await?;
        }
        Ok(())
    }

    async fn sync_many_to_many(
        &self,
        association: &Association,
        id: &str,
        ids: &[String],
    ) -> ServiceResult<()> {
        let (Some(collection), Some(via)) = (self.target_collection(association), association.via.as_deref()) else {
            return Ok(());
        };

        let dropped = Filter::eq(via, id).and(Filter::field("_id", Condition::Nin(id_values(ids))));
        self.store
            .update(collection, &dropped, &Update::new().pull(via, id), true)
            .await?;

        if !ids.is_empty() {
            let listed = Filter::field("_id", Condition::In(id_values(ids)));
            self.store
                .update(collection, &listed, &Update::new().add_to_set(via, id), true)
                .await?;
        }
        Ok(())
    }
}

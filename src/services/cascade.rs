//! Back-reference cleanup after a delete
//!
//! The store has no foreign keys, so removing a record leaves dangling
//! references in every collection that points at it. For each association of
//! the deleted entity the matching back-reference field on the target is
//! nulled (single-valued natures) or has the id pulled out (list natures).
//!
//! Cleanup writes run concurrently and are all awaited; the first failure is
//! reported once every write has settled. Writes that already succeeded are
//! not rolled back.

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::ServiceResult;
use crate::db::{Condition, DocumentStore, Filter, Update};
use crate::schema::{Association, EntitySchema, SchemaRegistry};

/// One cleanup write derived from an association.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupWrite {
    pub collection: String,
    pub filter: Filter,
    pub update: Update,
}

/// Summary of a finished cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Number of cleanup writes issued.
    pub writes: usize,
    /// Number of referencing documents touched.
    pub touched: u64,
}

pub struct RelationCascade<'a> {
    store: &'a dyn DocumentStore,
    registry: &'a SchemaRegistry,
}

impl<'a> RelationCascade<'a> {
    pub fn new(store: &'a dyn DocumentStore, registry: &'a SchemaRegistry) -> Self {
        Self { store, registry }
    }

    /// Cleanup writes needed after deleting `deleted_id` of `schema`.
    ///
    /// Associations without a back-reference, with an unregistered target, or
    /// whose back-reference is a virtual field on the target produce nothing.
    pub fn plan(&self, schema: &EntitySchema, deleted_id: &str) -> Vec<CleanupWrite> {
        schema
            .associations
            .iter()
            .filter_map(|association| self.plan_one(schema, association, deleted_id))
            .collect()
    }

    fn plan_one(
        &self,
        schema: &EntitySchema,
        association: &Association,
        deleted_id: &str,
    ) -> Option<CleanupWrite> {
        let via = association.via.as_deref()?;
        let Some(target) = self.registry.get(&association.target) else {
            warn!(entity = %schema.name, alias = %association.alias, "Skipping cascade to unregistered target");
            return None;
        };
        if target
            .find_association(via)
            .is_some_and(|back| !back.nature.stored_locally())
        {
            return None;
        }

        let id = Value::String(deleted_id.to_string());
        let (filter, update) = if association.nature.clears_by_null() {
            (Filter::eq(via, id), Update::new().set(via, Value::Null))
        } else {
            (
                Filter::field(via, Condition::In(vec![id.clone()])),
                Update::new().pull(via, id),
            )
        };

        Some(CleanupWrite {
            collection: target.collection.clone(),
            filter,
            update,
        })
    }

    /// Clear every reference to `deleted_id`.
    pub async fn cascade_delete(
        &self,
        schema: &EntitySchema,
        deleted_id: &str,
    ) -> ServiceResult<CascadeReport> {
        let writes = self.plan(schema, deleted_id);
        debug!(entity = %schema.name, id = deleted_id, writes = writes.len(), "Running cascade cleanup");

        let results = join_all(writes.iter().map(|write| async move {
            let outcome = self
                .store
                .update(&write.collection, &write.filter, &write.update, true)
                .await;
            if let Err(ref e) = outcome {
                warn!(
                    entity = %schema.name,
                    id = deleted_id,
                    collection = %write.collection,
                    error = %e,
                    "Cascade cleanup write failed"
                );
            }
            outcome
        }))
        .await;

        let mut report = CascadeReport {
            writes: writes.len(),
            touched: 0,
        };
        let mut first_error = None;
        for result in results {
            match result {
                Ok(n) => report.touched += n,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }

        info!(
            entity = %schema.name,
            id = deleted_id,
            touched = report.touched,
            "Cleared back-references"
        );
        Ok(report)
    }
}

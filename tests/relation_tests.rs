//! Integration tests for relation writes
//!
//! These tests drive `add` and `edit` over a small unit registry covering the
//! relation natures the member/rating schema does not use:
//! - One-to-one reassignment detaches the previous partner
//! - Many-to-many edits pull from dropped targets and add to listed ones
//! - One-way and many-way references are stored locally only

use std::sync::Arc;

use appraisal::db::{Database, Document, MemoryStore};
use appraisal::schema::{Association, AttributeKind, EntitySchema, RelationNature, SchemaRegistry};
use appraisal::services::{FilterTranslator, Params, RecordService};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(
            EntitySchema::new("unit")
                .attribute("name", AttributeKind::String)
                .association(Association::new("leader", RelationNature::OneToOne, "soldier").via("commands"))
                .association(Association::new("badges", RelationNature::ManyToMany, "badge").via("units"))
                .association(Association::new("banner", RelationNature::OneWay, "banner"))
                .association(Association::new("depots", RelationNature::ManyWay, "depot")),
        )
        .register(
            EntitySchema::new("soldier")
                .attribute("name", AttributeKind::String)
                .association(Association::new("commands", RelationNature::OneToOne, "unit").via("leader")),
        )
        .register(
            EntitySchema::new("badge")
                .attribute("title", AttributeKind::String)
                .association(Association::new("units", RelationNature::ManyToMany, "unit").via("badges")),
        )
        .register(EntitySchema::new("banner").attribute("title", AttributeKind::String))
        .register(EntitySchema::new("depot").attribute("title", AttributeKind::String))
}

struct Fixture {
    store: Arc<MemoryStore>,
    registry: Arc<SchemaRegistry>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            registry: Arc::new(registry()),
        }
    }

    fn service(&self, entity: &str) -> RecordService {
        RecordService::new(
            Database::new(self.store.clone()),
            self.registry.clone(),
            entity,
            FilterTranslator::default(),
        )
        .unwrap()
    }

    async fn add(&self, entity: &str, payload: Value) -> String {
        let doc = self.service(entity).add(params(payload)).await.unwrap();
        doc["_id"].as_str().unwrap().to_string()
    }

    /// Stored document, without population.
    async fn raw(&self, collection: &str, id: &str) -> Document {
        self.store
            .dump(collection)
            .await
            .into_iter()
            .find(|doc| doc["_id"] == json!(id))
            .unwrap()
    }
}

#[tokio::test]
async fn test_one_to_one_reassignment_detaches_previous_partner() {
    let fx = Fixture::new();
    let able = fx.add("soldier", json!({"name": "Able"})).await;
    let first = fx.add("unit", json!({"name": "First", "leader": &able})).await;

    assert_eq!(fx.raw("soldier", &able).await["commands"], json!(first));
    assert_eq!(fx.raw("unit", &first).await["leader"], json!(able));

    let second = fx.add("unit", json!({"name": "Second", "leader": {"_id": &able}})).await;

    assert_eq!(fx.raw("unit", &first).await["leader"], Value::Null);
    assert_eq!(fx.raw("unit", &second).await["leader"], json!(able));
    assert_eq!(fx.raw("soldier", &able).await["commands"], json!(second));
}

#[tokio::test]
async fn test_one_to_one_cleared_with_null() {
    let fx = Fixture::new();
    let able = fx.add("soldier", json!({"name": "Able"})).await;
    let unit = fx.add("unit", json!({"name": "First", "leader": &able})).await;

    fx.service("unit")
        .edit(&params(json!({"_id": &unit})), params(json!({"leader": null})))
        .await
        .unwrap();

    assert_eq!(fx.raw("unit", &unit).await["leader"], Value::Null);
    assert_eq!(fx.raw("soldier", &able).await["commands"], Value::Null);
}

#[tokio::test]
async fn test_many_to_many_edit_pulls_and_adds() {
    let fx = Fixture::new();
    let valor = fx.add("badge", json!({"title": "Valor"})).await;
    let merit = fx.add("badge", json!({"title": "Merit"})).await;
    let unit = fx.add("unit", json!({"name": "First", "badges": [&valor]})).await;

    assert_eq!(fx.raw("badge", &valor).await["units"], json!([&unit]));

    fx.service("unit")
        .edit(&params(json!({"_id": &unit})), params(json!({"badges": [&merit]})))
        .await
        .unwrap();

    assert_eq!(fx.raw("unit", &unit).await["badges"], json!([&merit]));
    assert_eq!(fx.raw("badge", &valor).await["units"], json!([]));
    assert_eq!(fx.raw("badge", &merit).await["units"], json!([&unit]));
}

#[tokio::test]
async fn test_many_to_many_add_to_set_is_idempotent() {
    let fx = Fixture::new();
    let valor = fx.add("badge", json!({"title": "Valor"})).await;
    let unit = fx.add("unit", json!({"name": "First", "badges": [&valor]})).await;

    fx.service("unit")
        .edit(&params(json!({"_id": &unit})), params(json!({"badges": [&valor]})))
        .await
        .unwrap();

    assert_eq!(fx.raw("badge", &valor).await["units"], json!([&unit]));
}

#[tokio::test]
async fn test_one_way_and_many_way_store_locally_only() {
    let fx = Fixture::new();
    let banner = fx.add("banner", json!({"title": "Eagle"})).await;
    let north = fx.add("depot", json!({"title": "North"})).await;
    let south = fx.add("depot", json!({"title": "South"})).await;

    let unit = fx
        .add("unit", json!({"name": "First", "banner": &banner, "depots": [&north, {"id": &south}]}))
        .await;

    let stored = fx.raw("unit", &unit).await;
    assert_eq!(stored["banner"], json!(banner));
    assert_eq!(stored["depots"], json!([&north, &south]));

    fx.service("unit")
        .edit(&params(json!({"_id": &unit})), params(json!({"depots": [&south]})))
        .await
        .unwrap();
    assert_eq!(fx.raw("unit", &unit).await["depots"], json!([&south]));

    let banner_doc = fx.raw("banner", &banner).await;
    assert_eq!(banner_doc.len(), 4);
    for depot in [&north, &south] {
        assert_eq!(fx.raw("depot", depot).await.len(), 4);
    }
}

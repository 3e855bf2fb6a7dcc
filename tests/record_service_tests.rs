//! Integration tests for the record services
//!
//! These tests exercise the member and rating services over the in-memory
//! store:
//! - Create, fetch, edit and remove
//! - Population of associations on read
//! - Relation writes from either side of the member/rating relation
//! - Filtering, search and pagination

use appraisal::db::{Database, ObjectId};
use appraisal::schema::default_registry;
use appraisal::services::{
    Params, ServiceError, ServiceOptions, Services, UnknownFieldPolicy,
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn services() -> Services {
    Services::new(Database::in_memory(), default_registry(), &ServiceOptions::default()).unwrap()
}

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

fn id_of(doc: &Params) -> String {
    doc["_id"].as_str().unwrap().to_string()
}

// ============================================================================
// Create / fetch / edit / remove
// ============================================================================

mod crud {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_add_ignores_caller_identifier() {
        let services = services();
        let supplied = ObjectId::new().to_hex();
        let member = services
            .members
            .add(params(json!({"_id": &supplied, "name": "Alpha", "rank": "Sgt"})))
            .await
            .unwrap();

        assert_ne!(id_of(&member), supplied);
        assert!(ObjectId::is_valid(&id_of(&member)));
        assert_eq!(member["createdAt"], member["updatedAt"]);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_none_and_invalid_id_is_validation() {
        let services = services();
        let missing = params(json!({"_id": ObjectId::new().to_hex()}));
        assert_eq!(services.members.fetch(&missing).await.unwrap(), None);

        let err = services
            .members
            .fetch(&params(json!({"_id": "not-an-id"})))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Validation(_));
    }

    #[tokio::test]
    async fn test_edit_updates_scalars_and_keeps_created_at() {
        let services = services();
        let member = services.members.add(params(json!({"name": "Alpha"}))).await.unwrap();
        let id = id_of(&member);

        let edited = services
            .members
            .edit(&params(json!({"id": id})), params(json!({"name": "Alpha Prime", "createdAt": "x"})))
            .await
            .unwrap();

        assert_eq!(edited["name"], json!("Alpha Prime"));
        assert_eq!(edited["createdAt"], member["createdAt"]);
        assert_eq!(services.members.count(&Params::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_edit_missing_record_is_not_found() {
        let services = services();
        let missing = ObjectId::new().to_hex();
        let err = services
            .members
            .edit(&params(json!({"_id": &missing})), params(json!({"name": "Ghost"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::NotFound {
                entity: "member".into(),
                id: missing,
            }
        );
    }

    #[tokio::test]
    async fn test_remove_returns_deleted_record() {
        let services = services();
        let member = services.members.add(params(json!({"name": "Alpha"}))).await.unwrap();
        let selector = params(json!({"_id": id_of(&member)}));

        let removed = services.members.remove(&selector).await.unwrap().unwrap();
        assert_eq!(removed["name"], json!("Alpha"));
        assert_eq!(services.members.fetch(&selector).await.unwrap(), None);
        assert_eq!(services.members.remove(&selector).await.unwrap(), None);
    }
}

// ============================================================================
// Associations
// ============================================================================

mod associations {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_rating_populates_member_and_member_populates_ratings() {
        let services = services();
        let member = services.members.add(params(json!({"name": "Alpha"}))).await.unwrap();
        let member_id = id_of(&member);

        let rating = services
            .ratings
            .add(params(json!({"member": &member_id, "ratings": {"speed": 7}})))
            .await
            .unwrap();
        assert_eq!(rating["member"]["name"], json!("Alpha"));

        let fetched = services
            .members
            .fetch(&params(json!({"_id": member_id})))
            .await
            .unwrap()
            .unwrap();
        let ratings = fetched["ratings"].as_array().unwrap();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0]["_id"], rating["_id"]);
    }

    #[tokio::test]
    async fn test_member_side_write_reassigns_ratings() {
        let services = services();
        let first = services.ratings.add(params(json!({"ratings": {"speed": 5}}))).await.unwrap();
        let second = services.ratings.add(params(json!({"ratings": {"speed": 6}}))).await.unwrap();

        let member = services
            .members
            .add(params(json!({"name": "Alpha", "ratings": [id_of(&first), {"_id": id_of(&second)}]})))
            .await
            .unwrap();
        assert_eq!(member["ratings"].as_array().unwrap().len(), 2);

        let member_id = id_of(&member);
        let edited = services
            .members
            .edit(&params(json!({"_id": member_id})), params(json!({"ratings": [id_of(&first)]})))
            .await
            .unwrap();
        assert_eq!(edited["ratings"].as_array().unwrap().len(), 1);

        let dropped = services
            .ratings
            .fetch(&params(json!({"_id": id_of(&second)})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dropped["member"], Value::Null);
    }

    #[tokio::test]
    async fn test_single_relation_rejects_many_references() {
        let services = services();
        let a = ObjectId::new().to_hex();
        let b = ObjectId::new().to_hex();
        let err = services
            .ratings
            .add(params(json!({"member": [a, b]})))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Validation(_));
    }
}

// ============================================================================
// Filtering and search
// ============================================================================

mod listing {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn roster(services: &Services) {
        for (name, rank, phone) in [
            ("Alpha", "Sgt", "555-0101"),
            ("Bravo", "Cpl", "555-0102"),
            ("Charlie", "Sgt", "555-0199"),
        ] {
            services
                .members
                .add(params(json!({"name": name, "rank": rank, "phone": phone})))
                .await
                .unwrap();
        }
    }

    fn names(docs: &[Params]) -> Vec<&str> {
        docs.iter().map(|d| d["name"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_filter_sort_and_paginate() {
        let services = services();
        roster(&services).await;

        let sergeants = services
            .members
            .fetch_all(&params(json!({"rank": "Sgt", "_sort": "name:desc"})))
            .await
            .unwrap();
        assert_eq!(names(&sergeants), vec!["Charlie", "Alpha"]);

        let page = services
            .members
            .fetch_all(&params(json!({"_sort": "name:asc", "_start": 1, "_limit": 1})))
            .await
            .unwrap();
        assert_eq!(names(&page), vec!["Bravo"]);

        let count = services
            .members
            .count(&params(json!({"name_contains": "a", "_limit": 1})))
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_operator_suffixes() {
        let services = services();
        roster(&services).await;

        let others = services
            .members
            .fetch_all(&params(json!({"rank_ne": "Sgt"})))
            .await
            .unwrap();
        assert_eq!(names(&others), vec!["Bravo"]);

        let listed = services
            .members
            .fetch_all(&params(json!({"name_in": ["Alpha", "Charlie"], "_sort": "name"})))
            .await
            .unwrap();
        assert_eq!(names(&listed), vec!["Alpha", "Charlie"]);

        let sensitive = services
            .members
            .fetch_all(&params(json!({"name_containss": "alpha"})))
            .await
            .unwrap();
        assert!(sensitive.is_empty());
    }

    #[tokio::test]
    async fn test_search_through_find() {
        let services = services();
        roster(&services).await;

        let hits = services
            .members
            .find(&params(json!({"_q": "0199"})))
            .await
            .unwrap();
        assert_eq!(names(&hits), vec!["Charlie"]);

        let none = services
            .members
            .find(&params(json!({"_q": "zulu"})))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_fields_follow_policy() {
        let lenient = services();
        roster(&lenient).await;
        let all = lenient
            .members
            .fetch_all(&params(json!({"salary_gt": 10})))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let strict = Services::new(
            Database::in_memory(),
            default_registry(),
            &ServiceOptions {
                unknown_fields: UnknownFieldPolicy::Reject,
                ..ServiceOptions::default()
            },
        )
        .unwrap();
        let err = strict
            .members
            .fetch_all(&params(json!({"salary_gt": 10})))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Validation(_));
    }
}

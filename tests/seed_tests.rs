//! Integration tests for seed file loading

use std::io::Write;

use appraisal::db::Database;
use appraisal::schema::default_registry;
use appraisal::seed::{SeedResult, apply_seed, read_seed};
use appraisal::services::{Params, ServiceOptions, Services};
use pretty_assertions::assert_eq;

fn services() -> Services {
    Services::new(Database::in_memory(), default_registry(), &ServiceOptions::default()).unwrap()
}

fn seed_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_seed_by_index_feeds_rankings() {
    let file = seed_file(
        r#"{
            "members": [{"name": "Alpha"}, {"name": "Bravo"}],
            "ratings": [
                {"member": 0, "ratings": {"speed": 6, "quality": 8}},
                {"member": 0, "ratings": {"speed": 8, "quality": 8}},
                {"member": 1, "ratings": {"speed": 4, "quality": 6}}
            ]
        }"#,
    );

    let services = services();
    let seed = read_seed(file.path()).unwrap();
    let result = tokio_test::block_on(apply_seed(&services, seed)).unwrap();
    assert_eq!(result, SeedResult { members: 2, ratings: 3 });

    let rankings = tokio_test::block_on(services.rankings.compute_rankings(&Params::new())).unwrap();
    let summary: Vec<_> = rankings
        .iter()
        .map(|e| (e.field("name").and_then(|v| v.as_str()).unwrap_or_default(), e.average, e.count))
        .collect();
    assert_eq!(summary, vec![("Alpha", Some(7.5), 2), ("Bravo", Some(5.0), 1)]);
}

#[test]
fn test_seed_rejects_unknown_member_index() {
    let file = seed_file(r#"{"members": [], "ratings": [{"member": 3, "ratings": {"speed": 1}}]}"#);
    let seed = read_seed(file.path()).unwrap();
    let err = tokio_test::block_on(apply_seed(&services(), seed)).unwrap_err();
    assert!(err.to_string().contains("unknown member 3"));
}

#[test]
fn test_missing_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_seed(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read seed file"));

    let file = seed_file("{not json");
    let err = read_seed(file.path()).unwrap_err();
    assert!(err.to_string().contains("Invalid seed file"));
}

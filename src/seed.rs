//! Seed data loading.
//!
//! A seed file is a JSON object with `members` and `ratings` arrays. Ratings
//! point at their member either by id or by zero-based position in `members`.
//! Records go through the regular services, so timestamps and relation
//! writes are applied as for any other create.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::db::Document;
use crate::services::Services;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub members: Vec<Document>,
    #[serde(default)]
    pub ratings: Vec<Document>,
}

/// Result of running seed operations.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub members: usize,
    pub ratings: usize,
}

pub fn read_seed(path: &Path) -> Result<SeedFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid seed file {}", path.display()))
}

pub async fn apply_seed(services: &Services, seed: SeedFile) -> Result<SeedResult> {
    let mut member_ids = Vec::with_capacity(seed.members.len());
    for member in seed.members {
        let created = services.members.add(member).await.context("Failed to seed member")?;
        let id = created
            .get("_id")
            .and_then(Value::as_str)
            .context("Seeded member has no id")?;
        member_ids.push(id.to_string());
    }

    let mut result = SeedResult {
        members: member_ids.len(),
        ratings: 0,
    };

    for (position, mut rating) in seed.ratings.into_iter().enumerate() {
        if let Some(Value::Number(index)) = rating.get("member") {
            let Some(id) = index
                .as_u64()
                .and_then(|i| member_ids.get(i as usize))
            else {
                bail!("Rating {position} references unknown member {index}");
            };
            rating.insert("member".to_string(), Value::String(id.clone()));
        }
        services
            .ratings
            .add(rating)
            .await
            .with_context(|| format!("Failed to seed rating {position}"))?;
        result.ratings += 1;
    }

    info!(members = result.members, ratings = result.ratings, "Seed data loaded");
    Ok(result)
}

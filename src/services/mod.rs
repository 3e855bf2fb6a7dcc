//! Record services over the document store

pub mod associations;
pub mod cascade;
pub mod error;
pub mod filters;
pub mod ranking;
pub mod record;
pub mod search;

use std::sync::Arc;

pub use associations::{Associations, population_fields, split_payload};
pub use cascade::{CascadeReport, CleanupWrite, RelationCascade};
pub use error::{ServiceError, ServiceResult};
pub use filters::{FilterDescriptor, FilterTranslator, Params, UnknownFieldPolicy};
pub use ranking::{Criteria, CriteriaSource, RankingAggregator, RankingEntry, RankingOptions};
pub use record::RecordService;

use crate::db::Database;
use crate::schema::{MEMBER, RATING, SchemaRegistry};

/// Behavior switches handed to every service at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceOptions {
    pub unknown_fields: UnknownFieldPolicy,
    pub ranking: RankingOptions,
}

/// The member and rating services plus the leaderboard.
#[derive(Clone)]
pub struct Services {
    pub members: RecordService,
    pub ratings: RecordService,
    pub rankings: RankingAggregator,
}

impl Services {
    pub fn new(db: Database, registry: SchemaRegistry, options: &ServiceOptions) -> ServiceResult<Self> {
        let registry = Arc::new(registry);
        let translator = FilterTranslator::new(options.unknown_fields);

        Ok(Self {
            members: RecordService::new(db.clone(), registry.clone(), MEMBER, translator)?,
            ratings: RecordService::new(db.clone(), registry.clone(), RATING, translator)?,
            rankings: RankingAggregator::new(
                db,
                &registry,
                MEMBER,
                RATING,
                translator,
                options.ranking.clone(),
            )?,
        })
    }

    /// Criterion names rankings are currently computed over.
    pub async fn rating_criteria(&self) -> ServiceResult<Vec<String>> {
        Ok(self.rankings.criteria().await?.names)
    }
}

//! Member leaderboard
//!
//! Builds an aggregation pipeline rooted at the member collection:
//!
//! 1. optional case-insensitive name match
//! 2. join ratings by back-reference and unwind (members without ratings drop out)
//! 3. group per member: rating count and the mean of every criterion
//! 4. overall average = mean of the per-criterion means
//! 5. re-join the member record under `member` for its display fields
//! 6. sort (default: overall average, descending; ties by id) and paginate
//!
//! Criteria are either declared up front or discovered by sampling the most
//! recently created rating.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::debug;

use super::error::{ServiceError, ServiceResult};
use super::filters::{FilterTranslator, Params, UnknownFieldPolicy, parse_count, parse_sort_key};
use crate::db::{
    Accumulator, Condition, Database, Document, Expr, Filter, SortDirection, SortKey, Stage,
};
use crate::schema::{EntitySchema, SchemaRegistry};

/// Field holding criterion scores on a rating.
pub const SCORES_FIELD: &str = "ratings";

const JOINED_RATING: &str = "rating";
const JOINED_MEMBER: &str = "member";
const AVERAGE: &str = "average";
const COUNT: &str = "count";

/// Fields never treated as criteria when sampling. Besides these, the
/// back-reference and the computed row fields are skipped.
const BOOKKEEPING: &[&str] = &["_id", "id", "__v", "createdAt", "updatedAt"];

/// Where the criterion list comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CriteriaSource {
    /// Keys of the newest rating's score mapping.
    #[default]
    Sampled,
    Declared(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingOptions {
    pub default_limit: u64,
    pub criteria: CriteriaSource,
    /// Member field matched by the `search` parameter.
    pub search_field: String,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            default_limit: 10,
            criteria: CriteriaSource::Sampled,
            search_field: "name".to_string(),
        }
    }
}

/// The criteria a pipeline averages, and where their scores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria {
    pub names: Vec<String>,
    /// Scores live in the rating's score mapping rather than at top level.
    pub nested: bool,
}

impl Criteria {
    fn score_path(&self, name: &str) -> String {
        if self.nested {
            format!("{JOINED_RATING}.{SCORES_FIELD}.{name}")
        } else {
            format!("{JOINED_RATING}.{name}")
        }
    }
}

/// Parsed ranking request.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingQuery {
    pub search: Option<String>,
    pub sort: SortKey,
    pub start: u64,
    pub limit: Option<u64>,
}

/// One leaderboard row.
///
/// Serializes flat. A criterion sharing its name with a member display field
/// is shadowed by the display field in the serialized row but stays
/// available through [`RankingEntry::criterion`].
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub id: String,
    /// Display fields from the member record.
    pub member: Document,
    /// Per-criterion averages.
    pub criteria: BTreeMap<String, Option<f64>>,
    pub average: Option<f64>,
    pub count: u64,
}

impl Serialize for RankingEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("_id", &self.id)?;
        for (name, value) in &self.member {
            map.serialize_entry(name, value)?;
        }
        for (name, value) in &self.criteria {
            if !self.member.contains_key(name) {
                map.serialize_entry(name, value)?;
            }
        }
        map.serialize_entry(AVERAGE, &self.average)?;
        map.serialize_entry(COUNT, &self.count)?;
        map.end()
    }
}

impl RankingEntry {
    pub fn criterion(&self, name: &str) -> Option<f64> {
        self.criteria.get(name).copied().flatten()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.member.get(name)
    }
}

#[derive(Clone, Debug)]
pub struct RankingAggregator {
    db: Database,
    member: EntitySchema,
    rating: EntitySchema,
    /// Back-reference field on ratings pointing at the member.
    via: String,
    translator: FilterTranslator,
    options: RankingOptions,
}

impl RankingAggregator {
    pub fn new(
        db: Database,
        registry: &SchemaRegistry,
        member: &str,
        rating: &str,
        translator: FilterTranslator,
        options: RankingOptions,
    ) -> ServiceResult<Self> {
        let lookup = |name: &str| {
            registry
                .get(name)
                .map(|s| s.as_ref().clone())
                .ok_or_else(|| ServiceError::validation(format!("unknown entity `{name}`")))
        };
        let member = lookup(member)?;
        let rating = lookup(rating)?;

        let via = member
            .associations
            .iter()
            .find(|a| a.target == rating.name && !a.nature.stored_locally())
            .and_then(|a| a.via.clone())
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "{} declares no back-referenced association to {}",
                    member.name, rating.name
                ))
            })?;

        Ok(Self {
            db,
            member,
            rating,
            via,
            translator,
            options,
        })
    }

    /// Criteria used by the next aggregation.
    pub async fn criteria(&self) -> ServiceResult<Criteria> {
        if let CriteriaSource::Declared(names) = &self.options.criteria {
            return Ok(Criteria {
                names: names.clone(),
                nested: true,
            });
        }

        let latest = self
            .db
            .store()
            .find_one(&self.rating.collection, &Filter::All, &[SortKey::desc("_id")])
            .await?;
        Ok(match latest {
            Some(doc) => self.sample(&doc),
            None => Criteria {
                names: Vec::new(),
                nested: true,
            },
        })
    }

    fn sample(&self, rating: &Document) -> Criteria {
        let (source, nested) = match rating.get(SCORES_FIELD) {
            Some(Value::Object(scores)) => (scores, true),
            _ => (rating, false),
        };
        let names = source
            .iter()
            .filter(|(key, value)| value.is_number() && !self.is_reserved(key))
            .map(|(key, _)| key.clone())
            .collect();
        Criteria { names, nested }
    }

    fn is_reserved(&self, key: &str) -> bool {
        BOOKKEEPING.contains(&key)
            || key == self.via
            || key == AVERAGE
            || key == COUNT
            || key == JOINED_MEMBER
    }

    /// Parse `search`/`_q`, `_sort`/`sort`, `_start` and `_limit`.
    pub fn parse_query(&self, params: &Params, criteria: &Criteria) -> ServiceResult<RankingQuery> {
        let search = params
            .get("search")
            .or_else(|| params.get("_q"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let default_sort = SortKey::desc(AVERAGE);
        let sort = match params.get("_sort").or_else(|| params.get("sort")) {
            None | Some(Value::Null) => default_sort,
            Some(value) => {
                let spec = value
                    .as_str()
                    .ok_or_else(|| ServiceError::validation("sort must be a string"))?;
                let mut parts = spec.split(',').map(str::trim).filter(|p| !p.is_empty());
                let first = parts.next().unwrap_or_default();
                if parts.next().is_some() {
                    debug!(sort = spec, "Rankings sort by one key; ignoring the rest");
                }
                let (field, direction) = parse_sort_key(first)?;
                if field.is_empty() {
                    default_sort
                } else if let Some(field) = self.sort_path(field, criteria) {
                    SortKey { field, direction }
                } else if self.translator.policy() == UnknownFieldPolicy::Reject {
                    return Err(ServiceError::validation(format!(
                        "cannot sort rankings by `{field}`"
                    )));
                } else {
                    tracing::warn!(field, "Ignoring unknown ranking sort field");
                    default_sort
                }
            }
        };

        let start = match params.get("_start") {
            Some(v) => parse_count("_start", v)?.unwrap_or(0),
            None => 0,
        };
        // Zero falls back to the default page size, like an absent limit.
        let limit = match params.get("_limit") {
            Some(v) => match parse_count("_limit", v)? {
                Some(0) => Some(self.options.default_limit),
                parsed => parsed,
            },
            None => Some(self.options.default_limit),
        };

        Ok(RankingQuery {
            search,
            sort,
            start,
            limit,
        })
    }

    /// Row path for a sort field. Criteria win over member display fields of
    /// the same name, which live under the joined member record.
    fn sort_path(&self, field: &str, criteria: &Criteria) -> Option<String> {
        if matches!(field, "_id" | AVERAGE | COUNT) || criteria.names.iter().any(|c| c == field) {
            Some(field.to_string())
        } else if self.member.attribute_kind(field).is_some() {
            Some(format!("{JOINED_MEMBER}.{field}"))
        } else {
            None
        }
    }

    /// Assemble the aggregation pipeline.
    pub fn pipeline(&self, criteria: &Criteria, query: &RankingQuery) -> Vec<Stage> {
        let mut stages = Vec::new();

        if let Some(term) = &query.search {
            stages.push(Stage::Match(Filter::field(
                self.options.search_field.as_str(),
                Condition::Regex {
                    pattern: regex::escape(term),
                    case_insensitive: true,
                },
            )));
        }

        stages.push(Stage::Lookup {
            from: self.rating.collection.clone(),
            local_field: "_id".to_string(),
            foreign_field: self.via.clone(),
            as_field: JOINED_RATING.to_string(),
        });
        stages.push(Stage::Unwind(JOINED_RATING.to_string()));

        let mut fields = vec![(
            COUNT.to_string(),
            Accumulator::Sum(Expr::Literal(Value::from(1))),
        )];
        fields.extend(
            criteria
                .names
                .iter()
                .map(|c| (c.clone(), Accumulator::Avg(Expr::field(criteria.score_path(c))))),
        );
        stages.push(Stage::Group {
            id: Expr::field("_id"),
            fields,
        });

        stages.push(Stage::AddFields(vec![(
            AVERAGE.to_string(),
            Expr::Avg(criteria.names.iter().map(|c| Expr::field(c.as_str())).collect()),
        )]));

        stages.push(Stage::Lookup {
            from: self.member.collection.clone(),
            local_field: "_id".to_string(),
            foreign_field: "_id".to_string(),
            as_field: JOINED_MEMBER.to_string(),
        });
        stages.push(Stage::Unwind(JOINED_MEMBER.to_string()));

        let mut sort = vec![query.sort.clone()];
        if query.sort.field != "_id" {
            sort.push(SortKey::asc("_id"));
        }
        stages.push(Stage::Sort(sort));
        if query.start > 0 {
            stages.push(Stage::Skip(query.start));
        }
        if let Some(limit) = query.limit {
            stages.push(Stage::Limit(limit));
        }
        stages
    }

    /// Compute one page of the leaderboard.
    pub async fn compute_rankings(&self, params: &Params) -> ServiceResult<Vec<RankingEntry>> {
        let criteria = self.criteria().await?;
        let query = self.parse_query(params, &criteria)?;
        let stages = self.pipeline(&criteria, &query);
        debug!(
            criteria = ?criteria.names,
            sort = %query.sort.field,
            descending = query.sort.direction == SortDirection::Desc,
            "Running ranking aggregation"
        );

        let rows = self
            .db
            .store()
            .aggregate(&self.member.collection, &stages)
            .await?;
        Ok(rows.iter().map(|row| self.entry(row, &criteria)).collect())
    }

    fn entry(&self, row: &Document, criteria: &Criteria) -> RankingEntry {
        let id = match row.get("_id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let joined = row.get(JOINED_MEMBER).and_then(Value::as_object);
        let member = self
            .member
            .attributes
            .iter()
            .filter_map(|(name, _)| {
                joined
                    .and_then(|m| m.get(name))
                    .filter(|v| !v.is_null())
                    .map(|v| (name.clone(), v.clone()))
            })
            .collect();
        let criteria = criteria
            .names
            .iter()
            .map(|c| (c.clone(), row.get(c).and_then(Value::as_f64)))
            .collect();

        RankingEntry {
            id,
            member,
            criteria,
            average: row.get(AVERAGE).and_then(Value::as_f64),
            count: row.get(COUNT).and_then(Value::as_u64).unwrap_or(0),
        }
    }
}

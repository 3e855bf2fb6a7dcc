//! Query-parameter translation
//!
//! Turns the untyped parameter bag handed over by the request layer into a
//! [`FilterDescriptor`]:
//! - `_sort=field:asc|desc` (comma separated for several keys, default asc)
//! - `_start` / `_limit` pagination (`_limit` absent or `-1` means unbounded)
//! - `field=value` equality and operator suffixes `_ne`, `_lt`, `_lte`, `_gt`,
//!   `_gte`, `_in`, `_nin`, `_contains` (case-insensitive), `_containss`
//!
//! Values are coerced to the declared attribute kind. `_q` is reserved for
//! full-text search and never becomes a predicate.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::error::{ServiceError, ServiceResult};
use crate::db::{Condition, Filter, FindOptions, ObjectId, SortDirection, SortKey};
use crate::schema::{AttributeKind, EntitySchema};

/// Raw request parameters.
pub type Params = Map<String, Value>;

const RESERVED: &[&str] = &["_q", "_start", "_limit", "_sort"];

/// What to do with filter keys that name no declared field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownFieldPolicy {
    /// Drop the predicate and log a warning.
    #[default]
    Ignore,
    /// Fail with a validation error.
    Reject,
}

/// Database-agnostic description of a filtered, sorted page.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub where_clause: Filter,
    pub sort: Vec<SortKey>,
    pub start: u64,
    /// `None` means unbounded.
    pub limit: Option<u64>,
}

impl Default for FilterDescriptor {
    fn default() -> Self {
        Self {
            where_clause: Filter::All,
            sort: Vec::new(),
            start: 0,
            limit: None,
        }
    }
}

impl FilterDescriptor {
    pub fn find_options(&self) -> FindOptions {
        FindOptions {
            filter: self.where_clause.clone(),
            sort: self.sort.clone(),
            skip: self.start,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
    Contains,
    ContainsSensitive,
}

impl Operator {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "ne" => Operator::Ne,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "in" => Operator::In,
            "nin" => Operator::Nin,
            "contains" => Operator::Contains,
            "containss" => Operator::ContainsSensitive,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterTranslator {
    policy: UnknownFieldPolicy,
}

impl FilterTranslator {
    pub fn new(policy: UnknownFieldPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UnknownFieldPolicy {
        self.policy
    }

    pub fn translate(&self, schema: &EntitySchema, params: &Params) -> ServiceResult<FilterDescriptor> {
        let mut descriptor = FilterDescriptor::default();
        let mut predicates = Vec::new();

        for (key, value) in params {
            match key.as_str() {
                "_q" => {}
                "_start" => descriptor.start = parse_count(key, value)?.unwrap_or(0),
                "_limit" => descriptor.limit = parse_count(key, value)?,
                "_sort" => descriptor.sort = self.parse_sort(schema, value)?,
                _ => {
                    let (field, op) = split_operator(schema, key);
                    if !schema.is_known_field(field) {
                        self.unknown_field(schema, key)?;
                        continue;
                    }
                    predicates.push(build_predicate(schema, field, op, value)?);
                }
            }
        }

        descriptor.where_clause = predicates
            .into_iter()
            .fold(Filter::All, |acc, predicate| acc.and(predicate));

        debug!(entity = %schema.name, filter = ?descriptor, "Translated filter parameters");
        Ok(descriptor)
    }

    /// Parse a sort spec such as `name:desc` or `rank:asc,name`.
    pub fn parse_sort(&self, schema: &EntitySchema, value: &Value) -> ServiceResult<Vec<SortKey>> {
        let spec = value
            .as_str()
            .ok_or_else(|| ServiceError::validation("_sort must be a string"))?;

        let mut keys = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (field, direction) = parse_sort_key(part)?;
            let field = canonical_field(field);
            if !schema.is_known_field(field) {
                self.unknown_field(schema, field)?;
                continue;
            }
            keys.push(SortKey {
                field: field.to_string(),
                direction,
            });
        }
        Ok(keys)
    }

    fn unknown_field(&self, schema: &EntitySchema, field: &str) -> ServiceResult<()> {
        match self.policy {
            UnknownFieldPolicy::Ignore => {
                warn!(entity = %schema.name, field, "Ignoring unknown filter field");
                Ok(())
            }
            UnknownFieldPolicy::Reject => Err(ServiceError::validation(format!(
                "unknown field `{field}` for {}",
                schema.name
            ))),
        }
    }
}

/// Split `field:direction`; the direction defaults to ascending.
pub fn parse_sort_key(part: &str) -> ServiceResult<(&str, SortDirection)> {
    match part.split_once(':') {
        None => Ok((part, SortDirection::Asc)),
        Some((field, dir)) => SortDirection::parse(dir)
            .map(|direction| (field.trim(), direction))
            .ok_or_else(|| ServiceError::validation(format!("invalid sort direction `{dir}`"))),
    }
}

/// Parse a non-negative count. `-1` and absent values mean "no bound".
pub fn parse_count(key: &str, value: &Value) -> ServiceResult<Option<u64>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(-1) => Ok(None),
        Some(n) if n >= 0 => Ok(Some(n as u64)),
        _ => Err(ServiceError::validation(format!(
            "{key} must be a non-negative integer"
        ))),
    }
}

fn canonical_field(field: &str) -> &str {
    if field == "id" { "_id" } else { field }
}

fn split_operator<'a>(schema: &EntitySchema, key: &'a str) -> (&'a str, Operator) {
    if !schema.is_known_field(key) {
        if let Some((field, suffix)) = key.rsplit_once('_') {
            if let Some(op) = Operator::from_suffix(suffix) {
                if !field.is_empty() && !RESERVED.contains(&key) {
                    return (canonical_field(field), op);
                }
            }
        }
    }
    (canonical_field(key), Operator::Eq)
}

fn build_predicate(
    schema: &EntitySchema,
    field: &str,
    op: Operator,
    raw: &Value,
) -> ServiceResult<Filter> {
    let kind = schema.attribute_kind(field);
    let scalar = |v: &Value| coerce(field, kind, v);

    let condition = match op {
        Operator::Eq => match raw {
            Value::Array(items) => Condition::In(items.iter().map(scalar).collect::<Result<_, _>>()?),
            other => Condition::Eq(scalar(other)?),
        },
        Operator::Ne => Condition::Ne(scalar(raw)?),
        Operator::Lt => Condition::Lt(scalar(raw)?),
        Operator::Lte => Condition::Lte(scalar(raw)?),
        Operator::Gt => Condition::Gt(scalar(raw)?),
        Operator::Gte => Condition::Gte(scalar(raw)?),
        Operator::In => Condition::In(list(raw).iter().map(scalar).collect::<Result<_, _>>()?),
        Operator::Nin => Condition::Nin(list(raw).iter().map(scalar).collect::<Result<_, _>>()?),
        Operator::Contains | Operator::ContainsSensitive => Condition::Regex {
            pattern: regex::escape(&text(raw)),
            case_insensitive: op == Operator::Contains,
        },
    };
    Ok(Filter::field(field, condition))
}

/// Accept either a JSON array or a comma-separated string.
fn list(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        other => vec![other.clone()],
    }
}

fn text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce a raw parameter to the declared kind of `field`.
pub fn coerce(field: &str, kind: Option<AttributeKind>, raw: &Value) -> ServiceResult<Value> {
    let Value::String(s) = raw else {
        return Ok(raw.clone());
    };

    match kind {
        Some(kind) if kind.is_numeric() => parse_number(s).ok_or_else(|| {
            ServiceError::validation(format!("`{s}` is not a number for field {field}"))
        }),
        Some(AttributeKind::Boolean) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(ServiceError::validation(format!(
                "`{s}` is not a boolean for field {field}"
            ))),
        },
        _ if field == "_id" && !ObjectId::is_valid(s) => Err(ServiceError::validation(format!(
            "`{s}` is not a valid identifier"
        ))),
        _ if field == "_id" => Ok(Value::String(s.to_ascii_lowercase())),
        _ => Ok(Value::String(s.clone())),
    }
}

/// Parse a numeric string, keeping integers integral.
pub fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

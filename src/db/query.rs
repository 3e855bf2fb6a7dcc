//! Typed query vocabulary shared by the services and the store
//!
//! Filters, updates and sort keys are closed enums/structs so every backend
//! receives the same well-formed shapes. The evaluation helpers at the bottom
//! implement document-store matching semantics and are used by
//! [`MemoryStore`](super::MemoryStore) and the aggregation pipeline.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;

use super::StoreError;
use super::store::Document;

/// A predicate over one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every document.
    All,
    /// Every child must match. An empty conjunction matches everything.
    And(Vec<Filter>),
    /// At least one child must match. An empty disjunction matches nothing.
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Field { path: String, condition: Condition },
}

/// A comparison applied to the value found at a field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Regex { pattern: String, case_insensitive: bool },
    Exists(bool),
}

impl Filter {
    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Filter::Field {
            path: path.into(),
            condition,
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(path, Condition::Eq(value.into()))
    }

    pub fn id(id: impl ToString) -> Self {
        Self::eq("_id", Value::String(id.to_string()))
    }

    /// Combine two filters, flattening trivial cases.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Whether this filter trivially matches nothing.
    pub fn matches_nothing(&self) -> bool {
        matches!(self, Filter::Or(children) if children.is_empty())
    }

    /// Compile patterns once so a filter can be evaluated against many documents.
    pub fn compile(&self) -> Result<CompiledFilter, StoreError> {
        Ok(match self {
            Filter::All => CompiledFilter::All,
            Filter::And(children) => CompiledFilter::And(
                children
                    .iter()
                    .map(Filter::compile)
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Or(children) => CompiledFilter::Or(
                children
                    .iter()
                    .map(Filter::compile)
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Not(inner) => CompiledFilter::Not(Box::new(inner.compile()?)),
            Filter::Field { path, condition } => {
                let regex = match condition {
                    Condition::Regex {
                        pattern,
                        case_insensitive,
                    } => Some(
                        RegexBuilder::new(pattern)
                            .case_insensitive(*case_insensitive)
                            .build()
                            .map_err(|e| StoreError::InvalidQuery(e.to_string()))?,
                    ),
                    _ => None,
                };
                CompiledFilter::Field {
                    path: path.clone(),
                    condition: condition.clone(),
                    regex,
                }
            }
        })
    }
}

/// A [`Filter`] with its patterns compiled.
#[derive(Debug, Clone)]
pub enum CompiledFilter {
    All,
    And(Vec<CompiledFilter>),
    Or(Vec<CompiledFilter>),
    Not(Box<CompiledFilter>),
    Field {
        path: String,
        condition: Condition,
        regex: Option<Regex>,
    },
}

impl CompiledFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            CompiledFilter::All => true,
            CompiledFilter::And(children) => children.iter().all(|c| c.matches(doc)),
            CompiledFilter::Or(children) => children.iter().any(|c| c.matches(doc)),
            CompiledFilter::Not(inner) => !inner.matches(doc),
            CompiledFilter::Field {
                path,
                condition,
                regex,
            } => match_condition(resolve_path(doc, path), condition, regex.as_ref()),
        }
    }
}

fn match_condition(value: Option<&Value>, condition: &Condition, regex: Option<&Regex>) -> bool {
    match condition {
        Condition::Eq(expected) => field_equals(value, expected),
        Condition::Ne(expected) => !field_equals(value, expected),
        Condition::In(set) => set.iter().any(|expected| field_equals(value, expected)),
        Condition::Nin(set) => !set.iter().any(|expected| field_equals(value, expected)),
        Condition::Lt(bound) => any_element(value, |v| {
            compare_bracketed(v, bound) == Some(Ordering::Less)
        }),
        Condition::Lte(bound) => any_element(value, |v| {
            matches!(
                compare_bracketed(v, bound),
                Some(Ordering::Less | Ordering::Equal)
            )
        }),
        Condition::Gt(bound) => any_element(value, |v| {
            compare_bracketed(v, bound) == Some(Ordering::Greater)
        }),
        Condition::Gte(bound) => any_element(value, |v| {
            matches!(
                compare_bracketed(v, bound),
                Some(Ordering::Greater | Ordering::Equal)
            )
        }),
        Condition::Regex { .. } => match regex {
            Some(re) => any_element(value, |v| v.as_str().is_some_and(|s| re.is_match(s))),
            None => false,
        },
        Condition::Exists(expected) => value.is_some() == *expected,
    }
}

/// Equality with array semantics: an array field equals a scalar when any of
/// its elements does. A missing field equals `null`.
fn field_equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(v) => values_equal(v, expected),
    }
}

fn any_element(value: Option<&Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
    }
}

/// Compare only values of the same type class, like range operators in a
/// document store do.
fn compare_bracketed(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Bool(_), Value::Bool(_)) => Some(compare_values(a, b)),
        _ => None,
    }
}

/// Equality that treats `7` and `7.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values used for sorting.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (a, b) in x.iter().zip(y) {
                let ord = compare_values(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Resolve a dotted path (`member.name`) through nested objects.
pub fn resolve_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Sort direction for ordered reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse `asc`/`desc` (any case) or the numeric `1`/`-1` form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "1" => Some(SortDirection::Asc),
            "desc" | "-1" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Order documents by a list of sort keys. Missing fields sort as `null`.
pub fn compare_documents(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = resolve_path(a, &key.field).unwrap_or(&Value::Null);
        let right = resolve_path(b, &key.field).unwrap_or(&Value::Null);
        let ord = match key.direction {
            SortDirection::Asc => compare_values(left, right),
            SortDirection::Desc => compare_values(right, left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Options for [`DocumentStore::find`](super::DocumentStore::find).
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    /// `None` means unbounded.
    pub limit: Option<u64>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            filter: Filter::All,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }
}

impl FindOptions {
    pub fn filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Field-level write operations applied to every matched document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Update {
    pub set: Vec<(String, Value)>,
    pub pull: Vec<(String, Value)>,
    pub add_to_set: Vec<(String, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((field.into(), value.into()));
        self
    }

    /// Set every entry of a document.
    pub fn set_all(mut self, doc: Document) -> Self {
        self.set.extend(doc);
        self
    }

    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pull.push((field.into(), value.into()));
        self
    }

    pub fn add_to_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_to_set.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.pull.is_empty()
            && self.add_to_set.is_empty()
    }

    /// Apply to a document in place. Fields are top-level keys.
    pub fn apply(&self, doc: &mut Document) {
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for (field, value) in &self.pull {
            if let Some(Value::Array(items)) = doc.get_mut(field) {
                items.retain(|item| !values_equal(item, value));
            }
        }
        for (field, value) in &self.add_to_set {
            match doc.get_mut(field) {
                Some(Value::Array(items)) => {
                    if !items.iter().any(|item| values_equal(item, value)) {
                        items.push(value.clone());
                    }
                }
                _ => {
                    doc.insert(field.clone(), Value::Array(vec![value.clone()]));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn check(filter: Filter, value: Value) -> bool {
        filter.compile().unwrap().matches(&doc(value))
    }

    #[test]
    fn test_empty_or_matches_nothing() {
        assert!(!check(Filter::Or(vec![]), json!({"a": 1})));
        assert!(check(Filter::And(vec![]), json!({"a": 1})));
    }

    #[test]
    fn test_eq_matches_array_elements() {
        let filter = Filter::eq("tags", "b");
        assert!(check(filter.clone(), json!({"tags": ["a", "b"]})));
        assert!(!check(filter, json!({"tags": ["a"]})));
    }

    #[test]
    fn test_eq_null_matches_missing() {
        assert!(check(Filter::eq("x", Value::Null), json!({"a": 1})));
        assert!(check(Filter::eq("x", Value::Null), json!({"x": null})));
        assert!(!check(Filter::eq("x", Value::Null), json!({"x": 2})));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        assert!(check(Filter::eq("n", json!(7)), json!({"n": 7.0})));
    }

    #[test]
    fn test_range_is_type_bracketed() {
        let gt = Filter::field("n", Condition::Gt(json!(5)));
        assert!(check(gt.clone(), json!({"n": 6})));
        assert!(!check(gt.clone(), json!({"n": "9"})));
        assert!(!check(gt, json!({})));
    }

    #[test]
    fn test_regex_case_insensitive() {
        let filter = Filter::field(
            "name",
            Condition::Regex {
                pattern: "alp".into(),
                case_insensitive: true,
            },
        );
        assert!(check(filter, json!({"name": "ALPHA"})));
    }

    #[test]
    fn test_invalid_regex_is_store_error() {
        let filter = Filter::field(
            "name",
            Condition::Regex {
                pattern: "(".into(),
                case_insensitive: false,
            },
        );
        assert!(matches!(filter.compile(), Err(StoreError::InvalidQuery(_))));
    }

    #[test]
    fn test_nested_path() {
        assert!(check(
            Filter::eq("member.name", "Alpha"),
            json!({"member": {"name": "Alpha"}})
        ));
    }

    #[test]
    fn test_update_pull_and_add_to_set() {
        let mut d = doc(json!({"ids": ["a", "b"], "x": 1}));
        Update::new()
            .pull("ids", "a")
            .add_to_set("ids", "b")
            .add_to_set("ids", "c")
            .add_to_set("fresh", "z")
            .apply(&mut d);
        assert_eq!(Value::Object(d), json!({"ids": ["b", "c"], "x": 1, "fresh": ["z"]}));
    }

    #[test]
    fn test_sort_documents_desc_then_asc() {
        let mut docs = vec![
            doc(json!({"a": 1, "b": "y"})),
            doc(json!({"a": 2, "b": "x"})),
            doc(json!({"a": 1, "b": "x"})),
        ];
        let keys = [SortKey::desc("a"), SortKey::asc("b")];
        docs.sort_by(|x, y| compare_documents(x, y, &keys));
        let order: Vec<_> = docs.iter().map(|d| (d["a"].clone(), d["b"].clone())).collect();
        assert_eq!(
            order,
            vec![
                (json!(2), json!("x")),
                (json!(1), json!("x")),
                (json!(1), json!("y"))
            ]
        );
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!(SortDirection::parse("DESC"), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("-1"), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("Asc"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("sideways"), None);
    }
}

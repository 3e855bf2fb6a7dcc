//! Aggregation pipeline vocabulary and a reference evaluator
//!
//! Stages mirror the subset of document-store aggregation the ranking view
//! needs. [`run`] evaluates a pipeline over in-memory documents; lookups are
//! resolved through a callback so the evaluator stays storage-agnostic.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Number, Value};

use super::StoreError;
use super::query::{Filter, SortKey, compare_documents, resolve_path, values_equal};
use super::store::Document;

/// An expression evaluated against one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Value at a dotted path, `null` when absent.
    Field(String),
    Literal(Value),
    /// Mean of the numeric operands; non-numeric operands are ignored and the
    /// result is `null` when none are numeric.
    Avg(Vec<Expr>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn eval(&self, doc: &Document) -> Value {
        match self {
            Expr::Field(path) => resolve_path(doc, path).cloned().unwrap_or(Value::Null),
            Expr::Literal(value) => value.clone(),
            Expr::Avg(operands) => {
                let values: Vec<Value> = operands.iter().map(|e| e.eval(doc)).collect();
                mean(values.iter()).map_or(Value::Null, number)
            }
        }
    }
}

/// Group accumulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Match(Filter),
    /// Join every document of `from` whose `foreign_field` equals this
    /// document's `local_field`, storing the matches as an array in `as_field`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// Emit one document per array element; documents whose field is missing,
    /// null, or an empty array are dropped.
    Unwind(String),
    Group {
        id: Expr,
        fields: Vec<(String, Accumulator)>,
    },
    AddFields(Vec<(String, Expr)>),
    Sort(Vec<SortKey>),
    Skip(u64),
    Limit(u64),
}

fn number(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn mean<'a>(values: impl Iterator<Item = &'a Value>) -> Option<f64> {
    let (sum, n) = values
        .filter_map(Value::as_f64)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Evaluate `stages` over `docs`. `lookup` returns the documents of a
/// collection for [`Stage::Lookup`].
pub fn run<F>(mut docs: Vec<Document>, stages: &[Stage], mut lookup: F) -> Result<Vec<Document>, StoreError>
where
    F: FnMut(&str) -> Vec<Document>,
{
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => {
                let compiled = filter.compile()?;
                docs.into_iter().filter(|d| compiled.matches(d)).collect()
            }
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let foreign = lookup(from);
                docs.into_iter()
                    .map(|mut doc| {
                        let local = resolve_path(&doc, local_field).cloned().unwrap_or(Value::Null);
                        let joined: Vec<Value> = foreign
                            .iter()
                            .filter(|f| {
                                let other = resolve_path(f, foreign_field).unwrap_or(&Value::Null);
                                values_equal(other, &local)
                            })
                            .cloned()
                            .map(Value::Object)
                            .collect();
                        doc.insert(as_field.clone(), Value::Array(joined));
                        doc
                    })
                    .collect()
            }
            Stage::Unwind(path) => unwind(docs, path),
            Stage::Group { id, fields } => group(docs, id, fields),
            Stage::AddFields(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    for (name, expr) in fields {
                        let value = expr.eval(&doc);
                        doc.insert(name.clone(), value);
                    }
                    doc
                })
                .collect(),
            Stage::Sort(keys) => {
                docs.sort_by(|a, b| compare_documents(a, b, keys));
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n as usize).collect(),
        };
    }
    Ok(docs)
}

fn unwind(docs: Vec<Document>, path: &str) -> Vec<Document> {
    let mut out = Vec::new();
    for doc in docs {
        let items = match doc.get(path) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => continue,
            Some(other) => vec![other.clone()],
        };
        for item in items {
            let mut copy = doc.clone();
            copy.insert(path.to_string(), item);
            out.push(copy);
        }
    }
    out
}

fn group(docs: Vec<Document>, id: &Expr, fields: &[(String, Accumulator)]) -> Vec<Document> {
    // Preserve first-seen order of group keys.
    let mut order: Vec<Value> = Vec::new();
    let mut members: HashMap<String, Vec<Document>> = HashMap::new();
    for doc in docs {
        let key = id.eval(&doc);
        let slot = key.to_string();
        if !members.contains_key(&slot) {
            order.push(key);
        }
        members.entry(slot).or_default().push(doc);
    }

    order
        .into_iter()
        .map(|key| {
            let bucket = members.remove(&key.to_string()).unwrap_or_default();
            let mut out = Document::new();
            for (name, acc) in fields {
                let value = match acc {
                    Accumulator::Sum(expr) => {
                        let total: f64 = bucket.iter().filter_map(|d| expr.eval(d).as_f64()).sum();
                        if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
                            Value::from(total as i64)
                        } else {
                            number(total)
                        }
                    }
                    Accumulator::Avg(expr) => {
                        let values: Vec<Value> = bucket.iter().map(|d| expr.eval(d)).collect();
                        mean(values.iter()).map_or(Value::Null, number)
                    }
                };
                out.insert(name.clone(), value);
            }
            out.insert("_id".to_string(), key);
            out
        })
        .collect()
}

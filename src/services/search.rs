//! Free-text search compilation
//!
//! A search term becomes a disjunction with one predicate per attribute whose
//! declared kind can sensibly match it. An empty disjunction matches nothing.

use serde_json::Value;

use super::filters::parse_number;
use crate::db::{Condition, Filter};
use crate::schema::{AttributeKind, EntitySchema};

/// Predicate for one attribute, or `None` when the kind cannot match `term`.
fn predicate(field: &str, kind: AttributeKind, term: &str) -> Option<Filter> {
    match kind {
        AttributeKind::Integer | AttributeKind::Float | AttributeKind::Decimal => {
            if term.trim().is_empty() {
                return None;
            }
            parse_number(term).map(|n| Filter::field(field, Condition::Eq(n)))
        }
        AttributeKind::String | AttributeKind::Text | AttributeKind::Password => Some(Filter::field(
            field,
            Condition::Regex {
                pattern: regex::escape(term),
                case_insensitive: true,
            },
        )),
        AttributeKind::Boolean => match term {
            "true" => Some(Filter::eq(field, Value::Bool(true))),
            "false" => Some(Filter::eq(field, Value::Bool(false))),
            _ => None,
        },
        AttributeKind::Email | AttributeKind::Date | AttributeKind::Json => None,
    }
}

/// Build the search disjunction for `term` over the schema's attributes.
pub fn compile(schema: &EntitySchema, term: &str) -> Filter {
    Filter::Or(
        schema
            .attributes
            .iter()
            .filter_map(|(field, kind)| predicate(field, *kind, term))
            .collect(),
    )
}

//! Built-in entity definitions

use super::{Association, AttributeKind, EntitySchema, RelationNature, SchemaRegistry};

pub const MEMBER: &str = "member";
pub const RATING: &str = "rating";

/// A person being rated.
pub fn member_schema() -> EntitySchema {
    EntitySchema::new(MEMBER)
        .attribute("name", AttributeKind::String)
        .attribute("service_number", AttributeKind::String)
        .attribute("rank", AttributeKind::String)
        .attribute("phone", AttributeKind::String)
        .association(Association::new("ratings", RelationNature::OneToMany, RATING).via("member"))
}

/// One scored evaluation of a member. Criterion scores live in `ratings`.
pub fn rating_schema() -> EntitySchema {
    EntitySchema::new(RATING)
        .attribute("ratings", AttributeKind::Json)
        .attribute("comment", AttributeKind::Text)
        .association(Association::new("member", RelationNature::ManyToOne, MEMBER).via("ratings"))
}

pub fn default_registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(member_schema())
        .register(rating_schema())
}

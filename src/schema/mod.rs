//! Entity schema registry
//!
//! Relation descriptors and attribute types are declared up front and handed
//! to the services at construction time. Nothing here talks to the store.

mod entities;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use entities::{MEMBER, RATING, default_registry, member_schema, rating_schema};

/// Declared type of a scalar attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Integer,
    Float,
    Decimal,
    String,
    Text,
    Password,
    Boolean,
    Email,
    Date,
    Json,
}

impl AttributeKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            AttributeKind::Integer | AttributeKind::Float | AttributeKind::Decimal
        )
    }
}

/// Cardinality of an association as seen from the declaring entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationNature {
    /// Single reference, no back-reference on the target.
    OneWay,
    /// List of references, no back-reference on the target.
    ManyWay,
    OneToOne,
    /// Virtual side: the target stores the reference in its `via` field.
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationNature {
    /// Natures whose back-reference on the target is a single value, cleared
    /// by setting it to null. Everything else is pulled out of an array.
    pub fn clears_by_null(self) -> bool {
        matches!(
            self,
            RelationNature::OneToOne | RelationNature::ManyToOne | RelationNature::OneToMany
        )
    }

    /// Whether the declaring record physically stores the reference.
    pub fn stored_locally(self) -> bool {
        !matches!(self, RelationNature::OneToMany)
    }

    /// Whether the relation holds a list on the declaring side.
    pub fn is_many(self) -> bool {
        matches!(
            self,
            RelationNature::ManyWay | RelationNature::OneToMany | RelationNature::ManyToMany
        )
    }
}

impl fmt::Display for RelationNature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationNature::OneWay => "oneWay",
            RelationNature::ManyWay => "manyWay",
            RelationNature::OneToOne => "oneToOne",
            RelationNature::OneToMany => "oneToMany",
            RelationNature::ManyToOne => "manyToOne",
            RelationNature::ManyToMany => "manyToMany",
        };
        f.write_str(name)
    }
}

/// One declared association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Field name used in payloads and populated output.
    pub alias: String,
    pub nature: RelationNature,
    /// Target entity name.
    pub target: String,
    /// Back-reference field on the target, if any.
    pub via: Option<String>,
    pub auto_populate: bool,
}

impl Association {
    pub fn new(alias: &str, nature: RelationNature, target: &str) -> Self {
        Self {
            alias: alias.to_string(),
            nature,
            target: target.to_string(),
            via: None,
            auto_populate: true,
        }
    }

    pub fn via(mut self, field: &str) -> Self {
        self.via = Some(field.to_string());
        self
    }

    pub fn without_population(mut self) -> Self {
        self.auto_populate = false;
        self
    }
}

/// Attributes and associations of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: String,
    pub collection: String,
    /// Scalar attributes in declaration order.
    pub attributes: Vec<(String, AttributeKind)>,
    /// Associations in declaration order.
    pub associations: Vec<Association>,
}

impl EntitySchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: name.to_string(),
            attributes: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn attribute(mut self, name: &str, kind: AttributeKind) -> Self {
        self.attributes.push((name.to_string(), kind));
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn attribute_kind(&self, field: &str) -> Option<AttributeKind> {
        self.attributes
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, kind)| *kind)
    }

    pub fn find_association(&self, alias: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.alias == alias)
    }

    /// Every addressable field: identifier, bookkeeping, attributes and aliases.
    pub fn is_known_field(&self, field: &str) -> bool {
        matches!(field, "_id" | "id" | "createdAt" | "updatedAt")
            || self.attribute_kind(field).is_some()
            || self.find_association(field).is_some()
    }
}

/// All entity schemas known to the services.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.entities.insert(schema.name.clone(), Arc::new(schema));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntitySchema>> {
        self.entities.get(name)
    }
}

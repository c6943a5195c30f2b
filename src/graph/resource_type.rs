//! Resource type, attribute and relationship metadata.

use crate::config::ValidationRule;
use crate::value::{AttrType, IdType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Public name of the identity attribute every resource type exposes.
pub const ID_ATTRIBUTE: &str = "id";

/// Whether clients may supply the id of a resource being created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdGeneration {
    #[default]
    Forbidden,
    Allowed,
    Required,
}

/// What clients may do with an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrCapabilities {
    pub view: bool,
    pub filter: bool,
    pub sort: bool,
    pub create: bool,
    pub change: bool,
}

impl Default for AttrCapabilities {
    fn default() -> Self {
        AttrCapabilities {
            view: true,
            filter: true,
            sort: true,
            create: true,
            change: true,
        }
    }
}

/// What clients may do with a relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipCapabilities {
    pub include: bool,
    pub set: bool,
    pub add: bool,
    pub remove: bool,
}

impl Default for RelationshipCapabilities {
    fn default() -> Self {
        RelationshipCapabilities {
            include: true,
            set: true,
            add: true,
            remove: true,
        }
    }
}

/// A scalar field exposed on a resource type.
#[derive(Clone, Debug)]
pub struct AttrAttribute {
    pub public_name: String,
    /// PascalCase name of the backing property, used in validation messages.
    pub property_name: String,
    /// Public name of the resource type that declares this attribute.
    pub owner: String,
    pub attr_type: AttrType,
    pub nullable: bool,
    /// Backing column for SQL stores.
    pub column: String,
    pub capabilities: AttrCapabilities,
    pub validation: ValidationRule,
}

impl AttrAttribute {
    pub fn is_id(&self) -> bool {
        self.public_name == ID_ATTRIBUTE
    }
}

impl PartialEq for AttrAttribute {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.public_name == other.public_name
    }
}

impl Eq for AttrAttribute {}

impl Hash for AttrAttribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.public_name.hash(state);
    }
}

/// Join table backing a many-to-many relationship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughTable {
    pub table: String,
    /// Column referencing the left (owning) side.
    pub left_column: String,
    /// Column referencing the right (target) side.
    pub right_column: String,
}

/// Relationship variants with their storage payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationshipKind {
    /// `foreign_key` is the column on the left table. Without one, the key lives on the
    /// right table and is found through the inverse navigation.
    HasOne { foreign_key: Option<String> },
    /// `foreign_key` is the column on the right table referencing the left id. Without one,
    /// the key is taken from the inverse to-one relationship.
    HasMany { foreign_key: Option<String> },
    HasManyThrough { through: ThroughTable },
}

/// A navigable link from one resource type to another.
#[derive(Clone, Debug)]
pub struct RelationshipAttribute {
    pub public_name: String,
    pub property_name: String,
    /// Public name of the owning resource type.
    pub left_type: String,
    /// Public name of the target resource type.
    pub right_type: String,
    pub kind: RelationshipKind,
    /// Inverse named explicitly in the declaration (public name).
    pub declared_inverse: Option<String>,
    /// Public name of the relationship on the right type that points back, when known.
    /// Derived from declarations by `ResourceGraph::resolve_inverse_navigations`.
    pub inverse_navigation: Option<String>,
    pub capabilities: RelationshipCapabilities,
}

impl RelationshipAttribute {
    pub fn is_to_one(&self) -> bool {
        matches!(self.kind, RelationshipKind::HasOne { .. })
    }

    pub fn is_to_many(&self) -> bool {
        !self.is_to_one()
    }
}

impl PartialEq for RelationshipAttribute {
    fn eq(&self, other: &Self) -> bool {
        self.left_type == other.left_type && self.public_name == other.public_name
    }
}

impl Eq for RelationshipAttribute {}

impl Hash for RelationshipAttribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.left_type.hash(state);
        self.public_name.hash(state);
    }
}

/// Either kind of field, as referenced from query expressions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Attribute(Arc<AttrAttribute>),
    Relationship(Arc<RelationshipAttribute>),
}

impl FieldRef {
    pub fn public_name(&self) -> &str {
        match self {
            FieldRef::Attribute(a) => &a.public_name,
            FieldRef::Relationship(r) => &r.public_name,
        }
    }

    pub fn as_attribute(&self) -> Option<&Arc<AttrAttribute>> {
        match self {
            FieldRef::Attribute(a) => Some(a),
            FieldRef::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Arc<RelationshipAttribute>> {
        match self {
            FieldRef::Attribute(_) => None,
            FieldRef::Relationship(r) => Some(r),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.public_name())
    }
}

/// One addressable resource kind.
#[derive(Clone, Debug)]
pub struct ResourceType {
    pub public_name: String,
    /// PascalCase name of the backing type.
    pub type_name: String,
    pub id_type: IdType,
    pub client_id: ClientIdGeneration,
    pub table: String,
    /// Column distinguishing derived types that share a table.
    pub discriminator: Option<String>,
    pub base_type: Option<String>,
    pub derived_types: Vec<String>,
    pub is_abstract: bool,
    /// Declaration order; inherited fields come first. The id attribute is always first.
    pub attributes: Vec<Arc<AttrAttribute>>,
    pub relationships: Vec<Arc<RelationshipAttribute>>,
}

impl ResourceType {
    pub fn find_attribute(&self, public_name: &str) -> Option<&Arc<AttrAttribute>> {
        self.attributes.iter().find(|a| a.public_name == public_name)
    }

    pub fn find_relationship(&self, public_name: &str) -> Option<&Arc<RelationshipAttribute>> {
        self.relationships.iter().find(|r| r.public_name == public_name)
    }

    pub fn find_field(&self, public_name: &str) -> Option<FieldRef> {
        self.find_attribute(public_name)
            .map(|a| FieldRef::Attribute(a.clone()))
            .or_else(|| self.find_relationship(public_name).map(|r| FieldRef::Relationship(r.clone())))
    }

    pub fn id_attribute(&self) -> &Arc<AttrAttribute> {
        // Every resource type is built with its id attribute in first position.
        &self.attributes[0]
    }

    /// Attributes other than the id.
    pub fn value_attributes(&self) -> impl Iterator<Item = &Arc<AttrAttribute>> {
        self.attributes.iter().filter(|a| !a.is_id())
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.public_name == other.public_name
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.public_name.hash(state);
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_name)
    }
}

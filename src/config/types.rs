//! Raw config types matching the resource declaration JSON (resources.json).

use crate::graph::{AttrCapabilities, ClientIdGeneration, RelationshipCapabilities, ThroughTable};
use crate::value::{AttrType, IdType};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub fn is_required(&self) -> bool {
        self.required == Some(true)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Declared name; the public name is derived through the configured serializer naming.
    pub name: String,
    #[serde(rename = "type")]
    pub type_: AttrType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(flatten)]
    pub capabilities: AttrCapabilities,
    #[serde(default)]
    pub validation: ValidationRule,
}

impl AttributeConfig {
    pub fn new(name: impl Into<String>, type_: AttrType) -> Self {
        AttributeConfig {
            name: name.into(),
            type_,
            nullable: true,
            column: None,
            capabilities: AttrCapabilities::default(),
            validation: ValidationRule::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self.validation.required = Some(true);
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn capabilities(mut self, capabilities: AttrCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn validation(mut self, validation: ValidationRule) -> Self {
        self.validation = validation;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKindConfig {
    HasOne,
    HasMany,
    HasManyThrough,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    pub kind: RelationshipKindConfig,
    /// Public name of the target resource type.
    pub target: String,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub through: Option<ThroughTable>,
    /// Declared name of the relationship on the target that points back.
    #[serde(default)]
    pub inverse: Option<String>,
    #[serde(flatten)]
    pub capabilities: RelationshipCapabilities,
}

impl RelationshipConfig {
    pub fn new(name: impl Into<String>, kind: RelationshipKindConfig, target: impl Into<String>) -> Self {
        RelationshipConfig {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key: None,
            through: None,
            inverse: None,
            capabilities: RelationshipCapabilities::default(),
        }
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    pub fn through(mut self, table: impl Into<String>, left_column: impl Into<String>, right_column: impl Into<String>) -> Self {
        self.through = Some(ThroughTable {
            table: table.into(),
            left_column: left_column.into(),
            right_column: right_column.into(),
        });
        self
    }

    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    pub fn capabilities(mut self, capabilities: RelationshipCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Public resource type name, e.g. `blogPosts`.
    pub name: String,
    #[serde(default)]
    pub id_type: IdType,
    #[serde(default)]
    pub client_id: ClientIdGeneration,
    /// Backing table; defaults to the snake_case public name.
    #[serde(default)]
    pub table: Option<String>,
    /// Public name of the base resource type this one derives from.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceConfig {
            name: name.into(),
            id_type: IdType::default(),
            client_id: ClientIdGeneration::default(),
            table: None,
            base: None,
            is_abstract: false,
            discriminator: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn id_type(mut self, id_type: IdType) -> Self {
        self.id_type = id_type;
        self
    }

    pub fn client_id(mut self, mode: ClientIdGeneration) -> Self {
        self.client_id = mode;
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeConfig) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipConfig) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn has_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipConfig::new(name, RelationshipKindConfig::HasOne, target))
    }

    pub fn has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationship(RelationshipConfig::new(name, RelationshipKindConfig::HasMany, target))
    }
}

fn default_true() -> bool {
    true
}

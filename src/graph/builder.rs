//! Explicit registration of resource types, evaluated once into an immutable `ResourceGraph`.

use crate::case::{to_pascal_case, to_snake_case, SerializerNaming};
use crate::config::{validate, AttributeConfig, RelationshipConfig, RelationshipKindConfig, ResourceConfig, ValidationRule};
use crate::error::ConfigError;
use crate::graph::{
    AttrAttribute, AttrCapabilities, RelationshipAttribute, RelationshipKind, ResourceGraph, ResourceType, ID_ATTRIBUTE,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct ResourceGraphBuilder {
    naming: SerializerNaming,
    resources: Vec<ResourceConfig>,
}

impl ResourceGraphBuilder {
    pub fn new(naming: SerializerNaming) -> Self {
        ResourceGraphBuilder {
            naming,
            resources: Vec::new(),
        }
    }

    pub fn from_config(resources: &[ResourceConfig], naming: SerializerNaming) -> Self {
        ResourceGraphBuilder {
            naming,
            resources: resources.to_vec(),
        }
    }

    pub fn add_resource(mut self, resource: ResourceConfig) -> Self {
        self.resources.push(resource);
        self
    }

    /// Validate declarations, build every resource type (bases before derived types) and resolve inverses.
    pub fn build(self) -> Result<ResourceGraph, ConfigError> {
        validate(&self.resources)?;

        let by_name: HashMap<&str, &ResourceConfig> = self.resources.iter().map(|r| (r.name.as_str(), r)).collect();
        let mut built: HashMap<String, ResourceType> = HashMap::new();
        for config in &self.resources {
            self.build_type(config, &by_name, &mut built, &mut HashSet::new())?;
        }

        for config in &self.resources {
            if let Some(base) = &config.base {
                if let Some(base_type) = built.get_mut(base) {
                    base_type.derived_types.push(config.name.clone());
                }
            }
        }

        let mut types = Vec::with_capacity(self.resources.len());
        for config in &self.resources {
            if let Some(t) = built.remove(&config.name) {
                types.push(t);
            }
        }
        let mut graph = ResourceGraph::from_types(types)?;
        graph.resolve_inverse_navigations();
        tracing::info!(resource_types = graph.resource_types().len(), "resource graph built");
        Ok(graph)
    }

    fn build_type(
        &self,
        config: &ResourceConfig,
        by_name: &HashMap<&str, &ResourceConfig>,
        built: &mut HashMap<String, ResourceType>,
        visiting: &mut HashSet<String>,
    ) -> Result<(), ConfigError> {
        if built.contains_key(&config.name) {
            return Ok(());
        }
        if !visiting.insert(config.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "inheritance cycle through resource type '{}'",
                config.name
            )));
        }

        let (mut attributes, mut relationships, inherited_table) = match &config.base {
            Some(base) => {
                let base_config = by_name.get(base.as_str()).ok_or_else(|| ConfigError::MissingReference {
                    kind: "resource type",
                    id: base.clone(),
                })?;
                self.build_type(base_config, by_name, built, visiting)?;
                let base_type = built.get(base).ok_or_else(|| ConfigError::UnknownResourceType(base.clone()))?;
                (
                    base_type.attributes.clone(),
                    base_type.relationships.clone(),
                    Some(base_type.table.clone()),
                )
            }
            None => (vec![Arc::new(self.id_attribute(config))], Vec::new(), None),
        };

        let mut seen: HashSet<String> = attributes
            .iter()
            .map(|a| a.public_name.clone())
            .chain(relationships.iter().map(|r| r.public_name.clone()))
            .collect();

        for attr in &config.attributes {
            let a = self.attribute(&config.name, attr);
            if !seen.insert(a.public_name.clone()) {
                return Err(ConfigError::DuplicateField {
                    resource: config.name.clone(),
                    field: a.public_name,
                });
            }
            attributes.push(Arc::new(a));
        }
        for rel in &config.relationships {
            let r = self.relationship(&config.name, rel)?;
            if !seen.insert(r.public_name.clone()) {
                return Err(ConfigError::DuplicateField {
                    resource: config.name.clone(),
                    field: r.public_name,
                });
            }
            relationships.push(Arc::new(r));
        }

        let table = config
            .table
            .clone()
            .or(inherited_table)
            .unwrap_or_else(|| to_snake_case(&config.name));
        built.insert(
            config.name.clone(),
            ResourceType {
                public_name: config.name.clone(),
                type_name: to_pascal_case(&config.name),
                id_type: config.id_type,
                client_id: config.client_id,
                table,
                discriminator: config.discriminator.clone(),
                base_type: config.base.clone(),
                derived_types: Vec::new(),
                is_abstract: config.is_abstract,
                attributes,
                relationships,
            },
        );
        visiting.remove(&config.name);
        Ok(())
    }

    fn id_attribute(&self, config: &ResourceConfig) -> AttrAttribute {
        AttrAttribute {
            public_name: ID_ATTRIBUTE.to_string(),
            property_name: "Id".to_string(),
            owner: config.name.clone(),
            attr_type: config.id_type.attr_type(),
            nullable: false,
            column: "id".to_string(),
            capabilities: AttrCapabilities {
                view: true,
                filter: true,
                sort: true,
                create: false,
                change: false,
            },
            validation: ValidationRule::default(),
        }
    }

    fn attribute(&self, owner: &str, config: &AttributeConfig) -> AttrAttribute {
        AttrAttribute {
            public_name: self.naming.apply(&config.name),
            property_name: to_pascal_case(&config.name),
            owner: owner.to_string(),
            attr_type: config.type_,
            nullable: config.nullable,
            column: config.column.clone().unwrap_or_else(|| to_snake_case(&config.name)),
            capabilities: config.capabilities,
            validation: config.validation.clone(),
        }
    }

    fn relationship(&self, owner: &str, config: &RelationshipConfig) -> Result<RelationshipAttribute, ConfigError> {
        let kind = match config.kind {
            RelationshipKindConfig::HasOne => RelationshipKind::HasOne {
                foreign_key: config.foreign_key.clone(),
            },
            RelationshipKindConfig::HasMany => RelationshipKind::HasMany {
                foreign_key: config.foreign_key.clone(),
            },
            RelationshipKindConfig::HasManyThrough => RelationshipKind::HasManyThrough {
                through: config.through.clone().ok_or_else(|| ConfigError::MissingReference {
                    kind: "through table",
                    id: format!("{}.{}", owner, config.name),
                })?,
            },
        };
        Ok(RelationshipAttribute {
            public_name: self.naming.apply(&config.name),
            property_name: to_pascal_case(&config.name),
            left_type: owner.to_string(),
            right_type: config.target.clone(),
            kind,
            declared_inverse: config.inverse.as_deref().map(|n| self.naming.apply(n)),
            inverse_navigation: None,
            capabilities: config.capabilities,
        })
    }
}

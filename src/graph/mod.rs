//! Resource graph: immutable metadata for all resource types, built once at startup.

pub mod builder;
pub mod resource_type;

pub use builder::ResourceGraphBuilder;
pub use resource_type::*;

use crate::error::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct ResourceGraph {
    types: Vec<Arc<ResourceType>>,
    by_name: HashMap<String, usize>,
}

impl ResourceGraph {
    pub(crate) fn from_types(types: Vec<ResourceType>) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::new();
        for (i, t) in types.iter().enumerate() {
            if by_name.insert(t.public_name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateResourceType(t.public_name.clone()));
            }
        }
        Ok(ResourceGraph {
            types: types.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    pub fn resource_types(&self) -> &[Arc<ResourceType>] {
        &self.types
    }

    pub fn find_resource_type(&self, public_name: &str) -> Option<&Arc<ResourceType>> {
        self.by_name.get(public_name).map(|&i| &self.types[i])
    }

    /// Lookup that must succeed; a miss is a configuration defect, not a client error.
    pub fn get_resource_type(&self, public_name: &str) -> Result<&Arc<ResourceType>, ConfigError> {
        self.find_resource_type(public_name)
            .ok_or_else(|| ConfigError::UnknownResourceType(public_name.to_string()))
    }

    /// Resource type backed by `table`. Derived types sharing their base's table resolve to the base.
    pub fn get_resource_type_by_table(&self, table: &str) -> Result<&Arc<ResourceType>, ConfigError> {
        self.types
            .iter()
            .filter(|t| t.table == table)
            .find(|t| t.base_type.is_none())
            .or_else(|| self.types.iter().find(|t| t.table == table))
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "table",
                id: table.to_string(),
            })
    }

    pub fn get_relationship(&self, left_type: &str, public_name: &str) -> Result<&Arc<RelationshipAttribute>, ConfigError> {
        self.get_resource_type(left_type)?
            .find_relationship(public_name)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "relationship",
                id: format!("{}.{}", left_type, public_name),
            })
    }

    /// Relationship on the right type that points back at `relationship`, when resolved.
    pub fn inverse_of(&self, relationship: &RelationshipAttribute) -> Option<&Arc<RelationshipAttribute>> {
        let name = relationship.inverse_navigation.as_deref()?;
        self.find_resource_type(&relationship.right_type)?.find_relationship(name)
    }

    /// Whether `candidate` is `ancestor` or derives from it (transitively).
    pub fn is_same_or_derived(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = Some(candidate);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.find_resource_type(name).and_then(|t| t.base_type.as_deref());
        }
        false
    }

    /// `root` followed by every type deriving from it, depth-first.
    pub fn concrete_types_of(&self, root: &str) -> Vec<&Arc<ResourceType>> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(name) = stack.pop() {
            if let Some(t) = self.find_resource_type(name) {
                out.push(t);
                stack.extend(t.derived_types.iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// Wire `inverse_navigation` on relationship pairs. Recomputed from declarations on every call,
    /// so running it again yields the same metadata.
    ///
    /// A declared inverse always wins and is mirrored onto its counterpart. Otherwise a relationship
    /// R from A to B pairs with S from B to A only when each is the other's single candidate;
    /// ambiguous or missing counterparts leave the inverse unset.
    pub fn resolve_inverse_navigations(&mut self) {
        // (type, relationship) -> resolved inverse name
        let mut resolved: HashMap<(String, String), String> = HashMap::new();

        for t in &self.types {
            for r in &t.relationships {
                if let Some(inverse) = &r.declared_inverse {
                    resolved.insert((r.left_type.clone(), r.public_name.clone()), inverse.clone());
                    resolved
                        .entry((r.right_type.clone(), inverse.clone()))
                        .or_insert_with(|| r.public_name.clone());
                }
            }
        }

        let open = |resolved: &HashMap<(String, String), String>, r: &RelationshipAttribute| {
            !resolved.contains_key(&(r.left_type.clone(), r.public_name.clone()))
        };
        let candidates = |resolved: &HashMap<(String, String), String>, r: &RelationshipAttribute| -> Vec<Arc<RelationshipAttribute>> {
            self.find_resource_type(&r.right_type)
                .map(|target| {
                    target
                        .relationships
                        .iter()
                        .filter(|s| s.right_type == r.left_type)
                        .filter(|s| !(s.left_type == r.left_type && s.public_name == r.public_name))
                        .filter(|s| open(resolved, s))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut inferred = Vec::new();
        for t in &self.types {
            for r in t.relationships.iter().filter(|r| r.left_type == t.public_name) {
                if !open(&resolved, r) {
                    continue;
                }
                let mine = candidates(&resolved, r);
                if let [s] = mine.as_slice() {
                    let theirs = candidates(&resolved, s);
                    if let [back] = theirs.as_slice() {
                        if back.public_name == r.public_name && back.left_type == r.left_type {
                            inferred.push(((r.left_type.clone(), r.public_name.clone()), s.public_name.clone()));
                        }
                    }
                }
            }
        }
        resolved.extend(inferred);

        for t in self.types.iter_mut() {
            let t = Arc::make_mut(t);
            for r in t.relationships.iter_mut() {
                let inverse = resolved.get(&(r.left_type.clone(), r.public_name.clone())).cloned();
                if r.inverse_navigation != inverse {
                    Arc::make_mut(r).inverse_navigation = inverse;
                }
            }
        }
        tracing::debug!(resolved = resolved.len(), "resolved inverse navigations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelationshipConfig, RelationshipKindConfig, ResourceConfig};
    use crate::testing;
    use proptest::prelude::*;

    #[test]
    fn unknown_type_is_configuration_error() {
        let graph = testing::blog_graph();
        let err = graph.get_resource_type("nope").unwrap_err();
        assert_eq!(err, ConfigError::UnknownResourceType("nope".into()));
    }

    #[test]
    fn unique_counterparts_are_paired() {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap();
        let comments = posts.find_relationship("comments").unwrap();
        assert_eq!(comments.inverse_navigation.as_deref(), Some("parent"));
        let parent = graph.get_relationship("comments", "parent").unwrap();
        assert_eq!(parent.inverse_navigation.as_deref(), Some("comments"));
    }

    #[test]
    fn ambiguous_counterparts_stay_unset() {
        let graph = testing::blog_graph();
        // webAccounts.posts names author as its inverse, leaving nothing for reviewer.
        let author = graph.get_relationship("blogPosts", "author").unwrap();
        let reviewer = graph.get_relationship("blogPosts", "reviewer").unwrap();
        assert_eq!(author.inverse_navigation.as_deref(), Some("posts"));
        assert_eq!(reviewer.inverse_navigation, None);
    }

    #[test]
    fn self_reference_is_not_its_own_inverse() {
        let graph = ResourceGraphBuilder::from_config(
            &[ResourceConfig::new("people").has_one("manager", "people").has_many("reports", "people")],
            Default::default(),
        )
        .build()
        .unwrap();
        let manager = graph.get_relationship("people", "manager").unwrap();
        assert_eq!(manager.inverse_navigation.as_deref(), Some("reports"));
        let reports = graph.get_relationship("people", "reports").unwrap();
        assert_eq!(reports.inverse_navigation.as_deref(), Some("manager"));
    }

    #[test]
    fn resolution_is_idempotent_on_fixture() {
        let mut graph = testing::blog_graph();
        let before = inverse_table(&graph);
        graph.resolve_inverse_navigations();
        assert_eq!(inverse_table(&graph), before);
    }

    fn inverse_table(graph: &ResourceGraph) -> Vec<(String, String, Option<String>)> {
        graph
            .resource_types()
            .iter()
            .flat_map(|t| {
                t.relationships
                    .iter()
                    .map(|r| (t.public_name.clone(), r.public_name.clone(), r.inverse_navigation.clone()))
            })
            .collect()
    }

    fn arb_configs() -> impl Strategy<Value = Vec<ResourceConfig>> {
        let names = ["a", "b", "c", "d"];
        prop::collection::vec((0usize..4, 0usize..4, any::<bool>()), 0..12).prop_map(move |edges| {
            let mut configs: Vec<ResourceConfig> = names.iter().map(|n| ResourceConfig::new(*n)).collect();
            for (i, (from, to, many)) in edges.into_iter().enumerate() {
                let kind = if many {
                    RelationshipKindConfig::HasMany
                } else {
                    RelationshipKindConfig::HasOne
                };
                configs[from]
                    .relationships
                    .push(RelationshipConfig::new(format!("rel{}", i), kind, names[to]));
            }
            configs
        })
    }

    proptest! {
        #[test]
        fn resolving_twice_equals_resolving_once(configs in arb_configs()) {
            let mut graph = ResourceGraphBuilder::from_config(&configs, Default::default()).build().unwrap();
            let once = inverse_table(&graph);
            graph.resolve_inverse_navigations();
            prop_assert_eq!(inverse_table(&graph), once);
        }

        #[test]
        fn resolved_inverses_point_back(configs in arb_configs()) {
            let graph = ResourceGraphBuilder::from_config(&configs, Default::default()).build().unwrap();
            for t in graph.resource_types() {
                for r in &t.relationships {
                    if let Some(inverse) = graph.inverse_of(r) {
                        prop_assert_eq!(&inverse.right_type, &r.left_type);
                        prop_assert_eq!(inverse.inverse_navigation.as_deref(), Some(r.public_name.as_str()));
                    }
                }
            }
        }
    }
}

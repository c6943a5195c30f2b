//! Loaded resources as an arena: each (type, id) is stored once and relationships point at
//! node indices, so circular graphs need no shared ownership.

use crate::value::{ResourceKey, ScalarValue};
use indexmap::IndexMap;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum RelationshipValue {
    ToOne(Option<NodeId>),
    ToMany(Vec<NodeId>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceNode {
    pub key: ResourceKey,
    /// Selected attributes by public name, including `id`.
    pub attributes: IndexMap<String, ScalarValue>,
    /// Relationships whose targets were loaded, by public name.
    pub relationships: IndexMap<String, RelationshipValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSet {
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceKey, NodeId>,
    primary: Vec<NodeId>,
    /// Number of primary resources matching the filter, ignoring pagination, when requested.
    pub total: Option<u64>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, or merge attributes into the node already holding its key.
    pub fn upsert(&mut self, key: ResourceKey, attributes: IndexMap<String, ScalarValue>) -> NodeId {
        if let Some(&id) = self.index.get(&key) {
            let node = &mut self.nodes[id.0];
            for (name, value) in attributes {
                node.attributes.entry(name).or_insert(value);
            }
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.index.insert(key.clone(), id);
        self.nodes.push(ResourceNode {
            key,
            attributes,
            relationships: IndexMap::new(),
        });
        id
    }

    /// Record loaded targets. A to-many reached along several include paths keeps the targets of
    /// the first one, so a scoped page size on that path still bounds it.
    pub fn set_relationship(&mut self, node: NodeId, name: &str, value: RelationshipValue) {
        let relationships = &mut self.nodes[node.0].relationships;
        match (relationships.get_mut(name), value) {
            (Some(RelationshipValue::ToOne(existing @ None)), RelationshipValue::ToOne(Some(target))) => {
                *existing = Some(target);
            }
            (Some(_), _) => {}
            (None, value) => {
                relationships.insert(name.to_string(), value);
            }
        }
    }

    pub fn push_primary(&mut self, node: NodeId) {
        if !self.primary.contains(&node) {
            self.primary.push(node);
        }
    }

    pub fn primary(&self) -> &[NodeId] {
        &self.primary
    }

    pub fn node(&self, id: NodeId) -> &ResourceNode {
        &self.nodes[id.0]
    }

    pub fn find(&self, key: &ResourceKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ResourceNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Keys of the primary resources, in result order.
    pub fn primary_keys(&self) -> Vec<ResourceKey> {
        self.primary.iter().map(|id| self.nodes[id.0].key.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, ScalarValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), ScalarValue::from(*v))).collect()
    }

    #[test]
    fn same_key_is_stored_once_and_merged() {
        let mut set = ResourceSet::new();
        let a = set.upsert(ResourceKey::new("people", 1), attrs(&[("name", "Ann")]));
        let b = set.upsert(ResourceKey::new("people", 1), attrs(&[("name", "ignored"), ("city", "Oslo")]));
        assert_eq!(a, b);
        assert_eq!(set.len(), 1);
        assert_eq!(set.node(a).attributes["name"], ScalarValue::from("Ann"));
        assert_eq!(set.node(a).attributes["city"], ScalarValue::from("Oslo"));
    }

    #[test]
    fn cycles_are_plain_indices() {
        let mut set = ResourceSet::new();
        let a = set.upsert(ResourceKey::new("people", 1), IndexMap::new());
        let b = set.upsert(ResourceKey::new("people", 2), IndexMap::new());
        set.set_relationship(a, "friends", RelationshipValue::ToMany(vec![b]));
        set.set_relationship(b, "friends", RelationshipValue::ToMany(vec![a]));
        assert_eq!(
            set.node(b).relationships["friends"],
            RelationshipValue::ToMany(vec![a])
        );
        set.push_primary(a);
        set.push_primary(a);
        assert_eq!(set.primary(), &[a]);
    }

    #[test]
    fn first_loaded_collection_is_kept() {
        let mut set = ResourceSet::new();
        let a = set.upsert(ResourceKey::new("people", 1), IndexMap::new());
        let b = set.upsert(ResourceKey::new("people", 2), IndexMap::new());
        let c = set.upsert(ResourceKey::new("people", 3), IndexMap::new());
        set.set_relationship(a, "friends", RelationshipValue::ToMany(vec![b]));
        set.set_relationship(a, "friends", RelationshipValue::ToMany(vec![b, c]));
        assert_eq!(set.node(a).relationships["friends"], RelationshipValue::ToMany(vec![b]));

        set.set_relationship(b, "manager", RelationshipValue::ToOne(None));
        set.set_relationship(b, "manager", RelationshipValue::ToOne(Some(c)));
        assert_eq!(set.node(b).relationships["manager"], RelationshipValue::ToOne(Some(c)));
    }
}

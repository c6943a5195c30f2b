//! Converts loaded resources into a JSON:API document.
//!
//! Traversal is breadth-first from the primary resources, visiting relationships in the order
//! their resource type declares them. A resource is emitted once, at its first encounter, no
//! matter how many include paths reach it; cycles end because each (resource, include subtree)
//! pair is expanded at most once.

use super::links::LinkBuilder;
use super::objects::*;
use crate::error::AppError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::{IncludeElementExpression, IncludeExpression, SparseFieldSetExpression, SparseFieldTable};
use crate::store::{NodeId, RelationshipValue, ResourceSet};
use crate::value::id_to_string;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};

/// Shape of the primary data.
#[derive(Clone, Copy, Debug)]
pub enum PrimaryNodes<'a> {
    Single(Option<NodeId>),
    Many(&'a [NodeId]),
}

impl PrimaryNodes<'_> {
    fn nodes(&self) -> Vec<NodeId> {
        match self {
            PrimaryNodes::Single(node) => node.iter().copied().collect(),
            PrimaryNodes::Many(nodes) => nodes.to_vec(),
        }
    }
}

pub struct ResponseModelAdapter<'a> {
    graph: &'a ResourceGraph,
    links: LinkBuilder<'a>,
}

impl<'a> ResponseModelAdapter<'a> {
    pub fn new(graph: &'a ResourceGraph, links: LinkBuilder<'a>) -> Self {
        ResponseModelAdapter { graph, links }
    }

    pub fn convert(
        &self,
        set: &ResourceSet,
        primary: PrimaryNodes<'_>,
        include: &IncludeExpression,
        fields: &SparseFieldTable,
    ) -> Result<Document, AppError> {
        let roots = primary.nodes();
        let included = self.collect_included(set, &roots, include)?;

        let data = match primary {
            PrimaryNodes::Single(node) => PrimaryData::Single(
                node.map(|n| self.resource_object(set, n, fields)).transpose()?,
            ),
            PrimaryNodes::Many(nodes) => PrimaryData::Many(
                nodes
                    .iter()
                    .map(|&n| self.resource_object(set, n, fields))
                    .collect::<Result<_, _>>()?,
            ),
        };
        let included = if include.is_empty() {
            None
        } else {
            Some(
                included
                    .into_iter()
                    .map(|n| self.resource_object(set, n, fields))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        };
        let meta = set.total.map(|total| {
            let mut meta = Map::new();
            meta.insert("total".to_string(), Value::from(total));
            meta
        });

        Ok(Document {
            jsonapi: Some(JsonApiObject::default()),
            data: Some(data),
            included,
            meta,
            ..Default::default()
        })
    }

    /// Secondary resources in first-encounter order, excluding the primary ones.
    fn collect_included(
        &self,
        set: &ResourceSet,
        roots: &[NodeId],
        include: &IncludeExpression,
    ) -> Result<Vec<NodeId>, AppError> {
        let mut emitted: HashSet<NodeId> = roots.iter().copied().collect();
        let mut included = Vec::new();
        let mut expanded: HashSet<(NodeId, *const IncludeElementExpression)> = HashSet::new();
        let mut queue: VecDeque<(NodeId, &[IncludeElementExpression])> =
            roots.iter().map(|&n| (n, include.elements.as_slice())).collect();

        while let Some((node_id, elements)) = queue.pop_front() {
            if elements.is_empty() || !expanded.insert((node_id, elements.as_ptr())) {
                continue;
            }
            let node = set.node(node_id);
            let resource_type = self.graph.get_resource_type(&node.key.resource_type)?;
            for relationship in &resource_type.relationships {
                let Some(element) = elements
                    .iter()
                    .find(|e| e.relationship.public_name == relationship.public_name)
                else {
                    continue;
                };
                for target in targets(node.relationships.get(&relationship.public_name)) {
                    if emitted.insert(target) {
                        included.push(target);
                    }
                    queue.push_back((target, element.children.as_slice()));
                }
            }
        }
        Ok(included)
    }

    fn resource_object(&self, set: &ResourceSet, node_id: NodeId, fields: &SparseFieldTable) -> Result<ResourceObject, AppError> {
        let node = set.node(node_id);
        let resource_type = self.graph.get_resource_type(&node.key.resource_type)?;
        let sparse = fieldset_for(self.graph, fields, resource_type);
        let id = id_to_string(&node.key.id);

        let mut attributes = IndexMap::new();
        for attribute in resource_type.value_attributes() {
            if !attribute.capabilities.view || !sparse.map_or(true, |s| s.contains(&attribute.public_name)) {
                continue;
            }
            if let Some(value) = node.attributes.get(&attribute.public_name) {
                attributes.insert(attribute.public_name.clone(), value.to_json());
            }
        }

        let mut relationships = IndexMap::new();
        for relationship in &resource_type.relationships {
            if !sparse.map_or(true, |s| s.contains(&relationship.public_name)) {
                continue;
            }
            let data = node.relationships.get(&relationship.public_name).map(|value| match value {
                RelationshipValue::ToOne(target) => {
                    RelationshipData::ToOne(target.map(|t| identifier(set, t)))
                }
                RelationshipValue::ToMany(targets) => {
                    RelationshipData::ToMany(targets.iter().map(|&t| identifier(set, t)).collect())
                }
            });
            relationships.insert(
                relationship.public_name.clone(),
                RelationshipObject {
                    links: Some(self.links.relationship(&resource_type.public_name, &id, &relationship.public_name)),
                    data,
                    meta: None,
                },
            );
        }

        Ok(ResourceObject {
            resource_type: resource_type.public_name.clone(),
            links: Some(self.links.resource(&resource_type.public_name, &id)),
            id: Some(id),
            lid: None,
            attributes: (!attributes.is_empty()).then_some(attributes),
            relationships: (!relationships.is_empty()).then_some(relationships),
            meta: None,
        })
    }
}

/// Sparse fieldset of the concrete type, or of the nearest base type that has one.
fn fieldset_for<'f>(
    graph: &ResourceGraph,
    fields: &'f SparseFieldTable,
    resource_type: &ResourceType,
) -> Option<&'f SparseFieldSetExpression> {
    let mut current = Some(resource_type);
    while let Some(t) = current {
        if let Some(set) = fields.get(&t.public_name) {
            return Some(set);
        }
        current = t
            .base_type
            .as_deref()
            .and_then(|base| graph.find_resource_type(base))
            .map(|base| base.as_ref());
    }
    None
}

fn targets(value: Option<&RelationshipValue>) -> Vec<NodeId> {
    match value {
        Some(RelationshipValue::ToOne(target)) => target.iter().copied().collect(),
        Some(RelationshipValue::ToMany(targets)) => targets.clone(),
        None => Vec::new(),
    }
}

fn identifier(set: &ResourceSet, node: NodeId) -> ResourceIdentifierObject {
    let key = &set.node(node).key;
    ResourceIdentifierObject {
        resource_type: key.resource_type.clone(),
        id: Some(id_to_string(&key.id)),
        lid: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JsonApiOptions;
    use crate::graph::FieldRef;
    use crate::query::expressions::SparseFieldSetExpression;
    use crate::testing;
    use crate::value::{ResourceKey, ScalarValue};
    use std::collections::HashSet;

    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, ScalarValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), ScalarValue::from(*v))).collect()
    }

    fn include(graph: &ResourceGraph, paths: &[&[(&str, &str)]]) -> IncludeExpression {
        let mut include = IncludeExpression::default();
        for path in paths {
            let relationships: Vec<_> = path
                .iter()
                .map(|(owner, name)| graph.get_relationship(owner, name).unwrap().clone())
                .collect();
            include.add_path(&relationships);
        }
        include
    }

    /// Blog 1 with posts 1 and 2, both written by account 9, whose posts point back at them.
    fn cyclic_set() -> (ResourceSet, NodeId) {
        let mut set = ResourceSet::new();
        let blog = set.upsert(ResourceKey::new("blogs", 1), attrs(&[("title", "Tech")]));
        let p1 = set.upsert(ResourceKey::new("blogPosts", 1), attrs(&[("caption", "One"), ("url", "/1")]));
        let p2 = set.upsert(ResourceKey::new("blogPosts", 2), attrs(&[("caption", "Two"), ("url", "/2")]));
        let account = set.upsert(
            ResourceKey::new("webAccounts", 9),
            attrs(&[("userName", "ann"), ("password", "secret")]),
        );
        set.set_relationship(blog, "posts", RelationshipValue::ToMany(vec![p1, p2]));
        set.set_relationship(p1, "author", RelationshipValue::ToOne(Some(account)));
        set.set_relationship(p2, "author", RelationshipValue::ToOne(Some(account)));
        set.set_relationship(p1, "parent", RelationshipValue::ToOne(Some(blog)));
        set.set_relationship(account, "posts", RelationshipValue::ToMany(vec![p2, p1]));
        set.push_primary(blog);
        (set, blog)
    }

    #[test]
    fn cycles_terminate_and_each_resource_is_included_once() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let (set, blog) = cyclic_set();
        let include = include(
            &graph,
            &[
                &[("blogs", "posts"), ("blogPosts", "author"), ("webAccounts", "posts")],
                &[("blogs", "posts"), ("blogPosts", "parent")],
            ],
        );
        let adapter = ResponseModelAdapter::new(&graph, LinkBuilder::new(&options, None));
        let document = adapter
            .convert(&set, PrimaryNodes::Single(Some(blog)), &include, &SparseFieldTable::default())
            .unwrap();

        let included = document.included.unwrap();
        let keys: Vec<(String, String)> = included
            .iter()
            .map(|r| (r.resource_type.clone(), r.id.clone().unwrap()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("blogPosts".to_string(), "1".to_string()),
                ("blogPosts".to_string(), "2".to_string()),
                ("webAccounts".to_string(), "9".to_string()),
            ]
        );
        let distinct: HashSet<_> = keys.iter().collect();
        assert_eq!(distinct.len(), keys.len());
    }

    #[test]
    fn attributes_respect_visibility_and_loaded_linkage() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let (set, _) = cyclic_set();
        let account = set.find(&ResourceKey::new("webAccounts", 9)).unwrap();
        let adapter = ResponseModelAdapter::new(&graph, LinkBuilder::new(&options, None));
        let document = adapter
            .convert(&set, PrimaryNodes::Many(&[account]), &IncludeExpression::default(), &SparseFieldTable::default())
            .unwrap();
        let value = serde_json::to_value(&document).unwrap();
        let resource = &value["data"][0];
        assert_eq!(resource["attributes"], serde_json::json!({ "userName": "ann" }));
        assert_eq!(
            resource["relationships"]["posts"]["data"],
            serde_json::json!([{ "type": "blogPosts", "id": "2" }, { "type": "blogPosts", "id": "1" }])
        );
        assert!(resource["relationships"]["preferences"].get("data").is_none());
        assert_eq!(resource["links"]["self"], "/webAccounts/9");
        assert!(value.get("included").is_none());
    }

    #[test]
    fn sparse_fieldsets_apply_to_included_resources_too() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let (set, blog) = cyclic_set();
        let posts = graph.get_resource_type("blogPosts").unwrap();
        let mut fields = SparseFieldTable::default();
        fields.table.insert(
            "blogPosts".to_string(),
            SparseFieldSetExpression {
                fields: [FieldRef::Attribute(posts.find_attribute("caption").unwrap().clone())]
                    .into_iter()
                    .collect(),
            },
        );
        let include = include(&graph, &[&[("blogs", "posts")]]);
        let adapter = ResponseModelAdapter::new(&graph, LinkBuilder::new(&options, None));
        let document = adapter.convert(&set, PrimaryNodes::Single(Some(blog)), &include, &fields).unwrap();
        for post in document.included.unwrap() {
            let attributes = post.attributes.unwrap();
            assert_eq!(attributes.keys().collect::<Vec<_>>(), vec!["caption"]);
            assert!(post.relationships.is_none());
        }
    }

    #[test]
    fn total_goes_into_meta() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let mut set = ResourceSet::new();
        set.total = Some(0);
        let adapter = ResponseModelAdapter::new(&graph, LinkBuilder::new(&options, None));
        let document = adapter
            .convert(&set, PrimaryNodes::Many(&[]), &IncludeExpression::default(), &SparseFieldTable::default())
            .unwrap();
        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(value["data"], serde_json::json!([]));
        assert_eq!(value["meta"]["total"], 0);
    }
}

//! Provider-neutral query plan for one resource type, nested per selected relationship.

use crate::graph::{AttrAttribute, FieldRef, RelationshipAttribute, ResourceType};
use crate::query::expressions::{FilterExpression, IncludeExpression, PaginationExpression, SortExpression};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct QueryLayer {
    pub resource_type: Arc<ResourceType>,
    /// Relationships still to be loaded natively; consumed by `QueryLayerIncludeConverter`.
    pub include: Option<IncludeExpression>,
    pub filter: Option<FilterExpression>,
    pub sort: Option<SortExpression>,
    pub pagination: Option<PaginationExpression>,
    pub selection: Option<FieldSelection>,
}

impl QueryLayer {
    pub fn new(resource_type: Arc<ResourceType>) -> Self {
        QueryLayer {
            resource_type,
            include: None,
            filter: None,
            sort: None,
            pagination: None,
            selection: None,
        }
    }

    /// Selectors for a concrete resource type, falling back to the nearest declared entry.
    pub fn selectors_for(&self, resource_type: &str) -> Option<&FieldSelectors> {
        let selection = self.selection.as_ref()?;
        selection
            .get(resource_type)
            .or_else(|| selection.get(&self.resource_type.public_name))
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        writeln!(f, "{}QueryLayer<{}>", pad, self.resource_type.public_name)?;
        writeln!(f, "{}{{", pad)?;
        if let Some(include) = &self.include {
            writeln!(f, "{}  Include: {}", pad, include)?;
        }
        if let Some(filter) = &self.filter {
            writeln!(f, "{}  Filter: {}", pad, filter)?;
        }
        if let Some(sort) = &self.sort {
            writeln!(f, "{}  Sort: {}", pad, sort)?;
        }
        if let Some(pagination) = &self.pagination {
            writeln!(f, "{}  Pagination: {}", pad, pagination)?;
        }
        if let Some(selection) = &self.selection {
            writeln!(f, "{}  Selection", pad)?;
            writeln!(f, "{}  {{", pad)?;
            for (type_name, selectors) in selection.iter() {
                writeln!(f, "{}    FieldSelectors<{}>", pad, type_name)?;
                writeln!(f, "{}    {{", pad)?;
                for selected in selectors.iter() {
                    match &selected.layer {
                        Some(layer) => {
                            writeln!(f, "{}      {}", pad, selected.field)?;
                            layer.write_indented(f, indent + 3)?;
                        }
                        None => writeln!(f, "{}      {}", pad, selected.field)?,
                    }
                }
                writeln!(f, "{}    }}", pad)?;
            }
            writeln!(f, "{}  }}", pad)?;
        }
        writeln!(f, "{}}}", pad)
    }
}

impl fmt::Display for QueryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Field selectors per concrete resource type (derived types can select their own fields).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSelection {
    by_type: IndexMap<String, FieldSelectors>,
}

impl FieldSelection {
    pub fn get(&self, resource_type: &str) -> Option<&FieldSelectors> {
        self.by_type.get(resource_type)
    }

    pub fn get_mut(&mut self, resource_type: &str) -> Option<&mut FieldSelectors> {
        self.by_type.get_mut(resource_type)
    }

    pub fn get_or_add(&mut self, resource_type: &str) -> &mut FieldSelectors {
        self.by_type.entry(resource_type.to_string()).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldSelectors)> {
        self.by_type.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut FieldSelectors)> {
        self.by_type.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// One selected field. Relationships carry the layer used to load their targets;
/// a relationship without a layer is selected for linkage only.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedField {
    pub field: FieldRef,
    pub layer: Option<QueryLayer>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSelectors {
    entries: IndexMap<String, SelectedField>,
}

impl FieldSelectors {
    pub fn include_attribute(&mut self, attribute: &Arc<AttrAttribute>) {
        self.entries
            .entry(attribute.public_name.clone())
            .or_insert_with(|| SelectedField {
                field: FieldRef::Attribute(attribute.clone()),
                layer: None,
            });
    }

    pub fn include_attributes<'a>(&mut self, attributes: impl IntoIterator<Item = &'a Arc<AttrAttribute>>) {
        for attribute in attributes {
            self.include_attribute(attribute);
        }
    }

    /// Select a relationship. An existing nested layer is kept unless a new one is given.
    pub fn include_relationship(&mut self, relationship: &Arc<RelationshipAttribute>, layer: Option<QueryLayer>) {
        let entry = self
            .entries
            .entry(relationship.public_name.clone())
            .or_insert_with(|| SelectedField {
                field: FieldRef::Relationship(relationship.clone()),
                layer: None,
            });
        if layer.is_some() {
            entry.layer = layer;
        }
    }

    pub fn get(&self, public_name: &str) -> Option<&SelectedField> {
        self.entries.get(public_name)
    }

    pub fn get_mut(&mut self, public_name: &str) -> Option<&mut SelectedField> {
        self.entries.get_mut(public_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedField> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SelectedField> {
        self.entries.values_mut()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Arc<AttrAttribute>> {
        self.entries.values().filter_map(|s| s.field.as_attribute())
    }

    pub fn relationships(&self) -> impl Iterator<Item = (&Arc<RelationshipAttribute>, Option<&QueryLayer>)> {
        self.entries
            .values()
            .filter_map(|s| s.field.as_relationship().map(|r| (r, s.layer.as_ref())))
    }

    pub fn contains_attribute_selection(&self) -> bool {
        self.attributes().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which attributes of the top-level layer to select when composing for a known id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopFieldSelection {
    OnlyIdAttribute,
    AllAttributes,
    PreserveExisting,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn relationship_layer_is_kept_when_reselected_for_linkage() {
        let graph = testing::blog_graph();
        let author = graph.get_relationship("blogPosts", "author").unwrap().clone();
        let accounts = graph.get_resource_type("webAccounts").unwrap().clone();
        let mut selectors = FieldSelectors::default();
        selectors.include_relationship(&author, Some(QueryLayer::new(accounts)));
        selectors.include_relationship(&author, None);
        let (_, layer) = selectors.relationships().next().unwrap();
        assert!(layer.is_some());
        assert!(!selectors.contains_attribute_selection());
    }

    #[test]
    fn display_renders_nested_layers() {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let accounts = graph.get_resource_type("webAccounts").unwrap().clone();
        let author = graph.get_relationship("blogPosts", "author").unwrap().clone();
        let mut layer = QueryLayer::new(posts.clone());
        let selectors = layer
            .selection
            .get_or_insert_with(FieldSelection::default)
            .get_or_add("blogPosts");
        selectors.include_attribute(posts.id_attribute());
        selectors.include_relationship(&author, Some(QueryLayer::new(accounts)));
        let text = layer.to_string();
        assert!(text.starts_with("QueryLayer<blogPosts>\n{\n  Selection\n"));
        assert!(text.contains("      author\n      QueryLayer<webAccounts>\n"));
    }
}

//! Folds a layer's remaining include tree into explicit selectors, for stores without native eager loading.

use super::query_layer::{FieldSelection, QueryLayer};
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::{IncludeElementExpression, SortExpression};
use std::sync::Arc;

pub struct QueryLayerIncludeConverter<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> QueryLayerIncludeConverter<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        QueryLayerIncludeConverter { graph }
    }

    /// After this call no layer in the tree has an include, and every selector set that selected
    /// no attribute selects all viewable ones. Running it again changes nothing.
    pub fn convert_includes_to_selections(&self, layer: &mut QueryLayer) {
        if let Some(include) = layer.include.take() {
            for concrete in self.graph.concrete_types_of(&layer.resource_type.public_name) {
                for element in &include.elements {
                    self.select_include(layer, concrete, element);
                }
            }
        }

        let selection = layer.selection.get_or_insert_with(FieldSelection::default);
        if selection.is_empty() {
            for concrete in self.graph.concrete_types_of(&layer.resource_type.public_name) {
                selection.get_or_add(&concrete.public_name);
            }
        }
        for (type_name, selectors) in selection.iter_mut() {
            if !selectors.contains_attribute_selection() {
                if let Some(concrete) = self.graph.find_resource_type(type_name) {
                    selectors.include_attribute(concrete.id_attribute());
                    selectors.include_attributes(concrete.attributes.iter().filter(|a| a.capabilities.view));
                }
            }
            for selected in selectors.iter_mut() {
                if let Some(nested) = selected.layer.as_mut() {
                    self.convert_includes_to_selections(nested);
                }
            }
        }
    }

    fn select_include(&self, layer: &mut QueryLayer, concrete: &Arc<ResourceType>, element: &IncludeElementExpression) {
        let Some(relationship) = concrete.find_relationship(&element.relationship.public_name) else {
            return;
        };
        let Some(right) = self.graph.find_resource_type(&relationship.right_type) else {
            return;
        };
        let selectors = layer
            .selection
            .get_or_insert_with(FieldSelection::default)
            .get_or_add(&concrete.public_name);

        let has_layer = selectors.get(&relationship.public_name).map_or(false, |s| s.layer.is_some());
        if !has_layer {
            let mut nested = QueryLayer::new(right.clone());
            if relationship.is_to_many() {
                nested.sort = Some(SortExpression::by_id(right));
            }
            selectors.include_relationship(relationship, Some(nested));
        }
        if element.children.is_empty() {
            return;
        }
        if let Some(nested) = selectors.get_mut(&relationship.public_name).and_then(|s| s.layer.as_mut()) {
            let include = nested.include.get_or_insert_with(Default::default);
            for child in &element.children {
                if include.find(&child.relationship).is_none() {
                    include.elements.push(child.clone());
                }
            }
        }
    }
}

//! Compiles a `QueryLayer` tree into guarded IR, ready for a backend to execute.

use super::ir::{OrderByPlan, Predicate};
use super::ir_builder::IrBuilder;
use super::null_safety::NullSafetyRewriter;
use crate::graph::{AttrAttribute, RelationshipAttribute, ResourceGraph, ResourceType};
use crate::queries::{FieldSelectors, QueryLayer};
use crate::query::expressions::FilterExpression;
use indexmap::IndexMap;
use std::sync::Arc;

/// Filter, ordering, page window and projection of one layer, with nested layers compiled too.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub resource_type: Arc<ResourceType>,
    pub filter: Option<Predicate>,
    pub order_by: OrderByPlan,
    pub skip: usize,
    pub take: Option<usize>,
    /// Projection per concrete resource type.
    pub selection: IndexMap<String, CompiledSelectors>,
}

#[derive(Clone, Debug, Default)]
pub struct CompiledSelectors {
    pub attributes: Vec<Arc<AttrAttribute>>,
    pub relationships: Vec<CompiledRelationship>,
}

/// A selected relationship. Without a query only the linkage is wanted.
#[derive(Clone, Debug)]
pub struct CompiledRelationship {
    pub relationship: Arc<RelationshipAttribute>,
    pub query: Option<CompiledQuery>,
}

impl CompiledQuery {
    /// Projection for a concrete type, falling back to the layer's own type.
    pub fn selectors_for(&self, resource_type: &str) -> Option<&CompiledSelectors> {
        self.selection
            .get(resource_type)
            .or_else(|| self.selection.get(&self.resource_type.public_name))
    }
}

pub struct QueryableBuilder<'a> {
    graph: &'a ResourceGraph,
    ir: IrBuilder,
    rewriter: NullSafetyRewriter,
}

impl<'a> QueryableBuilder<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        QueryableBuilder {
            graph,
            ir: IrBuilder::new(),
            rewriter: NullSafetyRewriter::new(),
        }
    }

    /// Guarded predicate for a standalone filter, as used by count queries.
    pub fn compile_filter(&self, filter: &FilterExpression) -> Predicate {
        self.rewriter.rewrite_predicate(&self.ir.filter(filter))
    }

    /// Filtering, then sorting, then the page window, then projection. A layer without a
    /// selection projects every viewable attribute of each concrete type.
    pub fn apply_query(&self, layer: &QueryLayer) -> CompiledQuery {
        let filter = layer
            .filter
            .as_ref()
            .map(|f| self.rewriter.rewrite_predicate(&self.ir.filter(f)));
        let order_by = layer
            .sort
            .as_ref()
            .map(|s| self.rewriter.rewrite_plan(&self.ir.sort(s)))
            .unwrap_or_default();
        let (skip, take) = match &layer.pagination {
            Some(page) => (page.skip(), page.page_size.map(|n| n as usize)),
            None => (0, None),
        };

        let mut selection = IndexMap::new();
        match &layer.selection {
            Some(fields) if !fields.is_empty() => {
                for (type_name, selectors) in fields.iter() {
                    selection.insert(type_name.clone(), self.compile_selectors(type_name, selectors));
                }
            }
            _ => {
                for concrete in self.graph.concrete_types_of(&layer.resource_type.public_name) {
                    selection.insert(concrete.public_name.clone(), all_viewable(concrete));
                }
            }
        }

        let compiled = CompiledQuery {
            resource_type: layer.resource_type.clone(),
            filter,
            order_by,
            skip,
            take,
            selection,
        };
        if let Some(filter) = &compiled.filter {
            tracing::debug!(resource_type = %layer.resource_type.public_name, filter = %filter, "compiled filter");
        }
        if !compiled.order_by.is_empty() {
            tracing::debug!(resource_type = %layer.resource_type.public_name, order_by = %compiled.order_by, "compiled ordering");
        }
        compiled
    }

    fn compile_selectors(&self, type_name: &str, selectors: &FieldSelectors) -> CompiledSelectors {
        let mut attributes: Vec<Arc<AttrAttribute>> = selectors.attributes().cloned().collect();
        if attributes.is_empty() {
            if let Some(concrete) = self.graph.find_resource_type(type_name) {
                attributes = all_viewable(concrete).attributes;
            }
        }
        let relationships = selectors
            .relationships()
            .map(|(relationship, layer)| CompiledRelationship {
                relationship: relationship.clone(),
                query: layer.map(|l| self.apply_query(l)),
            })
            .collect();
        CompiledSelectors {
            attributes,
            relationships,
        }
    }
}

fn all_viewable(resource_type: &ResourceType) -> CompiledSelectors {
    CompiledSelectors {
        attributes: resource_type
            .attributes
            .iter()
            .filter(|a| a.is_id() || a.capabilities.view)
            .cloned()
            .collect(),
        relationships: Vec::new(),
    }
}

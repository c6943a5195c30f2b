//! Turns parsed constraints plus defaults and resource definition callbacks into `QueryLayer`s.

use super::definition::ResourceDefinitionRegistry;
use super::query_layer::{FieldSelection, QueryLayer, TopFieldSelection};
use crate::config::JsonApiOptions;
use crate::error::AppError;
use crate::graph::{FieldRef, RelationshipAttribute, ResourceGraph, ResourceType};
use crate::query::expressions::*;
use crate::query::EndpointKind;
use crate::value::{id_to_string, ScalarValue};
use std::sync::Arc;

pub struct QueryLayerComposer<'a> {
    graph: &'a ResourceGraph,
    options: &'a JsonApiOptions,
    definitions: &'a ResourceDefinitionRegistry,
}

impl<'a> QueryLayerComposer<'a> {
    pub fn new(graph: &'a ResourceGraph, options: &'a JsonApiOptions, definitions: &'a ResourceDefinitionRegistry) -> Self {
        QueryLayerComposer {
            graph,
            options,
            definitions,
        }
    }

    /// Layer for a primary endpoint. Collections get a default sort by id and the default page size.
    pub fn compose_from_constraints(
        &self,
        constraints: &[ExpressionInScope],
        root: &Arc<ResourceType>,
        endpoint: EndpointKind,
    ) -> QueryLayer {
        let include = self.root_include(constraints, root);
        let fields = root_fields(constraints);
        let mut layer = self.compose_layer(&[], root, &include.elements, constraints, &fields, endpoint == EndpointKind::Collection);
        if !include.is_empty() {
            layer.include = Some(include);
        }
        tracing::debug!(resource_type = %root.public_name, layer = %layer, "query layer composed");
        layer
    }

    /// Layer fetching one resource by id; sort and pagination are dropped.
    pub fn compose_for_get_by_id(
        &self,
        id: &ScalarValue,
        root: &Arc<ResourceType>,
        top: TopFieldSelection,
        constraints: &[ExpressionInScope],
    ) -> QueryLayer {
        let mut layer = self.compose_from_constraints(constraints, root, EndpointKind::Single);
        layer.filter = FilterExpression::and_all([id_filter(root, id)].into_iter().chain(layer.filter.take()));
        layer.sort = None;
        layer.pagination = None;
        match top {
            TopFieldSelection::PreserveExisting => {}
            TopFieldSelection::OnlyIdAttribute => {
                let mut selection = FieldSelection::default();
                for concrete in self.graph.concrete_types_of(&root.public_name) {
                    selection.get_or_add(&concrete.public_name).include_attribute(concrete.id_attribute());
                }
                layer.selection = Some(selection);
                layer.include = None;
            }
            TopFieldSelection::AllAttributes => {
                let selection = layer.selection.get_or_insert_with(FieldSelection::default);
                for concrete in self.graph.concrete_types_of(&root.public_name) {
                    selection
                        .get_or_add(&concrete.public_name)
                        .include_attributes(concrete.attributes.iter().filter(|a| a.capabilities.view));
                }
            }
        }
        layer
    }

    /// Layer for `GET /{type}/{id}/{relationship}`: the primary resource selecting only the relationship,
    /// whose nested layer carries the request's constraints.
    pub fn compose_for_secondary(
        &self,
        primary: &Arc<ResourceType>,
        id: &ScalarValue,
        relationship: &Arc<RelationshipAttribute>,
        constraints: &[ExpressionInScope],
    ) -> Result<QueryLayer, AppError> {
        let secondary = self.graph.get_resource_type(&relationship.right_type)?.clone();
        let include = self.root_include(constraints, &secondary);
        let fields = root_fields(constraints);
        let mut secondary_layer = self.compose_layer(
            &[],
            &secondary,
            &include.elements,
            constraints,
            &fields,
            relationship.is_to_many(),
        );
        if !include.is_empty() {
            secondary_layer.include = Some(include.clone());
        }

        let mut layer = QueryLayer::new(primary.clone());
        layer.filter = FilterExpression::and_all(
            [id_filter(primary, id)]
                .into_iter()
                .chain(self.definitions.get(&primary.public_name).on_apply_filter(None)),
        );
        let mut selection = FieldSelection::default();
        for concrete in self.graph.concrete_types_of(&primary.public_name) {
            let selectors = selection.get_or_add(&concrete.public_name);
            selectors.include_attribute(concrete.id_attribute());
            selectors.include_relationship(relationship, Some(secondary_layer.clone()));
        }
        layer.selection = Some(selection);

        let mut wrapped = IncludeExpression::default();
        wrapped.elements.push(IncludeElementExpression {
            relationship: relationship.clone(),
            children: include.elements,
        });
        layer.include = Some(wrapped);
        tracing::debug!(layer = %layer, "secondary query layer composed");
        Ok(layer)
    }

    /// Filter selecting the right-side resources of `relationship` for the left resource `left_id`,
    /// expressed through the inverse navigation. `None` when the relationship has no inverse.
    pub fn secondary_count_filter(
        &self,
        relationship: &RelationshipAttribute,
        left_id: &ScalarValue,
        secondary_filter: Option<FilterExpression>,
    ) -> Option<FilterExpression> {
        let inverse = self.graph.inverse_of(relationship)?;
        let left_type = self.graph.find_resource_type(&relationship.left_type)?;
        let id_literal = QueryValue::Literal(LiteralConstant::new(left_id.clone(), id_to_string(left_id)));
        let link = if inverse.is_to_one() {
            FilterExpression::equals(
                QueryValue::Field(ResourceFieldChain::new(vec![
                    FieldRef::Relationship(inverse.clone()),
                    FieldRef::Attribute(left_type.id_attribute().clone()),
                ])),
                id_literal,
            )
        } else {
            FilterExpression::Has {
                target: ResourceFieldChain::single(FieldRef::Relationship(inverse.clone())),
                filter: Some(Box::new(FilterExpression::equals(
                    QueryValue::Field(ResourceFieldChain::single(FieldRef::Attribute(
                        left_type.id_attribute().clone(),
                    ))),
                    id_literal,
                ))),
            }
        };
        FilterExpression::and_all([link].into_iter().chain(secondary_filter))
    }

    /// Top-level filter for counting the resources a collection request matches.
    pub fn top_filter(&self, layer: &QueryLayer) -> Option<FilterExpression> {
        layer.filter.clone()
    }

    fn root_include(&self, constraints: &[ExpressionInScope], root: &ResourceType) -> IncludeExpression {
        let requested = constraints
            .iter()
            .filter(|c| c.scope.is_none())
            .find_map(|c| match &c.expression {
                QueryExpression::Include(include) => Some(include.clone()),
                _ => None,
            })
            .unwrap_or_default();
        self.definitions.get(&root.public_name).on_apply_includes(requested)
    }

    fn compose_layer(
        &self,
        path: &[Arc<RelationshipAttribute>],
        resource_type: &Arc<ResourceType>,
        includes: &[IncludeElementExpression],
        constraints: &[ExpressionInScope],
        fields: &SparseFieldTable,
        is_collection: bool,
    ) -> QueryLayer {
        let definition = self.definitions.get(&resource_type.public_name);
        let in_scope = || constraints.iter().filter(|c| c.applies_to(path));

        let requested_filter = FilterExpression::and_all(in_scope().filter_map(|c| match &c.expression {
            QueryExpression::Filter(f) => Some(f.clone()),
            _ => None,
        }));
        let requested_sort = in_scope().find_map(|c| match &c.expression {
            QueryExpression::Sort(s) => Some(s.clone()),
            _ => None,
        });
        let requested_page = in_scope().find_map(|c| match &c.expression {
            QueryExpression::Pagination(p) => Some(*p),
            _ => None,
        });

        let mut layer = QueryLayer::new(resource_type.clone());
        layer.filter = definition.on_apply_filter(requested_filter);
        if is_collection {
            layer.sort = definition
                .on_apply_sort(requested_sort)
                .or_else(|| Some(SortExpression::by_id(resource_type)));
            let default_page = PaginationExpression::new(1, self.options.default_page_size);
            layer.pagination = definition.on_apply_pagination(Some(requested_page.unwrap_or(default_page)));
        }

        let mut selection = FieldSelection::default();
        for concrete in self.graph.concrete_types_of(&resource_type.public_name) {
            let selectors = selection.get_or_add(&concrete.public_name);
            let sparse = self
                .definitions
                .get(&concrete.public_name)
                .on_apply_sparse_field_set(fields.get(&concrete.public_name).cloned());
            if let Some(set) = sparse {
                selectors.include_attribute(concrete.id_attribute());
                for field in &set.fields {
                    match field {
                        FieldRef::Attribute(a) => selectors.include_attribute(a),
                        FieldRef::Relationship(r) => selectors.include_relationship(r, None),
                    }
                }
            }
            for element in includes {
                let Some(relationship) = concrete.find_relationship(&element.relationship.public_name) else {
                    continue;
                };
                let Ok(right) = self.graph.get_resource_type(&relationship.right_type) else {
                    tracing::error!(relationship = %relationship.public_name, "relationship target missing from resource graph");
                    continue;
                };
                let mut nested_path = path.to_vec();
                nested_path.push(relationship.clone());
                let mut nested = self.compose_layer(
                    &nested_path,
                    right,
                    &element.children,
                    constraints,
                    fields,
                    relationship.is_to_many(),
                );
                if !element.children.is_empty() {
                    nested.include = Some(IncludeExpression {
                        elements: element.children.clone(),
                    });
                }
                selectors.include_relationship(relationship, Some(nested));
            }
        }
        layer.selection = Some(selection);
        layer
    }
}

fn root_fields(constraints: &[ExpressionInScope]) -> SparseFieldTable {
    constraints
        .iter()
        .find_map(|c| match &c.expression {
            QueryExpression::SparseFieldTable(table) => Some(table.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn id_filter(resource_type: &ResourceType, id: &ScalarValue) -> FilterExpression {
    FilterExpression::equals(
        QueryValue::Field(ResourceFieldChain::single(FieldRef::Attribute(
            resource_type.id_attribute().clone(),
        ))),
        QueryValue::Literal(LiteralConstant::new(id.clone(), id_to_string(id))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryStringReader;
    use crate::queries::definition::ResourceDefinition;
    use crate::testing;

    fn constraints(graph: &ResourceGraph, options: &JsonApiOptions, root: &Arc<ResourceType>, raw: &str) -> Vec<ExpressionInScope> {
        QueryStringReader::new(graph, options, root.clone(), EndpointKind::Collection)
            .read(raw)
            .unwrap()
    }

    #[test]
    fn collection_gets_default_sort_and_page() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let registry = ResourceDefinitionRegistry::new();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let layer = QueryLayerComposer::new(&graph, &options, &registry).compose_from_constraints(&[], &posts, EndpointKind::Collection);
        assert_eq!(layer.sort.as_ref().map(ToString::to_string).as_deref(), Some("id"));
        assert_eq!(layer.pagination, Some(PaginationExpression::new(1, Some(10))));
        assert!(layer.filter.is_none());
        assert!(layer.include.is_none());
    }

    #[test]
    fn includes_become_nested_layers_with_scoped_constraints() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let registry = ResourceDefinitionRegistry::new();
        let blogs = graph.get_resource_type("blogs").unwrap().clone();
        let parsed = constraints(
            &graph,
            &options,
            &blogs,
            "include=posts.author,owner&filter[posts]=equals(caption,'x')&sort[posts]=-caption&page[size]=posts:3",
        );
        let layer = QueryLayerComposer::new(&graph, &options, &registry).compose_from_constraints(&parsed, &blogs, EndpointKind::Collection);
        let selectors = layer.selectors_for("blogs").unwrap();
        let posts_layer = selectors.get("posts").and_then(|s| s.layer.as_ref()).unwrap();
        assert_eq!(posts_layer.filter.as_ref().unwrap().to_string(), "equals(caption,'x')");
        assert_eq!(posts_layer.sort.as_ref().unwrap().to_string(), "-caption");
        assert_eq!(posts_layer.pagination, Some(PaginationExpression::new(1, Some(3))));
        let author_layer = posts_layer
            .selectors_for("blogPosts")
            .and_then(|s| s.get("author"))
            .and_then(|s| s.layer.as_ref())
            .unwrap();
        assert!(author_layer.sort.is_none(), "to-one layers are not sorted");
        assert!(author_layer.pagination.is_none());
        let owner_layer = selectors.get("owner").and_then(|s| s.layer.as_ref()).unwrap();
        assert_eq!(owner_layer.resource_type.public_name, "webAccounts");
    }

    #[test]
    fn sparse_fieldset_always_selects_id() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let registry = ResourceDefinitionRegistry::new();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let parsed = constraints(&graph, &options, &posts, "fields[blogPosts]=author");
        let layer = QueryLayerComposer::new(&graph, &options, &registry).compose_from_constraints(&parsed, &posts, EndpointKind::Collection);
        let names: Vec<_> = layer
            .selectors_for("blogPosts")
            .unwrap()
            .iter()
            .map(|s| s.field.public_name().to_string())
            .collect();
        assert_eq!(names, vec!["id", "author"]);
    }

    struct HideDrafts;

    impl ResourceDefinition for HideDrafts {
        fn on_apply_filter(&self, existing: Option<FilterExpression>) -> Option<FilterExpression> {
            let graph = testing::blog_graph();
            let draft = testing::parse_filter(&graph, "blogPosts", "not(equals(caption,'draft'))");
            FilterExpression::and_all(existing.into_iter().chain([draft]))
        }
    }

    #[test]
    fn definition_filter_is_anded_with_request_filter() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let registry = ResourceDefinitionRegistry::new().register("blogPosts", Arc::new(HideDrafts));
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let parsed = constraints(&graph, &options, &posts, "filter=equals(caption,'a')");
        let layer = QueryLayerComposer::new(&graph, &options, &registry).compose_from_constraints(&parsed, &posts, EndpointKind::Collection);
        assert_eq!(
            layer.filter.unwrap().to_string(),
            "and(equals(caption,'a'),not(equals(caption,'draft')))"
        );
    }

    #[test]
    fn get_by_id_filters_on_id_without_paging() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let registry = ResourceDefinitionRegistry::new();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let layer = QueryLayerComposer::new(&graph, &options, &registry).compose_for_get_by_id(
            &ScalarValue::Integer(7),
            &posts,
            TopFieldSelection::OnlyIdAttribute,
            &[],
        );
        assert_eq!(layer.filter.unwrap().to_string(), "equals(id,'7')");
        assert!(layer.sort.is_none() && layer.pagination.is_none());
        let names: Vec<_> = layer.selection.unwrap().get("blogPosts").unwrap().iter().map(|s| s.field.public_name().to_string()).collect();
        assert_eq!(names, vec!["id"]);
    }

    #[test]
    fn secondary_layer_wraps_relationship() {
        let graph = testing::blog_graph();
        let options = JsonApiOptions::default();
        let registry = ResourceDefinitionRegistry::new();
        let blogs = graph.get_resource_type("blogs").unwrap().clone();
        let posts_rel = graph.get_relationship("blogs", "posts").unwrap().clone();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let parsed = constraints(&graph, &options, &posts, "sort=caption&include=author");
        let composer = QueryLayerComposer::new(&graph, &options, &registry);
        let layer = composer
            .compose_for_secondary(&blogs, &ScalarValue::Integer(1), &posts_rel, &parsed)
            .unwrap();
        assert_eq!(layer.filter.as_ref().unwrap().to_string(), "equals(id,'1')");
        assert_eq!(layer.include.as_ref().unwrap().to_string(), "posts.author");
        let nested = layer.selectors_for("blogs").and_then(|s| s.get("posts")).and_then(|s| s.layer.as_ref()).unwrap();
        assert_eq!(nested.sort.as_ref().unwrap().to_string(), "caption");
        assert!(nested.selectors_for("blogPosts").unwrap().get("author").is_some());

        let count = composer
            .secondary_count_filter(&posts_rel, &ScalarValue::Integer(1), None)
            .unwrap();
        assert_eq!(count.to_string(), "equals(parent.id,'1')");
        let labels = graph.get_relationship("blogPosts", "labels").unwrap();
        let count = composer.secondary_count_filter(labels, &ScalarValue::Integer(4), None).unwrap();
        assert_eq!(count.to_string(), "has(posts,equals(id,'4'))");
        let reviewer = graph.get_relationship("blogPosts", "reviewer").unwrap();
        assert!(composer.secondary_count_filter(reviewer, &ScalarValue::Integer(4), None).is_none());
    }
}

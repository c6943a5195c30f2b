//! JsonApiService: the read and write entry points the HTTP handlers call.

use super::context::JsonApiContext;
use crate::atomic::{AtomicOperationsProcessor, AtomicResultsDocument, ErrorCollector};
use crate::error::AppError;
use crate::graph::{RelationshipAttribute, ResourceType};
use crate::queries::{QueryLayer, QueryLayerComposer, QueryLayerIncludeConverter, TopFieldSelection};
use crate::query::expressions::{
    ExpressionInScope, IncludeExpression, PaginationExpression, QueryExpression, SparseFieldTable,
};
use crate::query::{EndpointKind, QueryStringReader};
use crate::serialization::{Document, LinkBuilder, PrimaryNodes, ResponseModelAdapter};
use crate::store::{RelationshipValue, ResourceSet, ResourceStore};
use crate::value::ScalarValue;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A composed query layer plus what serialization needs from the request.
#[derive(Clone, Debug)]
pub struct PreparedQuery {
    /// Layer with includes already converted to selections.
    pub layer: QueryLayer,
    pub include: IncludeExpression,
    pub fields: SparseFieldTable,
    pub pagination: Option<PaginationExpression>,
}

/// Where a request came from, for building links.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestOrigin<'a> {
    /// Scheme and authority, e.g. `http://localhost:8080`.
    pub base_url: Option<&'a str>,
    pub raw_query: Option<&'a str>,
}

#[derive(Clone)]
pub struct JsonApiService {
    context: JsonApiContext,
    store: Arc<dyn ResourceStore>,
}

impl JsonApiService {
    pub fn new(context: JsonApiContext, store: Arc<dyn ResourceStore>) -> Self {
        JsonApiService { context, store }
    }

    pub fn context(&self) -> &JsonApiContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Parse the query string of a primary endpoint and compose its layer.
    pub fn parse_and_build_query_layer(
        &self,
        resource_type: &str,
        raw_query: &str,
        endpoint: EndpointKind,
    ) -> Result<PreparedQuery, AppError> {
        let resource_type = self.resource_type(resource_type)?;
        let constraints = self.read_constraints(&resource_type, raw_query, endpoint)?;
        let layer = self
            .composer()
            .compose_from_constraints(&constraints, &resource_type, endpoint);
        Ok(self.prepare(layer, &constraints))
    }

    /// `GET /{type}`
    pub async fn get_resources(
        &self,
        resource_type: &str,
        origin: RequestOrigin<'_>,
        cancel: &CancellationToken,
    ) -> Result<Document, AppError> {
        let prepared = self.parse_and_build_query_layer(resource_type, origin.raw_query.unwrap_or(""), EndpointKind::Collection)?;
        let resource_type = prepared.layer.resource_type.clone();

        let mut set = self.store.query(&prepared.layer, cancel).await?;
        if self.context.options.include_total_resource_count {
            let filter = self.composer().top_filter(&prepared.layer);
            set.total = Some(self.store.count(&resource_type, filter.as_ref(), cancel).await?);
        }
        tracing::debug!(resource_type = %resource_type.public_name, returned = set.primary().len(), "resources loaded");

        let mut document = self.serialize_to_document(
            &set,
            PrimaryNodes::Many(set.primary()),
            &prepared.include,
            &prepared.fields,
            origin.base_url,
        )?;
        document.links = Some(self.links(origin.base_url).top_level(
            &format!("/{}", resource_type.public_name),
            origin.raw_query,
            prepared.pagination.as_ref(),
            set.total,
            set.primary().len(),
        ));
        Ok(document)
    }

    /// `GET /{type}/{id}`
    pub async fn get_resource(
        &self,
        resource_type: &str,
        id: &str,
        origin: RequestOrigin<'_>,
        cancel: &CancellationToken,
    ) -> Result<Document, AppError> {
        let resource_type = self.resource_type(resource_type)?;
        let id_value = parse_id(&resource_type, id)?;
        let constraints = self.read_constraints(&resource_type, origin.raw_query.unwrap_or(""), EndpointKind::Single)?;
        let layer = self.composer().compose_for_get_by_id(
            &id_value,
            &resource_type,
            TopFieldSelection::PreserveExisting,
            &constraints,
        );
        let prepared = self.prepare(layer, &constraints);

        let set = self.store.query(&prepared.layer, cancel).await?;
        let Some(&primary) = set.primary().first() else {
            return Err(AppError::resource_not_found(&resource_type.public_name, id));
        };
        let mut document = self.serialize_to_document(
            &set,
            PrimaryNodes::Single(Some(primary)),
            &prepared.include,
            &prepared.fields,
            origin.base_url,
        )?;
        document.links = Some(self.links(origin.base_url).top_level(
            &format!("/{}/{}", resource_type.public_name, id),
            origin.raw_query,
            None,
            None,
            1,
        ));
        Ok(document)
    }

    /// `GET /{type}/{id}/{relationship}`: the resources a relationship points at.
    pub async fn get_secondary(
        &self,
        resource_type: &str,
        id: &str,
        relationship: &str,
        origin: RequestOrigin<'_>,
        cancel: &CancellationToken,
    ) -> Result<Document, AppError> {
        let primary_type = self.resource_type(resource_type)?;
        let relationship = self.relationship(&primary_type, relationship)?;
        let secondary_type = self.resource_type(&relationship.right_type)?;
        let id_value = parse_id(&primary_type, id)?;
        let endpoint = if relationship.is_to_many() {
            EndpointKind::Collection
        } else {
            EndpointKind::Single
        };
        let constraints = self.read_constraints(&secondary_type, origin.raw_query.unwrap_or(""), endpoint)?;

        let composer = self.composer();
        let layer = composer.compose_for_secondary(&primary_type, &id_value, &relationship, &constraints)?;
        let secondary_layer = secondary_layer(&layer, &primary_type, &relationship).cloned();
        let mut prepared = self.prepare(layer, &constraints);
        // serialization starts at the secondary resources
        prepared.include = IncludeExpression {
            elements: prepared
                .include
                .elements
                .into_iter()
                .flat_map(|e| e.children)
                .collect(),
        };

        let mut set = self.store.query(&prepared.layer, cancel).await?;
        let Some(&owner) = set.primary().first() else {
            return Err(AppError::resource_not_found(&primary_type.public_name, id));
        };
        let targets = set
            .node(owner)
            .relationships
            .get(&relationship.public_name)
            .cloned()
            .unwrap_or_else(|| empty_value(&relationship));

        if relationship.is_to_many() && self.context.options.include_total_resource_count {
            let secondary_filter = secondary_layer.as_ref().and_then(|l| l.filter.clone());
            if let Some(filter) = composer.secondary_count_filter(&relationship, &id_value, secondary_filter) {
                set.total = Some(self.store.count(&secondary_type, Some(&filter), cancel).await?);
            }
        }

        let pagination = secondary_layer.as_ref().and_then(|l| l.pagination.clone());
        let (mut document, returned) = match &targets {
            RelationshipValue::ToOne(node) => (
                self.serialize_to_document(
                    &set,
                    PrimaryNodes::Single(*node),
                    &prepared.include,
                    &prepared.fields,
                    origin.base_url,
                )?,
                usize::from(node.is_some()),
            ),
            RelationshipValue::ToMany(nodes) => (
                self.serialize_to_document(
                    &set,
                    PrimaryNodes::Many(nodes),
                    &prepared.include,
                    &prepared.fields,
                    origin.base_url,
                )?,
                nodes.len(),
            ),
        };
        document.links = Some(self.links(origin.base_url).top_level(
            &format!("/{}/{}/{}", primary_type.public_name, id, relationship.public_name),
            origin.raw_query,
            pagination.as_ref(),
            set.total,
            returned,
        ));
        Ok(document)
    }

    /// `POST /operations`
    pub async fn execute_atomic_batch(
        &self,
        body: &Value,
        origin: RequestOrigin<'_>,
        cancel: &CancellationToken,
    ) -> Result<AtomicResultsDocument, AppError> {
        let mut processor =
            AtomicOperationsProcessor::new(&self.context, self.store.as_ref()).with_base_url(origin.base_url);
        let results = processor.process(body, cancel).await?;
        Ok(AtomicResultsDocument { results })
    }

    pub fn serialize_to_document(
        &self,
        set: &ResourceSet,
        primary: PrimaryNodes<'_>,
        include: &IncludeExpression,
        fields: &SparseFieldTable,
        base_url: Option<&str>,
    ) -> Result<Document, AppError> {
        ResponseModelAdapter::new(&self.context.graph, self.links(base_url)).convert(set, primary, include, fields)
    }

    fn composer(&self) -> QueryLayerComposer<'_> {
        QueryLayerComposer::new(&self.context.graph, &self.context.options, &self.context.definitions)
    }

    fn links<'a>(&'a self, base_url: Option<&'a str>) -> LinkBuilder<'a> {
        LinkBuilder::new(&self.context.options, base_url)
    }

    fn resource_type(&self, public_name: &str) -> Result<Arc<ResourceType>, AppError> {
        self.context
            .graph
            .find_resource_type(public_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Resource type '{}' does not exist.", public_name)))
    }

    fn relationship(&self, resource_type: &ResourceType, name: &str) -> Result<Arc<RelationshipAttribute>, AppError> {
        resource_type.find_relationship(name).cloned().ok_or_else(|| {
            AppError::NotFound(format!(
                "Resource type '{}' does not contain a relationship named '{}'.",
                resource_type.public_name, name
            ))
        })
    }

    fn read_constraints(
        &self,
        resource_type: &Arc<ResourceType>,
        raw_query: &str,
        endpoint: EndpointKind,
    ) -> Result<Vec<ExpressionInScope>, AppError> {
        QueryStringReader::new(&self.context.graph, &self.context.options, resource_type.clone(), endpoint)
            .read(raw_query)
            .map_err(|errors| {
                let mut collector = ErrorCollector::new(self.context.options.max_model_errors);
                collector.extend(AppError::QueryParse(errors).to_error_objects());
                AppError::Validation(collector.into_errors())
            })
    }

    /// Capture the include tree and fieldsets, then convert includes to selections.
    fn prepare(&self, mut layer: QueryLayer, constraints: &[ExpressionInScope]) -> PreparedQuery {
        let include = layer.include.clone().unwrap_or_default();
        let pagination = layer.pagination.clone();
        let fields = constraints
            .iter()
            .find_map(|c| match &c.expression {
                QueryExpression::SparseFieldTable(table) => Some(table.clone()),
                _ => None,
            })
            .unwrap_or_default();
        QueryLayerIncludeConverter::new(&self.context.graph).convert_includes_to_selections(&mut layer);
        PreparedQuery {
            layer,
            include,
            fields,
            pagination,
        }
    }
}

fn parse_id(resource_type: &ResourceType, id: &str) -> Result<ScalarValue, AppError> {
    Ok(ScalarValue::parse_as(id, resource_type.id_type.attr_type())?)
}

/// Nested layer that loads the relationship of a secondary endpoint.
fn secondary_layer<'l>(
    layer: &'l QueryLayer,
    primary: &ResourceType,
    relationship: &RelationshipAttribute,
) -> Option<&'l QueryLayer> {
    layer
        .selectors_for(&primary.public_name)
        .and_then(|selectors| selectors.get(&relationship.public_name))
        .and_then(|selected| selected.layer.as_ref())
}

fn empty_value(relationship: &RelationshipAttribute) -> RelationshipValue {
    if relationship.is_to_one() {
        RelationshipValue::ToOne(None)
    } else {
        RelationshipValue::ToMany(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::ResourceDefinitionRegistry;
    use crate::store::{InMemoryStore, ResourceData};
    use crate::serialization::PrimaryData;
    use crate::testing;
    use crate::value::ResourceKey;
    use crate::config::JsonApiOptions;
    use serde_json::json;

    async fn blog_service(options: JsonApiOptions) -> JsonApiService {
        testing::init_logging();
        let context = JsonApiContext::new(testing::blog_graph(), options, ResourceDefinitionRegistry::new()).unwrap();
        let store = InMemoryStore::new(context.graph.clone());
        let mut tx = store.begin().await.unwrap();
        let labels = context.graph.get_resource_type("labels").unwrap().clone();
        let posts = context.graph.get_resource_type("blogPosts").unwrap().clone();
        for name in ["red", "green"] {
            let mut data = ResourceData::default();
            data.attributes.insert("name".into(), ScalarValue::from(name));
            tx.create(&labels, &data).await.unwrap();
        }
        for caption in ["B", "A", "C"] {
            let mut data = ResourceData::default();
            data.attributes.insert("caption".into(), ScalarValue::from(caption));
            data.relationships.insert(
                "labels".into(),
                crate::store::RelationshipTargets::ToMany(vec![ResourceKey::new("labels", 1)]),
            );
            tx.create(&posts, &data).await.unwrap();
        }
        tx.commit().await.unwrap();
        JsonApiService::new(context, Arc::new(store))
    }

    fn captions(document: &Document) -> Vec<Value> {
        document
            .primary_resources()
            .iter()
            .map(|r| r.attributes.as_ref().unwrap()["caption"].clone())
            .collect()
    }

    #[tokio::test]
    async fn collection_honours_sort_and_total() {
        let service = blog_service(JsonApiOptions {
            include_total_resource_count: true,
            default_page_size: Some(2),
            ..Default::default()
        })
        .await;
        let origin = RequestOrigin {
            base_url: None,
            raw_query: Some("sort=caption"),
        };
        let document = service
            .get_resources("blogPosts", origin, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(captions(&document), vec![json!("A"), json!("B")]);
        assert_eq!(document.meta.as_ref().unwrap()["total"], json!(3));
        let links = document.links.unwrap();
        assert!(links.next.unwrap().contains("page%5Bnumber%5D=2"));
    }

    #[tokio::test]
    async fn single_resource_and_missing_resource() {
        let service = blog_service(JsonApiOptions::default()).await;
        let cancel = CancellationToken::new();
        let document = service
            .get_resource("blogPosts", "2", RequestOrigin::default(), &cancel)
            .await
            .unwrap();
        assert!(matches!(document.data, Some(PrimaryData::Single(Some(_)))));
        assert_eq!(captions(&document), vec![json!("A")]);

        let error = service
            .get_resource("blogPosts", "99", RequestOrigin::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(error.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn secondary_endpoint_returns_relationship_targets() {
        let service = blog_service(JsonApiOptions::default()).await;
        let document = service
            .get_secondary("labels", "1", "posts", RequestOrigin::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(document.primary_resources().len(), 3);
        assert!(document
            .primary_resources()
            .iter()
            .all(|r| r.resource_type == "blogPosts"));

        let error = service
            .get_secondary("labels", "1", "nope", RequestOrigin::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_query_string_is_rejected() {
        let service = blog_service(JsonApiOptions::default()).await;
        let origin = RequestOrigin {
            base_url: None,
            raw_query: Some("sort=unknownField"),
        };
        let error = service
            .get_resources("blogPosts", origin, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.status(), axum::http::StatusCode::BAD_REQUEST);
        let errors = error.to_error_objects();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].title, "The specified sort is invalid.");
    }

    #[tokio::test]
    async fn query_string_errors_stop_at_the_model_error_limit() {
        let service = blog_service(JsonApiOptions {
            max_model_errors: 2,
            ..Default::default()
        })
        .await;
        let origin = RequestOrigin {
            base_url: None,
            raw_query: Some("a=1&b=2&c=3"),
        };
        let error = service
            .get_resources("blogPosts", origin, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(error.status(), axum::http::StatusCode::BAD_REQUEST);
        let errors = error.to_error_objects();
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors[0].detail.as_deref(),
            Some("The maximum number of allowed model errors has been reached.")
        );
        assert_eq!(errors[1].parameter(), Some("a"));
        assert_eq!(errors[2].parameter(), Some("b"));
    }
}

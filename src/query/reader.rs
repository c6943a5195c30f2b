//! Splits a raw query string into parameters and dispatches each to its parser.

use crate::config::JsonApiOptions;
use crate::error::QueryParseError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::*;
use crate::query::parsing::pagination::PageParameter;
use crate::query::parsing::{
    FilterParser, IncludeParser, PaginationParser, QueryStringParameterScopeParser, SortParser, SparseFieldSetParser,
    SparseFieldTypeParser,
};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

const COLLECTION_ONLY: &str =
    "This query string parameter can only be used on a collection of resources (not on a single resource).";

/// Whether the request addresses a collection or a single resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    Collection,
    Single,
}

#[derive(Default)]
struct PageValues {
    number: Option<u32>,
    size: Option<u32>,
}

pub struct QueryStringReader<'a> {
    graph: &'a ResourceGraph,
    options: &'a JsonApiOptions,
    resource_type: Arc<ResourceType>,
    endpoint: EndpointKind,
}

impl<'a> QueryStringReader<'a> {
    pub fn new(
        graph: &'a ResourceGraph,
        options: &'a JsonApiOptions,
        resource_type: Arc<ResourceType>,
        endpoint: EndpointKind,
    ) -> Self {
        QueryStringReader {
            graph,
            options,
            resource_type,
            endpoint,
        }
    }

    /// Parse every parameter, collecting errors instead of stopping at the first. Capping the list
    /// at `max_model_errors` is left to the caller's `ErrorCollector`.
    pub fn read(&self, raw: &str) -> Result<Vec<ExpressionInScope>, Vec<QueryParseError>> {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut errors = Vec::new();
        let mut seen: IndexSet<String> = IndexSet::new();

        let mut filters: IndexMap<Option<ResourceFieldChain>, Vec<FilterExpression>> = IndexMap::new();
        let mut sorts: IndexMap<Option<ResourceFieldChain>, SortExpression> = IndexMap::new();
        let mut include: Option<IncludeExpression> = None;
        let mut fields = SparseFieldTable::default();
        let mut pages: IndexMap<Option<ResourceFieldChain>, PageValues> = IndexMap::new();

        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let name = name.into_owned();
            let value = value.into_owned();
            let outcome = self.read_parameter(&name, &value, &mut seen, &mut filters, &mut sorts, &mut include, &mut fields, &mut pages);
            if let Err(e) = outcome {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "query string rejected");
            return Err(errors);
        }

        let mut expressions = Vec::new();
        if let Some(include) = include {
            expressions.push(ExpressionInScope::new(None, QueryExpression::Include(include)));
        }
        for (scope, terms) in filters {
            if let Some(filter) = FilterExpression::and_all(terms) {
                expressions.push(ExpressionInScope::new(scope, QueryExpression::Filter(filter)));
            }
        }
        for (scope, sort) in sorts {
            expressions.push(ExpressionInScope::new(scope, QueryExpression::Sort(sort)));
        }
        if !fields.is_empty() {
            expressions.push(ExpressionInScope::new(None, QueryExpression::SparseFieldTable(fields)));
        }
        for (scope, page) in pages {
            let size = match page.size {
                Some(0) => None,
                Some(n) => Some(n),
                None => self.options.default_page_size,
            };
            let pagination = PaginationExpression::new(page.number.unwrap_or(1), size);
            expressions.push(ExpressionInScope::new(scope, QueryExpression::Pagination(pagination)));
        }
        Ok(expressions)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_parameter(
        &self,
        name: &str,
        value: &str,
        seen: &mut IndexSet<String>,
        filters: &mut IndexMap<Option<ResourceFieldChain>, Vec<FilterExpression>>,
        sorts: &mut IndexMap<Option<ResourceFieldChain>, SortExpression>,
        include: &mut Option<IncludeExpression>,
        fields: &mut SparseFieldTable,
        pages: &mut IndexMap<Option<ResourceFieldChain>, PageValues>,
    ) -> Result<(), QueryParseError> {
        let rt = &self.resource_type;
        let is_filter = name == "filter" || name.starts_with("filter[");
        let is_sort = name == "sort" || name.starts_with("sort[");
        let is_page = name == "page[size]" || name == "page[number]";
        let is_fields = name.starts_with("fields[");
        let known = is_filter || is_sort || is_page || is_fields || name == "include";

        if !known {
            if self.options.allow_unknown_query_string_parameters {
                return Ok(());
            }
            return Err(QueryParseError::for_parameter(
                name,
                format!("Query string parameter '{}' is unknown.", name),
            ));
        }
        if !is_filter && !seen.insert(name.to_string()) {
            return Err(QueryParseError::for_parameter(
                name,
                format!("The query string parameter '{}' can only be specified once.", name),
            ));
        }
        if value.is_empty() && !is_fields {
            return Err(QueryParseError::for_parameter(
                name,
                format!("Missing value for '{}' query string parameter.", name),
            ));
        }

        if is_filter || is_sort {
            let scope = QueryStringParameterScopeParser::new(self.graph).parse(name, rt)?.scope;
            if scope.is_none() && self.endpoint == EndpointKind::Single {
                return Err(QueryParseError::for_parameter(name, COLLECTION_ONLY));
            }
            let scope_type = self.scope_type(scope.as_ref());
            if is_filter {
                let filter = FilterParser::new(self.graph).parse(name, value, &scope_type)?;
                filters.entry(scope).or_default().push(filter);
            } else {
                let sort = SortParser::new(self.graph).parse(name, value, &scope_type)?;
                sorts.insert(scope, sort);
            }
        } else if name == "include" {
            *include = Some(IncludeParser::new(self.graph, self.options.maximum_include_depth).parse(name, value, rt)?);
        } else if is_fields {
            let field_type = SparseFieldTypeParser::new(self.graph).parse(name)?;
            let set = SparseFieldSetParser::new(self.graph).parse(name, value, &field_type)?;
            fields.table.insert(field_type.public_name.clone(), set);
        } else {
            let kind = if name == "page[size]" {
                PageParameter::Size
            } else {
                PageParameter::Number
            };
            let parsed = PaginationParser::new(self.graph, self.options.maximum_page_size, self.options.maximum_page_number)
                .parse(name, value, rt, kind)?;
            for element in parsed.elements {
                if element.scope.is_none() && self.endpoint == EndpointKind::Single {
                    return Err(QueryParseError::new(name, value, element.position, COLLECTION_ONLY));
                }
                let entry = pages.entry(element.scope).or_default();
                match kind {
                    PageParameter::Size => entry.size = Some(element.value),
                    PageParameter::Number => entry.number = Some(element.value),
                }
            }
        }
        Ok(())
    }

    /// Resource type at the end of a scope chain; the request type when unscoped.
    fn scope_type(&self, scope: Option<&ResourceFieldChain>) -> Arc<ResourceType> {
        scope
            .and_then(|chain| chain.relationships().last())
            .and_then(|r| self.graph.find_resource_type(&r.right_type))
            .cloned()
            .unwrap_or_else(|| self.resource_type.clone())
    }
}

//! `fields[type]` parameter: the bracketed resource type and the comma-separated field list.

use super::{TokenKind, TokenStream};
use crate::error::QueryParseError;
use crate::graph::{FieldRef, ResourceGraph, ResourceType};
use crate::query::expressions::SparseFieldSetExpression;
use std::sync::Arc;

/// Parses the parameter name `fields[blogPosts]` into a resource type.
pub struct SparseFieldTypeParser<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> SparseFieldTypeParser<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        SparseFieldTypeParser { graph }
    }

    pub fn parse(&self, parameter: &str) -> Result<Arc<ResourceType>, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, parameter)?;
        match ts.next().map(|t| t.kind) {
            Some(TokenKind::Text(t)) if t == "fields" => {}
            _ => return Err(ts.error(0, "'fields' expected.")),
        }
        ts.expect(TokenKind::OpenBracket)?;
        let (name, position) = ts.expect_text("Resource type expected.")?;
        let resource_type = self
            .graph
            .find_resource_type(&name)
            .cloned()
            .ok_or_else(|| ts.error(position, format!("Resource type '{}' does not exist.", name)))?;
        ts.expect(TokenKind::CloseBracket)?;
        ts.expect_end()?;
        Ok(resource_type)
    }
}

/// Parses the value `caption,author` against a resource type.
pub struct SparseFieldSetParser<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> SparseFieldSetParser<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        SparseFieldSetParser { graph }
    }

    /// An empty value selects no fields besides the id.
    pub fn parse(
        &self,
        parameter: &str,
        source: &str,
        resource_type: &Arc<ResourceType>,
    ) -> Result<SparseFieldSetExpression, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, source)?;
        let mut set = SparseFieldSetExpression::default();
        if ts.is_at_end() {
            return Ok(set);
        }
        loop {
            let (name, position) = ts.expect_text("Field name expected.")?;
            let field = resource_type.find_field(&name).ok_or_else(|| {
                ts.error(
                    position,
                    format!(
                        "Field '{}' does not exist on resource type '{}'.",
                        name, resource_type.public_name
                    ),
                )
            })?;
            if let FieldRef::Attribute(attr) = &field {
                if !attr.capabilities.view {
                    return Err(ts.error(
                        position,
                        format!("Retrieving the attribute '{}' is not allowed.", attr.public_name),
                    ));
                }
            }
            set.fields.insert(field);
            if !ts.accept(&TokenKind::Comma) {
                break;
            }
        }
        ts.expect_end()?;
        Ok(set)
    }
}

//! `include` parameter: comma-separated relationship paths, merged into a tree.

use super::{FieldChainPattern, TokenKind, TokenStream};
use crate::error::QueryParseError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::IncludeExpression;
use std::sync::Arc;

pub struct IncludeParser<'a> {
    graph: &'a ResourceGraph,
    maximum_depth: Option<u32>,
}

impl<'a> IncludeParser<'a> {
    pub fn new(graph: &'a ResourceGraph, maximum_depth: Option<u32>) -> Self {
        IncludeParser { graph, maximum_depth }
    }

    pub fn parse(
        &self,
        parameter: &str,
        source: &str,
        resource_type: &Arc<ResourceType>,
    ) -> Result<IncludeExpression, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, source)?;
        let mut include = IncludeExpression::default();
        loop {
            let position = ts.position();
            let chain = ts.resolve_chain(resource_type, FieldChainPattern::RelationshipChain, "Relationship name expected.")?;
            let mut owner = resource_type.public_name.as_str();
            let path: Vec<_> = chain.relationships().cloned().collect();
            let mut offset = position;
            for relationship in &path {
                if !relationship.capabilities.include {
                    return Err(ts.error(
                        offset,
                        format!(
                            "Including the relationship '{}' on '{}' is not allowed.",
                            relationship.public_name, owner
                        ),
                    ));
                }
                owner = relationship.right_type.as_str();
                offset += relationship.public_name.chars().count() + 1;
            }
            if let Some(max) = self.maximum_depth {
                if path.len() > max as usize {
                    return Err(ts.error(
                        position,
                        format!(
                            "Including '{}' exceeds the maximum inclusion depth of {}.",
                            chain, max
                        ),
                    ));
                }
            }
            include.add_path(&path);
            if !ts.accept(&TokenKind::Comma) {
                break;
            }
        }
        ts.expect_end()?;
        Ok(include)
    }
}

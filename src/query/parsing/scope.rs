//! Parameter names with an optional bracketed scope: `filter`, `sort[posts.comments]`.

use super::{FieldChainPattern, TokenKind, TokenStream};
use crate::error::QueryParseError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::ResourceFieldChain;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryStringParameterScope {
    /// Parameter name without the scope, e.g. `sort`.
    pub name: String,
    pub scope: Option<ResourceFieldChain>,
}

pub struct QueryStringParameterScopeParser<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> QueryStringParameterScopeParser<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        QueryStringParameterScopeParser { graph }
    }

    /// Errors point into the parameter name itself.
    pub fn parse(&self, parameter: &str, resource_type: &Arc<ResourceType>) -> Result<QueryStringParameterScope, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, parameter)?;
        let (name, _) = ts.expect_text("Parameter name expected.")?;
        let scope = if ts.accept(&TokenKind::OpenBracket) {
            let chain = ts.resolve_chain(
                resource_type,
                FieldChainPattern::RelationshipChainEndingInToMany,
                "Scope expected.",
            )?;
            ts.expect(TokenKind::CloseBracket)?;
            Some(chain)
        } else {
            None
        };
        ts.expect_end()?;
        Ok(QueryStringParameterScope { name, scope })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn parses_nested_scope() {
        let graph = testing::blog_graph();
        let blogs = graph.get_resource_type("blogs").unwrap().clone();
        let parsed = QueryStringParameterScopeParser::new(&graph)
            .parse("sort[posts.comments]", &blogs)
            .unwrap();
        assert_eq!(parsed.name, "sort");
        assert_eq!(parsed.scope.map(|s| s.to_string()).as_deref(), Some("posts.comments"));
    }

    #[test]
    fn unknown_scope_points_into_name() {
        let graph = testing::blog_graph();
        let blogs = graph.get_resource_type("blogs").unwrap().clone();
        let err = QueryStringParameterScopeParser::new(&graph)
            .parse("filter[nope]", &blogs)
            .unwrap_err();
        assert_eq!(err.position, 7);
        assert_eq!(err.text, "filter[nope]");
        assert_eq!(err.message, "Field 'nope' does not exist on resource type 'blogs'.");
    }
}

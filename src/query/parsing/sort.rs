//! `sort` parameter: `-count(labels),author.userName,caption`.

use super::{FieldChainPattern, TokenKind, TokenStream};
use crate::error::QueryParseError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::{SortElement, SortExpression, SortTarget};
use std::sync::Arc;

pub struct SortParser<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> SortParser<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        SortParser { graph }
    }

    pub fn parse(
        &self,
        parameter: &str,
        source: &str,
        resource_type: &Arc<ResourceType>,
    ) -> Result<SortExpression, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, source)?;
        let mut elements = vec![parse_element(&mut ts, resource_type)?];
        while ts.accept(&TokenKind::Comma) {
            elements.push(parse_element(&mut ts, resource_type)?);
        }
        ts.expect_end()?;
        Ok(SortExpression { elements })
    }
}

fn parse_element(ts: &mut TokenStream<'_>, rt: &Arc<ResourceType>) -> Result<SortElement, QueryParseError> {
    let ascending = !ts.accept(&TokenKind::Minus);
    let position = ts.position();
    let is_count = matches!(
        (ts.peek(), ts.peek_at(1)),
        (Some(TokenKind::Text(t)), Some(TokenKind::OpenParen)) if t == "count"
    );
    let target = if is_count {
        ts.next();
        ts.expect(TokenKind::OpenParen)?;
        let chain = ts.resolve_chain(rt, FieldChainPattern::ToOneChainEndingInToMany, "Field name expected.")?;
        ts.expect(TokenKind::CloseParen)?;
        SortTarget::Count(chain)
    } else {
        let message = if ascending {
            "-, count function or field name expected."
        } else {
            "Count function or field name expected."
        };
        let chain = ts.resolve_chain(rt, FieldChainPattern::ToOneChainEndingInAttribute, message)?;
        if let Some(attr) = chain.attribute() {
            if !attr.capabilities.sort {
                return Err(ts.error(
                    position,
                    format!("Sorting on attribute '{}' is not allowed.", attr.public_name),
                ));
            }
        }
        SortTarget::Field(chain)
    };
    Ok(SortElement { target, ascending })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use test_case::test_case;

    fn parse(source: &str) -> Result<SortExpression, QueryParseError> {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        SortParser::new(&graph).parse("sort", source, &posts)
    }

    #[test_case("caption" ; "single")]
    #[test_case("-count(labels),author.userName,-id" ; "mixed")]
    fn round_trips(source: &str) {
        assert_eq!(parse(source).unwrap().to_string(), source);
    }

    #[test_case("", 0, "-, count function or field name expected." ; "empty")]
    #[test_case("caption,", 8, "-, count function or field name expected." ; "trailing comma")]
    #[test_case("-", 1, "Count function or field name expected." ; "lone minus")]
    #[test_case("caption,foo", 8, "Field 'foo' does not exist on resource type 'blogPosts'." ; "unknown field")]
    #[test_case("url", 0, "Sorting on attribute 'url' is not allowed." ; "not sortable")]
    #[test_case("comments", 0, "Field 'comments' on resource type 'blogPosts' is a relationship, but an attribute is expected." ; "relationship")]
    fn rejects(source: &str, position: usize, message: &str) {
        let err = parse(source).unwrap_err();
        assert_eq!(err.message, message);
        assert_eq!(err.position, position);
    }

    #[test]
    fn caret_text_marks_unknown_field() {
        let err = parse("caption,foo").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Field 'foo' does not exist on resource type 'blogPosts'. Failed at position 9: caption,^foo"
        );
    }
}

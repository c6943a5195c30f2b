//! `filter` parameter: `equals(author.name,'x')`, `and(...)`, `has(comments,...)`, `count(tags)`, ...

use super::{FieldChainPattern, TokenKind, TokenStream};
use crate::error::QueryParseError;
use crate::graph::{FieldRef, ResourceGraph, ResourceType};
use crate::query::expressions::*;
use crate::value::{AttrType, ScalarValue};
use std::sync::Arc;

pub struct FilterParser<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> FilterParser<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        FilterParser { graph }
    }

    pub fn parse(
        &self,
        parameter: &str,
        source: &str,
        resource_type: &Arc<ResourceType>,
    ) -> Result<FilterExpression, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, source)?;
        let filter = parse_filter(&mut ts, resource_type)?;
        ts.expect_end()?;
        Ok(filter)
    }
}

fn parse_filter(ts: &mut TokenStream<'_>, rt: &Arc<ResourceType>) -> Result<FilterExpression, QueryParseError> {
    let position = ts.position();
    let keyword = match (ts.peek(), ts.peek_at(1)) {
        (Some(TokenKind::Text(k)), Some(TokenKind::OpenParen)) => k.clone(),
        _ => return Err(ts.error(position, "Filter function expected.")),
    };
    if let Some(operator) = ComparisonOperator::from_keyword(&keyword) {
        ts.next();
        return parse_comparison(ts, rt, operator);
    }
    if let Some(kind) = TextMatchKind::from_keyword(&keyword) {
        ts.next();
        return parse_text_match(ts, rt, kind);
    }
    match keyword.as_str() {
        "and" | "or" => {
            ts.next();
            let operator = if keyword == "and" {
                LogicalOperator::And
            } else {
                LogicalOperator::Or
            };
            parse_logical(ts, rt, operator)
        }
        "not" => {
            ts.next();
            ts.expect(TokenKind::OpenParen)?;
            let inner = parse_filter(ts, rt)?;
            ts.expect(TokenKind::CloseParen)?;
            Ok(FilterExpression::Not(Box::new(inner)))
        }
        "any" => {
            ts.next();
            parse_any(ts, rt)
        }
        "has" => {
            ts.next();
            parse_has(ts, rt)
        }
        "isType" => {
            ts.next();
            parse_is_type(ts, rt)
        }
        _ => Err(ts.error(position, "Filter function expected.")),
    }
}

fn parse_logical(
    ts: &mut TokenStream<'_>,
    rt: &Arc<ResourceType>,
    operator: LogicalOperator,
) -> Result<FilterExpression, QueryParseError> {
    ts.expect(TokenKind::OpenParen)?;
    let mut terms = vec![parse_filter(ts, rt)?];
    ts.expect(TokenKind::Comma)?;
    terms.push(parse_filter(ts, rt)?);
    while ts.accept(&TokenKind::Comma) {
        terms.push(parse_filter(ts, rt)?);
    }
    ts.expect(TokenKind::CloseParen)?;
    Ok(FilterExpression::Logical { operator, terms })
}

fn parse_comparison(
    ts: &mut TokenStream<'_>,
    rt: &Arc<ResourceType>,
    operator: ComparisonOperator,
) -> Result<FilterExpression, QueryParseError> {
    ts.expect(TokenKind::OpenParen)?;

    let left_position = ts.position();
    let left = if is_count_call(ts) {
        QueryValue::Count(parse_count(ts, rt)?)
    } else if matches!(ts.peek(), Some(TokenKind::Text(_))) {
        let chain = ts.resolve_chain(
            rt,
            FieldChainPattern::ToOneChainEndingInAttributeOrToOne,
            "Count function or field name expected.",
        )?;
        check_filterable(ts, &chain, left_position)?;
        QueryValue::Field(chain)
    } else {
        return Err(ts.error(left_position, "Count function or field name expected."));
    };

    ts.expect(TokenKind::Comma)?;

    let right_position = ts.position();
    let left_is_relationship = matches!(&left, QueryValue::Field(chain) if chain.attribute().is_none());
    let right = match ts.peek() {
        Some(TokenKind::QuotedText(_)) if left_is_relationship => {
            return Err(ts.error(right_position, "null expected."));
        }
        Some(TokenKind::QuotedText(_)) => {
            let text = match ts.next() {
                Some(super::Token {
                    kind: TokenKind::QuotedText(text),
                    ..
                }) => text,
                _ => return Err(ts.error(right_position, "Value between quotes expected.")),
            };
            let target_type = match &left {
                QueryValue::Field(chain) => chain.attribute().map(|a| a.attr_type).unwrap_or(AttrType::String),
                _ => AttrType::Integer,
            };
            QueryValue::Literal(convert_literal(ts, text, target_type, right_position)?)
        }
        Some(TokenKind::Text(t)) if t == "null" => {
            if matches!(left, QueryValue::Count(_)) {
                return Err(ts.error(right_position, "Value between quotes, count function or field name expected."));
            }
            if operator != ComparisonOperator::Equals {
                return Err(ts.error(right_position, "null can only be used in 'equals'."));
            }
            ts.next();
            QueryValue::Null
        }
        Some(TokenKind::Text(_)) if left_is_relationship => {
            return Err(ts.error(right_position, "null expected."));
        }
        Some(TokenKind::Text(_)) if is_count_call(ts) => QueryValue::Count(parse_count(ts, rt)?),
        Some(TokenKind::Text(_)) => {
            let chain = ts.resolve_chain(
                rt,
                FieldChainPattern::ToOneChainEndingInAttribute,
                "Value between quotes, null, count function or field name expected.",
            )?;
            check_filterable(ts, &chain, right_position)?;
            QueryValue::Field(chain)
        }
        _ => {
            return Err(ts.error(
                right_position,
                "Value between quotes, null, count function or field name expected.",
            ))
        }
    };

    ts.expect(TokenKind::CloseParen)?;
    Ok(FilterExpression::Comparison { operator, left, right })
}

fn is_count_call(ts: &TokenStream<'_>) -> bool {
    matches!((ts.peek(), ts.peek_at(1)), (Some(TokenKind::Text(t)), Some(TokenKind::OpenParen)) if t == "count")
}

fn parse_count(ts: &mut TokenStream<'_>, rt: &Arc<ResourceType>) -> Result<ResourceFieldChain, QueryParseError> {
    ts.next();
    ts.expect(TokenKind::OpenParen)?;
    let chain = ts.resolve_chain(rt, FieldChainPattern::ToOneChainEndingInToMany, "Field name expected.")?;
    ts.expect(TokenKind::CloseParen)?;
    Ok(chain)
}

fn parse_text_match(
    ts: &mut TokenStream<'_>,
    rt: &Arc<ResourceType>,
    kind: TextMatchKind,
) -> Result<FilterExpression, QueryParseError> {
    ts.expect(TokenKind::OpenParen)?;
    let position = ts.position();
    let target = ts.resolve_chain(rt, FieldChainPattern::ToOneChainEndingInAttribute, "Field name expected.")?;
    check_filterable(ts, &target, position)?;
    if target.attribute().map(|a| a.attr_type) != Some(AttrType::String) {
        return Err(ts.error(position, "Attribute of type 'String' expected."));
    }
    ts.expect(TokenKind::Comma)?;
    let text = expect_quoted(ts)?;
    ts.expect(TokenKind::CloseParen)?;
    Ok(FilterExpression::MatchText {
        kind,
        target,
        text: LiteralConstant::new(ScalarValue::Text(text.clone()), text),
    })
}

fn parse_any(ts: &mut TokenStream<'_>, rt: &Arc<ResourceType>) -> Result<FilterExpression, QueryParseError> {
    ts.expect(TokenKind::OpenParen)?;
    let position = ts.position();
    let target = ts.resolve_chain(rt, FieldChainPattern::ToOneChainEndingInAttribute, "Field name expected.")?;
    check_filterable(ts, &target, position)?;
    let attr_type = target.attribute().map(|a| a.attr_type).unwrap_or(AttrType::String);

    let mut constants: Vec<LiteralConstant> = Vec::new();
    ts.expect(TokenKind::Comma)?;
    loop {
        let literal_position = ts.position();
        let text = expect_quoted(ts)?;
        let literal = convert_literal(ts, text, attr_type, literal_position)?;
        if !constants.contains(&literal) {
            constants.push(literal);
        }
        if !ts.accept(&TokenKind::Comma) {
            break;
        }
    }
    ts.expect(TokenKind::CloseParen)?;
    Ok(FilterExpression::Any { target, constants })
}

fn parse_has(ts: &mut TokenStream<'_>, rt: &Arc<ResourceType>) -> Result<FilterExpression, QueryParseError> {
    ts.expect(TokenKind::OpenParen)?;
    let position = ts.position();
    let target = ts.resolve_chain(rt, FieldChainPattern::ToOneChainEndingInToMany, "Field name expected.")?;
    let filter = if ts.accept(&TokenKind::Comma) {
        let element_type = ts.target_type(&target, position)?;
        Some(Box::new(parse_filter(ts, &element_type)?))
    } else {
        None
    };
    ts.expect(TokenKind::CloseParen)?;
    Ok(FilterExpression::Has { target, filter })
}

fn parse_is_type(ts: &mut TokenStream<'_>, rt: &Arc<ResourceType>) -> Result<FilterExpression, QueryParseError> {
    ts.expect(TokenKind::OpenParen)?;
    let position = ts.position();
    let target = if matches!(ts.peek(), Some(TokenKind::Comma)) {
        None
    } else {
        Some(ts.resolve_chain(rt, FieldChainPattern::ToOneChain, "Relationship name or , expected.")?)
    };
    let base_type = match &target {
        Some(chain) => ts.target_type(chain, position)?,
        None => rt.clone(),
    };
    ts.expect(TokenKind::Comma)?;
    let (type_name, type_position) = ts.expect_text("Resource type expected.")?;
    let derived_type = ts
        .graph
        .find_resource_type(&type_name)
        .filter(|t| ts.graph.is_same_or_derived(&t.public_name, &base_type.public_name))
        .cloned()
        .ok_or_else(|| {
            ts.error(
                type_position,
                format!(
                    "Resource type '{}' does not exist or does not derive from '{}'.",
                    type_name, base_type.public_name
                ),
            )
        })?;
    let filter = if ts.accept(&TokenKind::Comma) {
        Some(Box::new(parse_filter(ts, &derived_type)?))
    } else {
        None
    };
    ts.expect(TokenKind::CloseParen)?;
    Ok(FilterExpression::IsType {
        target,
        derived_type,
        filter,
    })
}

fn expect_quoted(ts: &mut TokenStream<'_>) -> Result<String, QueryParseError> {
    let position = ts.position();
    match ts.next() {
        Some(super::Token {
            kind: TokenKind::QuotedText(text),
            ..
        }) => Ok(text),
        _ => Err(ts.error(position, "Value between quotes expected.")),
    }
}

fn convert_literal(
    ts: &TokenStream<'_>,
    text: String,
    target: AttrType,
    position: usize,
) -> Result<LiteralConstant, QueryParseError> {
    let value = ScalarValue::parse_as(&text, target).map_err(|e| ts.error(position, e.to_string()))?;
    Ok(LiteralConstant::new(value, text))
}

fn check_filterable(ts: &TokenStream<'_>, chain: &ResourceFieldChain, position: usize) -> Result<(), QueryParseError> {
    if let Some(FieldRef::Attribute(attr)) = chain.last() {
        if !attr.capabilities.filter {
            return Err(ts.error(
                position,
                format!("Filtering on attribute '{}' is not allowed.", attr.public_name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use test_case::test_case;

    fn parse(source: &str) -> Result<FilterExpression, QueryParseError> {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        FilterParser::new(&graph).parse("filter", source, &posts)
    }

    #[test_case("equals(caption,'Hello')" ; "comparison")]
    #[test_case("equals(author,null)" ; "null check on to-one")]
    #[test_case("greaterThan(count(comments),'2')" ; "count")]
    #[test_case("and(equals(caption,'a'),not(equals(author,null)),or(startsWith(caption,'x'),endsWith(caption,'y')))" ; "nested logical")]
    #[test_case("any(caption,'a','b')" ; "any")]
    #[test_case("has(comments,equals(text,'it''s'))" ; "has with filter")]
    #[test_case("has(labels)" ; "has without filter")]
    #[test_case("lessOrEqual(author.userName,caption)" ; "field to field")]
    fn round_trips(source: &str) {
        let parsed = parse(source).unwrap();
        assert_eq!(parsed.to_string(), source);
    }

    #[test_case("equals(caption,'a'", 18, ") expected." ; "missing paren")]
    #[test_case("equals(nope,'a')", 7, "Field 'nope' does not exist on resource type 'blogPosts'." ; "unknown field")]
    #[test_case("equals(count(author),'1')", 13, "Relationship 'author' on resource type 'blogPosts' is a to-one relationship, but a to-many relationship is expected." ; "count on to-one")]
    #[test_case("equals(author,'x')", 14, "null expected." ; "relationship with value")]
    #[test_case("contains(author.userName,'x') x", 30, "End of expression expected." ; "trailing text")]
    #[test_case("foo(caption)", 0, "Filter function expected." ; "unknown function")]
    #[test_case("equals(caption)", 14, ", expected." ; "missing argument")]
    #[test_case("equals(url,'x')", 7, "Filtering on attribute 'url' is not allowed." ; "not filterable")]
    fn rejects(source: &str, position: usize, message: &str) {
        let err = parse(source).unwrap_err();
        assert_eq!(err.message, message);
        assert_eq!(err.position, position);
    }

    #[test]
    fn literal_conversion_failure_names_types() {
        let graph = testing::music_graph();
        let tracks = graph.get_resource_type("musicTracks").unwrap().clone();
        let err = FilterParser::new(&graph)
            .parse("filter", "equals(lengthInSeconds,'long')", &tracks)
            .unwrap_err();
        assert_eq!(err.message, "Failed to convert 'long' of type 'String' to type 'Double'.");
        assert_eq!(err.position, 23);
    }

    #[test]
    fn any_drops_duplicate_constants() {
        assert_eq!(parse("any(caption,'a','a','b')").unwrap().to_string(), "any(caption,'a','b')");
    }
}

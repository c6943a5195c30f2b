//! `page[size]` and `page[number]` parameters: `10,posts:5,posts.comments:2`.

use super::{FieldChainPattern, Token, TokenKind, TokenStream};
use crate::error::QueryParseError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::{PaginationElementQueryStringValue, PaginationQueryStringValue};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageParameter {
    Size,
    Number,
}

pub struct PaginationParser<'a> {
    graph: &'a ResourceGraph,
    maximum_page_size: Option<u32>,
    maximum_page_number: Option<u32>,
}

impl<'a> PaginationParser<'a> {
    pub fn new(graph: &'a ResourceGraph, maximum_page_size: Option<u32>, maximum_page_number: Option<u32>) -> Self {
        PaginationParser {
            graph,
            maximum_page_size,
            maximum_page_number,
        }
    }

    pub fn parse(
        &self,
        parameter: &str,
        source: &str,
        resource_type: &Arc<ResourceType>,
        kind: PageParameter,
    ) -> Result<PaginationQueryStringValue, QueryParseError> {
        let mut ts = TokenStream::new(self.graph, parameter, source)?;
        let mut value = PaginationQueryStringValue::default();
        loop {
            let element = self.parse_element(&mut ts, resource_type, kind)?;
            if value.elements.iter().any(|e| e.scope == element.scope) {
                return Err(ts.error(element.position, "Multiple values for the same scope are not allowed."));
            }
            value.elements.push(element);
            if !ts.accept(&TokenKind::Comma) {
                break;
            }
        }
        ts.expect_end()?;
        Ok(value)
    }

    fn parse_element(
        &self,
        ts: &mut TokenStream<'_>,
        rt: &Arc<ResourceType>,
        kind: PageParameter,
    ) -> Result<PaginationElementQueryStringValue, QueryParseError> {
        let position = ts.position();
        let scope = if matches!((ts.peek(), ts.peek_at(1)), (Some(TokenKind::Text(_)), Some(TokenKind::Colon))) {
            let chain = ts.resolve_chain(rt, FieldChainPattern::RelationshipChainEndingInToMany, "Field name expected.")?;
            ts.expect(TokenKind::Colon)?;
            Some(chain)
        } else {
            None
        };

        let number_position = ts.position();
        if ts.accept(&TokenKind::Minus) {
            let message = match kind {
                PageParameter::Size => "Page size cannot be negative.",
                PageParameter::Number => "Page number cannot be negative or zero.",
            };
            return Err(ts.error(number_position, message));
        }
        let number: u32 = match ts.next() {
            Some(Token {
                kind: TokenKind::Text(text),
                ..
            }) => text.parse().map_err(|_| ts.error(number_position, "Number expected."))?,
            _ => return Err(ts.error(number_position, "Number expected.")),
        };

        match kind {
            PageParameter::Size => {
                if number == 0 && self.maximum_page_size.is_some() {
                    return Err(ts.error(number_position, "Page size cannot be unconstrained."));
                }
                if let Some(max) = self.maximum_page_size {
                    if number > max {
                        return Err(ts.error(number_position, format!("Page size cannot be higher than {}.", max)));
                    }
                }
            }
            PageParameter::Number => {
                if number == 0 {
                    return Err(ts.error(number_position, "Page number cannot be negative or zero."));
                }
                if let Some(max) = self.maximum_page_number {
                    if number > max {
                        return Err(ts.error(number_position, format!("Page number cannot be higher than {}.", max)));
                    }
                }
            }
        }

        Ok(PaginationElementQueryStringValue {
            scope,
            value: number,
            position,
        })
    }
}

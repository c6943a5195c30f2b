//! Query string parameter parsers: text in, resolved expressions out.

pub mod field_chain;
pub mod filter;
pub mod include;
pub mod pagination;
pub mod scope;
pub mod sort;
pub mod sparse_fieldset;
pub mod tokenizer;

pub use field_chain::{FieldChainPattern, FieldChainResolver};
pub use filter::FilterParser;
pub use include::IncludeParser;
pub use pagination::PaginationParser;
pub use scope::{QueryStringParameterScope, QueryStringParameterScopeParser};
pub use sort::SortParser;
pub use sparse_fieldset::{SparseFieldSetParser, SparseFieldTypeParser};
pub use tokenizer::{Token, TokenKind, Tokenizer};

use crate::error::QueryParseError;
use crate::graph::{ResourceGraph, ResourceType};
use crate::query::expressions::ResourceFieldChain;
use std::sync::Arc;

/// Cursor over the tokens of one parameter value, shared by all parsers.
pub(crate) struct TokenStream<'a> {
    pub graph: &'a ResourceGraph,
    pub parameter: &'a str,
    pub source: &'a str,
    tokens: Vec<Token>,
    index: usize,
}

impl<'a> TokenStream<'a> {
    pub fn new(graph: &'a ResourceGraph, parameter: &'a str, source: &'a str) -> Result<Self, QueryParseError> {
        let tokens = Tokenizer::new(parameter, source).tokenize()?;
        Ok(TokenStream {
            graph,
            parameter,
            source,
            tokens,
            index: 0,
        })
    }

    pub fn error(&self, position: usize, message: impl Into<String>) -> QueryParseError {
        QueryParseError::new(self.parameter, self.source, position, message)
    }

    /// Position of the next token, or the end of the text.
    pub fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|t| t.position)
            .unwrap_or_else(|| self.source.chars().count())
    }

    pub fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.index).map(|t| &t.kind)
    }

    pub fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.index + offset).map(|t| &t.kind)
    }

    pub fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    pub fn is_at_end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    /// Consume the next token if it has the given kind.
    pub fn accept(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, kind: TokenKind) -> Result<(), QueryParseError> {
        if self.accept(&kind) {
            Ok(())
        } else {
            Err(self.error(self.position(), format!("{} expected.", kind.describe())))
        }
    }

    /// Consume unquoted text, returning it with its position.
    pub fn expect_text(&mut self, message: &str) -> Result<(String, usize), QueryParseError> {
        match self.peek() {
            Some(TokenKind::Text(_)) => match self.next() {
                Some(Token {
                    kind: TokenKind::Text(text),
                    position,
                }) => Ok((text, position)),
                _ => Err(self.error(self.position(), message)),
            },
            _ => Err(self.error(self.position(), message)),
        }
    }

    pub fn expect_end(&self) -> Result<(), QueryParseError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error(self.position(), "End of expression expected."))
        }
    }

    pub fn resolve_chain(
        &mut self,
        resource_type: &Arc<ResourceType>,
        pattern: FieldChainPattern,
        message: &str,
    ) -> Result<ResourceFieldChain, QueryParseError> {
        let (text, position) = self.expect_text(message)?;
        FieldChainResolver::new(self.graph, self.parameter, self.source).resolve(&text, position, resource_type, pattern)
    }

    /// Right-hand resource type at the end of a relationship chain.
    pub fn target_type(&self, chain: &ResourceFieldChain, position: usize) -> Result<Arc<ResourceType>, QueryParseError> {
        let last = chain
            .last()
            .and_then(|f| f.as_relationship())
            .ok_or_else(|| self.error(position, "Relationship expected."))?;
        self.graph
            .get_resource_type(&last.right_type)
            .cloned()
            .map_err(|_| self.error(position, format!("Resource type '{}' does not exist.", last.right_type)))
    }
}

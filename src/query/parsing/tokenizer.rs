//! Splits a query string parameter value into positioned tokens.

use crate::error::QueryParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    Colon,
    Minus,
    /// Unquoted text; may contain periods (`author.name`).
    Text(String),
    /// Text between single quotes, with `''` unescaped to `'`.
    QuotedText(String),
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::OpenParen => "(".into(),
            TokenKind::CloseParen => ")".into(),
            TokenKind::OpenBracket => "[".into(),
            TokenKind::CloseBracket => "]".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Colon => ":".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Text(t) => t.clone(),
            TokenKind::QuotedText(t) => format!("'{}'", t),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Zero-based character offset of the first character.
    pub position: usize,
}

pub struct Tokenizer<'a> {
    parameter: &'a str,
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(parameter: &'a str, source: &'a str) -> Self {
        Tokenizer { parameter, source }
    }

    pub fn tokenize(&self) -> Result<Vec<Token>, QueryParseError> {
        let chars: Vec<char> = self.source.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let single = match c {
                '(' => Some(TokenKind::OpenParen),
                ')' => Some(TokenKind::CloseParen),
                '[' => Some(TokenKind::OpenBracket),
                ']' => Some(TokenKind::CloseBracket),
                ',' => Some(TokenKind::Comma),
                ':' => Some(TokenKind::Colon),
                '-' => Some(TokenKind::Minus),
                _ => None,
            };
            if let Some(kind) = single {
                tokens.push(Token { kind, position: i });
                i += 1;
                continue;
            }
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            if c == '\'' {
                let start = i;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(QueryParseError::new(
                                self.parameter,
                                self.source,
                                start,
                                "Unterminated quoted text.",
                            ))
                        }
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::QuotedText(text),
                    position: start,
                });
                continue;
            }
            let start = i;
            let mut text = String::new();
            while let Some(&ch) = chars.get(i) {
                if is_delimiter(ch) {
                    break;
                }
                text.push(ch);
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Text(text),
                position: start,
            });
        }
        Ok(tokens)
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '(' | ')' | '[' | ']' | ',' | ':' | '\'') || c.is_whitespace()
}

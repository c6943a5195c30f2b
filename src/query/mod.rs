//! Query string intent: expression AST, parsers and the parameter reader.

pub mod expressions;
pub mod parsing;
pub mod reader;
pub mod visitor;

pub use expressions::*;
pub use reader::{EndpointKind, QueryStringReader};
pub use visitor::{FieldChainCollector, QueryExpressionVisitor};

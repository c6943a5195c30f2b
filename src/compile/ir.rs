//! Backend-neutral predicate and projection trees over member paths.

use crate::graph::{AttrAttribute, RelationshipAttribute, ResourceType};
use crate::query::expressions::{ComparisonOperator, TextMatchKind};
use crate::value::ScalarValue;
use std::fmt;
use std::sync::Arc;

/// Navigation from the resource in scope: to-one links, optionally ending in an attribute.
/// For `Count`/`Any` the final relationship is the to-many collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberPath {
    pub relationships: Vec<Arc<RelationshipAttribute>>,
    pub attribute: Option<Arc<AttrAttribute>>,
}

impl MemberPath {
    pub fn attribute(attribute: Arc<AttrAttribute>) -> Self {
        MemberPath {
            relationships: Vec::new(),
            attribute: Some(attribute),
        }
    }

    pub fn links(relationships: Vec<Arc<RelationshipAttribute>>) -> Self {
        MemberPath {
            relationships,
            attribute: None,
        }
    }

    /// Relationship-only path made of the first `len` links.
    pub fn prefix(&self, len: usize) -> MemberPath {
        MemberPath::links(self.relationships[..len].to_vec())
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = self.relationships.iter().map(|r| r.public_name.as_str()).collect();
        if let Some(attribute) = &self.attribute {
            parts.push(&attribute.public_name);
        }
        if parts.is_empty() {
            f.write_str("this")
        } else {
            f.write_str(&parts.join("."))
        }
    }
}

/// Value-producing node.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Constant(ScalarValue),
    /// Attribute value, or the target id when the path ends in a to-one relationship.
    Member(MemberPath),
    /// Number of elements in the collection at the end of the path.
    Count(MemberPath),
    Conditional {
        guard: Box<Predicate>,
        then: Box<Operand>,
        otherwise: Box<Operand>,
    },
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(value) => write!(f, "{}", value.to_json()),
            Operand::Member(path) => write!(f, "{}", path),
            Operand::Count(path) => write!(f, "count({})", path),
            Operand::Conditional { guard, then, otherwise } => {
                write!(f, "({} ? {} : {})", guard, then, otherwise)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Constant(bool),
    Compare {
        operator: ComparisonOperator,
        left: Operand,
        right: Operand,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Every link of the path exists and (for attribute paths) the value is not null.
    NotNull(MemberPath),
    In {
        operand: Operand,
        values: Vec<ScalarValue>,
    },
    TextMatch {
        kind: TextMatchKind,
        operand: Operand,
        text: String,
    },
    /// At least one element of the collection matches. The nested predicate is
    /// evaluated with the element in scope.
    Any {
        collection: MemberPath,
        predicate: Option<Box<Predicate>>,
    },
    /// The resource at the end of `path` (the scope itself when empty) is `derived_type`
    /// or derives from it. The nested predicate is evaluated with that resource in scope.
    IsType {
        path: MemberPath,
        derived_type: Arc<ResourceType>,
        predicate: Option<Box<Predicate>>,
    },
}

impl Predicate {
    /// Conjunction of the given terms; a single term is returned as is.
    pub fn and(terms: Vec<Predicate>) -> Predicate {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Predicate::Constant(true))
        } else {
            Predicate::And(flat)
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Constant(b) => write!(f, "{}", b),
            Predicate::Compare { operator, left, right } => {
                let symbol = match operator {
                    ComparisonOperator::Equals => "==",
                    ComparisonOperator::GreaterThan => ">",
                    ComparisonOperator::GreaterOrEqual => ">=",
                    ComparisonOperator::LessThan => "<",
                    ComparisonOperator::LessOrEqual => "<=",
                };
                write!(f, "{} {} {}", left, symbol, right)
            }
            Predicate::And(terms) => write_joined(f, terms, " && "),
            Predicate::Or(terms) => write_joined(f, terms, " || "),
            Predicate::Not(inner) => write!(f, "!({})", inner),
            Predicate::NotNull(path) => write!(f, "{} != null", path),
            Predicate::In { operand, values } => {
                let values: Vec<String> = values.iter().map(|v| v.to_json().to_string()).collect();
                write!(f, "{} in [{}]", operand, values.join(", "))
            }
            Predicate::TextMatch { kind, operand, text } => write!(f, "{}.{}({:?})", operand, kind.keyword(), text),
            Predicate::Any { collection, predicate } => match predicate {
                Some(inner) => write!(f, "{}.any({})", collection, inner),
                None => write!(f, "{}.any()", collection),
            },
            Predicate::IsType {
                path,
                derived_type,
                predicate,
            } => {
                write!(f, "{} is {}", path, derived_type.public_name)?;
                if let Some(inner) = predicate {
                    write!(f, " && ({})", inner)?;
                }
                Ok(())
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Predicate], separator: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", term)?;
    }
    f.write_str(")")
}

/// Whether a sort key is the first (`OrderBy`) or a subsequent (`ThenBy`) key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderKind {
    OrderBy,
    ThenBy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub kind: OrderKind,
    pub operand: Operand,
    pub ascending: bool,
}

/// Ordered sort keys applied as one stable multi-key sort.
///
/// Rows whose key falls back to the sentinel minimum (missing link) are not separated from
/// rows holding that value; their relative order is whatever the input order was.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderByPlan {
    pub keys: Vec<SortKey>,
}

impl OrderByPlan {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Display for OrderByPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            let name = match (key.kind, key.ascending) {
                (OrderKind::OrderBy, true) => "OrderBy",
                (OrderKind::OrderBy, false) => "OrderByDescending",
                (OrderKind::ThenBy, true) => "ThenBy",
                (OrderKind::ThenBy, false) => "ThenByDescending",
            };
            write!(f, "{}({})", name, key.operand)?;
        }
        Ok(())
    }
}

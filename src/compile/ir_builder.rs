//! Lowers query expressions into the predicate/projection IR.

use super::ir::{MemberPath, Operand, OrderByPlan, OrderKind, Predicate, SortKey};
use crate::graph::FieldRef;
use crate::query::expressions::*;
use crate::value::ScalarValue;

#[derive(Default)]
pub struct IrBuilder;

impl IrBuilder {
    pub fn new() -> Self {
        IrBuilder
    }

    pub fn filter(&self, filter: &FilterExpression) -> Predicate {
        match filter {
            FilterExpression::Comparison { operator, left, right } => Predicate::Compare {
                operator: *operator,
                left: self.value(left),
                right: self.value(right),
            },
            FilterExpression::Logical { operator, terms } => {
                let terms = terms.iter().map(|t| self.filter(t)).collect();
                match operator {
                    LogicalOperator::And => Predicate::And(terms),
                    LogicalOperator::Or => Predicate::Or(terms),
                }
            }
            FilterExpression::Not(inner) => Predicate::Not(Box::new(self.filter(inner))),
            FilterExpression::MatchText { kind, target, text } => Predicate::TextMatch {
                kind: *kind,
                operand: Operand::Member(member_path(target)),
                text: text.text.clone(),
            },
            FilterExpression::Any { target, constants } => Predicate::In {
                operand: Operand::Member(member_path(target)),
                values: constants.iter().map(|c| c.value.clone()).collect(),
            },
            FilterExpression::Has { target, filter } => Predicate::Any {
                collection: member_path(target),
                predicate: filter.as_ref().map(|f| Box::new(self.filter(f))),
            },
            FilterExpression::IsType {
                target,
                derived_type,
                filter,
            } => Predicate::IsType {
                path: target.as_ref().map(member_path).unwrap_or_else(|| MemberPath::links(Vec::new())),
                derived_type: derived_type.clone(),
                predicate: filter.as_ref().map(|f| Box::new(self.filter(f))),
            },
        }
    }

    pub fn value(&self, value: &QueryValue) -> Operand {
        match value {
            QueryValue::Field(chain) => Operand::Member(member_path(chain)),
            QueryValue::Count(chain) => Operand::Count(member_path(chain)),
            QueryValue::Literal(literal) => Operand::Constant(literal.value.clone()),
            QueryValue::Null => Operand::Constant(ScalarValue::Null),
        }
    }

    pub fn sort(&self, sort: &SortExpression) -> OrderByPlan {
        let keys = sort
            .elements
            .iter()
            .enumerate()
            .map(|(i, element)| SortKey {
                kind: if i == 0 { OrderKind::OrderBy } else { OrderKind::ThenBy },
                operand: match &element.target {
                    SortTarget::Field(chain) => Operand::Member(member_path(chain)),
                    SortTarget::Count(chain) => Operand::Count(member_path(chain)),
                },
                ascending: element.ascending,
            })
            .collect();
        OrderByPlan { keys }
    }
}

/// Field chain as member path: leading relationships plus the trailing attribute, if any.
pub fn member_path(chain: &ResourceFieldChain) -> MemberPath {
    MemberPath {
        relationships: chain.relationships().cloned().collect(),
        attribute: chain.attribute().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn builds_predicates_from_filters() {
        let graph = testing::blog_graph();
        let filter = testing::parse_filter(
            &graph,
            "blogPosts",
            "or(equals(author.userName,'ann'),has(labels,equals(name,'x')),any(caption,'a','b'))",
        );
        let predicate = IrBuilder::new().filter(&filter);
        assert_eq!(
            predicate.to_string(),
            "(author.userName == \"ann\" || labels.any(name == \"x\") || caption in [\"a\", \"b\"])"
        );
    }

    #[test]
    fn sort_keys_become_order_by_then_by() {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap().clone();
        let sort = crate::query::parsing::SortParser::new(&graph)
            .parse("sort", "-count(labels),caption", &posts)
            .unwrap();
        let plan = IrBuilder::new().sort(&sort);
        assert_eq!(plan.to_string(), "OrderByDescending(count(labels)).ThenBy(caption)");
    }

    #[test]
    fn null_literal_is_null_constant() {
        let graph = testing::blog_graph();
        let filter = testing::parse_filter(&graph, "blogPosts", "equals(author,null)");
        let predicate = IrBuilder::new().filter(&filter);
        assert_eq!(predicate.to_string(), "author == null");
    }

    #[test]
    fn field_ref_helper_keeps_attribute() {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap();
        let caption = posts.find_attribute("caption").unwrap().clone();
        let path = member_path(&ResourceFieldChain::single(FieldRef::Attribute(caption)));
        assert!(path.relationships.is_empty());
        assert_eq!(path.to_string(), "caption");
    }
}

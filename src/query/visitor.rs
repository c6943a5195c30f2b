//! Read-only traversal of filter and sort expressions.

use crate::query::expressions::*;

/// Visitor with default methods that walk into every child expression.
/// Override the methods of interest and call the matching `walk_*` function to keep descending.
pub trait QueryExpressionVisitor {
    fn visit_filter(&mut self, filter: &FilterExpression) {
        walk_filter(self, filter);
    }

    fn visit_value(&mut self, value: &QueryValue) {
        walk_value(self, value);
    }

    fn visit_chain(&mut self, _chain: &ResourceFieldChain) {}

    /// Called on entering the element type of a `has` filter; nested chains are relative to it.
    fn enter_nested(&mut self, _chain: &ResourceFieldChain) {}

    fn leave_nested(&mut self) {}

    fn visit_sort(&mut self, sort: &SortExpression) {
        for element in &sort.elements {
            match &element.target {
                SortTarget::Field(chain) | SortTarget::Count(chain) => self.visit_chain(chain),
            }
        }
    }
}

pub fn walk_filter<V: QueryExpressionVisitor + ?Sized>(visitor: &mut V, filter: &FilterExpression) {
    match filter {
        FilterExpression::Comparison { left, right, .. } => {
            visitor.visit_value(left);
            visitor.visit_value(right);
        }
        FilterExpression::Logical { terms, .. } => {
            for term in terms {
                visitor.visit_filter(term);
            }
        }
        FilterExpression::Not(inner) => visitor.visit_filter(inner),
        FilterExpression::MatchText { target, .. } | FilterExpression::Any { target, .. } => visitor.visit_chain(target),
        FilterExpression::Has { target, filter } => {
            visitor.visit_chain(target);
            if let Some(inner) = filter {
                visitor.enter_nested(target);
                visitor.visit_filter(inner);
                visitor.leave_nested();
            }
        }
        FilterExpression::IsType { target, filter, .. } => {
            if let Some(chain) = target {
                visitor.visit_chain(chain);
            }
            if let Some(inner) = filter {
                let empty = ResourceFieldChain::new(Vec::new());
                let scope = target.as_ref().unwrap_or(&empty);
                visitor.enter_nested(scope);
                visitor.visit_filter(inner);
                visitor.leave_nested();
            }
        }
    }
}

pub fn walk_value<V: QueryExpressionVisitor + ?Sized>(visitor: &mut V, value: &QueryValue) {
    match value {
        QueryValue::Field(chain) | QueryValue::Count(chain) => visitor.visit_chain(chain),
        QueryValue::Literal(_) | QueryValue::Null => {}
    }
}

/// Collects every field chain referenced at the top level (not inside `has`/`isType` nesting).
#[derive(Default)]
pub struct FieldChainCollector {
    pub chains: Vec<ResourceFieldChain>,
    depth: usize,
}

impl QueryExpressionVisitor for FieldChainCollector {
    fn visit_chain(&mut self, chain: &ResourceFieldChain) {
        if self.depth == 0 && !self.chains.contains(chain) {
            self.chains.push(chain.clone());
        }
    }

    fn enter_nested(&mut self, _chain: &ResourceFieldChain) {
        self.depth += 1;
    }

    fn leave_nested(&mut self) {
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn collector_skips_nested_scopes() {
        let graph = testing::blog_graph();
        let filter = testing::parse_filter(&graph, "blogPosts", "and(equals(author.userName,'x'),has(comments,equals(text,'y')))");
        let mut collector = FieldChainCollector::default();
        collector.visit_filter(&filter);
        let names: Vec<String> = collector.chains.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["author.userName", "comments"]);
    }
}

//! Inserts guards so that navigation through absent to-one links or null collections
//! never dereferences a missing value.
//!
//! Predicates get `!= null` conjuncts ahead of the access (`a != null && a.b != null && a.b.c == v`).
//! Projections cannot short-circuit, so they become conditional chains that fall back to the
//! attribute type's sentinel minimum (or zero for counts). Rewriting an already rewritten tree
//! yields the same tree.

use super::ir::{MemberPath, Operand, OrderByPlan, Predicate, SortKey};
use crate::value::ScalarValue;

/// Paths already proven non-null in the current conjunction.
#[derive(Clone, Default)]
struct GuardScope {
    guarded: Vec<MemberPath>,
}

impl GuardScope {
    fn contains(&self, path: &MemberPath) -> bool {
        self.guarded.contains(path)
    }

    fn insert(&mut self, path: MemberPath) {
        if !self.contains(&path) {
            self.guarded.push(path);
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSafetyRewriter;

impl NullSafetyRewriter {
    pub fn new() -> Self {
        NullSafetyRewriter
    }

    pub fn rewrite_predicate(&self, predicate: &Predicate) -> Predicate {
        self.predicate(predicate, &mut GuardScope::default())
    }

    pub fn rewrite_plan(&self, plan: &OrderByPlan) -> OrderByPlan {
        OrderByPlan {
            keys: plan
                .keys
                .iter()
                .map(|key| SortKey {
                    kind: key.kind,
                    operand: self.rewrite_projection(&key.operand),
                    ascending: key.ascending,
                })
                .collect(),
        }
    }

    /// Guarded value for a sort key: `a == null ? default : (a.b == null ? default : a.b.c)`.
    pub fn rewrite_projection(&self, operand: &Operand) -> Operand {
        let (guards, default) = match operand {
            Operand::Member(path) => match &path.attribute {
                Some(attribute) => (link_prefixes(path, path.relationships.len()), attribute.attr_type.sentinel_min()),
                None => (link_prefixes(path, path.relationships.len().saturating_sub(1)), ScalarValue::Null),
            },
            Operand::Count(path) => (link_prefixes(path, path.relationships.len()), ScalarValue::Integer(0)),
            Operand::Constant(_) | Operand::Conditional { .. } => return operand.clone(),
        };
        guards.into_iter().rev().fold(operand.clone(), |inner, guard| Operand::Conditional {
            guard: Box::new(Predicate::NotNull(guard)),
            then: Box::new(inner),
            otherwise: Box::new(Operand::Constant(default.clone())),
        })
    }

    fn predicate(&self, predicate: &Predicate, scope: &mut GuardScope) -> Predicate {
        match predicate {
            Predicate::Constant(_) => predicate.clone(),
            Predicate::Compare { left, right, .. } => {
                let mut guards = operand_guards(left);
                guards.extend(operand_guards(right));
                guarded(scope, guards, predicate.clone())
            }
            Predicate::In { operand, .. } => guarded(scope, operand_guards(operand), predicate.clone()),
            Predicate::TextMatch { operand, .. } => {
                let mut guards = operand_guards(operand);
                if let Operand::Member(path) = operand {
                    if path.attribute.is_some() {
                        guards.push(path.clone());
                    }
                }
                guarded(scope, guards, predicate.clone())
            }
            Predicate::NotNull(path) => {
                let depth = match path.attribute {
                    Some(_) => path.relationships.len(),
                    None => path.relationships.len().saturating_sub(1),
                };
                let rewritten = guarded(scope, link_prefixes(path, depth), predicate.clone());
                scope.insert(path.clone());
                rewritten
            }
            Predicate::And(terms) => {
                let terms = terms.iter().map(|t| self.predicate(t, scope)).collect();
                Predicate::and(terms)
            }
            Predicate::Or(terms) => Predicate::Or(terms.iter().map(|t| self.predicate(t, &mut scope.clone())).collect()),
            Predicate::Not(inner) => Predicate::Not(Box::new(self.predicate(inner, &mut scope.clone()))),
            Predicate::Any { collection, predicate } => {
                let node = Predicate::Any {
                    collection: collection.clone(),
                    predicate: predicate
                        .as_ref()
                        .map(|p| Box::new(self.predicate(p, &mut GuardScope::default()))),
                };
                guarded(scope, link_prefixes(collection, collection.relationships.len()), node)
            }
            Predicate::IsType {
                path,
                derived_type,
                predicate,
            } => {
                let node = Predicate::IsType {
                    path: path.clone(),
                    derived_type: derived_type.clone(),
                    predicate: predicate
                        .as_ref()
                        .map(|p| Box::new(self.predicate(p, &mut GuardScope::default()))),
                };
                guarded(scope, link_prefixes(path, path.relationships.len()), node)
            }
        }
    }
}

/// Relationship-only prefixes of lengths `1..=depth`.
fn link_prefixes(path: &MemberPath, depth: usize) -> Vec<MemberPath> {
    (1..=depth).map(|len| path.prefix(len)).collect()
}

fn operand_guards(operand: &Operand) -> Vec<MemberPath> {
    match operand {
        Operand::Member(path) => match path.attribute {
            Some(_) => link_prefixes(path, path.relationships.len()),
            None => link_prefixes(path, path.relationships.len().saturating_sub(1)),
        },
        Operand::Count(path) => link_prefixes(path, path.relationships.len()),
        Operand::Constant(_) | Operand::Conditional { .. } => Vec::new(),
    }
}

/// Prefix `node` with the guards not yet established in `scope`, and record them.
fn guarded(scope: &mut GuardScope, guards: Vec<MemberPath>, node: Predicate) -> Predicate {
    let mut terms = Vec::new();
    for guard in guards {
        if !scope.contains(&guard) {
            scope.insert(guard.clone());
            terms.push(Predicate::NotNull(guard));
        }
    }
    if terms.is_empty() {
        return node;
    }
    terms.push(node);
    Predicate::And(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::ir_builder::IrBuilder;
    use crate::graph::ResourceGraph;
    use crate::testing;
    use test_case::test_case;

    fn rewrite(graph: &ResourceGraph, resource_type: &str, filter: &str) -> Predicate {
        let parsed = testing::parse_filter(graph, resource_type, filter);
        NullSafetyRewriter::new().rewrite_predicate(&IrBuilder::new().filter(&parsed))
    }

    #[test_case("equals(author.userName,'ann')", "(author != null && author.userName == \"ann\")" ; "to-one chain")]
    #[test_case("equals(caption,'a')", "caption == \"a\"" ; "no navigation")]
    #[test_case("equals(author,null)", "author == null" ; "null check needs no guard")]
    #[test_case(
        "and(equals(author.userName,'a'),equals(author.displayName,'b'))",
        "(author != null && author.userName == \"a\" && author.displayName == \"b\")" ;
        "and shares guards"
    )]
    #[test_case(
        "or(equals(author.userName,'a'),equals(author.displayName,'b'))",
        "((author != null && author.userName == \"a\") || (author != null && author.displayName == \"b\"))" ;
        "or branches guard separately"
    )]
    #[test_case("has(comments)", "(comments != null && comments.any())" ; "collection guard")]
    #[test_case(
        "has(comments,equals(author.userName,'x'))",
        "(comments != null && comments.any((author != null && author.userName == \"x\")))" ;
        "nested scope starts fresh"
    )]
    #[test_case(
        "startsWith(author.displayName,'J')",
        "(author != null && author.displayName != null && author.displayName.startsWith(\"J\"))" ;
        "text match guards value"
    )]
    #[test_case("greaterThan(count(comments),'2')", "(comments != null && count(comments) > 2)" ; "count guard")]
    fn guards_predicates(filter: &str, expected: &str) {
        let graph = testing::blog_graph();
        assert_eq!(rewrite(&graph, "blogPosts", filter).to_string(), expected);
    }

    #[test]
    fn deep_chain_guards_every_link() {
        let graph = testing::blog_graph();
        let predicate = rewrite(&graph, "comments", "equals(parent.author.userName,'x')");
        assert_eq!(
            predicate.to_string(),
            "(parent != null && parent.author != null && parent.author.userName == \"x\")"
        );
    }

    #[test]
    fn rewriting_is_idempotent() {
        let graph = testing::blog_graph();
        let once = rewrite(
            &graph,
            "blogPosts",
            "and(not(equals(author.userName,'a')),or(has(comments,contains(author.displayName,'b')),greaterThan(count(labels),'1')))",
        );
        let twice = NullSafetyRewriter::new().rewrite_predicate(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn projections_fall_back_to_sentinel() {
        let graph = testing::blog_graph();
        let comments = graph.get_resource_type("comments").unwrap().clone();
        let sort = crate::query::parsing::SortParser::new(&graph)
            .parse("sort", "parent.author.userName,count(parent.comments)", &comments)
            .unwrap();
        let plan = NullSafetyRewriter::new().rewrite_plan(&IrBuilder::new().sort(&sort));
        assert_eq!(
            plan.to_string(),
            "OrderBy((parent != null ? (parent.author != null ? parent.author.userName : \"\") : \"\"))\
             .ThenBy((parent != null ? (parent.comments != null ? count(parent.comments) : 0) : 0))"
        );
        assert_eq!(NullSafetyRewriter::new().rewrite_plan(&plan), plan);
    }
}

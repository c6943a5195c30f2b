//! Interpreter for compiled queries over an in-memory object source.

use super::ir::{MemberPath, Operand, OrderByPlan, Predicate};
use super::queryable::CompiledQuery;
use crate::error::{AppError, EvalError};
use crate::graph::{RelationshipAttribute, ResourceGraph};
use crate::query::expressions::{ComparisonOperator, TextMatchKind};
use crate::store::{NodeId, RelationshipValue, ResourceSet};
use crate::value::{ResourceKey, ScalarValue};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Read access to stored resources, by key.
pub trait ObjectSource {
    fn graph(&self) -> &ResourceGraph;

    /// Keys of every resource of `resource_type` or a type deriving from it, in id order.
    fn keys_of(&self, resource_type: &str) -> Vec<ResourceKey>;

    /// Attribute value by public name; `None` when the resource does not exist.
    fn attribute(&self, key: &ResourceKey, attribute: &str) -> Option<ScalarValue>;

    fn to_one(&self, key: &ResourceKey, relationship: &str) -> Option<ResourceKey>;

    /// `None` is a null collection, as opposed to an empty one.
    fn to_many(&self, key: &ResourceKey, relationship: &str) -> Option<Vec<ResourceKey>>;
}

/// Evaluates predicates and operands with one resource in scope.
pub struct Evaluator<'a> {
    source: &'a dyn ObjectSource,
}

impl<'a> Evaluator<'a> {
    pub fn new(source: &'a dyn ObjectSource) -> Self {
        Evaluator { source }
    }

    pub fn predicate(&self, predicate: &Predicate, scope: &ResourceKey) -> Result<bool, EvalError> {
        match predicate {
            Predicate::Constant(b) => Ok(*b),
            Predicate::Compare { operator, left, right } => {
                let left = self.operand(left, scope)?;
                let right = self.operand(right, scope)?;
                compare(*operator, &left, &right)
            }
            Predicate::And(terms) => {
                for term in terms {
                    if !self.predicate(term, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(terms) => {
                for term in terms {
                    if self.predicate(term, scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Ok(!self.predicate(inner, scope)?),
            Predicate::NotNull(path) => self.not_null(path, scope),
            Predicate::In { operand, values } => {
                let value = self.operand(operand, scope)?;
                // A null member matches a null member of the list, as `equals(x,null)` does.
                Ok(values.contains(&value))
            }
            Predicate::TextMatch { kind, operand, text } => {
                let value = self.operand(operand, scope)?;
                if value.is_null() {
                    return Err(EvalError::NullReference {
                        path: operand.to_string(),
                    });
                }
                let Some(value) = value.as_text() else {
                    return Err(EvalError::IncompatibleOperand {
                        function: kind.keyword(),
                        type_name: value.type_name(),
                    });
                };
                Ok(match kind {
                    TextMatchKind::Contains => value.contains(text.as_str()),
                    TextMatchKind::StartsWith => value.starts_with(text.as_str()),
                    TextMatchKind::EndsWith => value.ends_with(text.as_str()),
                })
            }
            Predicate::Any { collection, predicate } => {
                let elements = self.collection(collection, scope)?;
                match predicate {
                    None => Ok(!elements.is_empty()),
                    Some(inner) => {
                        for element in &elements {
                            if self.predicate(inner, element)? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                }
            }
            Predicate::IsType {
                path,
                derived_type,
                predicate,
            } => {
                let target = self.follow(scope, &path.relationships)?;
                if !self
                    .source
                    .graph()
                    .is_same_or_derived(&target.resource_type, &derived_type.public_name)
                {
                    return Ok(false);
                }
                match predicate {
                    Some(inner) => self.predicate(inner, &target),
                    None => Ok(true),
                }
            }
        }
    }

    pub fn operand(&self, operand: &Operand, scope: &ResourceKey) -> Result<ScalarValue, EvalError> {
        match operand {
            Operand::Constant(value) => Ok(value.clone()),
            Operand::Member(path) => self.member(path, scope),
            Operand::Count(path) => Ok(ScalarValue::Integer(self.collection(path, scope)?.len() as i64)),
            Operand::Conditional { guard, then, otherwise } => {
                if self.predicate(guard, scope)? {
                    self.operand(then, scope)
                } else {
                    self.operand(otherwise, scope)
                }
            }
        }
    }

    fn member(&self, path: &MemberPath, scope: &ResourceKey) -> Result<ScalarValue, EvalError> {
        match &path.attribute {
            Some(attribute) => {
                let target = self.follow(scope, &path.relationships)?;
                if attribute.is_id() {
                    return Ok(target.id);
                }
                Ok(self
                    .source
                    .attribute(&target, &attribute.public_name)
                    .unwrap_or(ScalarValue::Null))
            }
            None => match path.relationships.split_last() {
                None => Ok(scope.id.clone()),
                Some((last, prefix)) => {
                    let owner = self.follow(scope, prefix)?;
                    Ok(self
                        .source
                        .to_one(&owner, &last.public_name)
                        .map(|k| k.id)
                        .unwrap_or(ScalarValue::Null))
                }
            },
        }
    }

    fn not_null(&self, path: &MemberPath, scope: &ResourceKey) -> Result<bool, EvalError> {
        if path.attribute.is_some() {
            return Ok(!self.member(path, scope)?.is_null());
        }
        let Some((last, prefix)) = path.relationships.split_last() else {
            return Ok(true);
        };
        let owner = self.follow(scope, prefix)?;
        Ok(if last.is_to_one() {
            self.source.to_one(&owner, &last.public_name).is_some()
        } else {
            self.source.to_many(&owner, &last.public_name).is_some()
        })
    }

    fn collection(&self, path: &MemberPath, scope: &ResourceKey) -> Result<Vec<ResourceKey>, EvalError> {
        let Some((last, prefix)) = path.relationships.split_last() else {
            return Ok(Vec::new());
        };
        let owner = self.follow(scope, prefix)?;
        self.source
            .to_many(&owner, &last.public_name)
            .ok_or_else(|| EvalError::NullReference {
                path: path.to_string(),
            })
    }

    /// Walk to-one links; a missing link is a null dereference.
    fn follow(&self, scope: &ResourceKey, links: &[Arc<RelationshipAttribute>]) -> Result<ResourceKey, EvalError> {
        let mut current = scope.clone();
        for (i, link) in links.iter().enumerate() {
            current = self
                .source
                .to_one(&current, &link.public_name)
                .ok_or_else(|| EvalError::NullReference {
                    path: MemberPath::links(links[..=i].to_vec()).to_string(),
                })?;
        }
        Ok(current)
    }
}

/// Equality with null compares; ordering comparisons involving null are false.
fn compare(operator: ComparisonOperator, left: &ScalarValue, right: &ScalarValue) -> Result<bool, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(operator == ComparisonOperator::Equals && left.is_null() && right.is_null());
    }
    if !left.is_comparable_with(right) {
        return Err(EvalError::IncompatibleOperand {
            function: operator.keyword(),
            type_name: right.type_name(),
        });
    }
    let ordering = left.cmp(right);
    Ok(match operator {
        ComparisonOperator::Equals => ordering == Ordering::Equal,
        ComparisonOperator::GreaterThan => ordering == Ordering::Greater,
        ComparisonOperator::GreaterOrEqual => ordering != Ordering::Less,
        ComparisonOperator::LessThan => ordering == Ordering::Less,
        ComparisonOperator::LessOrEqual => ordering != Ordering::Greater,
    })
}

/// Stable sort by every key in turn. Equal keys keep their input order.
fn order(
    evaluator: &Evaluator<'_>,
    plan: &OrderByPlan,
    keys: Vec<ResourceKey>,
) -> Result<Vec<ResourceKey>, EvalError> {
    if plan.is_empty() {
        return Ok(keys);
    }
    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        let values = plan
            .keys
            .iter()
            .map(|k| evaluator.operand(&k.operand, &key))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push((values, key));
    }
    rows.sort_by(|(a, _), (b, _)| {
        for (i, sort_key) in plan.keys.iter().enumerate() {
            let ordering = a[i].cmp(&b[i]);
            let ordering = if sort_key.ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(rows.into_iter().map(|(_, key)| key).collect())
}

impl CompiledQuery {
    /// Run against every resource of the layer's type, recording results as primary resources.
    pub fn execute(&self, source: &dyn ObjectSource, cancel: &CancellationToken) -> Result<ResourceSet, AppError> {
        let mut set = ResourceSet::new();
        let candidates = source.keys_of(&self.resource_type.public_name);
        for node in self.run(source, candidates, &mut set, cancel)? {
            set.push_primary(node);
        }
        Ok(set)
    }

    /// Matching keys in result order, without projection.
    pub fn select_keys(&self, source: &dyn ObjectSource, candidates: Vec<ResourceKey>) -> Result<Vec<ResourceKey>, EvalError> {
        let evaluator = Evaluator::new(source);
        let mut matched = Vec::with_capacity(candidates.len());
        for key in candidates {
            let keep = match &self.filter {
                Some(filter) => evaluator.predicate(filter, &key)?,
                None => true,
            };
            if keep {
                matched.push(key);
            }
        }
        let ordered = order(&evaluator, &self.order_by, matched)?;
        let window = ordered.into_iter().skip(self.skip);
        Ok(match self.take {
            Some(take) => window.take(take).collect(),
            None => window.collect(),
        })
    }

    fn run(
        &self,
        source: &dyn ObjectSource,
        candidates: Vec<ResourceKey>,
        set: &mut ResourceSet,
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeId>, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let keys = self.select_keys(source, candidates)?;
        keys.into_iter()
            .map(|key| self.project(source, key, set, cancel))
            .collect()
    }

    fn project(
        &self,
        source: &dyn ObjectSource,
        key: ResourceKey,
        set: &mut ResourceSet,
        cancel: &CancellationToken,
    ) -> Result<NodeId, AppError> {
        let Some(selectors) = self.selectors_for(&key.resource_type) else {
            return Ok(set.upsert(key, IndexMap::new()));
        };
        let attributes = selectors
            .attributes
            .iter()
            .map(|a| {
                let value = if a.is_id() {
                    key.id.clone()
                } else {
                    source.attribute(&key, &a.public_name).unwrap_or(ScalarValue::Null)
                };
                (a.public_name.clone(), value)
            })
            .collect();
        let node = set.upsert(key.clone(), attributes);

        for selected in &selectors.relationships {
            let Some(query) = &selected.query else {
                continue;
            };
            let name = &selected.relationship.public_name;
            if selected.relationship.is_to_one() {
                let candidates: Vec<_> = source.to_one(&key, name).into_iter().collect();
                let targets = query.run(source, candidates, set, cancel)?;
                set.set_relationship(node, name, RelationshipValue::ToOne(targets.first().copied()));
            } else {
                let candidates = source.to_many(&key, name).unwrap_or_default();
                let targets = query.run(source, candidates, set, cancel)?;
                set.set_relationship(node, name, RelationshipValue::ToMany(targets));
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::ir_builder::IrBuilder;
    use crate::compile::null_safety::NullSafetyRewriter;
    use crate::testing;
    use std::collections::HashMap;

    /// Minimal source: posts with optional authors and optional comment collections.
    struct Fixture {
        graph: ResourceGraph,
        attributes: HashMap<(ResourceKey, String), ScalarValue>,
        to_one: HashMap<(ResourceKey, String), ResourceKey>,
        to_many: HashMap<(ResourceKey, String), Vec<ResourceKey>>,
        keys: Vec<ResourceKey>,
    }

    impl ObjectSource for Fixture {
        fn graph(&self) -> &ResourceGraph {
            &self.graph
        }

        fn keys_of(&self, resource_type: &str) -> Vec<ResourceKey> {
            self.keys
                .iter()
                .filter(|k| self.graph.is_same_or_derived(&k.resource_type, resource_type))
                .cloned()
                .collect()
        }

        fn attribute(&self, key: &ResourceKey, attribute: &str) -> Option<ScalarValue> {
            self.attributes.get(&(key.clone(), attribute.to_string())).cloned()
        }

        fn to_one(&self, key: &ResourceKey, relationship: &str) -> Option<ResourceKey> {
            self.to_one.get(&(key.clone(), relationship.to_string())).cloned()
        }

        fn to_many(&self, key: &ResourceKey, relationship: &str) -> Option<Vec<ResourceKey>> {
            self.to_many.get(&(key.clone(), relationship.to_string())).cloned()
        }
    }

    fn fixture() -> Fixture {
        let mut f = Fixture {
            graph: testing::blog_graph(),
            attributes: HashMap::new(),
            to_one: HashMap::new(),
            to_many: HashMap::new(),
            keys: Vec::new(),
        };
        let post1 = ResourceKey::new("blogPosts", 1);
        let post2 = ResourceKey::new("blogPosts", 2);
        let ann = ResourceKey::new("webAccounts", 10);
        f.keys = vec![post1.clone(), post2.clone(), ann.clone()];
        f.attributes.insert((post1.clone(), "caption".into()), "first".into());
        f.attributes.insert((post2.clone(), "caption".into()), "second".into());
        f.attributes.insert((ann.clone(), "userName".into()), "ann".into());
        f.to_one.insert((post1.clone(), "author".into()), ann);
        f.to_many.insert((post1, "comments".into()), Vec::new());
        f
    }

    fn filter(f: &Fixture, source: &str) -> Predicate {
        IrBuilder::new().filter(&testing::parse_filter(&f.graph, "blogPosts", source))
    }

    fn matching(f: &Fixture, predicate: &Predicate) -> Result<Vec<i64>, EvalError> {
        let evaluator = Evaluator::new(f);
        let mut out = Vec::new();
        for key in f.keys_of("blogPosts") {
            if evaluator.predicate(predicate, &key)? {
                if let ScalarValue::Integer(id) = key.id {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    #[test]
    fn unguarded_chain_fails_and_guarded_chain_is_false() {
        let f = fixture();
        let raw = filter(&f, "equals(author.userName,'ann')");
        assert_eq!(
            matching(&f, &raw),
            Err(EvalError::NullReference { path: "author".into() })
        );
        let guarded = NullSafetyRewriter::new().rewrite_predicate(&raw);
        assert_eq!(matching(&f, &guarded), Ok(vec![1]));
        let negated = NullSafetyRewriter::new().rewrite_predicate(&filter(&f, "not(equals(author.userName,'ann'))"));
        assert_eq!(matching(&f, &negated), Ok(vec![2]));
    }

    #[test]
    fn null_collections_are_guarded() {
        let f = fixture();
        let raw = filter(&f, "equals(count(comments),'0')");
        assert!(matching(&f, &raw).is_err());
        let guarded = NullSafetyRewriter::new().rewrite_predicate(&raw);
        assert_eq!(matching(&f, &guarded), Ok(vec![1]));
    }

    #[test]
    fn null_comparisons() {
        let f = fixture();
        let is_null = filter(&f, "equals(author,null)");
        assert_eq!(matching(&f, &is_null), Ok(vec![2]));
        let greater = Predicate::Compare {
            operator: ComparisonOperator::GreaterThan,
            left: Operand::Constant(ScalarValue::Null),
            right: Operand::Constant(ScalarValue::Integer(1)),
        };
        assert_eq!(matching(&f, &greater), Ok(vec![]));
    }

    #[test]
    fn membership_matches_null_like_equality() {
        let f = fixture();
        let Predicate::Compare { left, .. } = filter(&f, "equals(author,null)") else {
            panic!("expected a comparison");
        };
        let with_null = Predicate::In {
            operand: left.clone(),
            values: vec![ScalarValue::Null, ScalarValue::Integer(10)],
        };
        assert_eq!(matching(&f, &with_null), Ok(vec![1, 2]));
        let without_null = Predicate::In {
            operand: left,
            values: vec![ScalarValue::Integer(10)],
        };
        assert_eq!(matching(&f, &without_null), Ok(vec![1]));
    }

    #[test]
    fn text_function_on_number_is_conversion_failure() {
        let f = fixture();
        let predicate = Predicate::TextMatch {
            kind: TextMatchKind::Contains,
            operand: Operand::Constant(ScalarValue::Integer(5)),
            text: "5".into(),
        };
        assert_eq!(
            matching(&f, &predicate),
            Err(EvalError::IncompatibleOperand {
                function: "contains",
                type_name: "Int64"
            })
        );
    }

    #[test]
    fn sentinel_sorts_missing_links_first() {
        let f = fixture();
        let posts = f.graph.get_resource_type("blogPosts").unwrap().clone();
        let sort = crate::query::parsing::SortParser::new(&f.graph)
            .parse("sort", "-author.userName", &posts)
            .unwrap();
        let plan = NullSafetyRewriter::new().rewrite_plan(&IrBuilder::new().sort(&sort));
        let evaluator = Evaluator::new(&f);
        let ordered = order(&evaluator, &plan, f.keys_of("blogPosts")).unwrap();
        assert_eq!(ordered, vec![ResourceKey::new("blogPosts", 1), ResourceKey::new("blogPosts", 2)]);
    }
}

//! Parsed query intent. Every field reference is already resolved against the resource graph.
//! `Display` renders the canonical query string form.

use crate::graph::{AttrAttribute, FieldRef, RelationshipAttribute, ResourceType};
use crate::value::ScalarValue;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;

/// A dotted path of fields, e.g. `author.preferences.theme`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceFieldChain {
    pub fields: Vec<FieldRef>,
}

impl ResourceFieldChain {
    pub fn new(fields: Vec<FieldRef>) -> Self {
        ResourceFieldChain { fields }
    }

    pub fn single(field: FieldRef) -> Self {
        ResourceFieldChain { fields: vec![field] }
    }

    pub fn from_relationships(relationships: &[Arc<RelationshipAttribute>]) -> Self {
        ResourceFieldChain {
            fields: relationships.iter().cloned().map(FieldRef::Relationship).collect(),
        }
    }

    pub fn last(&self) -> Option<&FieldRef> {
        self.fields.last()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Trailing attribute, when the chain ends in one.
    pub fn attribute(&self) -> Option<&Arc<AttrAttribute>> {
        self.last().and_then(FieldRef::as_attribute)
    }

    /// Relationships of the chain, in order. Attributes are skipped.
    pub fn relationships(&self) -> impl Iterator<Item = &Arc<RelationshipAttribute>> {
        self.fields.iter().filter_map(FieldRef::as_relationship)
    }
}

impl fmt::Display for ResourceFieldChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(field.public_name())?;
        }
        Ok(())
    }
}

/// A typed constant together with the text it was parsed from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LiteralConstant {
    pub value: ScalarValue,
    pub text: String,
}

impl LiteralConstant {
    pub fn new(value: ScalarValue, text: impl Into<String>) -> Self {
        LiteralConstant {
            value,
            text: text.into(),
        }
    }
}

impl fmt::Display for LiteralConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.text.replace('\'', "''"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Equals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 5] = [
        ComparisonOperator::Equals,
        ComparisonOperator::GreaterThan,
        ComparisonOperator::GreaterOrEqual,
        ComparisonOperator::LessThan,
        ComparisonOperator::LessOrEqual,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            ComparisonOperator::Equals => "equals",
            ComparisonOperator::GreaterThan => "greaterThan",
            ComparisonOperator::GreaterOrEqual => "greaterOrEqual",
            ComparisonOperator::LessThan => "lessThan",
            ComparisonOperator::LessOrEqual => "lessOrEqual",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.keyword() == keyword)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn keyword(&self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextMatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl TextMatchKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            TextMatchKind::Contains => "contains",
            TextMatchKind::StartsWith => "startsWith",
            TextMatchKind::EndsWith => "endsWith",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "contains" => Some(TextMatchKind::Contains),
            "startsWith" => Some(TextMatchKind::StartsWith),
            "endsWith" => Some(TextMatchKind::EndsWith),
            _ => None,
        }
    }
}

/// Operand of a comparison.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryValue {
    /// Chain of to-one relationships ending in an attribute (or a to-one relationship, for null checks).
    Field(ResourceFieldChain),
    /// Number of elements in a to-many relationship.
    Count(ResourceFieldChain),
    Literal(LiteralConstant),
    Null,
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Field(chain) => write!(f, "{}", chain),
            QueryValue::Count(chain) => write!(f, "count({})", chain),
            QueryValue::Literal(literal) => write!(f, "{}", literal),
            QueryValue::Null => f.write_str("null"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterExpression {
    Comparison {
        operator: ComparisonOperator,
        left: QueryValue,
        right: QueryValue,
    },
    Logical {
        operator: LogicalOperator,
        terms: Vec<FilterExpression>,
    },
    Not(Box<FilterExpression>),
    MatchText {
        kind: TextMatchKind,
        target: ResourceFieldChain,
        text: LiteralConstant,
    },
    /// Attribute equals one of the constants.
    Any {
        target: ResourceFieldChain,
        constants: Vec<LiteralConstant>,
    },
    /// To-many relationship has at least one element (matching the optional filter).
    Has {
        target: ResourceFieldChain,
        filter: Option<Box<FilterExpression>>,
    },
    /// The resource (or the end of a to-one chain) is of the given derived type.
    IsType {
        target: Option<ResourceFieldChain>,
        derived_type: Arc<ResourceType>,
        filter: Option<Box<FilterExpression>>,
    },
}

impl FilterExpression {
    pub fn equals(left: QueryValue, right: QueryValue) -> Self {
        FilterExpression::Comparison {
            operator: ComparisonOperator::Equals,
            left,
            right,
        }
    }

    /// Combine terms with `and`, flattening nested conjunctions. Empty input yields `None`.
    pub fn and_all(terms: impl IntoIterator<Item = FilterExpression>) -> Option<FilterExpression> {
        let mut flat = Vec::new();
        for term in terms {
            match term {
                FilterExpression::Logical {
                    operator: LogicalOperator::And,
                    terms,
                } => flat.extend(terms),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(FilterExpression::Logical {
                operator: LogicalOperator::And,
                terms: flat,
            }),
        }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Comparison { operator, left, right } => {
                write!(f, "{}({},{})", operator.keyword(), left, right)
            }
            FilterExpression::Logical { operator, terms } => {
                write!(f, "{}(", operator.keyword())?;
                write_list(f, terms)?;
                f.write_str(")")
            }
            FilterExpression::Not(inner) => write!(f, "not({})", inner),
            FilterExpression::MatchText { kind, target, text } => {
                write!(f, "{}({},{})", kind.keyword(), target, text)
            }
            FilterExpression::Any { target, constants } => {
                write!(f, "any({},", target)?;
                write_list(f, constants)?;
                f.write_str(")")
            }
            FilterExpression::Has { target, filter } => match filter {
                Some(inner) => write!(f, "has({},{})", target, inner),
                None => write!(f, "has({})", target),
            },
            FilterExpression::IsType {
                target,
                derived_type,
                filter,
            } => {
                f.write_str("isType(")?;
                if let Some(chain) = target {
                    write!(f, "{}", chain)?;
                }
                write!(f, ",{}", derived_type.public_name)?;
                if let Some(inner) = filter {
                    write!(f, ",{}", inner)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SortTarget {
    /// Chain of to-one relationships ending in an attribute.
    Field(ResourceFieldChain),
    /// Number of elements in a to-many relationship.
    Count(ResourceFieldChain),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortElement {
    pub target: SortTarget,
    pub ascending: bool,
}

impl SortElement {
    pub fn ascending(target: SortTarget) -> Self {
        SortElement { target, ascending: true }
    }
}

impl fmt::Display for SortElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.ascending {
            f.write_str("-")?;
        }
        match &self.target {
            SortTarget::Field(chain) => write!(f, "{}", chain),
            SortTarget::Count(chain) => write!(f, "count({})", chain),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortExpression {
    pub elements: Vec<SortElement>,
}

impl SortExpression {
    /// Ascending by id, the ordering used when none is requested.
    pub fn by_id(resource_type: &ResourceType) -> Self {
        SortExpression {
            elements: vec![SortElement::ascending(SortTarget::Field(ResourceFieldChain::single(
                FieldRef::Attribute(resource_type.id_attribute().clone()),
            )))],
        }
    }
}

impl fmt::Display for SortExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, &self.elements)
    }
}

/// One relationship to eager-load, with its nested includes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IncludeElementExpression {
    pub relationship: Arc<RelationshipAttribute>,
    pub children: Vec<IncludeElementExpression>,
}

impl IncludeElementExpression {
    pub fn new(relationship: Arc<RelationshipAttribute>) -> Self {
        IncludeElementExpression {
            relationship,
            children: Vec::new(),
        }
    }

    fn write_paths(&self, prefix: &str, out: &mut Vec<String>) {
        let path = if prefix.is_empty() {
            self.relationship.public_name.clone()
        } else {
            format!("{}.{}", prefix, self.relationship.public_name)
        };
        if self.children.is_empty() {
            out.push(path);
        } else {
            for child in &self.children {
                child.write_paths(&path, out);
            }
        }
    }

    fn depth(&self) -> usize {
        1 + self.children.iter().map(Self::depth).max().unwrap_or(0)
    }
}

/// Tree of relationships to eager-load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IncludeExpression {
    pub elements: Vec<IncludeElementExpression>,
}

impl IncludeExpression {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Merge a relationship path into the tree, reusing existing nodes.
    pub fn add_path(&mut self, path: &[Arc<RelationshipAttribute>]) {
        let mut level = &mut self.elements;
        for relationship in path {
            let index = match level.iter().position(|e| &e.relationship == relationship) {
                Some(i) => i,
                None => {
                    level.push(IncludeElementExpression::new(relationship.clone()));
                    level.len() - 1
                }
            };
            level = &mut level[index].children;
        }
    }

    pub fn depth(&self) -> usize {
        self.elements.iter().map(IncludeElementExpression::depth).max().unwrap_or(0)
    }

    pub fn find(&self, relationship: &RelationshipAttribute) -> Option<&IncludeElementExpression> {
        self.elements.iter().find(|e| e.relationship.as_ref() == relationship)
    }
}

impl fmt::Display for IncludeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths = Vec::new();
        for element in &self.elements {
            element.write_paths("", &mut paths);
        }
        f.write_str(&paths.join(","))
    }
}

/// Fields to return for one resource type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SparseFieldSetExpression {
    pub fields: IndexSet<FieldRef>,
}

impl SparseFieldSetExpression {
    pub fn contains(&self, public_name: &str) -> bool {
        self.fields.iter().any(|f| f.public_name() == public_name)
    }
}

impl fmt::Display for SparseFieldSetExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(FieldRef::public_name).collect();
        f.write_str(&names.join(","))
    }
}

/// Sparse fieldsets keyed by resource type public name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SparseFieldTable {
    pub table: IndexMap<String, SparseFieldSetExpression>,
}

impl SparseFieldTable {
    pub fn get(&self, resource_type: &str) -> Option<&SparseFieldSetExpression> {
        self.table.get(resource_type)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Display for SparseFieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .table
            .iter()
            .map(|(name, set)| format!("fields[{}]={}", name, set))
            .collect();
        f.write_str(&parts.join("&"))
    }
}

/// Resolved page for one layer. `page_size` of `None` means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PaginationExpression {
    /// One-based.
    pub page_number: u32,
    pub page_size: Option<u32>,
}

impl PaginationExpression {
    pub fn new(page_number: u32, page_size: Option<u32>) -> Self {
        PaginationExpression { page_number, page_size }
    }

    pub fn skip(&self) -> usize {
        match self.page_size {
            Some(size) => (self.page_number.saturating_sub(1) as usize) * size as usize,
            None => 0,
        }
    }
}

impl fmt::Display for PaginationExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page_size {
            Some(size) => write!(f, "page {} of size {}", self.page_number, size),
            None => write!(f, "page {} (unlimited)", self.page_number),
        }
    }
}

/// One element of a `page[size]` or `page[number]` value, e.g. `posts.comments:5`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PaginationElementQueryStringValue {
    pub scope: Option<ResourceFieldChain>,
    pub value: u32,
    /// Position in the parameter value, for error reporting.
    pub position: usize,
}

/// Parsed value of a `page[size]` or `page[number]` parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PaginationQueryStringValue {
    pub elements: Vec<PaginationElementQueryStringValue>,
}

impl fmt::Display for PaginationQueryStringValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .elements
            .iter()
            .map(|e| match &e.scope {
                Some(scope) => format!("{}:{}", scope, e.value),
                None => e.value.to_string(),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Any top-level expression a query string parameter can produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryExpression {
    Filter(FilterExpression),
    Sort(SortExpression),
    Include(IncludeExpression),
    SparseFieldTable(SparseFieldTable),
    Pagination(PaginationExpression),
}

/// An expression together with the relationship chain it applies to (`None` for the request root).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpressionInScope {
    pub scope: Option<ResourceFieldChain>,
    pub expression: QueryExpression,
}

impl ExpressionInScope {
    pub fn new(scope: Option<ResourceFieldChain>, expression: QueryExpression) -> Self {
        ExpressionInScope { scope, expression }
    }

    /// Whether this expression targets the layer reached through `path` (empty path is the root).
    pub fn applies_to(&self, path: &[Arc<RelationshipAttribute>]) -> bool {
        match &self.scope {
            None => path.is_empty(),
            Some(scope) => {
                scope.len() == path.len()
                    && scope
                        .fields
                        .iter()
                        .zip(path)
                        .all(|(f, r)| f.as_relationship().map_or(false, |s| s == r))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn and_all_flattens_and_unwraps() {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap();
        let caption = FieldRef::Attribute(posts.find_attribute("caption").unwrap().clone());
        let term = FilterExpression::equals(
            QueryValue::Field(ResourceFieldChain::single(caption)),
            QueryValue::Literal(LiteralConstant::new("it's".into(), "it's")),
        );
        assert_eq!(FilterExpression::and_all(vec![term.clone()]), Some(term.clone()));
        assert_eq!(FilterExpression::and_all(Vec::new()), None);
        let nested = FilterExpression::and_all(vec![term.clone(), term.clone()]).unwrap();
        let flat = FilterExpression::and_all(vec![nested, term.clone()]).unwrap();
        assert_eq!(
            flat.to_string(),
            "and(equals(caption,'it''s'),equals(caption,'it''s'),equals(caption,'it''s'))"
        );
    }

    #[test]
    fn include_paths_merge_into_tree() {
        let graph = testing::blog_graph();
        let author = graph.get_relationship("blogPosts", "author").unwrap().clone();
        let posts = graph.get_relationship("webAccounts", "posts").unwrap().clone();
        let comments = graph.get_relationship("blogPosts", "comments").unwrap().clone();
        let mut include = IncludeExpression::default();
        include.add_path(&[author.clone(), posts.clone()]);
        include.add_path(&[author.clone()]);
        include.add_path(&[comments]);
        assert_eq!(include.elements.len(), 2);
        assert_eq!(include.depth(), 2);
        assert_eq!(include.to_string(), "author.posts,comments");
    }

    #[test]
    fn pagination_skip_is_zero_based() {
        assert_eq!(PaginationExpression::new(3, Some(10)).skip(), 20);
        assert_eq!(PaginationExpression::new(3, None).skip(), 0);
    }
}

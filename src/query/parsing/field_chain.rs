//! Resolves dotted field names against the resource graph, enforcing the shape each context requires.

use crate::error::QueryParseError;
use crate::graph::{FieldRef, ResourceGraph, ResourceType};
use crate::query::expressions::ResourceFieldChain;
use std::sync::Arc;

/// Shape a field chain must have in a given context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldChainPattern {
    /// Zero or more to-one relationships, then an attribute (comparisons, sort keys, text matching).
    ToOneChainEndingInAttribute,
    /// Like `ToOneChainEndingInAttribute`, but may also end in a to-one relationship (null checks).
    ToOneChainEndingInAttributeOrToOne,
    /// Zero or more to-one relationships, then a to-many relationship (`count`, `has`).
    ToOneChainEndingInToMany,
    /// One or more to-one relationships (`isType`).
    ToOneChain,
    /// One or more relationships of any kind (include paths).
    RelationshipChain,
    /// One or more relationships, the last of which is to-many (parameter scopes).
    RelationshipChainEndingInToMany,
}

/// A chain segment together with its position in the source text.
struct Segment<'a> {
    name: &'a str,
    position: usize,
}

pub struct FieldChainResolver<'a> {
    pub graph: &'a ResourceGraph,
    pub parameter: &'a str,
    pub source: &'a str,
}

impl<'a> FieldChainResolver<'a> {
    pub fn new(graph: &'a ResourceGraph, parameter: &'a str, source: &'a str) -> Self {
        FieldChainResolver {
            graph,
            parameter,
            source,
        }
    }

    fn error(&self, position: usize, message: impl Into<String>) -> QueryParseError {
        QueryParseError::new(self.parameter, self.source, position, message)
    }

    /// Resolve `text` (found at `position` in the source) starting from `resource_type`.
    pub fn resolve(
        &self,
        text: &str,
        position: usize,
        resource_type: &Arc<ResourceType>,
        pattern: FieldChainPattern,
    ) -> Result<ResourceFieldChain, QueryParseError> {
        let mut segments = Vec::new();
        let mut offset = position;
        for name in text.split('.') {
            segments.push(Segment { name, position: offset });
            offset += name.chars().count() + 1;
        }

        let mut fields = Vec::with_capacity(segments.len());
        let mut current = resource_type.clone();
        let last_index = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if segment.name.is_empty() {
                return Err(self.error(segment.position, "Field name expected."));
            }
            let field = current.find_field(segment.name).ok_or_else(|| {
                self.error(
                    segment.position,
                    format!(
                        "Field '{}' does not exist on resource type '{}'.",
                        segment.name, current.public_name
                    ),
                )
            })?;
            let is_last = i == last_index;
            self.check_segment(&field, &current, segment, is_last, pattern)?;
            if let FieldRef::Relationship(r) = &field {
                current = self.graph.get_resource_type(&r.right_type).map_err(|_| {
                    self.error(
                        segment.position,
                        format!("Resource type '{}' does not exist.", r.right_type),
                    )
                })?
                .clone();
            }
            fields.push(field);
        }
        Ok(ResourceFieldChain::new(fields))
    }

    fn check_segment(
        &self,
        field: &FieldRef,
        owner: &ResourceType,
        segment: &Segment<'_>,
        is_last: bool,
        pattern: FieldChainPattern,
    ) -> Result<(), QueryParseError> {
        use FieldChainPattern::*;

        let attribute_expected = || {
            self.error(
                segment.position,
                format!(
                    "Field '{}' on resource type '{}' is a relationship, but an attribute is expected.",
                    segment.name, owner.public_name
                ),
            )
        };
        let relationship_expected = || {
            self.error(
                segment.position,
                format!(
                    "Field '{}' on resource type '{}' is an attribute, but a relationship is expected.",
                    segment.name, owner.public_name
                ),
            )
        };
        let to_one_expected = || {
            self.error(
                segment.position,
                format!(
                    "Relationship '{}' on resource type '{}' is a to-many relationship, but a to-one relationship is expected.",
                    segment.name, owner.public_name
                ),
            )
        };
        let to_many_expected = || {
            self.error(
                segment.position,
                format!(
                    "Relationship '{}' on resource type '{}' is a to-one relationship, but a to-many relationship is expected.",
                    segment.name, owner.public_name
                ),
            )
        };

        match field {
            FieldRef::Attribute(_) => {
                let attribute_allowed = is_last
                    && matches!(pattern, ToOneChainEndingInAttribute | ToOneChainEndingInAttributeOrToOne);
                if !attribute_allowed {
                    return Err(relationship_expected());
                }
            }
            FieldRef::Relationship(r) => match pattern {
                ToOneChainEndingInAttribute => {
                    if is_last {
                        return Err(attribute_expected());
                    }
                    if r.is_to_many() {
                        return Err(to_one_expected());
                    }
                }
                ToOneChainEndingInAttributeOrToOne | ToOneChain => {
                    if r.is_to_many() {
                        return Err(to_one_expected());
                    }
                }
                ToOneChainEndingInToMany => {
                    if is_last && r.is_to_one() {
                        return Err(to_many_expected());
                    }
                    if !is_last && r.is_to_many() {
                        return Err(to_one_expected());
                    }
                }
                RelationshipChain => {}
                RelationshipChainEndingInToMany => {
                    if is_last && r.is_to_one() {
                        return Err(to_many_expected());
                    }
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use test_case::test_case;

    #[test_case("author.userName", FieldChainPattern::ToOneChainEndingInAttribute ; "to-one then attribute")]
    #[test_case("author", FieldChainPattern::ToOneChainEndingInAttributeOrToOne ; "to-one for null check")]
    #[test_case("author.posts", FieldChainPattern::ToOneChainEndingInToMany ; "to-one then to-many")]
    #[test_case("comments.author", FieldChainPattern::RelationshipChain ; "mixed relationships")]
    #[test_case("comments", FieldChainPattern::RelationshipChainEndingInToMany ; "scope")]
    fn accepts(text: &str, pattern: FieldChainPattern) {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap();
        let chain = FieldChainResolver::new(&graph, "filter", text)
            .resolve(text, 0, posts, pattern)
            .unwrap();
        assert_eq!(chain.to_string(), text);
    }

    #[test_case("author.nope", 7, "Field 'nope' does not exist on resource type 'webAccounts'." ; "unknown nested field")]
    #[test_case("author", 0, "Field 'author' on resource type 'blogPosts' is a relationship, but an attribute is expected." ; "ends in relationship")]
    #[test_case("comments.text", 0, "Relationship 'comments' on resource type 'blogPosts' is a to-many relationship, but a to-one relationship is expected." ; "to-many in the middle")]
    #[test_case("caption.x", 0, "Field 'caption' on resource type 'blogPosts' is an attribute, but a relationship is expected." ; "attribute in the middle")]
    #[test_case("author..userName", 7, "Field name expected." ; "empty segment")]
    fn rejects(text: &str, position: usize, message: &str) {
        let graph = testing::blog_graph();
        let posts = graph.get_resource_type("blogPosts").unwrap();
        let err = FieldChainResolver::new(&graph, "sort", text)
            .resolve(text, 0, posts, FieldChainPattern::ToOneChainEndingInAttribute)
            .unwrap_err();
        assert_eq!(err.position, position);
        assert_eq!(err.message, message);
    }
}

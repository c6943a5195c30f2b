//! Local ids: declared by `add` operations, usable by later operations of the same batch.

use super::request::{IdentityRef, OperationContainer, OperationKind};
use super::validation::ErrorCollector;
use crate::error::{AppError, ErrorObject};
use crate::graph::ResourceGraph;
use crate::value::{ResourceKey, ScalarValue};
use axum::http::StatusCode;
use std::collections::HashMap;

/// Walks a batch in order before execution, so misuse of local ids is reported together with
/// the other validation errors instead of halfway through the writes.
pub struct LocalIdValidator<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> LocalIdValidator<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        LocalIdValidator { graph }
    }

    pub fn validate(&self, operations: &[OperationContainer], errors: &mut ErrorCollector) {
        // lid -> declaring resource type
        let mut declared: HashMap<&str, &str> = HashMap::new();
        for operation in operations {
            let pointer = operation.pointer();
            if operation.kind != OperationKind::AddResource {
                if let Some(error) = self.check_usage(&declared, &operation.target, &pointer) {
                    errors.push(error);
                }
            }
            for (_, related) in operation.related_refs() {
                if let Some(error) = self.check_usage(&declared, related, &pointer) {
                    errors.push(error);
                }
            }
            if operation.kind == OperationKind::AddResource {
                if let Some(lid) = operation.target.lid.as_deref() {
                    if declared.insert(lid, &operation.resource_type().public_name).is_some() {
                        errors.push(
                            ErrorObject::new(StatusCode::BAD_REQUEST, "Another local ID with the same name is already defined at this point.")
                                .with_detail(format!("Another local ID with name '{}' is already defined at this point.", lid))
                                .with_pointer(pointer),
                        );
                    }
                }
            }
        }
    }

    fn check_usage(&self, declared: &HashMap<&str, &str>, identity: &IdentityRef, pointer: &str) -> Option<ErrorObject> {
        let lid = identity.lid.as_deref()?;
        let used_as = &identity.resource_type.public_name;
        match declared.get(lid) {
            None => Some(unavailable(lid).with_pointer(pointer)),
            Some(declared_type) if !self.graph.is_same_or_derived(declared_type, used_as) => Some(
                ErrorObject::new(StatusCode::BAD_REQUEST, "Incompatible type in Local ID usage.")
                    .with_detail(format!(
                        "Local ID '{}' belongs to resource type '{}' instead of '{}'.",
                        lid, declared_type, used_as
                    ))
                    .with_pointer(pointer),
            ),
            Some(_) => None,
        }
    }
}

fn unavailable(lid: &str) -> ErrorObject {
    ErrorObject::new(StatusCode::BAD_REQUEST, "Server-generated value for local ID is not available at this point.")
        .with_detail(format!("Server-generated value for local ID '{}' is not available at this point.", lid))
}

/// Server ids assigned to local ids while a batch executes.
#[derive(Debug, Default)]
pub struct LocalIdTracker {
    assigned: HashMap<String, ResourceKey>,
}

impl LocalIdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, lid: &str, key: ResourceKey) {
        self.assigned.insert(lid.to_string(), key);
    }

    /// Server id behind an identity: its own id, or the one assigned to its local id.
    pub fn resolve(&self, identity: &IdentityRef) -> Result<ScalarValue, AppError> {
        if let Some(id) = &identity.id {
            return Ok(id.clone());
        }
        let lid = identity.lid.as_deref().unwrap_or_default();
        self.assigned
            .get(lid)
            .map(|key| key.id.clone())
            .ok_or_else(|| AppError::Validation(vec![unavailable(lid)]))
    }

    /// Key of an identity, typed as declared by the reference.
    pub fn resolve_key(&self, identity: &IdentityRef) -> Result<ResourceKey, AppError> {
        Ok(ResourceKey::new(identity.resource_type.public_name.clone(), self.resolve(identity)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::request::PendingTargets;
    use crate::testing;

    fn identity(graph: &ResourceGraph, type_name: &str, lid: &str) -> IdentityRef {
        IdentityRef {
            resource_type: graph.get_resource_type(type_name).unwrap().clone(),
            id: None,
            lid: Some(lid.to_string()),
        }
    }

    fn operation(index: usize, kind: OperationKind, target: IdentityRef) -> OperationContainer {
        OperationContainer::new(index, kind, target)
    }

    #[test]
    fn use_before_declaration_and_type_mismatch() {
        let graph = testing::music_graph();
        let mut link = operation(1, OperationKind::AddResource, identity(&graph, "musicTracks", "t1"));
        link.relationships.insert(
            "performers".into(),
            PendingTargets::ToMany(vec![identity(&graph, "performers", "p1")]),
        );
        let operations = vec![
            operation(0, OperationKind::AddResource, identity(&graph, "performers", "p0")),
            link,
            operation(2, OperationKind::RemoveResource, identity(&graph, "playlists", "t1")),
        ];
        let mut errors = ErrorCollector::new(10);
        LocalIdValidator::new(&graph).validate(&operations, &mut errors);
        let errors = errors.into_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].pointer(), Some("/atomic:operations[1]"));
        assert_eq!(
            errors[0].detail.as_deref(),
            Some("Server-generated value for local ID 'p1' is not available at this point.")
        );
        assert_eq!(errors[1].title, "Incompatible type in Local ID usage.");
        assert_eq!(errors[1].pointer(), Some("/atomic:operations[2]"));
    }

    #[test]
    fn duplicate_declaration() {
        let graph = testing::music_graph();
        let operations = vec![
            operation(0, OperationKind::AddResource, identity(&graph, "performers", "x")),
            operation(1, OperationKind::AddResource, identity(&graph, "performers", "x")),
        ];
        let mut errors = ErrorCollector::new(10);
        LocalIdValidator::new(&graph).validate(&operations, &mut errors);
        let errors = errors.into_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].status, "400");
    }

    #[test]
    fn tracker_resolves_assigned_ids() {
        let graph = testing::music_graph();
        let mut tracker = LocalIdTracker::new();
        let performer = identity(&graph, "performers", "p");
        assert!(tracker.resolve(&performer).is_err());
        tracker.assign("p", ResourceKey::new("performers", 3));
        assert_eq!(tracker.resolve(&performer).unwrap(), ScalarValue::Integer(3));
    }
}

//! Wire shape of the atomic operations extension and the validated form operations take
//! once resolved against the resource graph.

use crate::graph::{RelationshipAttribute, ResourceType};
use crate::serialization::AtomicResultObject;
use crate::value::{id_to_string, ScalarValue};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Member holding the operations of a request document.
pub const OPERATIONS_MEMBER: &str = "atomic:operations";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicOperationCode {
    Add,
    Update,
    Remove,
}

/// One element of `atomic:operations` as sent by the client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicOperationObject {
    pub op: Option<AtomicOperationCode>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<AtomicReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// `Some(Value::Null)` when the client sent `"data": null`, `None` when it sent nothing.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicReference {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Response body of a committed batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicResultsDocument {
    #[serde(rename = "atomic:results")]
    pub results: Vec<AtomicResultObject>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    AddResource,
    UpdateResource,
    RemoveResource,
    AddToRelationship,
    SetRelationship,
    RemoveFromRelationship,
}

impl OperationKind {
    pub fn targets_relationship(&self) -> bool {
        matches!(
            self,
            OperationKind::AddToRelationship | OperationKind::SetRelationship | OperationKind::RemoveFromRelationship
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::AddResource => "add resource",
            OperationKind::UpdateResource => "update resource",
            OperationKind::RemoveResource => "remove resource",
            OperationKind::AddToRelationship => "add to relationship",
            OperationKind::SetRelationship => "set relationship",
            OperationKind::RemoveFromRelationship => "remove from relationship",
        };
        f.write_str(name)
    }
}

/// A resource addressed by server id or by local id. Exactly one of the two is set, except
/// for a resource being created without either.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityRef {
    pub resource_type: Arc<ResourceType>,
    pub id: Option<ScalarValue>,
    pub lid: Option<String>,
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.lid) {
            (Some(id), _) => write!(f, "{}:{}", self.resource_type.public_name, id_to_string(id)),
            (None, Some(lid)) => write!(f, "{}:lid={}", self.resource_type.public_name, lid),
            (None, None) => write!(f, "{}:new", self.resource_type.public_name),
        }
    }
}

/// Relationship targets whose local ids are not resolved yet.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingTargets {
    ToOne(Option<IdentityRef>),
    ToMany(Vec<IdentityRef>),
}

impl PendingTargets {
    pub fn refs(&self) -> Vec<&IdentityRef> {
        match self {
            PendingTargets::ToOne(target) => target.iter().collect(),
            PendingTargets::ToMany(targets) => targets.iter().collect(),
        }
    }
}

/// A converted operation, ready for validation and execution.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationContainer {
    /// Position in `atomic:operations`.
    pub index: usize,
    pub kind: OperationKind,
    /// The resource created, updated or removed, or the owner of the targeted relationship.
    pub target: IdentityRef,
    /// Attribute values from `data`, by public name.
    pub attributes: IndexMap<String, ScalarValue>,
    /// Relationship values from `data`, by public name.
    pub relationships: IndexMap<String, PendingTargets>,
    /// Relationship named in `ref`, for relationship operations.
    pub relationship: Option<Arc<RelationshipAttribute>>,
    /// Targets from `data`, for relationship operations.
    pub relationship_targets: Option<PendingTargets>,
}

impl OperationContainer {
    pub fn new(index: usize, kind: OperationKind, target: IdentityRef) -> Self {
        OperationContainer {
            index,
            kind,
            target,
            attributes: IndexMap::new(),
            relationships: IndexMap::new(),
            relationship: None,
            relationship_targets: None,
        }
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.target.resource_type
    }

    /// JSON pointer of this operation.
    pub fn pointer(&self) -> String {
        operation_pointer(self.index)
    }

    /// Every identity referenced by this operation besides its own target.
    pub fn related_refs(&self) -> Vec<(&str, &IdentityRef)> {
        let mut out = Vec::new();
        for (name, targets) in &self.relationships {
            out.extend(targets.refs().into_iter().map(|r| (name.as_str(), r)));
        }
        if let (Some(relationship), Some(targets)) = (&self.relationship, &self.relationship_targets) {
            out.extend(targets.refs().into_iter().map(|r| (relationship.public_name.as_str(), r)));
        }
        out
    }
}

pub fn operation_pointer(index: usize) -> String {
    format!("/{}[{}]", OPERATIONS_MEMBER, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_null_data_differs_from_missing_data() {
        let with_null: AtomicOperationObject = serde_json::from_value(json!({
            "op": "update",
            "ref": { "type": "lyrics", "id": "1", "relationship": "track" },
            "data": null
        }))
        .unwrap();
        assert_eq!(with_null.data, Some(Value::Null));
        assert_eq!(with_null.reference.unwrap().relationship.as_deref(), Some("track"));

        let without: AtomicOperationObject =
            serde_json::from_value(json!({ "op": "remove", "ref": { "type": "lyrics", "id": "1" } })).unwrap();
        assert_eq!(without.data, None);
        assert_eq!(without.op, Some(AtomicOperationCode::Remove));
    }

    #[test]
    fn results_use_extension_member_name() {
        let document = AtomicResultsDocument {
            results: vec![AtomicResultObject::default()],
        };
        assert_eq!(serde_json::to_value(&document).unwrap(), json!({ "atomic:results": [{}] }));
        assert_eq!(operation_pointer(3), "/atomic:operations[3]");
    }
}

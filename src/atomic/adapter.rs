//! Converts the raw `atomic:operations` array into [`OperationContainer`]s, resolving types,
//! fields and ids against the resource graph. Every problem found in an operation is reported
//! with a pointer into the request body; conversion of one operation never stops at the first.

use super::request::*;
use crate::config::JsonApiOptions;
use crate::error::{AppError, ErrorObject};
use crate::graph::{ClientIdGeneration, RelationshipAttribute, ResourceGraph, ResourceType};
use crate::value::{id_to_string, ScalarValue};
use axum::http::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;

const DESERIALIZE_FAILED: &str = "Failed to deserialize request body";

/// Errors of one operation, each pointing below the operation's own pointer.
struct Issues {
    base: String,
    errors: Vec<ErrorObject>,
}

impl Issues {
    fn new(index: usize) -> Self {
        Issues {
            base: operation_pointer(index),
            errors: Vec::new(),
        }
    }

    fn push(&mut self, status: StatusCode, message: &str, detail: Option<String>, pointer: &str) {
        let mut error = ErrorObject::new(status, format!("{}: {}", DESERIALIZE_FAILED, message))
            .with_pointer(format!("{}{}", self.base, pointer));
        if let Some(detail) = detail {
            error = error.with_detail(detail);
        }
        self.errors.push(error);
    }

    fn fail<T>(&mut self, status: StatusCode, message: &str, detail: Option<String>, pointer: &str) -> Option<T> {
        self.push(status, message, detail, pointer);
        None
    }

    fn invalid<T>(&mut self, message: &str, pointer: &str) -> Option<T> {
        self.fail(StatusCode::UNPROCESSABLE_ENTITY, message, None, pointer)
    }

    fn invalid_with_detail<T>(&mut self, message: &str, detail: String, pointer: &str) -> Option<T> {
        self.fail(StatusCode::UNPROCESSABLE_ENTITY, message, Some(detail), pointer)
    }
}

pub struct AtomicOperationsAdapter<'a> {
    graph: &'a ResourceGraph,
    options: &'a JsonApiOptions,
}

impl<'a> AtomicOperationsAdapter<'a> {
    pub fn new(graph: &'a ResourceGraph, options: &'a JsonApiOptions) -> Self {
        AtomicOperationsAdapter { graph, options }
    }

    /// The operations array of a request document, checked against the per-request maximum.
    pub fn operations<'b>(&self, body: &'b Value) -> Result<&'b [Value], AppError> {
        let Some(operations) = body.get(OPERATIONS_MEMBER).and_then(Value::as_array) else {
            return Err(AppError::Validation(vec![ErrorObject::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("{}: The '{}' element is required.", DESERIALIZE_FAILED, OPERATIONS_MEMBER),
            )]));
        };
        if operations.is_empty() {
            return Err(AppError::Validation(vec![ErrorObject::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("{}: No operations found.", DESERIALIZE_FAILED),
            )
            .with_pointer(format!("/{}", OPERATIONS_MEMBER))]));
        }
        if let Some(max) = self.options.maximum_operations_per_request {
            if operations.len() > max {
                return Err(AppError::Validation(vec![ErrorObject::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Too many operations in request.",
                )
                .with_detail(format!(
                    "The number of operations in this request ({}) is higher than the maximum of {}.",
                    operations.len(),
                    max
                ))
                .with_pointer(format!("/{}", OPERATIONS_MEMBER))]));
            }
        }
        Ok(operations)
    }

    pub fn convert(&self, index: usize, raw: &Value) -> Result<OperationContainer, Vec<ErrorObject>> {
        let mut issues = Issues::new(index);
        let converted = self.convert_operation(index, raw, &mut issues);
        match converted {
            Some(container) if issues.errors.is_empty() => Ok(container),
            _ => Err(issues.errors),
        }
    }

    fn convert_operation(&self, index: usize, raw: &Value, issues: &mut Issues) -> Option<OperationContainer> {
        let operation: AtomicOperationObject = match serde_json::from_value(raw.clone()) {
            Ok(operation) => operation,
            Err(e) => return issues.fail(StatusCode::UNPROCESSABLE_ENTITY, "Invalid operation.", Some(e.to_string()), ""),
        };
        if operation.href.is_some() {
            return issues.invalid("The 'href' element is not supported.", "/href");
        }
        let Some(op) = operation.op else {
            return issues.invalid("The 'op' element is required.", "");
        };
        let data = operation.data.as_ref();

        match (op, operation.reference.as_ref()) {
            (_, Some(reference)) if reference.relationship.is_some() => {
                self.relationship_operation(index, op, reference, data, issues)
            }
            (AtomicOperationCode::Add, Some(_)) => issues.invalid("The 'relationship' element is required.", "/ref"),
            (AtomicOperationCode::Add, None) => self.resource_operation(index, OperationKind::AddResource, None, data, issues),
            (AtomicOperationCode::Update, reference) => {
                let target = match reference {
                    Some(reference) => Some(self.reference(reference, "/ref", false, issues)?),
                    None => None,
                };
                self.resource_operation(index, OperationKind::UpdateResource, target, data, issues)
            }
            (AtomicOperationCode::Remove, None) => issues.invalid("The 'ref' element is required.", ""),
            (AtomicOperationCode::Remove, Some(reference)) => {
                let target = self.reference(reference, "/ref", true, issues)?;
                if data.is_some() {
                    return issues.invalid("The 'data' element is not allowed.", "/data");
                }
                Some(OperationContainer::new(index, OperationKind::RemoveResource, target))
            }
        }
    }

    fn relationship_operation(
        &self,
        index: usize,
        op: AtomicOperationCode,
        reference: &AtomicReference,
        data: Option<&Value>,
        issues: &mut Issues,
    ) -> Option<OperationContainer> {
        let target = self.reference(reference, "/ref", true, issues)?;
        let name = reference.relationship.as_deref().unwrap_or_default();
        let Some(relationship) = target.resource_type.find_relationship(name).cloned() else {
            return issues.fail(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Unknown relationship found.",
                Some(format!(
                    "Relationship '{}' does not exist on resource type '{}'.",
                    name, target.resource_type.public_name
                )),
                "/ref/relationship",
            );
        };
        let kind = match op {
            AtomicOperationCode::Add => OperationKind::AddToRelationship,
            AtomicOperationCode::Update => OperationKind::SetRelationship,
            AtomicOperationCode::Remove => OperationKind::RemoveFromRelationship,
        };
        if kind != OperationKind::SetRelationship && relationship.is_to_one() {
            return issues.fail(
                StatusCode::FORBIDDEN,
                "Only to-many relationships can be targeted through this operation.",
                Some(format!("Relationship '{}' is not a to-many relationship.", name)),
                "/ref/relationship",
            );
        }
        let (allowed, message, verb) = match kind {
            OperationKind::AddToRelationship => (relationship.capabilities.add, "Relationship cannot be added to.", "added to"),
            OperationKind::RemoveFromRelationship => {
                (relationship.capabilities.remove, "Relationship cannot be removed from.", "removed from")
            }
            _ => (relationship.capabilities.set, "Relationship cannot be assigned.", "assigned to"),
        };
        if !allowed {
            return issues.fail(
                StatusCode::FORBIDDEN,
                message,
                Some(format!(
                    "The relationship '{}' on resource type '{}' cannot be {}.",
                    name, target.resource_type.public_name, verb
                )),
                "/ref/relationship",
            );
        }
        let Some(data) = data else {
            return issues.invalid("The 'data' element is required.", "");
        };
        let targets = self.targets(&relationship, data, "/data", issues)?;

        let mut container = OperationContainer::new(index, kind, target);
        container.relationship = Some(relationship);
        container.relationship_targets = Some(targets);
        Some(container)
    }

    fn resource_operation(
        &self,
        index: usize,
        kind: OperationKind,
        reference: Option<IdentityRef>,
        data: Option<&Value>,
        issues: &mut Issues,
    ) -> Option<OperationContainer> {
        let Some(data) = data else {
            return issues.invalid("The 'data' element is required.", "");
        };
        let Some(object) = data.as_object() else {
            return issues.invalid("Expected an object in 'data' element.", "/data");
        };
        let resource_type = self.resource_type_member(object, "/data", issues)?;
        if let Some(reference) = &reference {
            if reference.resource_type.public_name != resource_type.public_name {
                return issues.fail(
                    StatusCode::CONFLICT,
                    "Resource type mismatch between 'ref.type' and 'data.type' element.",
                    Some(format!(
                        "Expected resource of type '{}' in 'data.type', instead of '{}'.",
                        reference.resource_type.public_name, resource_type.public_name
                    )),
                    "/data/type",
                );
            }
        }
        let target = self.resource_identity(kind, &resource_type, object, issues)?;
        if let Some(reference) = &reference {
            self.check_identity_matches(reference, &target, issues)?;
        }

        let mut container = OperationContainer::new(index, kind, target);
        if let Some(attributes) = object.get("attributes") {
            match attributes.as_object() {
                Some(attributes) => self.attributes(kind, &resource_type, attributes, &mut container, issues),
                None => issues.push(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Expected an object in 'attributes' element.",
                    None,
                    "/data/attributes",
                ),
            }
        }
        if let Some(relationships) = object.get("relationships") {
            match relationships.as_object() {
                Some(relationships) => self.relationships(&resource_type, relationships, &mut container, issues),
                None => issues.push(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Expected an object in 'relationships' element.",
                    None,
                    "/data/relationships",
                ),
            }
        }
        Some(container)
    }

    /// `id`/`lid` of the resource in `data`, checked against the client id policy for creates.
    fn resource_identity(
        &self,
        kind: OperationKind,
        resource_type: &Arc<ResourceType>,
        object: &Map<String, Value>,
        issues: &mut Issues,
    ) -> Option<IdentityRef> {
        let id = string_member(object, "id", "/data", issues)?;
        let lid = string_member(object, "lid", "/data", issues)?;
        if id.is_some() && lid.is_some() {
            return issues.invalid("The 'id' and 'lid' element are mutually exclusive.", "/data");
        }
        if kind == OperationKind::AddResource {
            if resource_type.is_abstract {
                return issues.fail(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Abstract resource type found.",
                    Some(format!("Resource type '{}' is abstract.", resource_type.public_name)),
                    "/data/type",
                );
            }
            match resource_type.client_id {
                ClientIdGeneration::Forbidden if id.is_some() => {
                    return issues.fail(
                        StatusCode::FORBIDDEN,
                        "The use of client-generated IDs is disabled.",
                        None,
                        "/data/id",
                    );
                }
                ClientIdGeneration::Required if id.is_none() => {
                    return issues.invalid("The 'id' element is required.", "/data");
                }
                _ => {}
            }
        } else if id.is_none() && lid.is_none() {
            return issues.invalid("The 'id' or 'lid' element is required.", "/data");
        }
        let id = match id {
            Some(id) => Some(self.convert_id(resource_type, id, "/data/id", issues)?),
            None => None,
        };
        Some(IdentityRef {
            resource_type: resource_type.clone(),
            id,
            lid: lid.map(str::to_string),
        })
    }

    fn check_identity_matches(&self, reference: &IdentityRef, target: &IdentityRef, issues: &mut Issues) -> Option<()> {
        if reference.id.is_some() && reference.id != target.id {
            let expected = reference.id.as_ref().map(id_to_string).unwrap_or_default();
            let actual = target.id.as_ref().map(id_to_string).unwrap_or_else(|| "null".to_string());
            return issues.fail(
                StatusCode::CONFLICT,
                "Resource ID mismatch between 'ref.id' and 'data.id' element.",
                Some(format!("Expected resource with ID '{}' in 'data.id', instead of '{}'.", expected, actual)),
                "/data/id",
            );
        }
        if reference.lid.is_some() && reference.lid != target.lid {
            let expected = reference.lid.clone().unwrap_or_default();
            let actual = target.lid.clone().unwrap_or_else(|| "null".to_string());
            return issues.fail(
                StatusCode::CONFLICT,
                "Resource local ID mismatch between 'ref.lid' and 'data.lid' element.",
                Some(format!("Expected resource with local ID '{}' in 'data.lid', instead of '{}'.", expected, actual)),
                "/data/lid",
            );
        }
        Some(())
    }

    fn attributes(
        &self,
        kind: OperationKind,
        resource_type: &ResourceType,
        attributes: &Map<String, Value>,
        container: &mut OperationContainer,
        issues: &mut Issues,
    ) {
        for (name, value) in attributes {
            let pointer = format!("/data/attributes/{}", name);
            let Some(attribute) = resource_type.find_attribute(name).filter(|a| !a.is_id()) else {
                issues.push(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Unknown attribute found.",
                    Some(format!(
                        "Attribute '{}' does not exist on resource type '{}'.",
                        name, resource_type.public_name
                    )),
                    &pointer,
                );
                continue;
            };
            let (allowed, message) = if kind == OperationKind::AddResource {
                (attribute.capabilities.create, "Attribute value cannot be assigned when creating resource.")
            } else {
                (attribute.capabilities.change, "Attribute value cannot be assigned when updating resource.")
            };
            if !allowed {
                issues.push(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    message,
                    Some(format!(
                        "The attribute '{}' on resource type '{}' cannot be assigned to.",
                        name, resource_type.public_name
                    )),
                    &pointer,
                );
                continue;
            }
            match ScalarValue::from_json(value, attribute.attr_type) {
                Ok(value) => {
                    container.attributes.insert(attribute.public_name.clone(), value);
                }
                Err(e) => issues.push(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Incompatible attribute value found.",
                    Some(e.to_string()),
                    &pointer,
                ),
            }
        }
    }

    fn relationships(
        &self,
        resource_type: &ResourceType,
        relationships: &Map<String, Value>,
        container: &mut OperationContainer,
        issues: &mut Issues,
    ) {
        for (name, value) in relationships {
            let pointer = format!("/data/relationships/{}", name);
            let Some(relationship) = resource_type.find_relationship(name) else {
                issues.push(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Unknown relationship found.",
                    Some(format!(
                        "Relationship '{}' does not exist on resource type '{}'.",
                        name, resource_type.public_name
                    )),
                    &pointer,
                );
                continue;
            };
            if !relationship.capabilities.set {
                issues.push(
                    StatusCode::FORBIDDEN,
                    "Relationship cannot be assigned.",
                    Some(format!(
                        "The relationship '{}' on resource type '{}' cannot be assigned to.",
                        name, resource_type.public_name
                    )),
                    &pointer,
                );
                continue;
            }
            let Some(data) = value.as_object().and_then(|o| o.get("data")) else {
                issues.push(StatusCode::UNPROCESSABLE_ENTITY, "The 'data' element is required.", None, &pointer);
                continue;
            };
            if let Some(targets) = self.targets(relationship, data, &format!("{}/data", pointer), issues) {
                container.relationships.insert(relationship.public_name.clone(), targets);
            }
        }
    }

    fn targets(
        &self,
        relationship: &RelationshipAttribute,
        data: &Value,
        pointer: &str,
        issues: &mut Issues,
    ) -> Option<PendingTargets> {
        if relationship.is_to_one() {
            return match data {
                Value::Null => Some(PendingTargets::ToOne(None)),
                Value::Array(_) => issues.invalid_with_detail(
                    "Expected single data element for to-one relationship.",
                    format!("Expected single data element for '{}' relationship.", relationship.public_name),
                    pointer,
                ),
                other => Some(PendingTargets::ToOne(Some(self.identifier(relationship, other, pointer, issues)?))),
            };
        }
        let Some(elements) = data.as_array() else {
            return issues.invalid_with_detail(
                "Expected data[] element for to-many relationship.",
                format!("Expected data[] element for '{}' relationship.", relationship.public_name),
                pointer,
            );
        };
        let mut targets = Vec::with_capacity(elements.len());
        let mut complete = true;
        for (i, element) in elements.iter().enumerate() {
            match self.identifier(relationship, element, &format!("{}[{}]", pointer, i), issues) {
                Some(target) => targets.push(target),
                None => complete = false,
            }
        }
        complete.then_some(PendingTargets::ToMany(targets))
    }

    /// A resource identifier object in relationship data.
    fn identifier(
        &self,
        relationship: &RelationshipAttribute,
        value: &Value,
        pointer: &str,
        issues: &mut Issues,
    ) -> Option<IdentityRef> {
        let Some(object) = value.as_object() else {
            return issues.invalid("Expected an object.", pointer);
        };
        let resource_type = self.resource_type_member(object, pointer, issues)?;
        if !self.graph.is_same_or_derived(&resource_type.public_name, &relationship.right_type) {
            return issues.fail(
                StatusCode::CONFLICT,
                "Incompatible resource type found.",
                Some(format!(
                    "Type '{}' is not convertible to type '{}' of relationship '{}'.",
                    resource_type.public_name, relationship.right_type, relationship.public_name
                )),
                &format!("{}/type", pointer),
            );
        }
        let id = string_member(object, "id", pointer, issues)?;
        let lid = string_member(object, "lid", pointer, issues)?;
        self.identity(&resource_type, id, lid, pointer, true, issues)
    }

    /// The `ref` of an operation.
    fn reference(&self, reference: &AtomicReference, pointer: &str, require_identity: bool, issues: &mut Issues) -> Option<IdentityRef> {
        if reference.id.is_some() && reference.lid.is_some() {
            return issues.invalid("The 'id' and 'lid' element are mutually exclusive.", pointer);
        }
        let Some(type_name) = reference.resource_type.as_deref() else {
            return issues.invalid("The 'type' element is required.", pointer);
        };
        let resource_type = self.lookup_type(type_name, &format!("{}/type", pointer), issues)?;
        self.identity(
            &resource_type,
            reference.id.as_deref(),
            reference.lid.as_deref(),
            pointer,
            require_identity,
            issues,
        )
    }

    fn identity(
        &self,
        resource_type: &Arc<ResourceType>,
        id: Option<&str>,
        lid: Option<&str>,
        pointer: &str,
        require_identity: bool,
        issues: &mut Issues,
    ) -> Option<IdentityRef> {
        match (id, lid) {
            (Some(_), Some(_)) => issues.invalid("The 'id' and 'lid' element are mutually exclusive.", pointer),
            (None, None) if require_identity => issues.invalid("The 'id' or 'lid' element is required.", pointer),
            (id, lid) => {
                let id = match id {
                    Some(id) => Some(self.convert_id(resource_type, id, &format!("{}/id", pointer), issues)?),
                    None => None,
                };
                Some(IdentityRef {
                    resource_type: resource_type.clone(),
                    id,
                    lid: lid.map(str::to_string),
                })
            }
        }
    }

    fn resource_type_member(&self, object: &Map<String, Value>, pointer: &str, issues: &mut Issues) -> Option<Arc<ResourceType>> {
        match object.get("type") {
            None | Some(Value::Null) => issues.invalid("The 'type' element is required.", pointer),
            Some(Value::String(name)) => self.lookup_type(name, &format!("{}/type", pointer), issues),
            Some(_) => issues.invalid("The 'type' element must be a string.", &format!("{}/type", pointer)),
        }
    }

    fn lookup_type(&self, name: &str, pointer: &str, issues: &mut Issues) -> Option<Arc<ResourceType>> {
        match self.graph.find_resource_type(name) {
            Some(resource_type) => Some(resource_type.clone()),
            None => issues.fail(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Unknown resource type found.",
                Some(format!("Resource type '{}' does not exist.", name)),
                pointer,
            ),
        }
    }

    fn convert_id(&self, resource_type: &ResourceType, id: &str, pointer: &str, issues: &mut Issues) -> Option<ScalarValue> {
        match ScalarValue::parse_as(id, resource_type.id_type.attr_type()) {
            Ok(id) => Some(id),
            Err(e) => issues.fail(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Incompatible 'id' value found.",
                Some(e.to_string()),
                pointer,
            ),
        }
    }
}

/// Optional string member; `Err` (reported) when present with another JSON type.
fn string_member<'v>(
    object: &'v Map<String, Value>,
    name: &str,
    pointer: &str,
    issues: &mut Issues,
) -> Option<Option<&'v str>> {
    match object.get(name) {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.as_str())),
        Some(_) => issues.invalid(&format!("The '{}' element must be a string.", name), &format!("{}/{}", pointer, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;
    use test_case::test_case;

    fn convert(body: Value) -> Result<OperationContainer, Vec<ErrorObject>> {
        let graph = testing::music_graph();
        let options = JsonApiOptions::default();
        AtomicOperationsAdapter::new(&graph, &options).convert(0, &body)
    }

    fn single_error(body: Value) -> ErrorObject {
        let errors = convert(body).unwrap_err();
        assert_eq!(errors.len(), 1, "{:?}", errors);
        errors.into_iter().next().unwrap()
    }

    #[test]
    fn add_resource_with_relationships() {
        let container = convert(json!({
            "op": "add",
            "data": {
                "type": "musicTracks",
                "lid": "new-track",
                "attributes": { "title": "Blue", "lengthInSeconds": 182.5 },
                "relationships": {
                    "ownedBy": { "data": { "type": "recordCompanies", "id": "4" } },
                    "performers": { "data": [{ "type": "performers", "lid": "p1" }] }
                }
            }
        }))
        .unwrap();
        assert_eq!(container.kind, OperationKind::AddResource);
        assert_eq!(container.target.lid.as_deref(), Some("new-track"));
        assert_eq!(container.attributes["title"], ScalarValue::from("Blue"));
        assert_eq!(container.attributes["lengthInSeconds"], ScalarValue::Float(182.5));
        match &container.relationships["ownedBy"] {
            PendingTargets::ToOne(Some(owner)) => assert_eq!(owner.id, Some(ScalarValue::Integer(4))),
            other => panic!("unexpected targets {:?}", other),
        }
        assert_eq!(container.related_refs().len(), 2);
    }

    #[test]
    fn id_and_lid_in_ref_is_a_single_error() {
        let error = single_error(json!({
            "op": "remove",
            "ref": { "type": "performers", "id": "not-a-number", "lid": "x" }
        }));
        assert_eq!(error.title, "Failed to deserialize request body: The 'id' and 'lid' element are mutually exclusive.");
        assert_eq!(error.pointer(), Some("/atomic:operations[0]/ref"));
        assert_eq!(error.status, "422");
    }

    #[test_case(json!({ "op": "remove", "ref": { "type": "performers" } }), "/atomic:operations[0]/ref" ; "remove without id")]
    #[test_case(json!({ "op": "remove", "href": "/performers/1" }), "/atomic:operations[0]/href" ; "href")]
    #[test_case(json!({ "op": "remove" }), "/atomic:operations[0]" ; "remove without ref")]
    #[test_case(json!({ "op": "add", "data": { "type": "unknown" } }), "/atomic:operations[0]/data/type" ; "unknown type")]
    #[test_case(json!({ "op": "add", "data": { "type": "performers", "attributes": { "age": 3 } } }), "/atomic:operations[0]/data/attributes/age" ; "unknown attribute")]
    #[test_case(json!({ "op": "update", "ref": { "type": "performers", "id": "1", "relationship": "nope" }, "data": [] }), "/atomic:operations[0]/ref/relationship" ; "unknown relationship")]
    fn rejected_operations_point_at_the_cause(body: Value, pointer: &str) {
        assert_eq!(single_error(body).pointer(), Some(pointer));
    }

    #[test]
    fn guid_where_integer_expected_is_a_conversion_error() {
        let error = single_error(json!({
            "op": "remove",
            "ref": { "type": "performers", "id": "1bf5ad9b-a3b5-4a5f-8c6b-54b8b9e36a27" }
        }));
        assert_eq!(error.pointer(), Some("/atomic:operations[0]/ref/id"));
        assert!(error.detail.unwrap().contains("to type 'Int64'"));
    }

    #[test]
    fn client_ids_follow_the_resource_policy() {
        let error = single_error(json!({ "op": "add", "data": { "type": "performers", "id": "12" } }));
        assert_eq!(error.status, "403");
        assert_eq!(error.pointer(), Some("/atomic:operations[0]/data/id"));

        let container = convert(json!({
            "op": "add",
            "data": { "type": "musicTracks", "id": "1bf5ad9b-a3b5-4a5f-8c6b-54b8b9e36a27", "attributes": {} }
        }))
        .unwrap();
        assert!(matches!(container.target.id, Some(ScalarValue::Uuid(_))));
    }

    #[test]
    fn every_bad_attribute_is_reported() {
        let errors = convert(json!({
            "op": "update",
            "data": {
                "type": "performers",
                "id": "1",
                "attributes": { "artistName": 4, "bornAt": "yesterday", "unknown": true }
            }
        }))
        .unwrap_err();
        let pointers: Vec<_> = errors.iter().filter_map(ErrorObject::pointer).collect();
        assert_eq!(
            pointers,
            vec![
                "/atomic:operations[0]/data/attributes/artistName",
                "/atomic:operations[0]/data/attributes/bornAt",
                "/atomic:operations[0]/data/attributes/unknown",
            ]
        );
    }

    #[test]
    fn relationship_operations_check_cardinality_and_types() {
        let error = single_error(json!({
            "op": "add",
            "ref": { "type": "lyrics", "id": "1", "relationship": "track" },
            "data": []
        }));
        assert_eq!(error.status, "403");

        let error = single_error(json!({
            "op": "update",
            "ref": { "type": "musicTracks", "id": "1bf5ad9b-a3b5-4a5f-8c6b-54b8b9e36a27", "relationship": "performers" },
            "data": [{ "type": "playlists", "id": "1" }]
        }));
        assert_eq!(error.status, "409");
        assert_eq!(error.pointer(), Some("/atomic:operations[0]/data[0]/type"));

        let container = convert(json!({
            "op": "update",
            "ref": { "type": "lyrics", "id": "1", "relationship": "track" },
            "data": null
        }))
        .unwrap();
        assert_eq!(container.kind, OperationKind::SetRelationship);
        assert_eq!(container.relationship_targets, Some(PendingTargets::ToOne(None)));
    }

    #[test]
    fn ref_and_data_must_agree_on_update() {
        let error = single_error(json!({
            "op": "update",
            "ref": { "type": "performers", "id": "1" },
            "data": { "type": "performers", "id": "2", "attributes": {} }
        }));
        assert_eq!(error.status, "409");
        assert_eq!(error.pointer(), Some("/atomic:operations[0]/data/id"));
    }

    #[test]
    fn too_many_operations() {
        let graph = testing::music_graph();
        let options = JsonApiOptions {
            maximum_operations_per_request: Some(1),
            ..Default::default()
        };
        let body = json!({ "atomic:operations": [{ "op": "remove" }, { "op": "remove" }] });
        let err = AtomicOperationsAdapter::new(&graph, &options).operations(&body).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

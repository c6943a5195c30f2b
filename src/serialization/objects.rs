//! JSON:API document objects as they appear on the wire.

use crate::error::ErrorObject;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version advertised in the `jsonapi` member.
pub const JSONAPI_VERSION: &str = "1.1";
/// Extension URI of atomic operations.
pub const ATOMIC_EXTENSION: &str = "https://jsonapi.org/ext/atomic";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonapi: Option<JsonApiObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<TopLevelLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<ResourceObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorObject>>,
    #[serde(rename = "atomic:results", skip_serializing_if = "Option::is_none")]
    pub atomic_results: Option<Vec<AtomicResultObject>>,
}

impl Document {
    pub fn from_errors(errors: Vec<ErrorObject>) -> Self {
        Document {
            errors: Some(errors),
            ..Default::default()
        }
    }

    /// Primary resources regardless of shape.
    pub fn primary_resources(&self) -> Vec<&ResourceObject> {
        match &self.data {
            Some(PrimaryData::Many(resources)) => resources.iter().collect(),
            Some(PrimaryData::Single(Some(resource))) => vec![resource],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonApiObject {
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ext: Vec<String>,
}

impl Default for JsonApiObject {
    fn default() -> Self {
        JsonApiObject {
            version: JSONAPI_VERSION.to_string(),
            ext: Vec::new(),
        }
    }
}

/// `data` of a document: one resource (or null) for single endpoints, an array for collections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    Single(Option<ResourceObject>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<IndexMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<IndexMap<String, RelationshipObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<ResourceLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl ResourceObject {
    pub fn identifier(&self) -> ResourceIdentifierObject {
        ResourceIdentifierObject {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            lid: self.lid.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<RelationshipLinks>,
    /// Present only when the relationship was loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RelationshipData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    ToMany(Vec<ResourceIdentifierObject>),
    ToOne(Option<ResourceIdentifierObject>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifierObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopLevelLinks {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLinks {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipLinks {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
}

/// One element of `atomic:results`; empty for operations that return no data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicResultObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_members_are_omitted() {
        let document = Document {
            data: Some(PrimaryData::Single(None)),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&document).unwrap(), json!({ "data": null }));

        let document = Document {
            atomic_results: Some(vec![AtomicResultObject::default()]),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&document).unwrap(), json!({ "atomic:results": [{}] }));
    }

    #[test]
    fn unloaded_relationship_has_links_only() {
        let relationship = RelationshipObject {
            links: Some(RelationshipLinks {
                self_link: Some("/blogs/1/relationships/posts".into()),
                related: Some("/blogs/1/posts".into()),
            }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&relationship).unwrap(),
            json!({ "links": { "self": "/blogs/1/relationships/posts", "related": "/blogs/1/posts" } })
        );
        let to_one = RelationshipObject {
            data: Some(RelationshipData::ToOne(None)),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&to_one).unwrap(), json!({ "data": null }));
    }
}

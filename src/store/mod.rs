//! Persistence boundary: stores execute query layers and transactional writes.

pub mod memory;
pub mod postgres;
mod resource_set;

pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use resource_set::{NodeId, RelationshipValue, ResourceNode, ResourceSet};

use crate::error::AppError;
use crate::graph::{RelationshipAttribute, ResourceType};
use crate::queries::QueryLayer;
use crate::query::expressions::FilterExpression;
use crate::value::{ResourceKey, ScalarValue};
use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

/// New targets of a relationship.
#[derive(Clone, Debug, PartialEq)]
pub enum RelationshipTargets {
    ToOne(Option<ResourceKey>),
    ToMany(Vec<ResourceKey>),
}

impl RelationshipTargets {
    pub fn keys(&self) -> Vec<&ResourceKey> {
        match self {
            RelationshipTargets::ToOne(target) => target.iter().collect(),
            RelationshipTargets::ToMany(targets) => targets.iter().collect(),
        }
    }
}

/// Values of a resource being created or updated. Attributes are keyed by public name; only
/// the present entries are written.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceData {
    /// Client-generated id for a create.
    pub id: Option<ScalarValue>,
    pub attributes: IndexMap<String, ScalarValue>,
    pub relationships: IndexMap<String, RelationshipTargets>,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Execute a layer whose includes were already converted to selections.
    async fn query(&self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError>;

    /// Number of resources of `resource_type` matching `filter`, ignoring pagination.
    async fn count(
        &self,
        resource_type: &ResourceType,
        filter: Option<&FilterExpression>,
        cancel: &CancellationToken,
    ) -> Result<u64, AppError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError>;
}

/// Unit of work over a store. Dropping it without `commit` discards every change.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert a resource; returns its key with the assigned id.
    async fn create(&mut self, resource_type: &ResourceType, data: &ResourceData) -> Result<ResourceKey, AppError>;

    async fn update(&mut self, resource_type: &ResourceType, id: &ScalarValue, data: &ResourceData) -> Result<(), AppError>;

    async fn delete(&mut self, resource_type: &ResourceType, id: &ScalarValue) -> Result<(), AppError>;

    /// Replace the targets of a relationship.
    async fn set_relationship(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &RelationshipTargets,
    ) -> Result<(), AppError>;

    async fn add_to_to_many(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &[ResourceKey],
    ) -> Result<(), AppError>;

    async fn remove_from_to_many(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &[ResourceKey],
    ) -> Result<(), AppError>;

    /// Whether a resource of the key's type (or a type derived from it) has the key's id.
    async fn exists(&mut self, key: &ResourceKey) -> Result<bool, AppError>;

    /// Read inside the transaction, seeing its own writes.
    async fn query(&mut self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

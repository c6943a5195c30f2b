//! Per-resource-type callbacks consulted while composing query layers and around writes.

use crate::error::AppError;
use crate::graph::ResourceType;
use crate::query::expressions::{
    FilterExpression, IncludeExpression, PaginationExpression, SortExpression, SparseFieldSetExpression,
};
use crate::store::ResourceData;
use crate::value::ResourceKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The kind of write a hook is invoked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOperationKind {
    CreateResource,
    UpdateResource,
    DeleteResource,
    SetRelationship,
    AddToRelationship,
    RemoveFromRelationship,
}

/// Hooks for one resource type. Every method defaults to passing its input through unchanged,
/// so implementors override only what they need (e.g. a soft-delete filter).
#[async_trait]
pub trait ResourceDefinition: Send + Sync {
    fn on_apply_includes(&self, existing: IncludeExpression) -> IncludeExpression {
        existing
    }

    fn on_apply_filter(&self, existing: Option<FilterExpression>) -> Option<FilterExpression> {
        existing
    }

    fn on_apply_sort(&self, existing: Option<SortExpression>) -> Option<SortExpression> {
        existing
    }

    fn on_apply_pagination(&self, existing: Option<PaginationExpression>) -> Option<PaginationExpression> {
        existing
    }

    fn on_apply_sparse_field_set(&self, existing: Option<SparseFieldSetExpression>) -> Option<SparseFieldSetExpression> {
        existing
    }

    /// Called before a write is sent to the store; may adjust the payload or veto the write.
    async fn on_prepare_write(
        &self,
        _resource_type: &ResourceType,
        _data: &mut ResourceData,
        _kind: WriteOperationKind,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn on_write_succeeded(&self, _key: &ResourceKey, _kind: WriteOperationKind) -> Result<(), AppError> {
        Ok(())
    }
}

struct NoopResourceDefinition;

impl ResourceDefinition for NoopResourceDefinition {}

static NOOP_DEFINITION: NoopResourceDefinition = NoopResourceDefinition;

/// Definitions keyed by resource type public name. Unregistered types get pass-through behavior.
#[derive(Clone, Default)]
pub struct ResourceDefinitionRegistry {
    definitions: HashMap<String, Arc<dyn ResourceDefinition>>,
}

impl ResourceDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, resource_type: impl Into<String>, definition: Arc<dyn ResourceDefinition>) -> Self {
        self.definitions.insert(resource_type.into(), definition);
        self
    }

    pub fn get(&self, resource_type: &str) -> &dyn ResourceDefinition {
        match self.definitions.get(resource_type) {
            Some(definition) => definition.as_ref(),
            None => &NOOP_DEFINITION,
        }
    }
}

impl std::fmt::Debug for ResourceDefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDefinitionRegistry")
            .field("resource_types", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

//! Runs one `atomic:operations` batch: everything is validated before anything is written, then
//! the operations execute in order inside a single store transaction.

use super::adapter::AtomicOperationsAdapter;
use super::local_ids::{LocalIdTracker, LocalIdValidator};
use super::request::{IdentityRef, OperationContainer, OperationKind, PendingTargets};
use super::validation::ErrorCollector;
use crate::error::AppError;
use crate::queries::{QueryLayerComposer, QueryLayerIncludeConverter, TopFieldSelection, WriteOperationKind};
use crate::query::expressions::{IncludeExpression, SparseFieldTable};
use crate::serialization::{AtomicResultObject, LinkBuilder, PrimaryData, PrimaryNodes, ResourceObject, ResponseModelAdapter};
use crate::service::JsonApiContext;
use crate::store::{RelationshipTargets, ResourceData, ResourceStore, StoreTransaction};
use crate::value::{id_to_string, ResourceKey, ScalarValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Received,
    Validating,
    Executing,
    Committed,
    Rejected,
}

pub struct AtomicOperationsProcessor<'a> {
    context: &'a JsonApiContext,
    store: &'a dyn ResourceStore,
    base_url: Option<&'a str>,
    state: BatchState,
}

impl<'a> AtomicOperationsProcessor<'a> {
    pub fn new(context: &'a JsonApiContext, store: &'a dyn ResourceStore) -> Self {
        AtomicOperationsProcessor {
            context,
            store,
            base_url: None,
            state: BatchState::Received,
        }
    }

    /// Base URL used for links in result resources.
    pub fn with_base_url(mut self, base_url: Option<&'a str>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub async fn process(&mut self, body: &Value, cancel: &CancellationToken) -> Result<Vec<AtomicResultObject>, AppError> {
        self.state = BatchState::Validating;
        let operations = match self.validate(body) {
            Ok(operations) => operations,
            Err(error) => {
                self.state = BatchState::Rejected;
                tracing::warn!(status = %error.status(), "atomic batch rejected");
                return Err(error);
            }
        };

        self.state = BatchState::Executing;
        match self.execute(&operations, cancel).await {
            Ok(results) => {
                self.state = BatchState::Committed;
                tracing::info!(operations = results.len(), "atomic batch committed");
                Ok(results)
            }
            Err(error) => {
                self.state = BatchState::Rejected;
                Err(error)
            }
        }
    }

    /// Convert and validate every operation, collecting all errors of the batch.
    fn validate(&self, body: &Value) -> Result<Vec<OperationContainer>, AppError> {
        let context = self.context;
        let adapter = AtomicOperationsAdapter::new(&context.graph, &context.options);
        let raw_operations = adapter.operations(body)?;

        let mut errors = ErrorCollector::new(context.options.max_model_errors);
        let mut operations = Vec::with_capacity(raw_operations.len());
        for (index, raw) in raw_operations.iter().enumerate() {
            match adapter.convert(index, raw) {
                Ok(operation) => {
                    context.validator.validate(&operation, &mut errors);
                    operations.push(operation);
                }
                Err(conversion_errors) => errors.extend(conversion_errors),
            }
        }
        if errors.is_empty() {
            LocalIdValidator::new(&context.graph).validate(&operations, &mut errors);
        }
        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "atomic batch failed validation");
            return Err(AppError::Validation(errors.into_errors()));
        }
        tracing::debug!(operations = operations.len(), "atomic batch validated");
        Ok(operations)
    }

    async fn execute(
        &self,
        operations: &[OperationContainer],
        cancel: &CancellationToken,
    ) -> Result<Vec<AtomicResultObject>, AppError> {
        let mut tx = self.store.begin().await?;
        let mut tracker = LocalIdTracker::new();
        let mut results = Vec::with_capacity(operations.len());

        for operation in operations {
            let outcome = if cancel.is_cancelled() {
                Err(AppError::Cancelled)
            } else {
                self.execute_one(tx.as_mut(), operation, &mut tracker, cancel)
                    .await
                    .map_err(|e| e.at_pointer(operation.pointer()))
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(error) => {
                    tracing::warn!(operation = operation.index, kind = %operation.kind, error = %error, "atomic operation failed, rolling back");
                    if let Err(rollback_error) = tx.rollback().await {
                        tracing::warn!(error = %rollback_error, "rollback failed");
                    }
                    return Err(error);
                }
            }
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn execute_one(
        &self,
        tx: &mut dyn StoreTransaction,
        operation: &OperationContainer,
        tracker: &mut LocalIdTracker,
        cancel: &CancellationToken,
    ) -> Result<AtomicResultObject, AppError> {
        let resource_type = operation.resource_type();
        let definition = self.context.definitions.get(&resource_type.public_name);
        tracing::debug!(operation = operation.index, kind = %operation.kind, target = %operation.target, "executing operation");

        match operation.kind {
            OperationKind::AddResource => {
                let mut data = ResourceData {
                    id: operation.target.id.clone(),
                    attributes: operation.attributes.clone(),
                    relationships: Default::default(),
                };
                for (name, pending) in &operation.relationships {
                    data.relationships.insert(name.clone(), resolve_targets(tx, tracker, name, pending).await?);
                }
                definition
                    .on_prepare_write(resource_type, &mut data, WriteOperationKind::CreateResource)
                    .await?;
                let key = tx.create(resource_type, &data).await?;
                if let Some(lid) = &operation.target.lid {
                    tracker.assign(lid, key.clone());
                }
                definition.on_write_succeeded(&key, WriteOperationKind::CreateResource).await?;
                let data = self.result_resource(tx, operation, &key.id, cancel).await?;
                Ok(AtomicResultObject { data, meta: None })
            }
            OperationKind::UpdateResource => {
                let key = require_exists(tx, tracker, &operation.target).await?;
                let mut data = ResourceData {
                    id: None,
                    attributes: operation.attributes.clone(),
                    relationships: Default::default(),
                };
                for (name, pending) in &operation.relationships {
                    data.relationships.insert(name.clone(), resolve_targets(tx, tracker, name, pending).await?);
                }
                definition
                    .on_prepare_write(resource_type, &mut data, WriteOperationKind::UpdateResource)
                    .await?;
                tx.update(resource_type, &key.id, &data).await?;
                definition.on_write_succeeded(&key, WriteOperationKind::UpdateResource).await?;
                let data = self.result_resource(tx, operation, &key.id, cancel).await?;
                Ok(AtomicResultObject { data, meta: None })
            }
            OperationKind::RemoveResource => {
                let key = require_exists(tx, tracker, &operation.target).await?;
                let mut data = ResourceData::default();
                definition
                    .on_prepare_write(resource_type, &mut data, WriteOperationKind::DeleteResource)
                    .await?;
                tx.delete(resource_type, &key.id).await?;
                definition.on_write_succeeded(&key, WriteOperationKind::DeleteResource).await?;
                Ok(AtomicResultObject::default())
            }
            OperationKind::SetRelationship | OperationKind::AddToRelationship | OperationKind::RemoveFromRelationship => {
                let (Some(relationship), Some(pending)) = (&operation.relationship, &operation.relationship_targets) else {
                    return Err(AppError::Store(format!("operation {} has no relationship", operation.index)));
                };
                let key = require_exists(tx, tracker, &operation.target).await?;
                let name = relationship.public_name.clone();
                let kind = match operation.kind {
                    OperationKind::SetRelationship => WriteOperationKind::SetRelationship,
                    OperationKind::AddToRelationship => WriteOperationKind::AddToRelationship,
                    _ => WriteOperationKind::RemoveFromRelationship,
                };

                let mut data = ResourceData::default();
                data.relationships
                    .insert(name.clone(), resolve_targets(tx, tracker, &name, pending).await?);
                definition.on_prepare_write(resource_type, &mut data, kind).await?;
                let targets = data
                    .relationships
                    .swap_remove(&name)
                    .unwrap_or(RelationshipTargets::ToMany(Vec::new()));

                match kind {
                    WriteOperationKind::SetRelationship => {
                        tx.set_relationship(resource_type, &key.id, relationship, &targets).await?
                    }
                    WriteOperationKind::AddToRelationship => {
                        let keys: Vec<ResourceKey> = targets.keys().into_iter().cloned().collect();
                        tx.add_to_to_many(resource_type, &key.id, relationship, &keys).await?
                    }
                    _ => {
                        let keys: Vec<ResourceKey> = targets.keys().into_iter().cloned().collect();
                        tx.remove_from_to_many(resource_type, &key.id, relationship, &keys).await?
                    }
                }
                definition.on_write_succeeded(&key, kind).await?;
                Ok(AtomicResultObject::default())
            }
        }
    }

    /// The written resource as seen inside the transaction, with all viewable attributes.
    async fn result_resource(
        &self,
        tx: &mut dyn StoreTransaction,
        operation: &OperationContainer,
        id: &ScalarValue,
        cancel: &CancellationToken,
    ) -> Result<Option<ResourceObject>, AppError> {
        let context = self.context;
        let resource_type = operation.resource_type();
        let composer = QueryLayerComposer::new(&context.graph, &context.options, &context.definitions);
        let mut layer = composer.compose_for_get_by_id(id, resource_type, TopFieldSelection::AllAttributes, &[]);
        QueryLayerIncludeConverter::new(&context.graph).convert_includes_to_selections(&mut layer);
        let set = tx.query(&layer, cancel).await?;

        let adapter = ResponseModelAdapter::new(&context.graph, LinkBuilder::new(&context.options, self.base_url));
        let document = adapter.convert(
            &set,
            PrimaryNodes::Single(set.primary().first().copied()),
            &IncludeExpression::default(),
            &SparseFieldTable::default(),
        )?;
        match document.data {
            Some(PrimaryData::Single(resource)) => Ok(resource),
            _ => Ok(None),
        }
    }
}

/// Resolve the target's id and make sure it exists.
async fn require_exists(
    tx: &mut dyn StoreTransaction,
    tracker: &LocalIdTracker,
    target: &IdentityRef,
) -> Result<ResourceKey, AppError> {
    let key = tracker.resolve_key(target)?;
    if !tx.exists(&key).await? {
        return Err(AppError::resource_not_found(&key.resource_type, &id_to_string(&key.id)));
    }
    Ok(key)
}

async fn resolve_targets(
    tx: &mut dyn StoreTransaction,
    tracker: &LocalIdTracker,
    relationship: &str,
    pending: &PendingTargets,
) -> Result<RelationshipTargets, AppError> {
    match pending {
        PendingTargets::ToOne(None) => Ok(RelationshipTargets::ToOne(None)),
        PendingTargets::ToOne(Some(target)) => Ok(RelationshipTargets::ToOne(Some(
            resolve_related(tx, tracker, relationship, target).await?,
        ))),
        PendingTargets::ToMany(targets) => {
            let mut keys = Vec::with_capacity(targets.len());
            for target in targets {
                keys.push(resolve_related(tx, tracker, relationship, target).await?);
            }
            Ok(RelationshipTargets::ToMany(keys))
        }
    }
}

async fn resolve_related(
    tx: &mut dyn StoreTransaction,
    tracker: &LocalIdTracker,
    relationship: &str,
    target: &IdentityRef,
) -> Result<ResourceKey, AppError> {
    let key = tracker.resolve_key(target)?;
    if !tx.exists(&key).await? {
        return Err(AppError::NotFound(format!(
            "Related resource of type '{}' with ID '{}' in relationship '{}' does not exist.",
            key.resource_type,
            id_to_string(&key.id),
            relationship
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::ResourceDefinitionRegistry;
    use crate::store::InMemoryStore;
    use crate::testing;
    use serde_json::json;

    fn setup() -> (JsonApiContext, InMemoryStore) {
        testing::init_logging();
        let context = JsonApiContext::new(
            testing::music_graph(),
            Default::default(),
            ResourceDefinitionRegistry::new(),
        )
        .unwrap();
        let store = InMemoryStore::new(context.graph.clone());
        (context, store)
    }

    async fn count(context: &JsonApiContext, store: &InMemoryStore, type_name: &str) -> u64 {
        let resource_type = context.graph.get_resource_type(type_name).unwrap();
        store.count(resource_type, None, &CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn lid_links_resources_created_in_one_batch() {
        let (context, store) = setup();
        let body = json!({
            "atomic:operations": [
                { "op": "add", "data": { "type": "performers", "lid": "p", "attributes": { "artistName": "Nina" } } },
                { "op": "add", "data": {
                    "type": "musicTracks",
                    "lid": "t",
                    "attributes": { "title": "Sinnerman", "lengthInSeconds": 620.0 },
                    "relationships": { "performers": { "data": [{ "type": "performers", "lid": "p" }] } }
                } },
                { "op": "update", "ref": { "type": "musicTracks", "lid": "t" }, "data": {
                    "type": "musicTracks", "lid": "t", "attributes": { "genre": "Jazz" }
                } }
            ]
        });
        let mut processor = AtomicOperationsProcessor::new(&context, &store);
        let results = processor.process(&body, &CancellationToken::new()).await.unwrap();
        assert_eq!(processor.state(), BatchState::Committed);
        assert_eq!(results.len(), 3);

        let track = results[1].data.as_ref().unwrap();
        assert_eq!(track.resource_type, "musicTracks");
        assert!(track.id.is_some());
        let updated = results[2].data.as_ref().unwrap();
        assert_eq!(updated.attributes.as_ref().unwrap()["genre"], json!("Jazz"));
        assert_eq!(count(&context, &store, "performers").await, 1);
    }

    #[tokio::test]
    async fn invalid_batch_executes_nothing_and_reports_every_error() {
        let (context, store) = setup();
        let body = json!({
            "atomic:operations": [
                { "op": "add", "data": { "type": "performers", "attributes": { "artistName": "A" } } },
                { "op": "add", "data": { "type": "musicTracks", "attributes": { "genre": "Pop" } } },
                { "op": "remove", "ref": { "type": "musicTracks" } }
            ]
        });
        let mut processor = AtomicOperationsProcessor::new(&context, &store);
        let error = processor.process(&body, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(processor.state(), BatchState::Rejected);
        let AppError::Validation(errors) = error else {
            panic!("expected validation errors");
        };
        // missing title, missing lengthInSeconds, remove without id
        assert_eq!(errors.len(), 3);
        assert_eq!(count(&context, &store, "performers").await, 0);
    }

    #[tokio::test]
    async fn failure_during_execution_rolls_back_earlier_writes() {
        let (context, store) = setup();
        let body = json!({
            "atomic:operations": [
                { "op": "add", "data": { "type": "performers", "attributes": { "artistName": "A" } } },
                { "op": "remove", "ref": { "type": "performers", "id": "999" } }
            ]
        });
        let mut processor = AtomicOperationsProcessor::new(&context, &store);
        let error = processor.process(&body, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(error.status(), axum::http::StatusCode::NOT_FOUND);
        let errors = error.to_error_objects();
        assert_eq!(errors[0].pointer(), Some("/atomic:operations[1]"));
        assert_eq!(count(&context, &store, "performers").await, 0);
    }

    #[tokio::test]
    async fn missing_related_resource_is_reported_with_relationship_name() {
        let (context, store) = setup();
        let body = json!({
            "atomic:operations": [
                { "op": "add", "data": {
                    "type": "musicTracks",
                    "attributes": { "title": "T", "lengthInSeconds": 1.0 },
                    "relationships": { "performers": { "data": [{ "type": "performers", "id": "42" }] } }
                } }
            ]
        });
        let error = AtomicOperationsProcessor::new(&context, &store)
            .process(&body, &CancellationToken::new())
            .await
            .unwrap_err();
        let detail = error.to_error_objects()[0].detail.clone().unwrap();
        assert!(detail.contains("in relationship 'performers'"), "{}", detail);
    }

    #[tokio::test]
    async fn cancelled_batch_is_not_committed() {
        let (context, store) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = json!({
            "atomic:operations": [
                { "op": "add", "data": { "type": "performers", "attributes": { "artistName": "A" } } }
            ]
        });
        let error = AtomicOperationsProcessor::new(&context, &store)
            .process(&body, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Cancelled));
        assert_eq!(count(&context, &store, "performers").await, 0);
    }
}

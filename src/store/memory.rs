//! In-memory store. Rows keep foreign-key columns and join-table rows the same way the SQL
//! schema does, so both sides of every relationship stay consistent without extra bookkeeping.

use super::{RelationshipTargets, ResourceData, ResourceSet, ResourceStore, StoreTransaction};
use crate::compile::{Evaluator, ObjectSource, QueryableBuilder};
use crate::error::AppError;
use crate::graph::{RelationshipAttribute, ResourceGraph, ResourceType};
use crate::queries::QueryLayer;
use crate::query::expressions::FilterExpression;
use crate::sql::{relationship_storage, RelationshipStorage};
use crate::value::{id_to_string, AttrType, ResourceKey, ScalarValue};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
struct StoredRow {
    attributes: IndexMap<String, ScalarValue>,
    /// Foreign-key columns by column name.
    keys: HashMap<String, ScalarValue>,
}

#[derive(Clone, Debug)]
struct MemoryData {
    graph: Arc<ResourceGraph>,
    /// Rows per concrete resource type, ordered by id.
    tables: HashMap<String, BTreeMap<ScalarValue, StoredRow>>,
    /// Join-table rows by table name, each a column -> value map.
    through: HashMap<String, Vec<HashMap<String, ScalarValue>>>,
    /// Last generated id per backing table.
    sequences: HashMap<String, i64>,
}

impl MemoryData {
    fn new(graph: Arc<ResourceGraph>) -> Self {
        MemoryData {
            graph,
            tables: HashMap::new(),
            through: HashMap::new(),
            sequences: HashMap::new(),
        }
    }

    /// Key of the stored resource with `id` whose type is `type_name` or derives from it.
    fn locate(&self, type_name: &str, id: &ScalarValue) -> Option<ResourceKey> {
        self.graph
            .concrete_types_of(type_name)
            .into_iter()
            .find(|t| self.tables.get(&t.public_name).is_some_and(|rows| rows.contains_key(id)))
            .map(|t| ResourceKey::new(t.public_name.clone(), id.clone()))
    }

    fn locate_or_not_found(&self, resource_type: &ResourceType, id: &ScalarValue) -> Result<ResourceKey, AppError> {
        self.locate(&resource_type.public_name, id)
            .ok_or_else(|| AppError::resource_not_found(&resource_type.public_name, &id_to_string(id)))
    }

    fn row(&self, key: &ResourceKey) -> Option<&StoredRow> {
        self.tables.get(&key.resource_type)?.get(&key.id)
    }

    fn row_mut(&mut self, key: &ResourceKey) -> Option<&mut StoredRow> {
        self.tables.get_mut(&key.resource_type)?.get_mut(&key.id)
    }

    fn root_of<'g>(graph: &'g ResourceGraph, resource_type: &'g ResourceType) -> &'g ResourceType {
        let mut current = resource_type;
        while let Some(base) = current.base_type.as_deref().and_then(|b| graph.find_resource_type(b)) {
            current = base;
        }
        current
    }

    fn next_id(&mut self, resource_type: &ResourceType) -> Result<ScalarValue, AppError> {
        let counter = self.sequences.entry(resource_type.table.clone()).or_insert(0);
        match resource_type.id_type.attr_type() {
            AttrType::Uuid => Ok(ScalarValue::Uuid(Uuid::new_v4())),
            AttrType::Integer => {
                *counter += 1;
                Ok(ScalarValue::Integer(*counter))
            }
            AttrType::String => {
                *counter += 1;
                Ok(ScalarValue::Text(counter.to_string()))
            }
            other => Err(AppError::Store(format!("cannot generate ids of type {}", other))),
        }
    }

    /// Resources of `type_name` (or derived) whose `column` holds `id`.
    fn rows_referencing(&self, type_name: &str, column: &str, id: &ScalarValue) -> Vec<ResourceKey> {
        let mut out = Vec::new();
        for t in self.graph.concrete_types_of(type_name) {
            let Some(rows) = self.tables.get(&t.public_name) else {
                continue;
            };
            for (row_id, row) in rows {
                if row.keys.get(column) == Some(id) {
                    out.push(ResourceKey::new(t.public_name.clone(), row_id.clone()));
                }
            }
        }
        out
    }

    fn through_targets(&self, relationship: &RelationshipAttribute, table: &str, left: &str, right: &str, id: &ScalarValue) -> Vec<ResourceKey> {
        self.through
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| row.get(left) == Some(id))
            .filter_map(|row| row.get(right))
            .filter_map(|target| self.locate(&relationship.right_type, target))
            .collect()
    }

    fn relationship_of(&self, key: &ResourceKey, name: &str) -> Option<Arc<RelationshipAttribute>> {
        self.graph.find_resource_type(&key.resource_type)?.find_relationship(name).cloned()
    }

    fn create(&mut self, resource_type: &ResourceType, data: &ResourceData) -> Result<ResourceKey, AppError> {
        if resource_type.is_abstract {
            return Err(AppError::bad_request(
                "Abstract resource type found.",
                format!("Resource type '{}' is abstract.", resource_type.public_name),
            ));
        }
        let graph = self.graph.clone();
        let root = Self::root_of(&graph, resource_type);
        let id = match &data.id {
            Some(id) => {
                if self.locate(&root.public_name, id).is_some() {
                    return Err(AppError::conflict(
                        "Another resource with the specified ID already exists.",
                        format!(
                            "Another resource of type '{}' with ID '{}' already exists.",
                            resource_type.public_name,
                            id_to_string(id)
                        ),
                    ));
                }
                if let ScalarValue::Integer(n) = id {
                    let counter = self.sequences.entry(resource_type.table.clone()).or_insert(0);
                    *counter = (*counter).max(*n);
                }
                id.clone()
            }
            None => self.next_id(resource_type)?,
        };

        let mut row = StoredRow::default();
        for attribute in resource_type.value_attributes() {
            let value = data.attributes.get(&attribute.public_name).cloned().unwrap_or(ScalarValue::Null);
            row.attributes.insert(attribute.public_name.clone(), value);
        }
        self.tables
            .entry(resource_type.public_name.clone())
            .or_default()
            .insert(id.clone(), row);

        let key = ResourceKey::new(resource_type.public_name.clone(), id);
        self.write_relationships(resource_type, &key, data)?;
        Ok(key)
    }

    fn update(&mut self, resource_type: &ResourceType, id: &ScalarValue, data: &ResourceData) -> Result<(), AppError> {
        let key = self.locate_or_not_found(resource_type, id)?;
        if let Some(row) = self.row_mut(&key) {
            for (name, value) in &data.attributes {
                row.attributes.insert(name.clone(), value.clone());
            }
        }
        self.write_relationships(resource_type, &key, data)
    }

    fn write_relationships(&mut self, resource_type: &ResourceType, key: &ResourceKey, data: &ResourceData) -> Result<(), AppError> {
        for (name, targets) in &data.relationships {
            let relationship = resource_type.find_relationship(name).cloned().ok_or_else(|| {
                AppError::Store(format!("unknown relationship '{}' on '{}'", name, resource_type.public_name))
            })?;
            self.set_relationship(key, &relationship, targets)?;
        }
        Ok(())
    }

    fn delete(&mut self, resource_type: &ResourceType, id: &ScalarValue) -> Result<(), AppError> {
        let key = self.locate_or_not_found(resource_type, id)?;
        self.detach(&key);
        if let Some(rows) = self.tables.get_mut(&key.resource_type) {
            rows.remove(&key.id);
        }
        Ok(())
    }

    /// Clear every key column and join row that points at `key`, as ON DELETE SET NULL would.
    fn detach(&mut self, key: &ResourceKey) {
        let graph = self.graph.clone();
        for owner in graph.resource_types() {
            for relationship in &owner.relationships {
                let Ok(storage) = relationship_storage(&graph, relationship) else {
                    continue;
                };
                let points_at = graph.is_same_or_derived(&key.resource_type, &relationship.right_type);
                let points_from = graph.is_same_or_derived(&key.resource_type, &relationship.left_type);
                match storage {
                    RelationshipStorage::LeftKey(column) if points_at => {
                        if let Some(rows) = self.tables.get_mut(&owner.public_name) {
                            for row in rows.values_mut() {
                                if row.keys.get(column) == Some(&key.id) {
                                    row.keys.insert(column.to_string(), ScalarValue::Null);
                                }
                            }
                        }
                    }
                    RelationshipStorage::RightKey(column) if points_from => {
                        for target in self.rows_referencing(&relationship.right_type, column, &key.id) {
                            if let Some(row) = self.row_mut(&target) {
                                row.keys.insert(column.to_string(), ScalarValue::Null);
                            }
                        }
                    }
                    RelationshipStorage::Through(through) => {
                        if let Some(rows) = self.through.get_mut(&through.table) {
                            rows.retain(|row| {
                                !(points_from && row.get(&through.left_column) == Some(&key.id))
                                    && !(points_at && row.get(&through.right_column) == Some(&key.id))
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn set_relationship(&mut self, owner: &ResourceKey, relationship: &RelationshipAttribute, targets: &RelationshipTargets) -> Result<(), AppError> {
        let graph = self.graph.clone();
        match (relationship_storage(&graph, relationship)?, targets) {
            (RelationshipStorage::LeftKey(column), RelationshipTargets::ToOne(target)) => {
                let value = target.as_ref().map(|t| t.id.clone()).unwrap_or(ScalarValue::Null);
                if let Some(row) = self.row_mut(owner) {
                    row.keys.insert(column.to_string(), value);
                }
            }
            (RelationshipStorage::RightKey(column), targets) => {
                for previous in self.rows_referencing(&relationship.right_type, column, &owner.id) {
                    if let Some(row) = self.row_mut(&previous) {
                        row.keys.insert(column.to_string(), ScalarValue::Null);
                    }
                }
                self.add_right_keys(owner, relationship, column, &targets.keys())?;
            }
            (RelationshipStorage::Through(through), RelationshipTargets::ToMany(targets)) => {
                let rows = self.through.entry(through.table.clone()).or_default();
                rows.retain(|row| row.get(&through.left_column) != Some(&owner.id));
                self.add_to_many(owner, relationship, targets)?;
            }
            _ => {
                return Err(AppError::Store(format!(
                    "relationship '{}' cannot hold the given targets",
                    relationship.public_name
                )))
            }
        }
        Ok(())
    }

    fn add_right_keys(&mut self, owner: &ResourceKey, relationship: &RelationshipAttribute, column: &str, targets: &[&ResourceKey]) -> Result<(), AppError> {
        for target in targets {
            let located = self
                .locate(&relationship.right_type, &target.id)
                .ok_or_else(|| AppError::resource_not_found(&target.resource_type, &id_to_string(&target.id)))?;
            if let Some(row) = self.row_mut(&located) {
                row.keys.insert(column.to_string(), owner.id.clone());
            }
        }
        Ok(())
    }

    fn add_to_many(&mut self, owner: &ResourceKey, relationship: &RelationshipAttribute, targets: &[ResourceKey]) -> Result<(), AppError> {
        let graph = self.graph.clone();
        match relationship_storage(&graph, relationship)? {
            RelationshipStorage::RightKey(column) => {
                let targets: Vec<&ResourceKey> = targets.iter().collect();
                self.add_right_keys(owner, relationship, column, &targets)
            }
            RelationshipStorage::Through(through) => {
                let rows = self.through.entry(through.table.clone()).or_default();
                for target in targets {
                    let exists = rows.iter().any(|row| {
                        row.get(&through.left_column) == Some(&owner.id) && row.get(&through.right_column) == Some(&target.id)
                    });
                    if !exists {
                        rows.push(HashMap::from([
                            (through.left_column.clone(), owner.id.clone()),
                            (through.right_column.clone(), target.id.clone()),
                        ]));
                    }
                }
                Ok(())
            }
            RelationshipStorage::LeftKey(_) => Err(AppError::Store(format!(
                "relationship '{}' is not a to-many relationship",
                relationship.public_name
            ))),
        }
    }

    fn remove_from_many(&mut self, owner: &ResourceKey, relationship: &RelationshipAttribute, targets: &[ResourceKey]) -> Result<(), AppError> {
        let graph = self.graph.clone();
        match relationship_storage(&graph, relationship)? {
            RelationshipStorage::RightKey(column) => {
                for target in targets {
                    if let Some(located) = self.locate(&relationship.right_type, &target.id) {
                        if let Some(row) = self.row_mut(&located) {
                            if row.keys.get(column) == Some(&owner.id) {
                                row.keys.insert(column.to_string(), ScalarValue::Null);
                            }
                        }
                    }
                }
                Ok(())
            }
            RelationshipStorage::Through(through) => {
                if let Some(rows) = self.through.get_mut(&through.table) {
                    rows.retain(|row| {
                        row.get(&through.left_column) != Some(&owner.id)
                            || !targets.iter().any(|t| row.get(&through.right_column) == Some(&t.id))
                    });
                }
                Ok(())
            }
            RelationshipStorage::LeftKey(_) => Err(AppError::Store(format!(
                "relationship '{}' is not a to-many relationship",
                relationship.public_name
            ))),
        }
    }

    fn query(&self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError> {
        let compiled = QueryableBuilder::new(&self.graph).apply_query(layer);
        compiled.execute(self, cancel)
    }

    fn count(&self, resource_type: &ResourceType, filter: Option<&FilterExpression>, cancel: &CancellationToken) -> Result<u64, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let predicate = filter.map(|f| QueryableBuilder::new(&self.graph).compile_filter(f));
        let evaluator = Evaluator::new(self);
        let mut count = 0;
        for key in self.keys_of(&resource_type.public_name) {
            let matches = match &predicate {
                Some(p) => evaluator.predicate(p, &key)?,
                None => true,
            };
            if matches {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl ObjectSource for MemoryData {
    fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    fn keys_of(&self, resource_type: &str) -> Vec<ResourceKey> {
        self.graph
            .concrete_types_of(resource_type)
            .into_iter()
            .flat_map(|t| {
                self.tables
                    .get(&t.public_name)
                    .into_iter()
                    .flat_map(|rows| rows.keys())
                    .map(|id| ResourceKey::new(t.public_name.clone(), id.clone()))
            })
            .collect()
    }

    fn attribute(&self, key: &ResourceKey, attribute: &str) -> Option<ScalarValue> {
        self.row(key)?.attributes.get(attribute).cloned()
    }

    fn to_one(&self, key: &ResourceKey, relationship: &str) -> Option<ResourceKey> {
        let relationship = self.relationship_of(key, relationship)?;
        match relationship_storage(&self.graph, &relationship).ok()? {
            RelationshipStorage::LeftKey(column) => {
                let target = self.row(key)?.keys.get(column).filter(|v| !v.is_null())?;
                self.locate(&relationship.right_type, target)
            }
            RelationshipStorage::RightKey(column) => {
                self.rows_referencing(&relationship.right_type, column, &key.id).into_iter().next()
            }
            RelationshipStorage::Through(_) => None,
        }
    }

    fn to_many(&self, key: &ResourceKey, relationship: &str) -> Option<Vec<ResourceKey>> {
        let relationship = self.relationship_of(key, relationship)?;
        Some(match relationship_storage(&self.graph, &relationship).ok()? {
            RelationshipStorage::RightKey(column) => self.rows_referencing(&relationship.right_type, column, &key.id),
            RelationshipStorage::Through(through) => self.through_targets(
                &relationship,
                &through.table,
                &through.left_column,
                &through.right_column,
                &key.id,
            ),
            RelationshipStorage::LeftKey(_) => self.to_one(key, &relationship.public_name).into_iter().collect(),
        })
    }
}

/// Store keeping all resources in process memory. Transactions hold the store lock until
/// they finish, so they are serialized.
#[derive(Clone)]
pub struct InMemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl InMemoryStore {
    pub fn new(graph: Arc<ResourceGraph>) -> Self {
        InMemoryStore {
            data: Arc::new(Mutex::new(MemoryData::new(graph))),
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn query(&self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError> {
        let data = self.data.lock().await;
        data.query(layer, cancel)
    }

    async fn count(
        &self,
        resource_type: &ResourceType,
        filter: Option<&FilterExpression>,
        cancel: &CancellationToken,
    ) -> Result<u64, AppError> {
        let data = self.data.lock().await;
        data.count(resource_type, filter, cancel)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError> {
        let guard = self.data.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            snapshot: Some(snapshot),
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryData>,
    /// State to restore unless committed.
    snapshot: Option<MemoryData>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
            tracing::debug!("in-memory transaction rolled back");
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn create(&mut self, resource_type: &ResourceType, data: &ResourceData) -> Result<ResourceKey, AppError> {
        self.guard.create(resource_type, data)
    }

    async fn update(&mut self, resource_type: &ResourceType, id: &ScalarValue, data: &ResourceData) -> Result<(), AppError> {
        self.guard.update(resource_type, id, data)
    }

    async fn delete(&mut self, resource_type: &ResourceType, id: &ScalarValue) -> Result<(), AppError> {
        self.guard.delete(resource_type, id)
    }

    async fn set_relationship(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &RelationshipTargets,
    ) -> Result<(), AppError> {
        let owner = self.guard.locate_or_not_found(resource_type, id)?;
        self.guard.set_relationship(&owner, relationship, targets)
    }

    async fn add_to_to_many(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &[ResourceKey],
    ) -> Result<(), AppError> {
        let owner = self.guard.locate_or_not_found(resource_type, id)?;
        self.guard.add_to_many(&owner, relationship, targets)
    }

    async fn remove_from_to_many(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &[ResourceKey],
    ) -> Result<(), AppError> {
        let owner = self.guard.locate_or_not_found(resource_type, id)?;
        self.guard.remove_from_many(&owner, relationship, targets)
    }

    async fn exists(&mut self, key: &ResourceKey) -> Result<bool, AppError> {
        Ok(self.guard.locate(&key.resource_type, &key.id).is_some())
    }

    async fn query(&mut self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError> {
        self.guard.query(layer, cancel)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        drop(self);
        Ok(())
    }
}

//! PostgreSQL store: compiled layers run as single JSON-producing statements, writes go
//! through parameterized statements inside a transaction.

use super::{RelationshipTargets, ResourceData, ResourceSet, ResourceStore, StoreTransaction};
use crate::compile::{read_rows, QueryableBuilder, SqlQueryBuilder};
use crate::error::AppError;
use crate::graph::{RelationshipAttribute, ResourceGraph, ResourceType};
use crate::queries::QueryLayer;
use crate::query::expressions::FilterExpression;
use crate::sql::{self, pg_cast, relationship_storage, QueryBuf, RelationshipStorage};
use crate::value::{id_to_string, ResourceKey, ScalarValue};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    graph: Arc<ResourceGraph>,
}

impl PgStore {
    pub fn new(pool: PgPool, graph: Arc<ResourceGraph>) -> Self {
        PgStore { pool, graph }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Race a database future against cancellation.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T, sqlx::Error>>) -> Result<T, AppError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = fut => Ok(result?),
    }
}

fn select_statement(graph: &ResourceGraph, layer: &QueryLayer) -> Result<QueryBuf, AppError> {
    let compiled = QueryableBuilder::new(graph).apply_query(layer);
    SqlQueryBuilder::new(graph).select(&compiled)
}

async fn fetch_resources(
    conn: &mut PgConnection,
    graph: &ResourceGraph,
    layer: &QueryLayer,
    cancel: &CancellationToken,
) -> Result<ResourceSet, AppError> {
    let q = select_statement(graph, layer)?;
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = cancellable(cancel, q.query().fetch_all(&mut *conn)).await?;
    let documents = rows
        .iter()
        .map(|row| row.try_get::<Value, _>("resource"))
        .collect::<Result<Vec<_>, _>>()?;
    read_rows(graph, &documents)
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn query(&self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_resources(&mut *conn, &self.graph, layer, cancel).await
    }

    async fn count(
        &self,
        resource_type: &ResourceType,
        filter: Option<&FilterExpression>,
        cancel: &CancellationToken,
    ) -> Result<u64, AppError> {
        let predicate = filter.map(|f| QueryableBuilder::new(&self.graph).compile_filter(f));
        let q = SqlQueryBuilder::new(&self.graph).count(resource_type, predicate.as_ref())?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "count");
        let row = cancellable(cancel, q.query().fetch_one(&self.pool)).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            graph: self.graph.clone(),
        }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    graph: Arc<ResourceGraph>,
}

impl PgTransaction {
    /// Run a statement returning at most one id; `None` when no row was affected.
    async fn returning_id(&mut self, q: &QueryBuf) -> Result<Option<String>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let row = q.query().fetch_optional(&mut *self.tx).await.map_err(map_unique_violation)?;
        Ok(match row {
            Some(row) => Some(row.try_get::<String, _>(0)?),
            None => None,
        })
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute (tx)");
        let result = q.query().execute(&mut *self.tx).await.map_err(map_unique_violation)?;
        Ok(result.rows_affected())
    }

    fn target_type(&self, key: &ResourceKey) -> Result<Arc<ResourceType>, AppError> {
        Ok(self.graph.get_resource_type(&key.resource_type)?.clone())
    }

    /// Attribute columns plus foreign keys stored on this row.
    fn columns(
        &self,
        resource_type: &ResourceType,
        data: &ResourceData,
    ) -> Result<IndexMap<String, (ScalarValue, &'static str)>, AppError> {
        let mut columns = IndexMap::new();
        for (name, value) in &data.attributes {
            let attribute = resource_type.find_attribute(name).ok_or_else(|| {
                AppError::Store(format!("unknown attribute '{}' on '{}'", name, resource_type.public_name))
            })?;
            columns.insert(attribute.column.clone(), (value.clone(), pg_cast(attribute.attr_type)));
        }
        for (name, targets) in &data.relationships {
            let Some(relationship) = resource_type.find_relationship(name) else {
                continue;
            };
            if let (RelationshipStorage::LeftKey(column), RelationshipTargets::ToOne(target)) =
                (relationship_storage(&self.graph, relationship)?, targets)
            {
                let right = self.graph.get_resource_type(&relationship.right_type)?;
                let value = target.as_ref().map(|t| t.id.clone()).unwrap_or(ScalarValue::Null);
                columns.insert(column.to_string(), (value, pg_cast(right.id_type.attr_type())));
            }
        }
        Ok(columns)
    }

    /// Relationships not stored as a column of the row itself.
    async fn write_detached_relationships(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        data: &ResourceData,
    ) -> Result<(), AppError> {
        for (name, targets) in &data.relationships {
            let relationship = resource_type.find_relationship(name).cloned().ok_or_else(|| {
                AppError::Store(format!("unknown relationship '{}' on '{}'", name, resource_type.public_name))
            })?;
            if matches!(relationship_storage(&self.graph, &relationship)?, RelationshipStorage::LeftKey(_)) {
                continue;
            }
            self.set_relationship(resource_type, id, &relationship, targets).await?;
        }
        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return AppError::conflict(
                "Another resource with the specified ID already exists.",
                db.message().to_string(),
            );
        }
    }
    AppError::Db(err)
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn create(&mut self, resource_type: &ResourceType, data: &ResourceData) -> Result<ResourceKey, AppError> {
        let columns = self.columns(resource_type, data)?;
        let q = sql::insert(&self.graph, resource_type, data.id.as_ref(), &columns);
        let text = self
            .returning_id(&q)
            .await?
            .ok_or_else(|| AppError::Store(format!("insert into '{}' returned no id", resource_type.table)))?;
        let id = ScalarValue::parse_as(&text, resource_type.id_type.attr_type())?;
        self.write_detached_relationships(resource_type, &id, data).await?;
        Ok(ResourceKey::new(resource_type.public_name.clone(), id))
    }

    async fn update(&mut self, resource_type: &ResourceType, id: &ScalarValue, data: &ResourceData) -> Result<(), AppError> {
        let columns = self.columns(resource_type, data)?;
        let q = sql::update(resource_type, id, &columns);
        if self.returning_id(&q).await?.is_none() {
            return Err(AppError::resource_not_found(&resource_type.public_name, &id_to_string(id)));
        }
        self.write_detached_relationships(resource_type, id, data).await
    }

    async fn delete(&mut self, resource_type: &ResourceType, id: &ScalarValue) -> Result<(), AppError> {
        let q = sql::delete(resource_type, id);
        if self.returning_id(&q).await?.is_none() {
            return Err(AppError::resource_not_found(&resource_type.public_name, &id_to_string(id)));
        }
        Ok(())
    }

    async fn set_relationship(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &RelationshipTargets,
    ) -> Result<(), AppError> {
        let graph = self.graph.clone();
        match (relationship_storage(&graph, relationship)?, targets) {
            (RelationshipStorage::LeftKey(column), RelationshipTargets::ToOne(target)) => {
                let right = graph.get_resource_type(&relationship.right_type)?;
                let q = sql::set_key(resource_type, column, id, target.as_ref().map(|t| (&t.id, right.as_ref())));
                if self.returning_id(&q).await?.is_none() {
                    return Err(AppError::resource_not_found(&resource_type.public_name, &id_to_string(id)));
                }
            }
            (RelationshipStorage::RightKey(column), targets) => {
                let right = graph.get_resource_type(&relationship.right_type)?;
                self.execute(&sql::clear_right_keys(right, column, resource_type, id, None)).await?;
                for target in targets.keys() {
                    let target_type = self.target_type(target)?;
                    self.execute(&sql::set_key(&target_type, column, &target.id, Some((id, resource_type)))).await?;
                }
            }
            (RelationshipStorage::Through(through), RelationshipTargets::ToMany(targets)) => {
                self.execute(&sql::unlink_through(through, resource_type, id, None)).await?;
                for target in targets {
                    let target_type = self.target_type(target)?;
                    self.execute(&sql::link_through(through, resource_type, id, &target_type, &target.id)).await?;
                }
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

    async fn add_to_to_many(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &[ResourceKey],
    ) -> Result<(), AppError> {
        let graph = self.graph.clone();
        match relationship_storage(&graph, relationship)? {
            RelationshipStorage::RightKey(column) => {
                for target in targets {
                    let target_type = self.target_type(target)?;
                    self.execute(&sql::set_key(&target_type, column, &target.id, Some((id, resource_type)))).await?;
                }
            }
            RelationshipStorage::Through(through) => {
                for target in targets {
                    let target_type = self.target_type(target)?;
                    self.execute(&sql::link_through(through, resource_type, id, &target_type, &target.id)).await?;
                }
            }
            RelationshipStorage::LeftKey(_) => {
                return Err(AppError::Store(format!(
                    "relationship '{}' is not a to-many relationship",
                    relationship.public_name
                )))
            }
        }
        Ok(())
    }

    async fn remove_from_to_many(
        &mut self,
        resource_type: &ResourceType,
        id: &ScalarValue,
        relationship: &RelationshipAttribute,
        targets: &[ResourceKey],
    ) -> Result<(), AppError> {
        let graph = self.graph.clone();
        match relationship_storage(&graph, relationship)? {
            RelationshipStorage::RightKey(column) => {
                for target in targets {
                    let target_type = self.target_type(target)?;
                    self.execute(&sql::clear_right_keys(&target_type, column, resource_type, id, Some(&target.id)))
                        .await?;
                }
            }
            RelationshipStorage::Through(through) => {
                for target in targets {
                    let target_type = self.target_type(target)?;
                    self.execute(&sql::unlink_through(through, resource_type, id, Some((&target_type, &target.id))))
                        .await?;
                }
            }
            RelationshipStorage::LeftKey(_) => {
                return Err(AppError::Store(format!(
                    "relationship '{}' is not a to-many relationship",
                    relationship.public_name
                )))
            }
        }
        Ok(())
    }

    async fn exists(&mut self, key: &ResourceKey) -> Result<bool, AppError> {
        let resource_type = self.target_type(key)?;
        let q = sql::exists(&self.graph, &resource_type, &key.id);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let row = q.query().fetch_optional(&mut *self.tx).await?;
        Ok(row.is_some())
    }

    async fn query(&mut self, layer: &QueryLayer, cancel: &CancellationToken) -> Result<ResourceSet, AppError> {
        let graph = self.graph.clone();
        fetch_resources(&mut *self.tx, &graph, layer, cancel).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

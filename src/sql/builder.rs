//! Storage mapping of resource types and the parameterized write statements built on it.

use super::{quoted, QueryBuf};
use super::params::pg_cast;
use crate::error::ConfigError;
use crate::graph::{RelationshipAttribute, RelationshipKind, ResourceGraph, ResourceType, ThroughTable};
use crate::value::ScalarValue;
use indexmap::IndexMap;

/// Column used to tell derived types apart when none is configured.
pub const DEFAULT_DISCRIMINATOR: &str = "discriminator";

/// Where the key of a relationship lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationshipStorage<'a> {
    /// Column on the left table holding the right id.
    LeftKey(&'a str),
    /// Column on the right table holding the left id.
    RightKey(&'a str),
    Through(&'a ThroughTable),
}

/// Resolve the key column of a relationship, using the inverse navigation when the
/// declaration itself does not name one.
pub fn relationship_storage<'g>(
    graph: &'g ResourceGraph,
    relationship: &'g RelationshipAttribute,
) -> Result<RelationshipStorage<'g>, ConfigError> {
    let missing = || ConfigError::MissingReference {
        kind: "foreign key",
        id: format!("{}.{}", relationship.left_type, relationship.public_name),
    };
    match &relationship.kind {
        RelationshipKind::HasOne { foreign_key: Some(fk) } => Ok(RelationshipStorage::LeftKey(fk)),
        RelationshipKind::HasMany { foreign_key: Some(fk) } => Ok(RelationshipStorage::RightKey(fk)),
        RelationshipKind::HasManyThrough { through } => Ok(RelationshipStorage::Through(through)),
        RelationshipKind::HasOne { foreign_key: None } | RelationshipKind::HasMany { foreign_key: None } => {
            let inverse = graph.inverse_of(relationship).ok_or_else(missing)?;
            match &inverse.kind {
                RelationshipKind::HasOne { foreign_key: Some(fk) } => Ok(RelationshipStorage::RightKey(fk)),
                RelationshipKind::HasMany { foreign_key: Some(fk) } if relationship.is_to_one() => {
                    Ok(RelationshipStorage::LeftKey(fk))
                }
                _ => Err(missing()),
            }
        }
    }
}

/// Discriminator column of a type, inherited from the nearest base that declares one.
pub fn discriminator_column(graph: &ResourceGraph, resource_type: &ResourceType) -> String {
    let mut current = Some(resource_type);
    while let Some(t) = current {
        if let Some(column) = &t.discriminator {
            return column.clone();
        }
        current = t.base_type.as_deref().and_then(|b| graph.find_resource_type(b)).map(|b| b.as_ref());
    }
    DEFAULT_DISCRIMINATOR.to_string()
}

/// Whether rows of other types may share the table of `resource_type`.
pub fn is_polymorphic(resource_type: &ResourceType) -> bool {
    resource_type.base_type.is_some() || !resource_type.derived_types.is_empty()
}

/// String literal for configuration-derived text.
pub fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Condition restricting `alias` to `resource_type` and its derived types, needed when the
/// table is shared with a base type.
pub fn type_condition(graph: &ResourceGraph, alias: &str, resource_type: &ResourceType) -> Option<String> {
    resource_type.base_type.as_ref()?;
    let names: Vec<String> = graph
        .concrete_types_of(&resource_type.public_name)
        .iter()
        .map(|t| literal(&t.public_name))
        .collect();
    Some(format!(
        "{}.{} IN ({})",
        alias,
        quoted(&discriminator_column(graph, resource_type)),
        names.join(", ")
    ))
}

fn id_column(resource_type: &ResourceType) -> String {
    quoted(&resource_type.id_attribute().column)
}

fn id_placeholder(q: &mut QueryBuf, resource_type: &ResourceType, id: &ScalarValue) -> String {
    q.push_param(id, pg_cast(resource_type.id_type.attr_type()))
}

/// INSERT of the given column values. The id column is included only when `id` is given.
/// Returns the id as text.
pub fn insert(
    graph: &ResourceGraph,
    resource_type: &ResourceType,
    id: Option<&ScalarValue>,
    columns: &IndexMap<String, (ScalarValue, &'static str)>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut names = Vec::new();
    let mut placeholders = Vec::new();
    if let Some(id) = id {
        names.push(id_column(resource_type));
        placeholders.push(id_placeholder(&mut q, resource_type, id));
    }
    for (column, (value, cast)) in columns {
        names.push(quoted(column));
        placeholders.push(q.push_param(value, cast));
    }
    if is_polymorphic(resource_type) {
        names.push(quoted(&discriminator_column(graph, resource_type)));
        placeholders.push(q.push_param(&ScalarValue::from(resource_type.public_name.as_str()), "text"));
    }
    let returning = format!("{}::text", id_column(resource_type));
    q.sql = if names.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", quoted(&resource_type.table), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quoted(&resource_type.table),
            names.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id of the given columns. Returns the id so a missing row is detectable.
pub fn update(
    resource_type: &ResourceType,
    id: &ScalarValue,
    columns: &IndexMap<String, (ScalarValue, &'static str)>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets: Vec<String> = columns
        .iter()
        .map(|(column, (value, cast))| format!("{} = {}", quoted(column), q.push_param(value, cast)))
        .collect();
    let id_ph = id_placeholder(&mut q, resource_type, id);
    q.sql = if sets.is_empty() {
        format!(
            "SELECT {}::text FROM {} WHERE {} = {}",
            id_column(resource_type),
            quoted(&resource_type.table),
            id_column(resource_type),
            id_ph
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING {}::text",
            quoted(&resource_type.table),
            sets.join(", "),
            id_column(resource_type),
            id_ph,
            id_column(resource_type)
        )
    };
    q
}

/// DELETE by id.
pub fn delete(resource_type: &ResourceType, id: &ScalarValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = id_placeholder(&mut q, resource_type, id);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}::text",
        quoted(&resource_type.table),
        id_column(resource_type),
        id_ph,
        id_column(resource_type)
    );
    q
}

/// SELECT 1 for an existing row of exactly this type (or a derived one).
pub fn exists(graph: &ResourceGraph, resource_type: &ResourceType, id: &ScalarValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_ph = id_placeholder(&mut q, resource_type, id);
    let mut conditions = vec![format!("t0.{} = {}", id_column(resource_type), id_ph)];
    conditions.extend(type_condition(graph, "t0", resource_type));
    q.sql = format!(
        "SELECT 1 FROM {} t0 WHERE {}",
        quoted(&resource_type.table),
        conditions.join(" AND ")
    );
    q
}

/// Point the key column at `right_id` (or clear it) for a relationship stored on one side.
pub fn set_key(
    table_type: &ResourceType,
    column: &str,
    row_id: &ScalarValue,
    value: Option<(&ScalarValue, &ResourceType)>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let value_ph = match value {
        Some((v, owner)) => q.push_param(v, pg_cast(owner.id_type.attr_type())),
        None => "NULL".to_string(),
    };
    let id_ph = id_placeholder(&mut q, table_type, row_id);
    q.sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {} RETURNING {}::text",
        quoted(&table_type.table),
        quoted(column),
        value_ph,
        id_column(table_type),
        id_ph,
        id_column(table_type)
    );
    q
}

/// Clear the right-side key column for every row pointing at `left_id`, optionally only for one row.
pub fn clear_right_keys(
    right: &ResourceType,
    column: &str,
    left: &ResourceType,
    left_id: &ScalarValue,
    only: Option<&ScalarValue>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let left_ph = q.push_param(left_id, pg_cast(left.id_type.attr_type()));
    let mut sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = {}",
        quoted(&right.table),
        quoted(column),
        quoted(column),
        left_ph
    );
    if let Some(right_id) = only {
        let right_ph = id_placeholder(&mut q, right, right_id);
        sql.push_str(&format!(" AND {} = {}", id_column(right), right_ph));
    }
    q.sql = sql;
    q
}

/// Insert a join-table row, ignoring duplicates.
pub fn link_through(
    through: &ThroughTable,
    left: &ResourceType,
    left_id: &ScalarValue,
    right: &ResourceType,
    right_id: &ScalarValue,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let left_ph = id_placeholder(&mut q, left, left_id);
    let right_ph = id_placeholder(&mut q, right, right_id);
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {}) ON CONFLICT DO NOTHING",
        quoted(&through.table),
        quoted(&through.left_column),
        quoted(&through.right_column),
        left_ph,
        right_ph
    );
    q
}

/// Delete join-table rows of `left_id`, optionally only the one pointing at `right_id`.
pub fn unlink_through(
    through: &ThroughTable,
    left: &ResourceType,
    left_id: &ScalarValue,
    right: Option<(&ResourceType, &ScalarValue)>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let left_ph = id_placeholder(&mut q, left, left_id);
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        quoted(&through.table),
        quoted(&through.left_column),
        left_ph
    );
    if let Some((right_type, right_id)) = right {
        let right_ph = id_placeholder(&mut q, right_type, right_id);
        sql.push_str(&format!(" AND {} = {}", quoted(&through.right_column), right_ph));
    }
    q.sql = sql;
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::PgBindValue;
    use crate::testing;

    #[test]
    fn storage_follows_inverse_when_key_is_not_declared() {
        let graph = testing::music_graph();
        let track = graph.get_relationship("lyrics", "track").unwrap();
        assert_eq!(relationship_storage(&graph, track).unwrap(), RelationshipStorage::RightKey("lyric_id"));
        let lyric = graph.get_relationship("musicTracks", "lyric").unwrap();
        assert_eq!(relationship_storage(&graph, lyric).unwrap(), RelationshipStorage::LeftKey("lyric_id"));
        let tracks = graph.get_relationship("recordCompanies", "tracks").unwrap();
        assert_eq!(relationship_storage(&graph, tracks).unwrap(), RelationshipStorage::RightKey("owned_by_id"));
    }

    #[test]
    fn insert_casts_every_parameter() {
        let graph = testing::blog_graph();
        let blogs = graph.get_resource_type("blogs").unwrap();
        let mut columns = IndexMap::new();
        columns.insert("title".to_string(), (ScalarValue::from("Hi"), "text"));
        columns.insert("owner_id".to_string(), (ScalarValue::Integer(3), "bigint"));
        let q = insert(&graph, blogs, None, &columns);
        assert_eq!(
            q.sql,
            "INSERT INTO \"blogs\" (\"title\", \"owner_id\") VALUES ($1::text, $2::bigint) RETURNING \"id\"::text"
        );
        assert_eq!(q.params, vec![PgBindValue::Text("Hi".into()), PgBindValue::Text("3".into())]);
    }

    #[test]
    fn derived_types_write_their_discriminator() {
        let graph = testing::vehicle_graph();
        let cars = graph.get_resource_type("cars").unwrap();
        let q = insert(&graph, cars, None, &IndexMap::new());
        assert_eq!(
            q.sql,
            "INSERT INTO \"vehicles\" (\"discriminator\") VALUES ($1::text) RETURNING \"id\"::text"
        );
        let q = exists(&graph, cars, &ScalarValue::Integer(1));
        assert_eq!(
            q.sql,
            "SELECT 1 FROM \"vehicles\" t0 WHERE t0.\"id\" = $1::bigint AND t0.\"discriminator\" IN ('cars')"
        );
    }

    #[test]
    fn through_rows_are_scoped_to_left_id() {
        let graph = testing::music_graph();
        let tracks = graph.get_resource_type("musicTracks").unwrap();
        let performers = graph.get_resource_type("performers").unwrap();
        let RelationshipKind::HasManyThrough { through } = &graph.get_relationship("musicTracks", "performers").unwrap().kind else {
            panic!("expected through relationship");
        };
        let id = ScalarValue::Uuid(uuid::Uuid::nil());
        let q = unlink_through(through, tracks, &id, Some((performers, &ScalarValue::Integer(4))));
        assert_eq!(
            q.sql,
            "DELETE FROM \"track_performers\" WHERE \"track_id\" = $1::uuid AND \"performer_id\" = $2::bigint"
        );
    }
}

//! Lowers compiled queries to PostgreSQL. Each result row is one JSON document holding the
//! resource with its selected relationships, built by correlated subqueries.

use super::ir::{MemberPath, Operand, Predicate};
use super::queryable::CompiledQuery;
use crate::error::AppError;
use crate::graph::{RelationshipAttribute, ResourceGraph, ResourceType};
use crate::query::expressions::{ComparisonOperator, TextMatchKind};
use crate::sql::{
    discriminator_column, is_polymorphic, literal, quoted, relationship_storage, type_condition, QueryBuf,
    RelationshipStorage,
};
use crate::store::{NodeId, RelationshipValue, ResourceSet};
use crate::value::{ResourceKey, ScalarValue};
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// Joined to-one paths of one SELECT, keyed by navigation path: (alias, JOIN clause).
type Joins = IndexMap<String, (String, String)>;

/// Rows of one resource type: FROM clause plus the conditions tying them to their owner.
struct RowSource {
    alias: String,
    from: String,
    conditions: Vec<String>,
}

/// Where member paths start: a table alias and the join-key prefix for paths below it.
struct Origin {
    alias: String,
    key: String,
}

pub struct SqlQueryBuilder<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> SqlQueryBuilder<'a> {
    pub fn new(graph: &'a ResourceGraph) -> Self {
        SqlQueryBuilder { graph }
    }

    /// SELECT returning one `resource` JSON column per primary row.
    pub fn select(&self, query: &CompiledQuery) -> Result<QueryBuf, AppError> {
        let mut lowering = Lowering::new(self.graph);
        let source = lowering.root_source(&query.resource_type);
        let sql = lowering.rows(query, source, false)?;
        let mut buf = lowering.buf;
        buf.sql = sql;
        Ok(buf)
    }

    /// SELECT COUNT(*) of the rows matching `filter`.
    pub fn count(&self, resource_type: &ResourceType, filter: Option<&Predicate>) -> Result<QueryBuf, AppError> {
        let mut lowering = Lowering::new(self.graph);
        let source = lowering.root_source(resource_type);
        let mut joins = Joins::new();
        let mut conditions = source.conditions.clone();
        if let Some(filter) = filter {
            let origin = Origin {
                alias: source.alias.clone(),
                key: String::new(),
            };
            conditions.push(lowering.predicate(filter, &mut joins, &origin)?);
        }
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", source.from);
        push_joins(&mut sql, &joins);
        push_where(&mut sql, &conditions);
        let mut buf = lowering.buf;
        buf.sql = sql;
        Ok(buf)
    }
}

struct Lowering<'a> {
    graph: &'a ResourceGraph,
    buf: QueryBuf,
    aliases: usize,
}

impl<'a> Lowering<'a> {
    fn new(graph: &'a ResourceGraph) -> Self {
        Lowering {
            graph,
            buf: QueryBuf::new(),
            aliases: 0,
        }
    }

    fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.aliases);
        self.aliases += 1;
        alias
    }

    fn root_source(&mut self, resource_type: &ResourceType) -> RowSource {
        let alias = self.next_alias();
        RowSource {
            from: format!("{} {}", quoted(&resource_type.table), alias),
            conditions: type_condition(self.graph, &alias, resource_type).into_iter().collect(),
            alias,
        }
    }

    /// Rows on the right side of `relationship`, correlated with `owner_alias`.
    fn related_source(&mut self, owner_alias: &str, relationship: &RelationshipAttribute) -> Result<RowSource, AppError> {
        let graph = self.graph;
        let owner = graph.get_resource_type(&relationship.left_type)?;
        let right = graph.get_resource_type(&relationship.right_type)?;
        let alias = self.next_alias();
        let owner_id = format!("{}.{}", owner_alias, quoted(&owner.id_attribute().column));
        let right_id = format!("{}.{}", alias, quoted(&right.id_attribute().column));
        let mut from = format!("{} {}", quoted(&right.table), alias);
        let mut conditions = Vec::new();
        match relationship_storage(graph, relationship)? {
            RelationshipStorage::LeftKey(column) => {
                conditions.push(format!("{} = {}.{}", right_id, owner_alias, quoted(column)));
            }
            RelationshipStorage::RightKey(column) => {
                conditions.push(format!("{}.{} = {}", alias, quoted(column), owner_id));
            }
            RelationshipStorage::Through(through) => {
                let join_alias = self.next_alias();
                from.push_str(&format!(
                    " JOIN {} {} ON {}.{} = {}",
                    quoted(&through.table),
                    join_alias,
                    join_alias,
                    quoted(&through.right_column),
                    right_id
                ));
                conditions.push(format!("{}.{} = {}", join_alias, quoted(&through.left_column), owner_id));
            }
        }
        conditions.extend(type_condition(graph, &alias, right));
        Ok(RowSource { alias, from, conditions })
    }

    /// LEFT JOIN each to-one link of `links` once per SELECT; returns the alias of the last one.
    fn join(&mut self, joins: &mut Joins, origin: &Origin, links: &[Arc<RelationshipAttribute>]) -> Result<String, AppError> {
        let mut current = origin.alias.clone();
        let mut key = origin.key.clone();
        for relationship in links {
            key.push('.');
            key.push_str(&relationship.public_name);
            if let Some((alias, _)) = joins.get(&key) {
                current = alias.clone();
                continue;
            }
            let source = self.related_source(&current, relationship)?;
            let clause = format!("LEFT JOIN {} ON {}", source.from, source.conditions.join(" AND "));
            joins.insert(key.clone(), (source.alias.clone(), clause));
            current = source.alias;
        }
        Ok(current)
    }

    /// Owner alias and element rows of the collection at the end of `path`.
    fn collection(&mut self, path: &MemberPath, joins: &mut Joins, origin: &Origin) -> Result<Option<RowSource>, AppError> {
        let Some((last, prefix)) = path.relationships.split_last() else {
            return Ok(None);
        };
        let owner = self.join(joins, origin, prefix)?;
        self.related_source(&owner, last).map(Some)
    }

    fn predicate(&mut self, predicate: &Predicate, joins: &mut Joins, origin: &Origin) -> Result<String, AppError> {
        Ok(match predicate {
            Predicate::Constant(b) => bool_sql(*b).to_string(),
            Predicate::Compare { operator, left, right } => self.compare(*operator, left, right, joins, origin)?,
            Predicate::And(terms) => self.junction(terms, " AND ", "TRUE", joins, origin)?,
            Predicate::Or(terms) => self.junction(terms, " OR ", "FALSE", joins, origin)?,
            // Unknown collapses to false before negation, as in the in-memory evaluator.
            Predicate::Not(inner) => format!("NOT COALESCE({}, FALSE)", self.predicate(inner, joins, origin)?),
            Predicate::NotNull(path) => self.not_null(path, joins, origin)?,
            Predicate::In { operand, values } => {
                let operand = self.operand(operand, joins, origin)?;
                let mut terms = Vec::new();
                let placeholders: Vec<String> = values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| self.constant(v))
                    .collect();
                if !placeholders.is_empty() {
                    terms.push(format!("{} IN ({})", operand, placeholders.join(", ")));
                }
                if values.iter().any(ScalarValue::is_null) {
                    terms.push(format!("{} IS NULL", operand));
                }
                match terms.len() {
                    0 => "FALSE".to_string(),
                    1 => terms.remove(0),
                    _ => format!("({})", terms.join(" OR ")),
                }
            }
            Predicate::TextMatch { kind, operand, text } => {
                let operand = self.operand(operand, joins, origin)?;
                let escaped = escape_like(text);
                let pattern = match kind {
                    TextMatchKind::Contains => format!("%{}%", escaped),
                    TextMatchKind::StartsWith => format!("{}%", escaped),
                    TextMatchKind::EndsWith => format!("%{}", escaped),
                };
                let placeholder = self.buf.push_param(&ScalarValue::Text(pattern), "text");
                format!("{} LIKE {} ESCAPE '\\'", operand, placeholder)
            }
            Predicate::Any { collection, predicate } => {
                let Some(source) = self.collection(collection, joins, origin)? else {
                    return Ok("FALSE".to_string());
                };
                let mut inner_joins = Joins::new();
                let mut conditions = source.conditions.clone();
                if let Some(inner) = predicate {
                    let inner_origin = Origin {
                        alias: source.alias.clone(),
                        key: String::new(),
                    };
                    conditions.push(self.predicate(inner, &mut inner_joins, &inner_origin)?);
                }
                let mut sql = format!("EXISTS (SELECT 1 FROM {}", source.from);
                push_joins(&mut sql, &inner_joins);
                push_where(&mut sql, &conditions);
                sql.push(')');
                sql
            }
            Predicate::IsType {
                path,
                derived_type,
                predicate,
            } => {
                let target = self.join(joins, origin, &path.relationships)?;
                let names: Vec<String> = self
                    .graph
                    .concrete_types_of(&derived_type.public_name)
                    .iter()
                    .map(|t| literal(&t.public_name))
                    .collect();
                let column = discriminator_column(self.graph, derived_type);
                let mut sql = format!("{}.{} IN ({})", target, quoted(&column), names.join(", "));
                if let Some(inner) = predicate {
                    let inner_origin = Origin {
                        alias: target,
                        key: format!("{}{}:{}", origin.key, path, derived_type.public_name),
                    };
                    sql = format!("({} AND {})", sql, self.predicate(inner, joins, &inner_origin)?);
                }
                sql
            }
        })
    }

    fn junction(
        &mut self,
        terms: &[Predicate],
        separator: &str,
        empty: &str,
        joins: &mut Joins,
        origin: &Origin,
    ) -> Result<String, AppError> {
        if terms.is_empty() {
            return Ok(empty.to_string());
        }
        let mut lowered = Vec::with_capacity(terms.len());
        for term in terms {
            let sql = self.predicate(term, joins, origin)?;
            // Guards on collections lower to TRUE; drop them from conjunctions.
            if sql == empty && empty == "TRUE" {
                continue;
            }
            lowered.push(sql);
        }
        Ok(match lowered.len() {
            0 => empty.to_string(),
            1 => lowered.remove(0),
            _ => format!("({})", lowered.join(separator)),
        })
    }

    fn not_null(&mut self, path: &MemberPath, joins: &mut Joins, origin: &Origin) -> Result<String, AppError> {
        if path.attribute.is_some() {
            let member = self.member(path, joins, origin)?;
            return Ok(format!("{} IS NOT NULL", member));
        }
        // A collection is never null here; only the to-one links leading to it can be missing.
        let links: &[Arc<RelationshipAttribute>] = match path.relationships.split_last() {
            Some((last, prefix)) if last.is_to_many() => prefix,
            _ => &path.relationships,
        };
        let Some(last) = links.last() else {
            return Ok("TRUE".to_string());
        };
        let alias = self.join(joins, origin, links)?;
        let right = self.graph.get_resource_type(&last.right_type)?;
        Ok(format!("{}.{} IS NOT NULL", alias, quoted(&right.id_attribute().column)))
    }

    fn compare(
        &mut self,
        operator: ComparisonOperator,
        left: &Operand,
        right: &Operand,
        joins: &mut Joins,
        origin: &Origin,
    ) -> Result<String, AppError> {
        let is_null = |o: &Operand| matches!(o, Operand::Constant(v) if v.is_null());
        if is_null(left) || is_null(right) {
            if operator != ComparisonOperator::Equals {
                return Ok("FALSE".to_string());
            }
            return Ok(match (is_null(left), is_null(right)) {
                (true, true) => "TRUE".to_string(),
                (true, false) => format!("{} IS NULL", self.operand(right, joins, origin)?),
                _ => format!("{} IS NULL", self.operand(left, joins, origin)?),
            });
        }
        let symbol = match operator {
            ComparisonOperator::Equals => "=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessOrEqual => "<=",
        };
        let left = self.operand(left, joins, origin)?;
        let right = self.operand(right, joins, origin)?;
        Ok(format!("{} {} {}", left, symbol, right))
    }

    fn operand(&mut self, operand: &Operand, joins: &mut Joins, origin: &Origin) -> Result<String, AppError> {
        Ok(match operand {
            Operand::Constant(value) => self.constant(value),
            Operand::Member(path) => self.member(path, joins, origin)?,
            Operand::Count(path) => match self.collection(path, joins, origin)? {
                Some(source) => {
                    let mut sql = format!("(SELECT COUNT(*) FROM {}", source.from);
                    push_where(&mut sql, &source.conditions);
                    sql.push(')');
                    sql
                }
                None => "0".to_string(),
            },
            Operand::Conditional { guard, then, otherwise } => {
                let guard = self.predicate(guard, joins, origin)?;
                let then = self.operand(then, joins, origin)?;
                if guard == "TRUE" {
                    return Ok(then);
                }
                let otherwise = self.operand(otherwise, joins, origin)?;
                format!("CASE WHEN {} THEN {} ELSE {} END", guard, then, otherwise)
            }
        })
    }

    fn member(&mut self, path: &MemberPath, joins: &mut Joins, origin: &Origin) -> Result<String, AppError> {
        let alias = self.join(joins, origin, &path.relationships)?;
        let column = match (&path.attribute, path.relationships.last()) {
            (Some(attribute), _) => attribute.column.clone(),
            (None, Some(last)) => self.graph.get_resource_type(&last.right_type)?.id_attribute().column.clone(),
            (None, None) => {
                return Err(AppError::Store(format!("member path '{}' selects nothing", path)));
            }
        };
        Ok(format!("{}.{}", alias, quoted(&column)))
    }

    fn constant(&mut self, value: &ScalarValue) -> String {
        match value {
            ScalarValue::DateTime(d) if *d == DateTime::<Utc>::MIN_UTC => "'-infinity'::timestamptz".to_string(),
            ScalarValue::Date(d) if *d == NaiveDate::MIN => "'-infinity'::date".to_string(),
            other => self.buf.push_value(other),
        }
    }

    /// SELECT producing one JSON document per row of `source`, filtered, ordered and paged.
    fn rows(&mut self, query: &CompiledQuery, source: RowSource, to_one: bool) -> Result<String, AppError> {
        let mut joins = Joins::new();
        let origin = Origin {
            alias: source.alias.clone(),
            key: String::new(),
        };
        let mut conditions = source.conditions.clone();
        if let Some(filter) = &query.filter {
            conditions.push(self.predicate(filter, &mut joins, &origin)?);
        }
        let mut order = Vec::with_capacity(query.order_by.keys.len());
        for key in &query.order_by.keys {
            let operand = self.operand(&key.operand, &mut joins, &origin)?;
            order.push(if key.ascending {
                format!("{} ASC NULLS FIRST", operand)
            } else {
                format!("{} DESC NULLS LAST", operand)
            });
        }
        let document = self.document(query, &source.alias)?;

        let mut sql = format!("SELECT {} AS resource FROM {}", document, source.from);
        push_joins(&mut sql, &joins);
        push_where(&mut sql, &conditions);
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        let take = if to_one { Some(query.take.unwrap_or(1).min(1)) } else { query.take };
        if let Some(take) = take {
            sql.push_str(&format!(" LIMIT {}", take));
        }
        if query.skip > 0 {
            sql.push_str(&format!(" OFFSET {}", query.skip));
        }
        Ok(sql)
    }

    /// `json_build_object` of type, id, selected attributes and selected relationships.
    fn document(&mut self, query: &CompiledQuery, alias: &str) -> Result<String, AppError> {
        let resource_type = &query.resource_type;
        let type_expr = if is_polymorphic(resource_type) {
            format!(
                "COALESCE({}.{}, {})",
                alias,
                quoted(&discriminator_column(self.graph, resource_type)),
                literal(&resource_type.public_name)
            )
        } else {
            literal(&resource_type.public_name)
        };
        let id_expr = format!("{}.{}::text", alias, quoted(&resource_type.id_attribute().column));

        let mut attributes: IndexMap<&str, String> = IndexMap::new();
        let mut relationships: IndexMap<&str, String> = IndexMap::new();
        for selectors in query.selection.values() {
            for attribute in selectors.attributes.iter().filter(|a| !a.is_id()) {
                attributes
                    .entry(&attribute.public_name)
                    .or_insert_with(|| format!("{}.{}", alias, quoted(&attribute.column)));
            }
            for selected in &selectors.relationships {
                let Some(nested) = &selected.query else {
                    continue;
                };
                let name = selected.relationship.public_name.as_str();
                if relationships.contains_key(name) {
                    continue;
                }
                let source = self.related_source(alias, &selected.relationship)?;
                let to_one = selected.relationship.is_to_one();
                let rows = self.rows(nested, source, to_one)?;
                let expr = if to_one {
                    format!("(SELECT sub.resource FROM ({}) sub)", rows)
                } else {
                    format!("(SELECT COALESCE(json_agg(sub.resource), '[]'::json) FROM ({}) sub)", rows)
                };
                relationships.insert(name, expr);
            }
        }

        Ok(format!(
            "json_build_object('type', {}, 'id', {}, 'attributes', {}, 'relationships', {})",
            type_expr,
            id_expr,
            json_object(&attributes),
            json_object(&relationships)
        ))
    }
}

fn json_object(fields: &IndexMap<&str, String>) -> String {
    let args: Vec<String> = fields
        .iter()
        .map(|(name, expr)| format!("{}, {}", literal(name), expr))
        .collect();
    format!("json_build_object({})", args.join(", "))
}

fn push_joins(sql: &mut String, joins: &Joins) {
    for (_, clause) in joins.values() {
        sql.push(' ');
        sql.push_str(clause);
    }
}

fn push_where(sql: &mut String, conditions: &[String]) {
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
}

fn bool_sql(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Turns the JSON documents returned by [`SqlQueryBuilder::select`] into a resource set.
pub fn read_rows(graph: &ResourceGraph, rows: &[Value]) -> Result<ResourceSet, AppError> {
    let mut set = ResourceSet::new();
    for row in rows {
        let node = read_resource(graph, row, &mut set)?;
        set.push_primary(node);
    }
    Ok(set)
}

fn read_resource(graph: &ResourceGraph, document: &Value, set: &mut ResourceSet) -> Result<NodeId, AppError> {
    let malformed = || AppError::Store(format!("malformed resource document: {}", document));
    let type_name = document.get("type").and_then(Value::as_str).ok_or_else(malformed)?;
    let id_text = document.get("id").and_then(Value::as_str).ok_or_else(malformed)?;
    let resource_type = graph.get_resource_type(type_name)?;
    let id = ScalarValue::parse_as(id_text, resource_type.id_type.attr_type())?;

    let mut attributes = IndexMap::new();
    attributes.insert(resource_type.id_attribute().public_name.clone(), id.clone());
    if let Some(Value::Object(values)) = document.get("attributes") {
        for (name, value) in values {
            // Columns of sibling derived types share the table; skip what this type lacks.
            let Some(attribute) = resource_type.find_attribute(name) else {
                continue;
            };
            attributes.insert(name.clone(), ScalarValue::from_json(value, attribute.attr_type)?);
        }
    }
    let node = set.upsert(ResourceKey::new(type_name, id), attributes);

    if let Some(Value::Object(values)) = document.get("relationships") {
        for (name, value) in values {
            if resource_type.find_relationship(name).is_none() {
                continue;
            }
            let related = match value {
                Value::Array(items) => RelationshipValue::ToMany(
                    items
                        .iter()
                        .map(|item| read_resource(graph, item, set))
                        .collect::<Result<_, _>>()?,
                ),
                Value::Null => RelationshipValue::ToOne(None),
                item => RelationshipValue::ToOne(Some(read_resource(graph, item, set)?)),
            };
            set.set_relationship(node, name, related);
        }
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::QueryableBuilder;
    use crate::config::JsonApiOptions;
    use crate::queries::{QueryLayerComposer, QueryLayerIncludeConverter, ResourceDefinitionRegistry};
    use crate::query::reader::{EndpointKind, QueryStringReader};
    use crate::testing;
    use serde_json::json;

    fn compiled(graph: &ResourceGraph, resource_type: &str, raw: &str) -> CompiledQuery {
        let options = JsonApiOptions::default();
        let definitions = ResourceDefinitionRegistry::new();
        let rt = graph.get_resource_type(resource_type).unwrap().clone();
        let constraints = QueryStringReader::new(graph, &options, rt.clone(), EndpointKind::Collection)
            .read(raw)
            .unwrap();
        let mut layer = QueryLayerComposer::new(graph, &options, &definitions).compose_from_constraints(
            &constraints,
            &rt,
            EndpointKind::Collection,
        );
        QueryLayerIncludeConverter::new(graph).convert_includes_to_selections(&mut layer);
        QueryableBuilder::new(graph).apply_query(&layer)
    }

    fn where_clause(sql: &str) -> &str {
        let start = sql.find(" WHERE ").map(|i| i + 7).unwrap_or(sql.len());
        let end = sql[start..].find(" ORDER BY ").map(|i| start + i).unwrap_or(sql.len());
        &sql[start..end]
    }

    #[test]
    fn guarded_to_one_chain_uses_left_joins() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogPosts", "filter=equals(author.userName,'ann')&fields[blogPosts]=caption");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert!(q.sql.contains("LEFT JOIN \"web_accounts\" t1 ON t1.\"id\" = t0.\"author_id\""), "{}", q.sql);
        assert_eq!(
            where_clause(&q.sql),
            "(t1.\"id\" IS NOT NULL AND t1.\"user_name\" = $1::text)"
        );
        assert_eq!(q.params, vec![crate::sql::PgBindValue::Text("ann".into())]);
    }

    #[test]
    fn count_of_through_collection_is_a_correlated_subquery() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogPosts", "sort=-count(labels)&fields[blogPosts]=caption");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert!(
            q.sql.contains(
                "ORDER BY (SELECT COUNT(*) FROM \"labels\" t1 JOIN \"post_labels\" t2 ON t2.\"label_id\" = t1.\"id\" WHERE t2.\"post_id\" = t0.\"id\") DESC NULLS LAST"
            ),
            "{}",
            q.sql
        );
    }

    #[test]
    fn has_filter_becomes_exists() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogs", "filter=has(posts,equals(caption,'x'))&fields[blogs]=title");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert_eq!(
            where_clause(&q.sql),
            "EXISTS (SELECT 1 FROM \"blog_posts\" t1 WHERE t1.\"blog_id\" = t0.\"id\" AND t1.\"caption\" = $1::text)"
        );
    }

    #[test]
    fn text_match_escapes_wildcards() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogs", "filter=startsWith(title,'50%25_')");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert!(where_clause(&q.sql).contains("t0.\"title\" LIKE $1::text ESCAPE '\\'"), "{}", q.sql);
        assert_eq!(q.params, vec![crate::sql::PgBindValue::Text("50\\%\\_%".into())]);
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogs", "filter=equals(platformName,null)");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert_eq!(where_clause(&q.sql), "t0.\"platform_name\" IS NULL");
        assert!(q.params.is_empty());
    }

    #[test]
    fn negation_treats_unknown_as_false() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogPosts", "filter=not(equals(caption,'x'))&fields[blogPosts]=caption");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert_eq!(where_clause(&q.sql), "NOT COALESCE(t0.\"caption\" = $1::text, FALSE)");
    }

    #[test]
    fn derived_type_queries_restrict_the_discriminator() {
        let graph = testing::vehicle_graph();
        let query = compiled(&graph, "cars", "");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert!(q.sql.contains("WHERE t0.\"discriminator\" IN ('cars')"), "{}", q.sql);
        assert!(q.sql.contains("COALESCE(t0.\"discriminator\", 'cars')"), "{}", q.sql);
    }

    #[test]
    fn included_collections_are_aggregated() {
        let graph = testing::blog_graph();
        let query = compiled(&graph, "blogs", "include=posts&fields[blogs]=title,posts&fields[blogPosts]=caption");
        let q = SqlQueryBuilder::new(&graph).select(&query).unwrap();
        assert!(q.sql.contains("'posts', (SELECT COALESCE(json_agg(sub.resource), '[]'::json) FROM (SELECT json_build_object('type', 'blogPosts'"), "{}", q.sql);
    }

    #[test]
    fn count_query_shares_filter_lowering() {
        let graph = testing::blog_graph();
        let blogs = graph.get_resource_type("blogs").unwrap();
        let filter = QueryableBuilder::new(&graph).compile_filter(&testing::parse_filter(&graph, "blogs", "equals(title,'a')"));
        let q = SqlQueryBuilder::new(&graph).count(blogs, Some(&filter)).unwrap();
        assert_eq!(q.sql, "SELECT COUNT(*) AS count FROM \"blogs\" t0 WHERE t0.\"title\" = $1::text");
    }

    #[test]
    fn rows_are_read_into_a_deduplicated_set() {
        let graph = testing::blog_graph();
        let author = json!({"type": "webAccounts", "id": "7", "attributes": {"userName": "ann"}, "relationships": {}});
        let rows = vec![
            json!({"type": "blogPosts", "id": "1", "attributes": {"caption": "a"}, "relationships": {"author": author}}),
            json!({"type": "blogPosts", "id": "2", "attributes": {"caption": "b"}, "relationships": {"author": author}}),
        ];
        let set = read_rows(&graph, &rows).unwrap();
        assert_eq!(set.primary().len(), 2);
        assert_eq!(set.len(), 3);
        let ann = set.find(&ResourceKey::new("webAccounts", 7)).unwrap();
        assert_eq!(set.node(ann).attributes.get("userName"), Some(&ScalarValue::from("ann")));
    }
}

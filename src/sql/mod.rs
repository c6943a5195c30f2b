//! Safe SQL building: identifiers come from configuration only, values are always parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;

use crate::value::ScalarValue;

/// Quote an identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Statement text plus its positional parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value and return its placeholder, cast to `cast` (e.g. `$3::bigint`).
    pub fn push_param(&mut self, value: &ScalarValue, cast: &str) -> String {
        self.params.push(PgBindValue::from_scalar(value));
        format!("${}::{}", self.params.len(), cast)
    }

    /// Register a value cast to its own runtime type. Null becomes a bare `NULL`.
    pub fn push_value(&mut self, value: &ScalarValue) -> String {
        match pg_cast_of(value) {
            Some(cast) => self.push_param(value, cast),
            None => "NULL".to_string(),
        }
    }

    /// Bind all parameters to a sqlx query over this statement.
    pub fn query(&self) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = query.bind(param.clone());
        }
        query
    }
}

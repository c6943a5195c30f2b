//! Bind values for PostgreSQL statements. Every value travels as text and is cast in SQL
//! (`$1::bigint`), so one parameter type covers all attribute types.

use crate::value::{AttrType, ScalarValue};
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Text(String),
}

impl PgBindValue {
    pub fn from_scalar(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Null => PgBindValue::Null,
            ScalarValue::Bool(b) => PgBindValue::Text(b.to_string()),
            ScalarValue::Integer(n) => PgBindValue::Text(n.to_string()),
            ScalarValue::Float(f) => PgBindValue::Text(f.to_string()),
            ScalarValue::Text(s) => PgBindValue::Text(s.clone()),
            ScalarValue::Uuid(u) => PgBindValue::Text(u.to_string()),
            ScalarValue::DateTime(d) => PgBindValue::Text(d.to_rfc3339()),
            ScalarValue::Date(d) => PgBindValue::Text(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<&str> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Text(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf)?,
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

/// SQL type a text parameter is cast to for the given attribute type.
pub fn pg_cast(ty: AttrType) -> &'static str {
    match ty {
        AttrType::String => "text",
        AttrType::Integer => "bigint",
        AttrType::Float => "double precision",
        AttrType::Boolean => "boolean",
        AttrType::Uuid => "uuid",
        AttrType::DateTime => "timestamptz",
        AttrType::Date => "date",
    }
}

/// Cast matching the runtime type of a value; `None` for null.
pub fn pg_cast_of(value: &ScalarValue) -> Option<&'static str> {
    Some(match value {
        ScalarValue::Null => return None,
        ScalarValue::Bool(_) => "boolean",
        ScalarValue::Integer(_) => "bigint",
        ScalarValue::Float(_) => "double precision",
        ScalarValue::Text(_) => "text",
        ScalarValue::Uuid(_) => "uuid",
        ScalarValue::DateTime(_) => "timestamptz",
        ScalarValue::Date(_) => "date",
    })
}

//! Typed scalar values for attributes, ids and query literals.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use uuid::Uuid;

/// Declared type of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    String,
    Integer,
    Float,
    Boolean,
    Uuid,
    DateTime,
    Date,
}

impl AttrType {
    /// Name used in conversion error messages.
    pub fn name(&self) -> &'static str {
        match self {
            AttrType::String => "String",
            AttrType::Integer => "Int64",
            AttrType::Float => "Double",
            AttrType::Boolean => "Boolean",
            AttrType::Uuid => "Guid",
            AttrType::DateTime => "DateTimeOffset",
            AttrType::Date => "DateOnly",
        }
    }

    /// Value substituted for a sort key whose navigation chain is broken by a missing link.
    /// Resources hitting it sort to the start of an ascending sequence.
    pub fn sentinel_min(&self) -> ScalarValue {
        match self {
            AttrType::String => ScalarValue::Text(String::new()),
            AttrType::Integer => ScalarValue::Integer(i64::MIN),
            AttrType::Float => ScalarValue::Float(f64::MIN),
            AttrType::Boolean => ScalarValue::Bool(false),
            AttrType::Uuid => ScalarValue::Uuid(Uuid::nil()),
            AttrType::DateTime => ScalarValue::DateTime(DateTime::<Utc>::MIN_UTC),
            AttrType::Date => ScalarValue::Date(NaiveDate::MIN),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, AttrType::String)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of a resource identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    #[default]
    Integer,
    Uuid,
    String,
}

impl IdType {
    pub fn attr_type(&self) -> AttrType {
        match self {
            IdType::Integer => AttrType::Integer,
            IdType::Uuid => AttrType::Uuid,
            IdType::String => AttrType::String,
        }
    }
}

/// A value could not be converted to the type of its target field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to convert '{value}' of type '{source_type}' to type '{target}'.")]
pub struct ConversionError {
    pub value: String,
    pub source_type: &'static str,
    pub target: AttrType,
}

impl ConversionError {
    fn new(value: impl Into<String>, source_type: &'static str, target: AttrType) -> Self {
        ConversionError {
            value: value.into(),
            source_type,
            target,
        }
    }
}

/// A primitive attribute or id value.
#[derive(Clone, Debug)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl ScalarValue {
    /// Convert query-string or id text into a value of the given type.
    pub fn parse_as(text: &str, ty: AttrType) -> Result<Self, ConversionError> {
        let err = || ConversionError::new(text, "String", ty);
        Ok(match ty {
            AttrType::String => ScalarValue::Text(text.to_string()),
            AttrType::Integer => ScalarValue::Integer(text.parse().map_err(|_| err())?),
            AttrType::Float => {
                let f: f64 = text.parse().map_err(|_| err())?;
                if !f.is_finite() {
                    return Err(err());
                }
                ScalarValue::Float(f)
            }
            AttrType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" => ScalarValue::Bool(true),
                "false" => ScalarValue::Bool(false),
                _ => return Err(err()),
            },
            AttrType::Uuid => ScalarValue::Uuid(Uuid::parse_str(text).map_err(|_| err())?),
            AttrType::DateTime => ScalarValue::DateTime(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|_| err())?
                    .with_timezone(&Utc),
            ),
            AttrType::Date => {
                ScalarValue::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| err())?)
            }
        })
    }

    /// Convert a JSON request value into a value of the given type. JSON null maps to `Null`.
    pub fn from_json(v: &Value, ty: AttrType) -> Result<Self, ConversionError> {
        let mismatch = || ConversionError::new(display_json(v), json_type_name(v), ty);
        match (v, ty) {
            (Value::Null, _) => Ok(ScalarValue::Null),
            (Value::Bool(b), AttrType::Boolean) => Ok(ScalarValue::Bool(*b)),
            (Value::Number(n), AttrType::Integer) => n.as_i64().map(ScalarValue::Integer).ok_or_else(mismatch),
            (Value::Number(n), AttrType::Float) => n.as_f64().map(ScalarValue::Float).ok_or_else(mismatch),
            (Value::String(s), AttrType::String) => Ok(ScalarValue::Text(s.clone())),
            (Value::String(s), AttrType::Uuid | AttrType::DateTime | AttrType::Date) => {
                ScalarValue::parse_as(s, ty).map_err(|_| mismatch())
            }
            _ => Err(mismatch()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Integer(n) => Value::Number((*n).into()),
            ScalarValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarValue::Text(s) => Value::String(s.clone()),
            ScalarValue::Uuid(u) => Value::String(u.to_string()),
            ScalarValue::DateTime(d) => Value::String(d.to_rfc3339()),
            ScalarValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::Null => "null",
            ScalarValue::Bool(_) => "Boolean",
            ScalarValue::Integer(_) => "Int64",
            ScalarValue::Float(_) => "Double",
            ScalarValue::Text(_) => "String",
            ScalarValue::Uuid(_) => "Guid",
            ScalarValue::DateTime(_) => "DateTimeOffset",
            ScalarValue::Date(_) => "DateOnly",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Integer(n) => Some(*n as f64),
            ScalarValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Whether both values can be ordered against each other (numbers mix, everything else must match).
    pub fn is_comparable_with(&self, other: &ScalarValue) -> bool {
        if self.is_null() || other.is_null() {
            return true;
        }
        (self.as_f64().is_some() && other.as_f64().is_some()) || self.rank() == other.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Bool(_) => 1,
            ScalarValue::Integer(_) | ScalarValue::Float(_) => 2,
            ScalarValue::Text(_) => 3,
            ScalarValue::Uuid(_) => 4,
            ScalarValue::DateTime(_) => 5,
            ScalarValue::Date(_) => 6,
        }
    }
}

/// Identity of a stored resource: concrete public type name plus id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: ScalarValue,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<ScalarValue>) -> Self {
        ResourceKey {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, id_to_string(&self.id))
    }
}

/// Wire form of an id: JSON:API ids are always strings.
pub fn id_to_string(id: &ScalarValue) -> String {
    match id {
        ScalarValue::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_f64() => "Double",
        Value::Number(_) => "Int64",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn display_json(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("null"),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Integer(n) => write!(f, "{}", n),
            ScalarValue::Float(x) => write!(f, "{}", x),
            ScalarValue::Text(s) => f.write_str(s),
            ScalarValue::Uuid(u) => write!(f, "{}", u),
            ScalarValue::DateTime(d) => f.write_str(&d.to_rfc3339()),
            ScalarValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    /// Null sorts first; integers and floats compare numerically; other mixed kinds order by kind.
    fn cmp(&self, other: &Self) -> Ordering {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => cmp_floats(*a, *b),
            (Integer(a), Float(b)) => cmp_integer_float(*a, *b),
            (Float(a), Integer(b)) => cmp_integer_float(*b, *a).reverse(),
            (Text(a), Text(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Total order on floats in which both zeros are equal.
fn cmp_floats(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Exact comparison; casting the integer to `f64` would round above 2^53.
fn cmp_integer_float(a: i64, b: f64) -> Ordering {
    // i64 range is [-2^63, 2^63).
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if b.is_nan() {
        return if b.is_sign_negative() { Ordering::Greater } else { Ordering::Less };
    }
    if b >= BOUND {
        return Ordering::Less;
    }
    if b < -BOUND {
        return Ordering::Greater;
    }
    let whole = b.trunc();
    match a.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(b - whole)).unwrap_or(Ordering::Equal),
        ordering => ordering,
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Bool(b) => b.hash(state),
            // Integers and floats that compare equal must hash equal.
            ScalarValue::Integer(n) => (*n as f64).to_bits().hash(state),
            ScalarValue::Float(x) => (if *x == 0.0 { 0.0f64 } else { *x }).to_bits().hash(state),
            ScalarValue::Text(s) => s.hash(state),
            ScalarValue::Uuid(u) => u.hash(state),
            ScalarValue::DateTime(d) => d.hash(state),
            ScalarValue::Date(d) => d.hash(state),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Text(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Text(s)
    }
}

impl From<i64> for ScalarValue {
    fn from(n: i64) -> Self {
        ScalarValue::Integer(n)
    }
}

impl From<i32> for ScalarValue {
    fn from(n: i32) -> Self {
        ScalarValue::Integer(n.into())
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Bool(b)
    }
}

impl From<Uuid> for ScalarValue {
    fn from(u: Uuid) -> Self {
        ScalarValue::Uuid(u)
    }
}

impl From<f64> for ScalarValue {
    fn from(x: f64) -> Self {
        ScalarValue::Float(x)
    }
}

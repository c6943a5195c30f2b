//! Case conversion for declared field names: public (wire) names follow the configured naming
//! convention, property names (used in validation messages) are PascalCase.

use serde::{Deserialize, Serialize};

/// Naming convention applied to declared names when exposing them on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerNaming {
    #[default]
    CamelCase,
    SnakeCase,
    AsDeclared,
}

impl SerializerNaming {
    pub fn apply(&self, name: &str) -> String {
        match self {
            SerializerNaming::CamelCase => to_camel_case(name),
            SerializerNaming::SnakeCase => to_snake_case(name),
            SerializerNaming::AsDeclared => name.to_string(),
        }
    }
}

/// Convert a single identifier from snake_case to camelCase.
/// e.g. "user_id" -> "userId", "created_at" -> "createdAt"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a single identifier from camelCase to snake_case.
/// e.g. "userId" -> "user_id", "createdAt" -> "created_at"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert an identifier in either convention to PascalCase.
/// e.g. "length_in_seconds" -> "LengthInSeconds", "title" -> "Title"
pub fn to_pascal_case(s: &str) -> String {
    let camel = to_camel_case(s);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_conventions() {
        assert_eq!(to_camel_case("length_in_seconds"), "lengthInSeconds");
        assert_eq!(to_camel_case("lengthInSeconds"), "lengthInSeconds");
        assert_eq!(to_camel_case("Title"), "title");
        assert_eq!(to_snake_case("lengthInSeconds"), "length_in_seconds");
        assert_eq!(to_snake_case("length_in_seconds"), "length_in_seconds");
        assert_eq!(to_pascal_case("length_in_seconds"), "LengthInSeconds");
        assert_eq!(to_pascal_case("title"), "Title");
    }

    #[test]
    fn naming_as_declared_is_identity() {
        assert_eq!(SerializerNaming::AsDeclared.apply("Some_Name"), "Some_Name");
        assert_eq!(SerializerNaming::SnakeCase.apply("someName"), "some_name");
    }
}

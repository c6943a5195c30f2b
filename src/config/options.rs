//! Global options (options.json plus `JSONAPI_*` environment overrides).

use crate::case::SerializerNaming;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonApiOptions {
    /// Path prefix for generated links, e.g. `/api`.
    pub namespace: Option<String>,
    pub default_page_size: Option<u32>,
    pub maximum_page_size: Option<u32>,
    pub maximum_page_number: Option<u32>,
    pub maximum_include_depth: Option<u32>,
    pub max_model_errors: usize,
    pub maximum_operations_per_request: Option<usize>,
    pub include_total_resource_count: bool,
    pub use_relative_links: bool,
    /// Skip query string parameters the reader does not recognise instead of rejecting them.
    pub allow_unknown_query_string_parameters: bool,
    pub serializer_naming: SerializerNaming,
}

impl Default for JsonApiOptions {
    fn default() -> Self {
        JsonApiOptions {
            namespace: None,
            default_page_size: Some(10),
            maximum_page_size: Some(100),
            maximum_page_number: None,
            maximum_include_depth: None,
            max_model_errors: 200,
            maximum_operations_per_request: Some(10),
            include_total_resource_count: false,
            use_relative_links: false,
            allow_unknown_query_string_parameters: false,
            serializer_naming: SerializerNaming::default(),
        }
    }
}

impl JsonApiOptions {
    /// Apply `JSONAPI_*` variables from the process environment (after `dotenvy::dotenv()`).
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, so tests need not touch the process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("JSONAPI_NAMESPACE") {
            self.namespace = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("JSONAPI_DEFAULT_PAGE_SIZE") {
            self.default_page_size = parse_optional_limit("JSONAPI_DEFAULT_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_MAXIMUM_PAGE_SIZE") {
            self.maximum_page_size = parse_optional_limit("JSONAPI_MAXIMUM_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_MAXIMUM_PAGE_NUMBER") {
            self.maximum_page_number = parse_optional_limit("JSONAPI_MAXIMUM_PAGE_NUMBER", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_MAXIMUM_INCLUDE_DEPTH") {
            self.maximum_include_depth = parse_optional_limit("JSONAPI_MAXIMUM_INCLUDE_DEPTH", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_MAX_MODEL_ERRORS") {
            self.max_model_errors = v
                .parse()
                .map_err(|_| ConfigError::InvalidOption(format!("JSONAPI_MAX_MODEL_ERRORS: '{}' is not a number", v)))?;
        }
        if let Some(v) = lookup("JSONAPI_MAXIMUM_OPERATIONS_PER_REQUEST") {
            self.maximum_operations_per_request =
                parse_optional_limit("JSONAPI_MAXIMUM_OPERATIONS_PER_REQUEST", &v)?.map(|n| n as usize);
        }
        if let Some(v) = lookup("JSONAPI_INCLUDE_TOTAL_RESOURCE_COUNT") {
            self.include_total_resource_count = parse_bool("JSONAPI_INCLUDE_TOTAL_RESOURCE_COUNT", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_USE_RELATIVE_LINKS") {
            self.use_relative_links = parse_bool("JSONAPI_USE_RELATIVE_LINKS", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_ALLOW_UNKNOWN_QUERY_STRING_PARAMETERS") {
            self.allow_unknown_query_string_parameters = parse_bool("JSONAPI_ALLOW_UNKNOWN_QUERY_STRING_PARAMETERS", &v)?;
        }
        if let Some(v) = lookup("JSONAPI_SERIALIZER_NAMING") {
            self.serializer_naming = serde_json::from_value(serde_json::Value::String(v.clone()))
                .map_err(|_| ConfigError::InvalidOption(format!("JSONAPI_SERIALIZER_NAMING: unknown naming '{}'", v)))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_size == Some(0) || self.maximum_page_size == Some(0) {
            return Err(ConfigError::InvalidOption("page sizes must be positive".into()));
        }
        if let (Some(default), Some(max)) = (self.default_page_size, self.maximum_page_size) {
            if default > max {
                return Err(ConfigError::InvalidOption(format!(
                    "default_page_size ({}) exceeds maximum_page_size ({})",
                    default, max
                )));
            }
        }
        if self.max_model_errors == 0 {
            return Err(ConfigError::InvalidOption("max_model_errors must be positive".into()));
        }
        Ok(())
    }
}

/// Empty or `none` clears the limit.
fn parse_optional_limit(key: &str, v: &str) -> Result<Option<u32>, ConfigError> {
    if v.is_empty() || v.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    v.parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidOption(format!("{}: '{}' is not a number", key, v)))
}

fn parse_bool(key: &str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidOption(format!("{}: '{}' is not a boolean", key, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_replace_defaults() {
        let env: HashMap<&str, &str> = [
            ("JSONAPI_DEFAULT_PAGE_SIZE", "25"),
            ("JSONAPI_MAXIMUM_PAGE_SIZE", "none"),
            ("JSONAPI_INCLUDE_TOTAL_RESOURCE_COUNT", "true"),
            ("JSONAPI_SERIALIZER_NAMING", "snake_case"),
        ]
        .into_iter()
        .collect();
        let options = JsonApiOptions::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(options.default_page_size, Some(25));
        assert_eq!(options.maximum_page_size, None);
        assert!(options.include_total_resource_count);
        assert_eq!(options.serializer_naming, SerializerNaming::SnakeCase);
        assert_eq!(options.max_model_errors, 200);
    }

    #[test]
    fn default_page_size_above_maximum_is_rejected() {
        let err = JsonApiOptions::default()
            .with_overrides(|k| (k == "JSONAPI_DEFAULT_PAGE_SIZE").then(|| "500".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption(_)));
    }

    #[test]
    fn options_json_fills_missing_fields_with_defaults() {
        let options: JsonApiOptions = serde_json::from_str(r#"{ "namespace": "/api" }"#).unwrap();
        assert_eq!(options.namespace.as_deref(), Some("/api"));
        assert_eq!(options.maximum_operations_per_request, Some(10));
    }
}

//! Attribute validation from declared rules, and the bounded error list of a batch.

use super::request::{OperationContainer, OperationKind};
use crate::config::ValidationRule;
use crate::error::{ConfigError, ErrorObject};
use crate::graph::{AttrAttribute, ResourceGraph};
use crate::value::ScalarValue;
use axum::http::StatusCode;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

const VALIDATION_FAILED: &str = "Input validation failed.";
const MAX_ERRORS_REACHED: &str = "The maximum number of allowed model errors has been reached.";

/// Errors of a request, capped at `max_model_errors`. Once the cap is hit a synthetic error is put
/// in front and everything after it is dropped.
#[derive(Debug)]
pub struct ErrorCollector {
    max: usize,
    errors: Vec<ErrorObject>,
    reached: bool,
}

impl ErrorCollector {
    pub fn new(max: usize) -> Self {
        ErrorCollector {
            max,
            errors: Vec::new(),
            reached: false,
        }
    }

    pub fn push(&mut self, error: ErrorObject) {
        if self.reached {
            return;
        }
        if self.errors.len() >= self.max {
            self.reached = true;
            self.errors
                .insert(0, ErrorObject::new(StatusCode::UNPROCESSABLE_ENTITY, VALIDATION_FAILED).with_detail(MAX_ERRORS_REACHED));
            return;
        }
        self.errors.push(error);
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = ErrorObject>) {
        for error in errors {
            self.push(error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn into_errors(self) -> Vec<ErrorObject> {
        self.errors
    }
}

/// Checks attribute values of create and update operations against their `ValidationRule`s.
/// Patterns are compiled once, when the validator is built.
pub struct RequestValidator {
    patterns: HashMap<(String, String), Regex>,
}

impl RequestValidator {
    pub fn new(graph: &ResourceGraph) -> Result<Self, ConfigError> {
        let mut patterns = HashMap::new();
        for resource_type in graph.resource_types() {
            for attribute in &resource_type.attributes {
                if let Some(pattern) = &attribute.validation.pattern {
                    let regex = Regex::new(pattern).map_err(|e| {
                        ConfigError::Validation(format!(
                            "invalid pattern on '{}.{}': {}",
                            resource_type.public_name, attribute.public_name, e
                        ))
                    })?;
                    patterns.insert((resource_type.public_name.clone(), attribute.public_name.clone()), regex);
                }
            }
        }
        Ok(RequestValidator { patterns })
    }

    /// Creates must carry every required attribute; updates are checked for the attributes they send.
    pub fn validate(&self, operation: &OperationContainer, errors: &mut ErrorCollector) {
        let resource_type = operation.resource_type();
        let pointer = |name: &str| format!("{}/data/attributes/{}", operation.pointer(), name);
        match operation.kind {
            OperationKind::AddResource => {
                for attribute in resource_type.value_attributes() {
                    match operation.attributes.get(&attribute.public_name) {
                        Some(value) => self.validate_value(&resource_type.public_name, attribute, value, &pointer(&attribute.public_name), errors),
                        None if attribute.validation.is_required() => errors.push(required(attribute, pointer(&attribute.public_name))),
                        None => {}
                    }
                }
            }
            OperationKind::UpdateResource => {
                for (name, value) in &operation.attributes {
                    if let Some(attribute) = resource_type.find_attribute(name) {
                        self.validate_value(&resource_type.public_name, attribute, value, &pointer(name), errors);
                    }
                }
            }
            _ => {}
        }
    }

    fn validate_value(&self, type_name: &str, attribute: &AttrAttribute, value: &ScalarValue, pointer: &str, errors: &mut ErrorCollector) {
        let rule = &attribute.validation;
        if value.is_null() {
            if rule.is_required() || !attribute.nullable {
                errors.push(required(attribute, pointer.to_string()));
            }
            return;
        }
        let property = &attribute.property_name;
        let mut fail = |detail: String| {
            errors.push(
                ErrorObject::new(StatusCode::UNPROCESSABLE_ENTITY, VALIDATION_FAILED)
                    .with_detail(detail)
                    .with_pointer(pointer),
            )
        };

        if let Some(text) = value.as_text() {
            let length = text.chars().count();
            if let Some(max) = rule.max_length {
                if length > max as usize {
                    fail(format!("The field {} must be a string with a maximum length of {}.", property, max));
                }
            }
            if let Some(min) = rule.min_length {
                if length < min as usize {
                    fail(format!("The field {} must be a string with a minimum length of {}.", property, min));
                }
            }
            if let Some(regex) = self.patterns.get(&(type_name.to_string(), attribute.public_name.clone())) {
                if !regex.is_match(text) {
                    fail(format!("The field {} must match the regular expression '{}'.", property, regex.as_str()));
                }
            }
            if let Some(format) = &rule.format {
                if let Some(detail) = check_format(property, text, format) {
                    fail(detail);
                }
            }
        }
        if let Some(allowed) = &rule.allowed {
            let json = value.to_json();
            if !allowed.iter().any(|a| value_eq(&json, a)) {
                let listed: Vec<String> = allowed.iter().take(5).map(display_allowed).collect();
                fail(format!("The field {} must be one of: {}.", property, listed.join(", ")));
            }
        }
        if let Some(number) = value.as_f64() {
            if let Some(detail) = range_violation(property, number, rule) {
                fail(detail);
            }
        }
    }
}

fn required(attribute: &AttrAttribute, pointer: String) -> ErrorObject {
    ErrorObject::new(StatusCode::UNPROCESSABLE_ENTITY, VALIDATION_FAILED)
        .with_detail(format!("The {} field is required.", attribute.property_name))
        .with_pointer(pointer)
}

fn range_violation(property: &str, number: f64, rule: &ValidationRule) -> Option<String> {
    match (rule.minimum, rule.maximum) {
        (Some(min), Some(max)) if number < min || number > max => {
            Some(format!("The field {} must be between {} and {}.", property, min, max))
        }
        (Some(min), None) if number < min => Some(format!("The field {} must be at least {}.", property, min)),
        (None, Some(max)) if number > max => Some(format!("The field {} must be at most {}.", property, max)),
        _ => None,
    }
}

fn check_format(property: &str, text: &str, format: &str) -> Option<String> {
    match format.to_lowercase().as_str() {
        "email" if !text.contains('@') || text.len() < 3 => {
            Some(format!("The {} field is not a valid e-mail address.", property))
        }
        "uuid" if uuid::Uuid::parse_str(text).is_err() => Some(format!("The {} field is not a valid UUID.", property)),
        _ => None,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn display_allowed(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Typed errors, JSON:API error objects and HTTP mapping.

use crate::value::ConversionError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Resource graph or options inconsistency. Detected at startup; never rendered per request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate resource type: {0}")]
    DuplicateResourceType(String),
    #[error("duplicate field '{field}' on resource type '{resource}'")]
    DuplicateField { resource: String, field: String },
    #[error("invalid inverse for relationship '{relationship}' on '{resource}': {reason}")]
    InvalidInverse {
        resource: String,
        relationship: String,
        reason: String,
    },
    #[error("resource type '{0}' is not part of the resource graph")]
    UnknownResourceType(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// A query string parameter value that failed to parse or resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParseError {
    /// Query string parameter name, e.g. `sort` or `filter[posts]`.
    pub parameter: String,
    pub message: String,
    /// Zero-based character offset into `text`.
    pub position: usize,
    /// The parameter value that was being parsed.
    pub text: String,
}

impl QueryParseError {
    pub fn new(parameter: impl Into<String>, text: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        QueryParseError {
            parameter: parameter.into(),
            message: message.into(),
            position,
            text: text.into(),
        }
    }

    /// The parsed text with a caret inserted before the offending character.
    pub fn caret_text(&self) -> String {
        caret_text(&self.text, self.position)
    }

    /// A parameter-level error (unknown or repeated parameter) carries no text to point into.
    pub fn for_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        QueryParseError::new(parameter, String::new(), 0, message)
    }

    /// Error title: `The specified filter is invalid.` for `filter[posts]`.
    pub fn title(&self) -> String {
        let name = self.parameter.split('[').next().unwrap_or(&self.parameter);
        let kind = match name {
            "filter" | "sort" | "include" => name,
            "fields" => "fieldset",
            "page" => "pagination parameter",
            _ => return "Unknown query string parameter.".to_string(),
        };
        format!("The specified {} is invalid.", kind)
    }
}

impl fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() && self.position == 0 {
            return f.write_str(&self.message);
        }
        write!(
            f,
            "{} Failed at position {}: {}",
            self.message,
            self.position + 1,
            caret_text(&self.text, self.position)
        )
    }
}

impl std::error::Error for QueryParseError {}

fn caret_text(text: &str, position: usize) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    let mut inserted = false;
    for (i, c) in text.chars().enumerate() {
        if i == position {
            out.push('^');
            inserted = true;
        }
        out.push(c);
    }
    if !inserted {
        out.push('^');
    }
    out
}

/// Failure while executing a compiled in-memory query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("navigation through '{path}' encountered a missing link")]
    NullReference { path: String },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("function '{function}' cannot be applied to a value of type '{type_name}'")]
    IncompatibleOperand { function: &'static str, type_name: &'static str },
}

/// `source` member of an error object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// One element of a JSON:API `errors` array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ErrorObject {
    pub fn new(status: StatusCode, title: impl Into<String>) -> Self {
        ErrorObject {
            id: None,
            status: status.as_u16().to_string(),
            title: title.into(),
            detail: None,
            source: None,
            meta: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.source = Some(ErrorSource {
            pointer: Some(pointer.into()),
            parameter: None,
        });
        self
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.source = Some(ErrorSource {
            pointer: None,
            parameter: Some(parameter.into()),
        });
        self
    }

    pub fn pointer(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.pointer.as_deref())
    }

    pub fn parameter(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.parameter.as_deref())
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
            .parse::<u16>()
            .ok()
            .and_then(|n| StatusCode::from_u16(n).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Status for a document holding several errors: shared status if all agree,
    /// otherwise the most general class (400 or 500).
    pub fn aggregate_status(errors: &[ErrorObject]) -> StatusCode {
        let mut statuses = errors.iter().map(ErrorObject::status_code);
        let Some(first) = statuses.next() else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        let mut any_server = first.is_server_error();
        let mut same = true;
        for s in statuses {
            same &= s == first;
            any_server |= s.is_server_error();
        }
        if same {
            first
        } else if any_server {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid query string: {}", .0.first().map(ToString::to_string).unwrap_or_default())]
    QueryParse(Vec<QueryParseError>),
    #[error("validation failed with {} error(s)", .0.len())]
    Validation(Vec<ErrorObject>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {detail}")]
    Conflict { title: String, detail: String },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("bad request: {detail}")]
    BadRequest { title: String, detail: String },
    #[error("forbidden: {detail}")]
    Forbidden { title: String, detail: String },
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store: {0}")]
    Store(String),
    #[error("the request was canceled")]
    Cancelled,
    /// An error raised while processing the element at `pointer` (e.g. one atomic operation).
    #[error("{error} (at {pointer})")]
    Pointed { pointer: String, error: Box<AppError> },
}

impl AppError {
    pub fn bad_request(title: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::BadRequest {
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn conflict(title: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::Conflict {
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn forbidden(title: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::Forbidden {
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn resource_not_found(type_name: &str, id: &str) -> Self {
        AppError::NotFound(format!(
            "Resource of type '{}' with ID '{}' does not exist.",
            type_name, id
        ))
    }

    pub fn at_pointer(self, pointer: impl Into<String>) -> Self {
        AppError::Pointed {
            pointer: pointer.into(),
            error: Box::new(self),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::QueryParse(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(errors) => ErrorObject::aggregate_status(errors),
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Conversion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::Eval(EvalError::NullReference { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Eval(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Db(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            AppError::Pointed { error, .. } => error.status(),
        }
    }

    /// Render as elements of a JSON:API `errors` array.
    pub fn to_error_objects(&self) -> Vec<ErrorObject> {
        let status = self.status();
        match self {
            AppError::QueryParse(errors) => errors
                .iter()
                .map(|e| {
                    ErrorObject::new(status, e.title())
                        .with_detail(e.to_string())
                        .with_parameter(e.parameter.clone())
                })
                .collect(),
            AppError::Validation(errors) => errors.clone(),
            AppError::NotFound(detail) => {
                vec![ErrorObject::new(status, "The requested resource does not exist.").with_detail(detail.clone())]
            }
            AppError::Conflict { title, detail }
            | AppError::BadRequest { title, detail }
            | AppError::Forbidden { title, detail } => {
                vec![ErrorObject::new(status, title.clone()).with_detail(detail.clone())]
            }
            AppError::Conversion(e) => {
                vec![ErrorObject::new(status, "Failed to convert value.").with_detail(e.to_string())]
            }
            AppError::Eval(EvalError::Conversion(e)) => {
                vec![ErrorObject::new(status, "Failed to convert value.").with_detail(e.to_string())]
            }
            AppError::Eval(e @ EvalError::IncompatibleOperand { .. }) => {
                vec![ErrorObject::new(status, "Failed to convert value.").with_detail(e.to_string())]
            }
            AppError::Cancelled => vec![ErrorObject::new(status, "The request was canceled.")],
            AppError::Pointed { pointer, error } => error
                .to_error_objects()
                .into_iter()
                .map(|mut e| {
                    if e.pointer().is_none() {
                        e = e.with_pointer(pointer.clone());
                    }
                    e
                })
                .collect(),
            AppError::Config(_) | AppError::Eval(_) | AppError::Db(_) | AppError::Store(_) => {
                vec![ErrorObject::new(status, "An unhandled error occurred while processing this request.")
                    .with_detail(self.to_string())]
            }
        }
    }
}

#[derive(Serialize)]
pub struct ErrorDocument {
    pub errors: Vec<ErrorObject>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorDocument {
            errors: self.to_error_objects(),
        };
        (
            status,
            [(header::CONTENT_TYPE, crate::response::MEDIA_TYPE)],
            Json(body),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_marks_offending_position() {
        let err = QueryParseError::new("sort", "caption,foo", 8, "Field 'foo' does not exist on resource type 'blogPosts'.");
        assert_eq!(
            err.to_string(),
            "Field 'foo' does not exist on resource type 'blogPosts'. Failed at position 9: caption,^foo"
        );
    }

    #[test]
    fn caret_at_end_of_text() {
        let err = QueryParseError::new("filter", "equals(", 7, "Field name expected.");
        assert_eq!(err.caret_text(), "equals(^");
    }

    #[test]
    fn query_errors_render_with_parameter_source() {
        let err = AppError::QueryParse(vec![QueryParseError::new("filter[posts]", "x", 0, "Bad.")]);
        let objects = err.to_error_objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].status, "400");
        assert_eq!(objects[0].title, "The specified filter is invalid.");
        assert_eq!(
            objects[0].source.as_ref().and_then(|s| s.parameter.as_deref()),
            Some("filter[posts]")
        );
    }

    #[test]
    fn unknown_parameter_has_dedicated_title() {
        let err = QueryParseError::for_parameter("foo", "Query string parameter 'foo' is unknown.");
        assert_eq!(err.to_string(), "Query string parameter 'foo' is unknown.");
        assert_eq!(err.title(), "Unknown query string parameter.");
    }

    #[test]
    fn pointed_error_keeps_inner_pointer() {
        let inner = AppError::resource_not_found("tracks", "5").at_pointer("/atomic:operations[2]");
        let objects = inner.to_error_objects();
        assert_eq!(objects[0].pointer(), Some("/atomic:operations[2]"));
        assert_eq!(inner.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn mixed_statuses_aggregate_to_bad_request() {
        let errors = vec![
            ErrorObject::new(StatusCode::UNPROCESSABLE_ENTITY, "a"),
            ErrorObject::new(StatusCode::CONFLICT, "b"),
        ];
        assert_eq!(ErrorObject::aggregate_status(&errors), StatusCode::BAD_REQUEST);
    }
}

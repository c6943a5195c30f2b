//! JSON:API response helpers.

use crate::serialization::{Document, JsonApiObject, ATOMIC_EXTENSION};
use crate::atomic::AtomicResultsDocument;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const MEDIA_TYPE: &str = "application/vnd.api+json";
/// Media type of atomic operation responses.
pub const ATOMIC_MEDIA_TYPE: &str = "application/vnd.api+json; ext=\"https://jsonapi.org/ext/atomic\"";

pub fn document(status: StatusCode, body: Document) -> Response {
    with_media_type(status, MEDIA_TYPE, body)
}

pub fn atomic_results(results: AtomicResultsDocument) -> Response {
    if results.results.iter().all(|r| r.data.is_none()) {
        return StatusCode::NO_CONTENT.into_response();
    }
    let body = Document {
        jsonapi: Some(JsonApiObject {
            ext: vec![ATOMIC_EXTENSION.to_string()],
            ..Default::default()
        }),
        atomic_results: Some(results.results),
        ..Default::default()
    };
    with_media_type(StatusCode::OK, ATOMIC_MEDIA_TYPE, body)
}

fn with_media_type<T: Serialize>(status: StatusCode, media_type: &'static str, body: T) -> Response {
    (status, [(header::CONTENT_TYPE, media_type)], Json(body)).into_response()
}

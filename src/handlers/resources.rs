//! Thin axum handlers: extract path, query and body, call the service, render the document.

use crate::error::AppError;
use crate::response;
use crate::service::RequestOrigin;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// `http://{host}` of the incoming request, when it names one.
fn base_url(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{}://{}", scheme, host))
}

/// Token cancelled when the handler future is dropped, e.g. on client disconnect.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

pub async fn get_resources(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (cancel, _guard) = request_token();
    let base = base_url(&headers);
    let origin = RequestOrigin {
        base_url: base.as_deref(),
        raw_query: query.as_deref(),
    };
    let document = state.service.get_resources(&resource_type, origin, &cancel).await?;
    Ok(response::document(StatusCode::OK, document))
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (cancel, _guard) = request_token();
    let base = base_url(&headers);
    let origin = RequestOrigin {
        base_url: base.as_deref(),
        raw_query: query.as_deref(),
    };
    let document = state.service.get_resource(&resource_type, &id, origin, &cancel).await?;
    Ok(response::document(StatusCode::OK, document))
}

pub async fn get_secondary(
    State(state): State<AppState>,
    Path((resource_type, id, relationship)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (cancel, _guard) = request_token();
    let base = base_url(&headers);
    let origin = RequestOrigin {
        base_url: base.as_deref(),
        raw_query: query.as_deref(),
    };
    let document = state
        .service
        .get_secondary(&resource_type, &id, &relationship, origin, &cancel)
        .await?;
    Ok(response::document(StatusCode::OK, document))
}

pub async fn post_operations(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, AppError> {
    let (cancel, _guard) = request_token();
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request("Failed to deserialize request body.", e.to_string()))?;
    let base = base_url(&headers);
    let origin = RequestOrigin {
        base_url: base.as_deref(),
        raw_query: None,
    };
    let results = state.service.execute_atomic_batch(&body, origin, &cancel).await?;
    Ok(response::atomic_results(results))
}

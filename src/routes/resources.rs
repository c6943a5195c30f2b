//! JSON:API routes, nested under the configured namespace.

use crate::handlers::resources::{get_resource, get_resources, get_secondary, post_operations};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

pub fn jsonapi_routes(state: AppState) -> Router {
    jsonapi_routes_with_limit(state, DEFAULT_BODY_LIMIT)
}

pub fn jsonapi_routes_with_limit(state: AppState, body_limit: usize) -> Router {
    let namespace = state
        .service
        .context()
        .options
        .namespace
        .as_deref()
        .map(|n| format!("/{}", n.trim_matches('/')))
        .filter(|n| n.len() > 1);

    let routes = Router::new()
        .route("/operations", post(post_operations))
        .route("/:resource_type", get(get_resources))
        .route("/:resource_type/:id", get(get_resource))
        .route("/:resource_type/:id/:relationship", get(get_secondary))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state);

    match namespace {
        Some(namespace) => Router::new().nest(&namespace, routes),
        None => routes,
    }
}

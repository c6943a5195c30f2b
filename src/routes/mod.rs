//! Route builders.

pub mod common;
pub mod resources;

pub use common::common_routes;
pub use resources::{jsonapi_routes, jsonapi_routes_with_limit, DEFAULT_BODY_LIMIT};

//! Shared application state for all routes.

use crate::service::JsonApiService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JsonApiService>,
}

impl AppState {
    pub fn new(service: JsonApiService) -> Self {
        AppState {
            service: Arc::new(service),
        }
    }
}

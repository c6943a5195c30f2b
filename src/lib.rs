//! JSON:API SDK: resource graph, query string pipeline, expression compilation, atomic
//! operations and document serialization behind an axum HTTP surface.

pub mod atomic;
pub mod case;
pub mod compile;
pub mod config;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod queries;
pub mod query;
pub mod response;
pub mod routes;
pub mod serialization;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod value;

#[doc(hidden)]
pub mod testing;

pub use atomic::{AtomicOperationsProcessor, AtomicResultsDocument, OperationKind};
pub use config::{load_from_path, load_from_str, resolve, FullConfig, JsonApiOptions};
pub use error::{AppError, ConfigError, ErrorObject};
pub use graph::{ResourceGraph, ResourceGraphBuilder, ResourceType};
pub use queries::{QueryLayer, ResourceDefinition, ResourceDefinitionRegistry};
pub use routes::{common_routes, jsonapi_routes};
pub use serialization::{Document, ResponseModelAdapter};
pub use service::{JsonApiContext, JsonApiService, RequestOrigin};
pub use state::AppState;
pub use store::{InMemoryStore, PgStore, ResourceStore};
pub use value::{ResourceKey, ScalarValue};

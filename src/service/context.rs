//! Request-independent state every component reads: the resource graph, options, resource
//! definitions and the compiled attribute validator. Built once at startup, shared by `Arc`.

use crate::atomic::RequestValidator;
use crate::config::{self, FullConfig, JsonApiOptions};
use crate::error::ConfigError;
use crate::graph::ResourceGraph;
use crate::queries::ResourceDefinitionRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct JsonApiContext {
    pub graph: Arc<ResourceGraph>,
    pub options: Arc<JsonApiOptions>,
    pub definitions: Arc<ResourceDefinitionRegistry>,
    pub validator: Arc<RequestValidator>,
}

impl JsonApiContext {
    pub fn new(
        graph: ResourceGraph,
        options: JsonApiOptions,
        definitions: ResourceDefinitionRegistry,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let validator = RequestValidator::new(&graph)?;
        tracing::info!(resource_types = graph.resource_types().len(), "json:api context ready");
        Ok(JsonApiContext {
            graph: Arc::new(graph),
            options: Arc::new(options),
            definitions: Arc::new(definitions),
            validator: Arc::new(validator),
        })
    }

    /// Resolve loaded configuration into a context.
    pub fn from_config(full: &FullConfig, definitions: ResourceDefinitionRegistry) -> Result<Self, ConfigError> {
        let graph = config::resolve(full)?;
        Self::new(graph, full.options.clone(), definitions)
    }
}

impl std::fmt::Debug for JsonApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonApiContext")
            .field("resource_types", &self.graph.resource_types().len())
            .field("options", &self.options)
            .field("definitions", &self.definitions)
            .finish()
    }
}

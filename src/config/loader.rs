//! Load resource declarations and options from disk, then resolve them into a resource graph.

use crate::config::{JsonApiOptions, ResourceConfig};
use crate::error::ConfigError;
use crate::graph::{ResourceGraph, ResourceGraphBuilder};
use std::path::Path;

/// Everything read from a config directory or file.
#[derive(Clone, Debug, Default)]
pub struct FullConfig {
    pub resources: Vec<ResourceConfig>,
    pub options: JsonApiOptions,
}

/// Build the resource graph from full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<ResourceGraph, ConfigError> {
    config.options.validate()?;
    ResourceGraphBuilder::from_config(&config.resources, config.options.serializer_naming).build()
}

/// Load config from `path`: either a directory holding `resources.json` and an optional
/// `options.json`, or a single file with `{ "resources": [...], "options": {...} }`.
/// Options are then overridden from `JSONAPI_*` environment variables.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let mut config = if path.is_dir() {
        let resources: Vec<ResourceConfig> = read_json(&path.join("resources.json"))?;
        let options_path = path.join("options.json");
        let options = if options_path.exists() {
            read_json(&options_path)?
        } else {
            JsonApiOptions::default()
        };
        FullConfig { resources, options }
    } else {
        let doc: ConfigDocument = read_json(path)?;
        FullConfig {
            resources: doc.resources,
            options: doc.options,
        }
    };
    config.options = config.options.with_env_overrides()?;
    tracing::info!(
        path = %path.display(),
        resources = config.resources.len(),
        "loaded resource configuration"
    );
    Ok(config)
}

/// Parse a single config document from a string (same shape as the single-file form).
pub fn load_from_str(raw: &str) -> Result<FullConfig, ConfigError> {
    let doc: ConfigDocument = serde_json::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))?;
    Ok(FullConfig {
        resources: doc.resources,
        options: doc.options,
    })
}

#[derive(serde::Deserialize)]
struct ConfigDocument {
    resources: Vec<ResourceConfig>,
    #[serde(default)]
    options: JsonApiOptions,
}

fn read_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_single_document() {
        let config = load_from_str(
            r#"{
                "resources": [
                    { "name": "people", "attributes": [{ "name": "display_name", "type": "string" }],
                      "relationships": [{ "name": "pets", "kind": "has_many", "target": "pets", "foreign_key": "owner_id" }] },
                    { "name": "pets", "relationships": [{ "name": "owner", "kind": "has_one", "target": "people", "foreign_key": "owner_id" }] }
                ],
                "options": { "default_page_size": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.options.default_page_size, Some(5));
        let graph = resolve(&config).unwrap();
        let people = graph.get_resource_type("people").unwrap();
        assert!(people.find_attribute("displayName").is_some());
        assert_eq!(
            people.find_relationship("pets").unwrap().inverse_navigation.as_deref(),
            Some("owner")
        );
    }

    #[test]
    fn malformed_document_is_load_error() {
        assert!(matches!(load_from_str("{ nope"), Err(ConfigError::Load(_))));
    }
}

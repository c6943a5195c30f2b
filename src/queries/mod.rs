//! Query layers: the provider-neutral plan built from parsed constraints.

pub mod composer;
pub mod definition;
pub mod include_converter;
pub mod query_layer;

pub use composer::QueryLayerComposer;
pub use definition::{ResourceDefinition, ResourceDefinitionRegistry, WriteOperationKind};
pub use include_converter::QueryLayerIncludeConverter;
pub use query_layer::{FieldSelection, FieldSelectors, QueryLayer, SelectedField, TopFieldSelection};

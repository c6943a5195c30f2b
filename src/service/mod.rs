//! Service façade: shared context plus the read and atomic write entry points.

mod context;
mod resources;

pub use context::JsonApiContext;
pub use resources::{JsonApiService, PreparedQuery, RequestOrigin};

//! HTTP handlers for the resource endpoints and atomic operations.

pub mod resources;
pub use resources::*;

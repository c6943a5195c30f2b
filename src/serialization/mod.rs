//! Response side: wire objects, links and the resource-graph-to-document adapter.

pub mod adapter;
pub mod links;
pub mod objects;

pub use adapter::{PrimaryNodes, ResponseModelAdapter};
pub use links::LinkBuilder;
pub use objects::*;

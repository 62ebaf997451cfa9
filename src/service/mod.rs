//! Resource handler template and the hooks concrete resources implement.

mod handler;
pub mod hooks;
pub mod query;
mod validation;
pub use handler::{nested_keys, touched_keys, Envelope, ResourceHandler};
pub use hooks::{JunctionProperty, Payload, ResourceHooks, TagProperty};
pub use query::ItemQuery;
pub use validation::{normalize_geometry, RequestValidator};

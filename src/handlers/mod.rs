//! HTTP handlers for resource CRUD, tags, relations and GeoJSON import.

pub mod resource;
pub use resource::*;

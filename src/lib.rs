//! Geodata SDK: catalog-driven data access for a spatial-source REST backend on PostgreSQL/PostGIS.
//!
//! The [`catalog::Catalog`] introspects the configured schema once; [`table::Table`] turns property
//! maps into parameterized SQL; [`service::ResourceHandler`] runs the create/read/update/delete
//! lifecycle of one resource inside a [`tx::TxContext`], with per-resource behavior plugged in
//! through [`service::ResourceHooks`].

pub mod case;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extractors;
pub mod geojson;
pub mod handlers;
pub mod patch;
pub mod relation;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod table;
pub mod tx;

pub use catalog::Catalog;
pub use config::{Settings, TableId};
pub use error::{AppError, CatalogError};
pub use extractors::ProcessId;
pub use patch::UpdateDocument;
pub use relation::{EntityKind, RelationManager};
pub use response::ItemResponse;
pub use routes::{common_routes, common_routes_with_ready, resource_routes};
pub use service::{Envelope, ItemQuery, JunctionProperty, Payload, ResourceHandler, ResourceHooks, TagProperty};
pub use state::AppState;
pub use store::{ensure_database_exists, ensure_tables};
pub use table::{Record, Table};
pub use tx::{QueryExecutor, TransactionManager, TxContext, TxScope, TxState};

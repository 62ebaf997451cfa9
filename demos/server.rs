//! Minimal server: one spatial-source resource with GeoJSON output and no relations.
//!
//! `DATABASE_URL=postgres://localhost/geodata cargo run --example server`

use async_trait::async_trait;
use axum::Router;
use geodata_sdk::geojson::{to_feature, to_feature_collection, DEFAULT_GEOMETRY_KEY};
use geodata_sdk::{
    common_routes, ensure_database_exists, ensure_tables, resource_routes, AppState, EntityKind, Payload, ResourceHandler,
    ResourceHooks, Settings, TableId,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

struct Sources;

#[async_trait]
impl ResourceHooks for Sources {
    fn table_id(&self) -> TableId {
        TableId::SpatialSource
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SpatialSource
    }

    fn geometry_key(&self) -> Option<&'static str> {
        Some(DEFAULT_GEOMETRY_KEY)
    }

    fn publish_result(&self, payload: Payload) -> Value {
        match payload {
            Payload::One(Value::Object(m)) => to_feature(m, DEFAULT_GEOMETRY_KEY),
            Payload::One(other) => other,
            Payload::Many(items) => to_feature_collection(items, DEFAULT_GEOMETRY_KEY, "sources"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("geodata_sdk=debug".parse()?))
        .init();

    let settings = Settings::from_env()?;
    ensure_database_exists(&settings).await?;
    let pool = settings.connect().await?;
    ensure_tables(&pool, &settings.schema).await?;
    let state = AppState::new(pool.clone(), settings.schema.clone());
    state.catalog.initialize(&pool).await?;
    state.catalog.validate(&[TableId::SpatialSource])?;

    let handler = Arc::new(ResourceHandler::new(state, Sources));
    let app = Router::new()
        .merge(common_routes())
        .nest("/sources", resource_routes(handler));

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

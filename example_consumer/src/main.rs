//! Example consumer: a separate Rust project that uses geodata-sdk as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

mod resources;

use geodata_sdk::{
    common_routes_with_ready, ensure_database_exists, ensure_tables, resource_routes, AppState, ResourceHandler, Settings, TableId,
};
use resources::{ProjectHooks, SpatialSourceHooks};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("geodata_sdk=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    ensure_database_exists(&settings).await?;
    let pool = settings.connect().await?;
    ensure_tables(&pool, &settings.schema).await?;

    let state = AppState::new(pool.clone(), settings.schema.clone());
    match state.catalog.initialize(&pool).await {
        Ok(()) => state.catalog.validate(&TableId::ALL)?,
        Err(e) => tracing::warn!(error = %e, "catalog not loaded at startup; retrying on first request"),
    }

    let sources = Arc::new(ResourceHandler::new(state.clone(), SpatialSourceHooks));
    let projects = Arc::new(ResourceHandler::new(state.clone(), ProjectHooks));

    let app = common_routes_with_ready(state)
        .nest("/api/v1/spatial-sources", resource_routes(sources))
        .nest("/api/v1/projects", resource_routes(projects))
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

//! Routes of one resource, mounted under the caller's prefix (e.g. `/api/v1/spatial-sources`).

use crate::handlers::resource::{attach_tags, create, delete, detach, import, list, read, remove_tags, update};
use crate::service::{ResourceHandler, ResourceHooks};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete as delete_route, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Upper bound on an imported FeatureCollection body.
pub const IMPORT_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn resource_routes<H: ResourceHooks>(handler: Arc<ResourceHandler<H>>) -> Router {
    let import_route = post(import::<H>).layer(
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(IMPORT_BODY_LIMIT)),
    );
    Router::new()
        .route("/", get(list::<H>).post(create::<H>))
        .route("/import", import_route)
        .route("/:id", get(read::<H>).patch(update::<H>).delete(delete::<H>))
        .route("/:id/tags", post(attach_tags::<H>).delete(remove_tags::<H>))
        .route("/:id/relations/:kind/:related_id", delete_route(detach::<H>))
        .with_state(handler)
}

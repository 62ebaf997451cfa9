//! Status code plus JSON body returned by write operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct ItemResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ItemResponse {
    pub fn created(body: Value) -> Self {
        ItemResponse {
            status: StatusCode::CREATED,
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        ItemResponse {
            status: StatusCode::OK,
            body,
        }
    }
}

impl IntoResponse for ItemResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

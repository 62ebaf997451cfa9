//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog not initialized")]
    NotInitialized,
    #[error("tables missing from catalog: {0:?}")]
    MissingTables(Vec<String>),
    #[error("table {table} has no column '{column}'")]
    MissingColumn { table: String, column: String },
    #[error("invalid schema name: {0}")]
    InvalidSchema(String),
    #[error("introspection failed: {0}")]
    Introspection(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("transaction {tx}: cannot {op} in state {state}")]
    Transaction {
        tx: String,
        op: &'static str,
        state: &'static str,
    },
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Catalog(_) | AppError::Db(_) | AppError::Transaction { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Catalog(_) => "catalog_error",
            AppError::NotFound(_) | AppError::Db(sqlx::Error::RowNotFound) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Db(_) => "database_error",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Transaction { .. } => "transaction_error",
        }
    }

    /// Client-facing summary; stable per error kind.
    pub fn summary(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "resource not found",
            StatusCode::UNPROCESSABLE_ENTITY => "validation failed",
            StatusCode::CONFLICT => "conflicting state",
            StatusCode::BAD_REQUEST => "bad request",
            _ => "internal server error",
        }
    }

    /// Underlying cause. Always available for logs; only sent to clients for non-internal errors.
    pub fn cause(&self) -> String {
        match self {
            AppError::NotFound(m)
            | AppError::Validation(m)
            | AppError::Conflict(m)
            | AppError::BadRequest(m) => m.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == StatusCode::NOT_FOUND
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                status_code: self.status_code().as_u16(),
                code: self.code().to_string(),
                summary: self.summary().to_string(),
                cause: (!self.is_internal()).then(|| self.cause()),
            },
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub status_code: u16,
    pub code: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            tracing::error!(code = self.code(), cause = %self.cause(), "request failed");
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}

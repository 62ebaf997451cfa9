//! Statement execution over either the pool (autocommit) or a transaction context.

use crate::error::AppError;
use crate::sql::{bind_all, QueryBuf};
use crate::table::row_to_json;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

#[async_trait]
pub trait QueryExecutor: Send {
    /// Run a row-returning statement; rows come back keyed by column alias.
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError>;

    /// Run a statement and return the affected row count.
    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError>;
}

#[async_trait]
impl QueryExecutor for PgPool {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(&q.sql, &q.params).fetch_all(&*self).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let done = bind_all(&q.sql, &q.params).execute(&*self).await?;
        Ok(done.rows_affected())
    }
}

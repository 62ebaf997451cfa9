//! Explicit transactions: one pooled connection per context, driven through a small state machine.
//!
//! ```text
//! Created --BEGIN--> Started --dispatch--> Busy --ok--> Ready --COMMIT--> Finished
//!                                           \--err--> Error
//! {Started, Ready, Busy, Error} --ROLLBACK--> Aborting --> Aborted
//! ```

mod executor;

pub use executor::QueryExecutor;

use crate::error::AppError;
use crate::sql::{bind_all, QueryBuf};
use crate::table::row_to_json;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Created,
    Started,
    Busy,
    Ready,
    Finished,
    Aborting,
    Aborted,
    Error,
}

impl TxState {
    pub fn as_str(self) -> &'static str {
        match self {
            TxState::Created => "created",
            TxState::Started => "started",
            TxState::Busy => "busy",
            TxState::Ready => "ready",
            TxState::Finished => "finished",
            TxState::Aborting => "aborting",
            TxState::Aborted => "aborted",
            TxState::Error => "error",
        }
    }

    pub fn accepts_commands(self) -> bool {
        matches!(self, TxState::Created | TxState::Started | TxState::Ready)
    }

    pub fn accepts_commit(self) -> bool {
        self == TxState::Ready
    }

    pub fn accepts_rollback(self) -> bool {
        matches!(self, TxState::Started | TxState::Ready | TxState::Busy | TxState::Error)
    }

    /// ROLLBACK is only sent once something ran inside the transaction.
    pub fn needs_rollback_statement(self) -> bool {
        matches!(self, TxState::Ready | TxState::Busy | TxState::Error)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transaction pinned to one pooled connection. Pass it by `&mut` through a call chain;
/// statements on the same context run in submission order.
pub struct TxContext {
    id: Uuid,
    state: TxState,
    conn: Option<PoolConnection<Postgres>>,
    last_error: Option<String>,
}

impl TxContext {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        TxContext {
            id: Uuid::new_v4(),
            state: TxState::Created,
            conn: Some(conn),
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn misuse(&self, op: &'static str) -> AppError {
        AppError::Transaction {
            tx: self.id.to_string(),
            op,
            state: self.state.as_str(),
        }
    }

    fn fail(&mut self, e: &sqlx::Error) {
        self.state = TxState::Error;
        self.last_error = Some(e.to_string());
        tracing::warn!(tx = %self.id, error = %e, "statement failed, transaction needs rollback");
    }

    /// Return the connection to the pool, or close it when it may still hold an open transaction.
    fn release(&mut self, reusable: bool) {
        if let Some(conn) = self.conn.take() {
            if !reusable {
                drop(conn.detach());
            }
        }
    }

    async fn start(&mut self) -> Result<(), AppError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.misuse("begin"));
        };
        match sqlx::query("BEGIN").execute(&mut **conn).await {
            Ok(_) => {
                self.state = TxState::Started;
                tracing::debug!(tx = %self.id, "begin");
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                self.release(true);
                self.state = TxState::Aborted;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for TxContext {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError> {
        if !self.state.accepts_commands() {
            return Err(self.misuse("execute"));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.misuse("execute"));
        };
        tracing::debug!(tx = %self.id, sql = %q.sql, params = ?q.params, "query (tx)");
        self.state = TxState::Busy;
        match bind_all(&q.sql, &q.params).fetch_all(&mut **conn).await {
            Ok(rows) => {
                self.state = TxState::Ready;
                Ok(rows.iter().map(row_to_json).collect())
            }
            Err(e) => {
                self.fail(&e);
                Err(e.into())
            }
        }
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        if !self.state.accepts_commands() {
            return Err(self.misuse("execute"));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.misuse("execute"));
        };
        tracing::debug!(tx = %self.id, sql = %q.sql, params = ?q.params, "execute (tx)");
        self.state = TxState::Busy;
        match bind_all(&q.sql, &q.params).execute(&mut **conn).await {
            Ok(done) => {
                self.state = TxState::Ready;
                Ok(done.rows_affected())
            }
            Err(e) => {
                self.fail(&e);
                Err(e.into())
            }
        }
    }
}

impl Drop for TxContext {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::warn!(tx = %self.id, state = %self.state, "transaction dropped while open, closing its connection");
            self.release(false);
        }
    }
}

/// Owns the pool and hands out transaction contexts.
#[derive(Clone, Debug)]
pub struct TransactionManager {
    pool: PgPool,
}

impl TransactionManager {
    pub fn new(pool: PgPool) -> Self {
        TransactionManager { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Acquire a pooled connection and issue BEGIN.
    pub async fn begin(&self) -> Result<TxContext, AppError> {
        let conn = self.pool.acquire().await?;
        let mut ctx = TxContext::new(conn);
        ctx.start().await?;
        Ok(ctx)
    }

    pub async fn execute(&self, ctx: &mut TxContext, q: &QueryBuf) -> Result<u64, AppError> {
        ctx.execute(q).await
    }

    /// COMMIT a context in `Ready`, then release its connection. A failed COMMIT rolls back.
    pub async fn commit(&self, ctx: &mut TxContext) -> Result<(), AppError> {
        if !ctx.state.accepts_commit() {
            return Err(ctx.misuse("commit"));
        }
        let Some(conn) = ctx.conn.as_mut() else {
            return Err(ctx.misuse("commit"));
        };
        match sqlx::query("COMMIT").execute(&mut **conn).await {
            Ok(_) => {
                ctx.state = TxState::Finished;
                ctx.release(true);
                tracing::debug!(tx = %ctx.id, "commit");
                Ok(())
            }
            Err(e) => {
                ctx.fail(&e);
                self.rollback(ctx).await;
                Err(e.into())
            }
        }
    }

    /// Best-effort ROLLBACK; never fails. The connection is always released.
    pub async fn rollback(&self, ctx: &mut TxContext) {
        if !ctx.state.accepts_rollback() {
            tracing::debug!(tx = %ctx.id, state = %ctx.state, "rollback ignored");
            ctx.release(ctx.state != TxState::Busy);
            return;
        }
        let send = ctx.state.needs_rollback_statement();
        ctx.state = TxState::Aborting;
        let mut reusable = true;
        if send {
            if let Some(conn) = ctx.conn.as_mut() {
                if let Err(e) = sqlx::query("ROLLBACK").execute(&mut **conn).await {
                    tracing::warn!(tx = %ctx.id, error = %e, "rollback failed");
                    reusable = false;
                }
            }
        }
        ctx.release(reusable);
        ctx.state = TxState::Aborted;
        tracing::debug!(tx = %ctx.id, "rollback");
    }
}

/// A context that is either supplied by the caller or opened (and owned) for one call.
pub enum TxScope<'a> {
    Borrowed(&'a mut TxContext),
    Owned(TxContext),
}

impl<'a> TxScope<'a> {
    pub async fn open(tm: &TransactionManager, ctx: Option<&'a mut TxContext>) -> Result<TxScope<'a>, AppError> {
        Ok(match ctx {
            Some(c) => TxScope::Borrowed(c),
            None => TxScope::Owned(tm.begin().await?),
        })
    }

    pub fn ctx(&mut self) -> &mut TxContext {
        match self {
            TxScope::Borrowed(c) => &mut **c,
            TxScope::Owned(c) => c,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, TxScope::Owned(_))
    }

    /// Commit an owned context; one that never ran a statement is simply released.
    /// A borrowed context is handed back untouched: its owner commits it.
    pub async fn finish(self, tm: &TransactionManager) -> Result<Option<&'a mut TxContext>, AppError> {
        match self {
            TxScope::Borrowed(c) => Ok(Some(c)),
            TxScope::Owned(mut c) => {
                if c.state() == TxState::Started {
                    tm.rollback(&mut c).await;
                } else {
                    tm.commit(&mut c).await?;
                }
                Ok(None)
            }
        }
    }

    /// Roll back an owned context. A borrowed one is left for its owner to roll back.
    pub async fn abort(self, tm: &TransactionManager) {
        if let TxScope::Owned(mut c) = self {
            tm.rollback(&mut c).await;
        }
    }
}

//! Shared application state for all routes: pool, catalog, transactions and relations.

use crate::catalog::Catalog;
use crate::config::TableId;
use crate::error::AppError;
use crate::relation::RelationManager;
use crate::table::Table;
use crate::tx::TransactionManager;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub catalog: Arc<Catalog>,
    pub tx: TransactionManager,
    pub relations: RelationManager,
}

impl AppState {
    /// State over `pool` with an empty catalog for `schema`; call [`Catalog::initialize`] before serving.
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self::with_catalog(pool, Arc::new(Catalog::new(schema)))
    }

    pub fn with_catalog(pool: PgPool, catalog: Arc<Catalog>) -> Self {
        AppState {
            tx: TransactionManager::new(pool.clone()),
            relations: RelationManager::new(catalog.clone()),
            catalog,
            pool,
        }
    }

    /// Catalogued table, initializing the catalog lazily on first use.
    pub async fn table(&self, id: TableId) -> Result<Arc<Table>, AppError> {
        self.catalog.table_or_init(&self.pool, id).await
    }
}

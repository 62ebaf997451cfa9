//! Metadata catalog: tables introspected once from the database and shared read-only.

mod column;
mod introspect;

pub use column::*;
pub use introspect::build_tables;

use crate::config::TableId;
use crate::error::{AppError, CatalogError};
use crate::table::Table;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

pub struct Catalog {
    schema: String,
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
    initialized: AtomicBool,
    initializing: AtomicBool,
}

/// Clears the in-progress flag when initialization ends, including when its future is dropped.
struct InitGuard<'a>(&'a AtomicBool);

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Catalog {
    pub fn new(schema: impl Into<String>) -> Self {
        Catalog {
            schema: schema.into(),
            tables: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
        }
    }

    /// A catalog populated from already-built tables, for callers that do not introspect.
    pub fn with_tables(schema: impl Into<String>, tables: impl IntoIterator<Item = Table>) -> Self {
        let catalog = Catalog::new(schema);
        catalog.install(tables.into_iter().map(|t| (t.id, t)).collect());
        catalog
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn install(&self, built: HashMap<TableId, Table>) {
        let mut guard = self.tables.write().unwrap_or_else(|e| e.into_inner());
        *guard = built.into_iter().map(|(id, t)| (id, Arc::new(t))).collect();
        self.initialized.store(true, Ordering::Release);
    }

    /// Introspect once. A call that finds initialization already running returns immediately;
    /// its caller sees `None` from [`Catalog::table`] and may retry later.
    pub async fn initialize(&self, pool: &PgPool) -> Result<(), AppError> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.initializing.swap(true, Ordering::AcqRel) {
            tracing::debug!("catalog initialization already in progress");
            return Ok(());
        }
        let _running = InitGuard(&self.initializing);
        let result = introspect::fetch_columns(pool, &self.schema).await;
        let outcome = match result {
            Ok(raw) => {
                let built = build_tables(&self.schema, &raw);
                tracing::info!(schema = %self.schema, tables = built.len(), columns = raw.len(), "catalog initialized");
                self.install(built);
                Ok(())
            }
            Err(e) => {
                tracing::error!(schema = %self.schema, error = %e, "catalog introspection failed");
                Err(CatalogError::Introspection(e.to_string()).into())
            }
        };
        outcome
    }

    /// Cached table, or `None` before initialization completes or when the table was not found.
    pub fn table(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Cached table; when the catalog is still empty, try to initialize first. Missing → NotFound.
    pub async fn table_or_init(&self, pool: &PgPool, id: TableId) -> Result<Arc<Table>, AppError> {
        if let Some(t) = self.table(id) {
            return Ok(t);
        }
        if !self.is_initialized() {
            if let Err(e) = self.initialize(pool).await {
                tracing::warn!(table = %id, error = %e, "table unavailable");
            }
        }
        self.table(id)
            .ok_or_else(|| AppError::NotFound(format!("table {} is not available", id)))
    }

    /// Fail unless every listed table was introspected.
    pub fn validate(&self, required: &[TableId]) -> Result<(), CatalogError> {
        if !self.is_initialized() {
            return Err(CatalogError::NotInitialized);
        }
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let missing: Vec<String> = required
            .iter()
            .filter(|id| !tables.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::MissingTables(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixture;

    #[test]
    fn test_table_absent_before_initialization() {
        let c = Catalog::new("gis");
        assert!(c.table(TableId::Project).is_none());
        assert!(matches!(c.validate(&[TableId::Project]), Err(CatalogError::NotInitialized)));
    }

    #[test]
    fn test_validate_lists_missing_tables() {
        let c = Catalog::with_tables("gis", [fixture(TableId::Project), fixture(TableId::Relation)]);
        assert!(c.validate(&[TableId::Project, TableId::Relation]).is_ok());
        match c.validate(&TableId::ALL) {
            Err(CatalogError::MissingTables(m)) => {
                assert_eq!(m, vec!["spatial_sources", "tags", "activity_log"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_initialize_can_retry() {
        // Accepts TCP connections but never speaks the protocol, so introspection hangs.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("postgres://u:p@{}/db", listener.local_addr().unwrap());
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_lazy(&url)
            .unwrap();
        let c = Catalog::new("gis");

        let first = tokio::time::timeout(std::time::Duration::from_millis(20), c.initialize(&pool)).await;
        assert!(first.is_err());
        assert!(!c.initializing.load(Ordering::Acquire));
        assert!(!c.is_initialized());

        let second = tokio::time::timeout(std::time::Duration::from_millis(20), c.initialize(&pool)).await;
        assert!(second.is_err(), "a retry must introspect again instead of returning early");
        assert!(!c.initializing.load(Ordering::Acquire));
    }

    #[test]
    fn test_table_lookup_after_install() {
        let c = Catalog::with_tables("gis", [fixture(TableId::Tag)]);
        assert!(c.is_initialized());
        assert_eq!(c.table(TableId::Tag).unwrap().name, "tags");
    }
}

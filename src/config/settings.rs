//! Connection-pool settings read from the environment.

use crate::error::CatalogError;
use regex::Regex;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Schema holding every catalogued table. Must be a valid PostgreSQL identifier.
    pub schema: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Settings {
    /// `DATABASE_URL` wins; otherwise the URL is assembled from `PGHOST`, `PGPORT`, `PGUSER`,
    /// `PGPASSWORD` and `PGDATABASE`. `DB_SCHEMA` and `DB_MAX_CONNECTIONS` are optional.
    pub fn from_env() -> Result<Self, CatalogError> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| url_from_parts());
        let schema = std::env::var("DB_SCHEMA").unwrap_or_else(|_| DEFAULT_SCHEMA.into());
        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        Self::new(database_url, schema, max_connections)
    }

    pub fn new(database_url: String, schema: String, max_connections: u32) -> Result<Self, CatalogError> {
        validate_schema_name(&schema)?;
        Ok(Settings {
            database_url,
            schema,
            max_connections: max_connections.max(1),
            acquire_timeout: Duration::from_secs(10),
        })
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        tracing::info!(schema = %self.schema, max_connections = self.max_connections, "connecting pool");
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        PgConnectOptions::from_str(&self.database_url)
    }

    /// Name of the configured database plus options for the server's maintenance database,
    /// from which it can be created. `None` when the maintenance database is the target.
    pub fn bootstrap_target(&self) -> Result<Option<(String, PgConnectOptions)>, sqlx::Error> {
        let opts = self.connect_options()?;
        let name = opts.get_database().unwrap_or_default().to_string();
        if name.is_empty() || name == MAINTENANCE_DATABASE {
            return Ok(None);
        }
        Ok(Some((name, opts.database(MAINTENANCE_DATABASE))))
    }
}

fn url_from_parts() -> String {
    let var = |k: &str, d: &str| std::env::var(k).unwrap_or_else(|_| d.to_string());
    let host = var("PGHOST", "localhost");
    let port = var("PGPORT", "5432");
    let user = var("PGUSER", "postgres");
    let database = var("PGDATABASE", "geodata");
    match std::env::var("PGPASSWORD") {
        Ok(password) if !password.is_empty() => {
            format!("postgres://{}:{}@{}:{}/{}", user, password, host, port, database)
        }
        _ => format!("postgres://{}@{}:{}/{}", user, host, port, database),
    }
}

fn validate_schema_name(schema: &str) -> Result<(), CatalogError> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").map_err(|e| CatalogError::InvalidSchema(e.to_string()))?;
    if re.is_match(schema) {
        Ok(())
    } else {
        Err(CatalogError::InvalidSchema(schema.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_name_must_be_identifier() {
        assert!(Settings::new("postgres://x/y".into(), "gis_data".into(), 5).is_ok());
        assert!(Settings::new("postgres://x/y".into(), "1bad".into(), 5).is_err());
        assert!(Settings::new("postgres://x/y".into(), "drop table;".into(), 5).is_err());
    }

    #[test]
    fn test_bootstrap_target_uses_maintenance_database() {
        let s = Settings::new("postgres://u:p@db.local:5433/geodata?sslmode=disable".into(), "public".into(), 5).unwrap();
        let (name, admin) = s.bootstrap_target().unwrap().unwrap();
        assert_eq!(name, "geodata");
        assert_eq!(admin.get_database(), Some("postgres"));
        assert_eq!(admin.get_host(), "db.local");
        assert_eq!(admin.get_port(), 5433);

        let s = Settings::new("postgres://u@db.local/postgres".into(), "public".into(), 5).unwrap();
        assert!(s.bootstrap_target().unwrap().is_none());
    }

    #[test]
    fn test_zero_connections_clamped() {
        let s = Settings::new("postgres://x/y".into(), "public".into(), 0).unwrap();
        assert_eq!(s.max_connections, 1);
    }
}

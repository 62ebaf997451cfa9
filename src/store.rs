//! Database bootstrap: create the database when missing and the catalogued tables in the configured schema.

use crate::config::Settings;
use crate::error::AppError;
use crate::sql::quoted;
use sqlx::{ConnectOptions, Connection, PgPool};

/// Create the PostGIS extension, `schema` and every catalogued table if they do not exist.
/// Identifiers are quoted; `schema` is validated by [`crate::config::Settings`].
pub async fn ensure_tables(pool: &PgPool, schema: &str) -> Result<(), AppError> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis").execute(pool).await?;
    let s = quoted(schema);
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", s)).execute(pool).await?;

    let statements = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}."projects" (
                uid UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL,
                description TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}."spatial_sources" (
                uid UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL,
                description TEXT,
                geometry geometry(Geometry, 4326),
                number INTEGER NOT NULL,
                parent_uid UUID REFERENCES {s}."spatial_sources"(uid) ON DELETE SET NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}."tags" (
                uid UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                value TEXT NOT NULL UNIQUE
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}."relations" (
                from_id UUID NOT NULL,
                from_type TEXT NOT NULL,
                to_id UUID NOT NULL,
                to_type TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
                PRIMARY KEY (from_id, from_type, to_id, to_type, relation_type)
            )
            "#
        ),
        format!(r#"CREATE INDEX IF NOT EXISTS relations_to_idx ON {s}."relations" (to_id, to_type)"#),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}."activity_log" (
                uid UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                item_uid UUID NOT NULL,
                item_type TEXT NOT NULL,
                action TEXT NOT NULL,
                process_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
    ];
    for ddl in &statements {
        sqlx::query(ddl).execute(pool).await?;
    }
    tracing::debug!(schema = %schema, "tables ensured");
    Ok(())
}

/// Create the configured database when it does not exist yet, connecting through the
/// server's maintenance database.
pub async fn ensure_database_exists(settings: &Settings) -> Result<(), AppError> {
    let Some((name, admin)) = settings.bootstrap_target()? else {
        return Ok(());
    };
    let mut conn = admin.connect().await?;
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&name)
        .fetch_one(&mut conn)
        .await?;
    if exists {
        tracing::debug!(database = %name, "database present");
    } else {
        tracing::info!(database = %name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&name)))
            .execute(&mut conn)
            .await?;
    }
    conn.close().await?;
    Ok(())
}

//! Catalogued table: column lookup, property mapping and generic CRUD over any executor.

mod record;
mod row;

pub use record::{Record, ERROR_MARKER};
pub use row::row_to_json;

use crate::case::lookup_key;
use crate::catalog::ColumnMeta;
use crate::config::TableId;
use crate::error::{AppError, CatalogError};
use crate::sql::{self, qualified_table, Clause, Select};
use crate::tx::QueryExecutor;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct Table {
    pub id: TableId,
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    primary_key: Option<usize>,
    by_key: HashMap<String, usize>,
}

impl Table {
    /// The primary key is only usable for by-id operations when it is a single column.
    pub fn new(id: TableId, schema: String, name: String, columns: Vec<ColumnMeta>) -> Self {
        let pk_positions: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key)
            .map(|(i, _)| i)
            .collect();
        let primary_key = (pk_positions.len() == 1).then(|| pk_positions[0]);
        let mut by_key = HashMap::with_capacity(columns.len() * 2);
        for (i, c) in columns.iter().enumerate() {
            by_key.insert(lookup_key(&c.physical_name), i);
            by_key.entry(lookup_key(&c.display_name)).or_insert(i);
        }
        Table {
            id,
            schema,
            name,
            columns,
            primary_key,
            by_key,
        }
    }

    pub fn qualified_name(&self) -> String {
        qualified_table(&self.schema, &self.name)
    }

    /// Case-insensitive lookup by physical or display name.
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.by_key.get(&lookup_key(name)).map(|&i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key(&self) -> Result<&ColumnMeta, AppError> {
        self.primary_key.map(|i| &self.columns[i]).ok_or_else(|| {
            AppError::Catalog(CatalogError::MissingColumn {
                table: self.id.to_string(),
                column: "single-column primary key".into(),
            })
        })
    }

    pub fn parse_id(&self, id: &str) -> Result<Value, AppError> {
        self.primary_key()?.parse_id(id)
    }

    /// Pair every property whose key names a column with that column; other keys are skipped.
    pub fn resolve_properties<'a>(&'a self, properties: &'a Map<String, Value>) -> Vec<(&'a ColumnMeta, &'a Value)> {
        properties
            .iter()
            .filter_map(|(k, v)| self.column(k).map(|c| (c, v)))
            .collect()
    }

    /// Re-key properties by display name, dropping keys that are not columns.
    pub fn to_display(&self, properties: &Map<String, Value>) -> Map<String, Value> {
        self.resolve_properties(properties)
            .into_iter()
            .map(|(c, v)| (c.display_name.clone(), v.clone()))
            .collect()
    }

    pub async fn query<E>(self: &Arc<Self>, db: &mut E, sel: &Select) -> Result<Vec<Record>, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        let q = sql::select(self, sel)?;
        let rows = db.fetch_all(&q).await?;
        Ok(rows.into_iter().map(|r| Record::from_row(self.clone(), r)).collect())
    }

    pub async fn get_by_id<E>(self: &Arc<Self>, db: &mut E, id: &Value) -> Result<Option<Record>, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        let q = sql::select_by_id(self, id)?;
        let rows = db.fetch_all(&q).await?;
        Ok(rows.into_iter().next().map(|r| Record::from_row(self.clone(), r)))
    }

    /// Like `get_by_id` but an empty result is NotFound.
    pub async fn require_by_id<E>(self: &Arc<Self>, db: &mut E, id: &Value) -> Result<Record, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        self.get_by_id(db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.id, id_text(id))))
    }

    /// Insert one row and return its primary key (null for tables without a single-column key).
    pub async fn insert<E>(&self, db: &mut E, properties: &Map<String, Value>) -> Result<Value, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        let q = sql::insert(self, properties)?;
        match self.primary_key() {
            Ok(pk) => {
                let row = db
                    .fetch_all(&q)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))?;
                Ok(row.get(&pk.display_name).cloned().unwrap_or(Value::Null))
            }
            Err(_) => {
                db.execute(&q).await?;
                Ok(Value::Null)
            }
        }
    }

    /// Partial update; false when the row does not exist or no column was named.
    pub async fn update<E>(&self, db: &mut E, id: &Value, properties: &Map<String, Value>) -> Result<bool, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        match sql::update(self, id, properties)? {
            Some(q) => Ok(db.execute(&q).await? > 0),
            None => Ok(false),
        }
    }

    pub async fn delete<E>(&self, db: &mut E, id: &Value) -> Result<bool, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        let q = sql::delete(self, id)?;
        Ok(db.execute(&q).await? > 0)
    }

    pub async fn delete_where<E>(&self, db: &mut E, clauses: &[Clause]) -> Result<u64, AppError>
    where
        E: QueryExecutor + ?Sized,
    {
        let q = sql::delete_where(self, clauses)?;
        db.execute(&q).await
    }
}

/// Id rendered for messages without JSON quotes.
pub fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Hand-built tables mirroring the bootstrap DDL in `store.rs`, for tests that run without a database.
#[cfg(test)]
pub(crate) fn fixture(id: TableId) -> Table {
    use crate::catalog::RawColumn;

    let cols: &[(&str, &str, &str, bool, bool)] = match id {
        TableId::Project => &[
            ("uid", "uuid", "uuid", true, true),
            ("name", "text", "text", false, false),
            ("description", "text", "text", true, false),
            ("created_at", "timestamp with time zone", "timestamptz", false, true),
        ],
        TableId::SpatialSource => &[
            ("uid", "uuid", "uuid", true, true),
            ("name", "text", "text", false, false),
            ("description", "text", "text", true, false),
            ("geometry", "USER-DEFINED", "geometry", true, false),
            ("number", "integer", "int4", false, false),
            ("parent_uid", "uuid", "uuid", true, false),
            ("created_at", "timestamp with time zone", "timestamptz", false, true),
        ],
        TableId::Tag => &[("uid", "uuid", "uuid", true, true), ("value", "text", "text", false, false)],
        TableId::Relation => &[
            ("from_id", "uuid", "uuid", false, false),
            ("from_type", "text", "text", false, false),
            ("to_id", "uuid", "uuid", false, false),
            ("to_type", "text", "text", false, false),
            ("relation_type", "text", "text", false, false),
            ("created_at", "timestamp with time zone", "timestamptz", false, true),
        ],
        TableId::ActivityLog => &[
            ("uid", "uuid", "uuid", true, true),
            ("item_uid", "uuid", "uuid", false, false),
            ("item_type", "text", "text", false, false),
            ("action", "text", "text", false, false),
            ("process_id", "text", "text", true, false),
        ],
    };
    let relation_pk = ["from_id", "from_type", "to_id", "to_type", "relation_type"];
    let raw: Vec<RawColumn> = cols
        .iter()
        .map(|(name, data_type, udt, nullable, has_default)| RawColumn {
            table_name: id.physical_name().into(),
            column_name: (*name).into(),
            data_type: (*data_type).into(),
            udt_schema: "pg_catalog".into(),
            udt_name: (*udt).into(),
            nullable: *nullable,
            has_default: *has_default,
            is_primary_key: if id == TableId::Relation { relation_pk.contains(name) } else { *name == "uid" },
        })
        .collect();
    let qualified = qualified_table("gis", id.physical_name());
    let single_pk = id != TableId::Relation;
    let columns = raw.iter().map(|r| ColumnMeta::derive(id, &qualified, r, single_pk)).collect();
    Table::new(id, "gis".into(), id.physical_name().into(), columns)
}

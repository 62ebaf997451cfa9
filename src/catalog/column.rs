//! Per-column metadata derived from `information_schema.columns`.

use crate::case::to_display_name;
use crate::config::TableId;
use crate::error::AppError;
use crate::sql::quoted;
use serde_json::Value;

/// Placeholder in write formats, replaced with `$n` when a statement is rendered.
pub const PARAM: &str = "{param}";

/// Primary key type for parsing path/body ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    Int,
    Text,
}

/// One row of the introspection query.
#[derive(Clone, Debug)]
pub struct RawColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub udt_schema: String,
    pub udt_name: String,
    pub nullable: bool,
    pub has_default: bool,
    pub is_primary_key: bool,
}

#[derive(Clone, Debug)]
pub struct ColumnMeta {
    pub table_id: TableId,
    pub physical_name: String,
    pub display_name: String,
    pub is_primary_key: bool,
    pub udt_name: String,
    pub nullable: bool,
    pub has_default: bool,
    /// SELECT expression; the caller aliases it to the display name.
    pub read_expression: String,
    /// Value expression for INSERT/UPDATE/WHERE containing [`PARAM`].
    pub write_format: String,
    /// Expression used on INSERT when the caller supplies no value, or always unless
    /// `create_accepts_supplied`.
    pub create_expression: Option<String>,
    pub create_accepts_supplied: bool,
}

impl ColumnMeta {
    pub fn derive(table_id: TableId, qualified_table: &str, raw: &RawColumn, single_pk: bool) -> Self {
        let q = quoted(&raw.column_name);
        let udt = raw.udt_name.to_lowercase();
        let is_geo = udt == "geometry" || udt == "geography";

        let read_expression = if is_geo {
            format!("ST_AsGeoJSON({})", q)
        } else if raw.data_type == "numeric" {
            format!("{}::float8", q)
        } else if raw.data_type == "USER-DEFINED" {
            format!("{}::text", q)
        } else if raw.data_type == "ARRAY" {
            format!("to_jsonb({})", q)
        } else {
            q
        };

        let write_format = if udt == "geometry" {
            format!("ST_SetSRID(ST_GeomFromGeoJSON({}::text), 4326)", PARAM)
        } else if udt == "geography" {
            format!("ST_GeomFromGeoJSON({}::text)::geography", PARAM)
        } else if raw.data_type == "USER-DEFINED" {
            format!("{}::{}.{}", PARAM, quoted(&raw.udt_schema), quoted(&raw.udt_name))
        } else if raw.data_type == "ARRAY" {
            let elem = raw.udt_name.trim_start_matches('_');
            format!("ARRAY(SELECT jsonb_array_elements_text({}::jsonb))::{}[]", PARAM, elem)
        } else {
            format!("{}::{}", PARAM, raw.udt_name)
        };

        let (create_expression, create_accepts_supplied) = match table_id
            .create_expressions()
            .iter()
            .find(|e| e.column == raw.column_name)
        {
            Some(e) => (Some(e.sql.replace("{table}", qualified_table)), e.accepts_supplied),
            None if raw.is_primary_key && single_pk && udt == "uuid" => (Some("gen_random_uuid()".to_string()), true),
            None => (None, true),
        };

        ColumnMeta {
            table_id,
            physical_name: raw.column_name.clone(),
            display_name: to_display_name(&raw.column_name),
            is_primary_key: raw.is_primary_key,
            udt_name: raw.udt_name.clone(),
            nullable: raw.nullable,
            has_default: raw.has_default,
            read_expression,
            write_format,
            create_expression,
            create_accepts_supplied,
        }
    }

    /// Write format with the placeholder bound to `$n`.
    pub fn write_expr(&self, n: usize) -> String {
        self.write_format.replace(PARAM, &format!("${}", n))
    }

    pub fn is_json(&self) -> bool {
        matches!(self.udt_name.as_str(), "json" | "jsonb") || self.udt_name.starts_with('_')
    }

    pub fn pk_type(&self) -> PkType {
        match self.udt_name.as_str() {
            "uuid" => PkType::Uuid,
            "int2" | "int4" | "int8" => PkType::Int,
            _ => PkType::Text,
        }
    }

    /// Parse an id taken from a path or query string according to this column's type.
    pub fn parse_id(&self, id: &str) -> Result<Value, AppError> {
        Ok(match self.pk_type() {
            PkType::Uuid => {
                let u = uuid::Uuid::parse_str(id).map_err(|_| AppError::BadRequest(format!("invalid uuid: {}", id)))?;
                Value::String(u.to_string())
            }
            PkType::Int => {
                let n: i64 = id.parse().map_err(|_| AppError::BadRequest(format!("invalid id: {}", id)))?;
                Value::Number(n.into())
            }
            PkType::Text => Value::String(id.to_string()),
        })
    }
}

//! Decode a PostgreSQL row into a JSON object keyed by column alias.

use serde_json::{Map, Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

pub fn row_to_json(row: &PgRow) -> Map<String, Value> {
    let mut map = Map::new();
    for col in row.columns() {
        let v = cell_to_value(row, col.ordinal(), col.type_info().name());
        map.insert(col.name().to_string(), v);
    }
    map
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn cell_to_value(row: &PgRow, idx: usize, type_name: &str) -> Value {
    let v = match type_name {
        "INT2" => get::<i16>(row, idx).map(|n| Value::Number(n.into())),
        "INT4" => get::<i32>(row, idx).map(|n| Value::Number(n.into())),
        "INT8" => get::<i64>(row, idx).map(|n| Value::Number(n.into())),
        "FLOAT4" => get::<f32>(row, idx).and_then(|n| Number::from_f64(f64::from(n))).map(Value::Number),
        "FLOAT8" => get::<f64>(row, idx).and_then(Number::from_f64).map(Value::Number),
        "BOOL" => get::<bool>(row, idx).map(Value::Bool),
        "UUID" => get::<uuid::Uuid>(row, idx).map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx).map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx)
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, idx).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "JSON" | "JSONB" => get::<Value>(row, idx),
        _ => get::<String>(row, idx).map(Value::String),
    };
    v.unwrap_or(Value::Null)
}

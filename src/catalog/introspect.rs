//! Reads `information_schema` for the registered tables and groups the result per table.

use super::{ColumnMeta, RawColumn};
use crate::config::TableId;
use crate::sql::qualified_table;
use crate::table::Table;
use sqlx::PgPool;
use std::collections::HashMap;

const COLUMNS_SQL: &str = r#"
SELECT c.table_name::text,
       c.column_name::text,
       c.data_type::text,
       c.udt_schema::text,
       c.udt_name::text,
       (c.is_nullable = 'YES') AS nullable,
       (c.column_default IS NOT NULL) AS has_default,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
            AND k.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ) AS is_primary_key
FROM information_schema.columns c
WHERE c.table_catalog = current_database()
  AND c.table_schema = $1
  AND c.table_name::text = ANY($2)
ORDER BY c.table_name, c.ordinal_position
"#;

type ColumnRow = (String, String, String, String, String, bool, bool, bool);

pub async fn fetch_columns(pool: &PgPool, schema: &str) -> Result<Vec<RawColumn>, sqlx::Error> {
    let names: Vec<String> = TableId::ALL.iter().map(|t| t.physical_name().to_string()).collect();
    let rows: Vec<ColumnRow> = sqlx::query_as(COLUMNS_SQL)
        .bind(schema)
        .bind(&names)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(
            |(table_name, column_name, data_type, udt_schema, udt_name, nullable, has_default, is_primary_key)| RawColumn {
                table_name,
                column_name,
                data_type,
                udt_schema,
                udt_name,
                nullable,
                has_default,
                is_primary_key,
            },
        )
        .collect())
}

/// Group introspected columns into tables. Rows for unregistered table names are ignored;
/// column order is preserved.
pub fn build_tables(schema: &str, raw: &[RawColumn]) -> HashMap<TableId, Table> {
    let mut grouped: HashMap<TableId, Vec<&RawColumn>> = HashMap::new();
    for col in raw {
        if let Some(id) = TableId::from_physical_name(&col.table_name) {
            grouped.entry(id).or_default().push(col);
        }
    }
    grouped
        .into_iter()
        .map(|(id, cols)| {
            let qualified = qualified_table(schema, id.physical_name());
            let single_pk = cols.iter().filter(|c| c.is_primary_key).count() == 1;
            let columns = cols
                .iter()
                .map(|c| ColumnMeta::derive(id, &qualified, c, single_pk))
                .collect();
            (id, Table::new(id, schema.to_string(), id.physical_name().to_string(), columns))
        })
        .collect()
}

//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from catalog tables.
//! Identifiers come from the catalog only; every value is a bound parameter.

use crate::catalog::ColumnMeta;
use crate::error::AppError;
use crate::sql::{Clause, Filter, PgBindValue, Select, SubQuery};
use crate::table::Table;
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from catalog).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Clone, Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    pub fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    fn push_value(&mut self, col: &ColumnMeta, v: &Value) -> usize {
        let bind = if col.is_json() {
            PgBindValue::json(v)
        } else {
            PgBindValue::from_json(v)
        };
        self.push_param(bind)
    }
}

fn resolve<'t>(table: &'t Table, name: &str) -> Result<&'t ColumnMeta, AppError> {
    table
        .column(name)
        .ok_or_else(|| AppError::Validation(format!("unknown column '{}' on {}", name, table.id)))
}

fn render_clauses(q: &mut QueryBuf, table: &Table, clauses: &[Clause]) -> Result<Vec<String>, AppError> {
    clauses.iter().map(|c| render_clause(q, table, c)).collect()
}

fn render_clause(q: &mut QueryBuf, table: &Table, clause: &Clause) -> Result<String, AppError> {
    let col = resolve(table, &clause.column)?;
    let lhs = quoted(&col.physical_name);
    Ok(match &clause.filter {
        Filter::Eq(Value::Null) | Filter::IsNull => format!("{} IS NULL", lhs),
        Filter::Eq(v) => {
            let n = q.push_value(col, v);
            format!("{} = {}", lhs, col.write_expr(n))
        }
        Filter::In(values) if values.is_empty() => "FALSE".to_string(),
        Filter::In(values) => {
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| {
                    let n = q.push_value(col, v);
                    col.write_expr(n)
                })
                .collect();
            format!("{} IN ({})", lhs, placeholders.join(", "))
        }
        Filter::Subquery(sub) => format!("{} IN ({})", lhs, render_subquery(q, sub)?),
    })
}

fn render_subquery(q: &mut QueryBuf, sub: &SubQuery) -> Result<String, AppError> {
    let col = resolve(&sub.table, &sub.select)?;
    let parts = render_clauses(q, &sub.table, &sub.clauses)?;
    let mut sql = format!("SELECT {} FROM {}", quoted(&col.physical_name), sub.table.qualified_name());
    if !parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&parts.join(" AND "));
    }
    Ok(sql)
}

fn where_clause(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn select_item(col: &ColumnMeta) -> String {
    format!("{} AS {}", col.read_expression, quoted(&col.display_name))
}

/// SELECT with projection, predicates, ORDER BY (primary key when no sort given) and paging.
pub fn select(table: &Table, sel: &Select) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let pk = table.primary_key().ok();

    let columns: Vec<&ColumnMeta> = match &sel.columns {
        None => table.columns.iter().collect(),
        Some(names) => {
            let mut cols: Vec<&ColumnMeta> = Vec::with_capacity(names.len() + 1);
            if let Some(pk) = pk {
                cols.push(pk);
            }
            for name in names {
                let col = resolve(table, name)?;
                if !cols.iter().any(|c| c.physical_name == col.physical_name) {
                    cols.push(col);
                }
            }
            cols
        }
    };
    let select_list = columns.iter().map(|c| select_item(c)).collect::<Vec<_>>().join(", ");

    let parts = render_clauses(&mut q, table, &sel.clauses)?;

    let mut order = Vec::with_capacity(sel.sort.len());
    for key in &sel.sort {
        let col = resolve(table, &key.column)?;
        let dir = if key.descending { "DESC" } else { "ASC" };
        order.push(format!("{} {}", quoted(&col.physical_name), dir));
    }
    if order.is_empty() {
        if let Some(pk) = pk {
            order.push(quoted(&pk.physical_name));
        }
    }
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    let page_clause = sel
        .page
        .map(|p| format!(" LIMIT {} OFFSET {}", p.limit(), p.offset()))
        .unwrap_or_default();

    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        select_list,
        table.qualified_name(),
        where_clause(&parts),
        order_clause,
        page_clause
    );
    Ok(q)
}

/// SELECT by primary key (single column PK only).
pub fn select_by_id(table: &Table, id: &Value) -> Result<QueryBuf, AppError> {
    let pk = table.primary_key()?;
    select(table, &Select::filtered(vec![Clause::eq(pk.physical_name.clone(), id.clone())]))
}

/// INSERT: a create expression that does not accept supplied values is always used.
/// Otherwise supplied non-null values are bound; missing or null values fall back to the
/// column's create expression, otherwise the column is omitted so the DB default applies.
/// Returns the primary key when the table has a single-column one.
pub fn insert(table: &Table, properties: &Map<String, Value>) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let supplied = table.resolve_properties(properties);
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for col in &table.columns {
        let value = supplied
            .iter()
            .find(|(c, _)| c.physical_name == col.physical_name)
            .map(|(_, v)| *v)
            .filter(|v| !v.is_null());
        match (value, &col.create_expression) {
            (_, Some(expr)) if !col.create_accepts_supplied => values.push(expr.clone()),
            (Some(v), _) => {
                let n = q.push_value(col, v);
                values.push(col.write_expr(n));
            }
            (None, Some(expr)) => values.push(expr.clone()),
            (None, None) => continue,
        }
        cols.push(quoted(&col.physical_name));
    }
    let returning = table
        .primary_key()
        .map(|pk| format!(" RETURNING {}", select_item(pk)))
        .unwrap_or_default();
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES{}", table.qualified_name(), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}){}",
            table.qualified_name(),
            cols.join(", "),
            values.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE by id: SET only columns present in `properties`; null writes SQL NULL.
/// Returns None when no settable column is present.
pub fn update(table: &Table, id: &Value, properties: &Map<String, Value>) -> Result<Option<QueryBuf>, AppError> {
    let pk = table.primary_key()?;
    let mut q = QueryBuf::new();
    let supplied = table.resolve_properties(properties);
    let mut sets = Vec::new();
    for col in &table.columns {
        if col.is_primary_key {
            continue;
        }
        let Some((_, v)) = supplied.iter().find(|(c, _)| c.physical_name == col.physical_name) else {
            continue;
        };
        if v.is_null() {
            sets.push(format!("{} = NULL", quoted(&col.physical_name)));
        } else {
            let n = q.push_value(col, v);
            sets.push(format!("{} = {}", quoted(&col.physical_name), col.write_expr(n)));
        }
    }
    if sets.is_empty() {
        return Ok(None);
    }
    let n = q.push_value(pk, id);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        table.qualified_name(),
        sets.join(", "),
        quoted(&pk.physical_name),
        pk.write_expr(n)
    );
    Ok(Some(q))
}

/// DELETE by id.
pub fn delete(table: &Table, id: &Value) -> Result<QueryBuf, AppError> {
    let pk = table.primary_key()?;
    let mut q = QueryBuf::new();
    let n = q.push_value(pk, id);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        table.qualified_name(),
        quoted(&pk.physical_name),
        pk.write_expr(n)
    );
    Ok(q)
}

/// DELETE matching predicates. Refuses an empty predicate list.
pub fn delete_where(table: &Table, clauses: &[Clause]) -> Result<QueryBuf, AppError> {
    if clauses.is_empty() {
        return Err(AppError::Validation(format!("refusing unfiltered delete on {}", table.id)));
    }
    let mut q = QueryBuf::new();
    let parts = render_clauses(&mut q, table, clauses)?;
    q.sql = format!("DELETE FROM {}{}", table.qualified_name(), where_clause(&parts));
    Ok(q)
}

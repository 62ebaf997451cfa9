//! WHERE predicates, sort keys and paging for generated SELECTs.

use crate::table::Table;
use serde_json::Value;
use std::sync::Arc;

/// Predicate on one column. Column names resolve case-insensitively (physical or display).
#[derive(Clone, Debug)]
pub struct Clause {
    pub column: String,
    pub filter: Filter,
}

#[derive(Clone, Debug)]
pub enum Filter {
    Eq(Value),
    In(Vec<Value>),
    IsNull,
    /// `column IN (SELECT …)`.
    Subquery(SubQuery),
}

/// `SELECT select FROM table WHERE clauses`, rendered with the outer statement's parameters.
#[derive(Clone, Debug)]
pub struct SubQuery {
    pub table: Arc<Table>,
    pub select: String,
    pub clauses: Vec<Clause>,
}

impl Clause {
    pub fn new(column: impl Into<String>, filter: Filter) -> Self {
        Clause {
            column: column.into(),
            filter,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::new(column, Filter::Eq(value.into()))
    }
}

impl Filter {
    /// Array → IN, null → IS NULL, anything else → equality.
    pub fn from_json(v: Value) -> Self {
        match v {
            Value::Null => Filter::IsNull,
            Value::Array(items) => Filter::In(items),
            other => Filter::Eq(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    /// Parse "-Name,UID" into descending Name then ascending UID.
    pub fn parse_list(s: &str) -> Vec<SortKey> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.strip_prefix('-') {
                Some(col) => SortKey {
                    column: col.to_string(),
                    descending: true,
                },
                None => SortKey {
                    column: p.trim_start_matches('+').to_string(),
                    descending: false,
                },
            })
            .collect()
    }
}

pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One-based page number and page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Page {
            number: number.max(1),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.number - 1) * u64::from(self.size)
    }
}

/// Column list, predicates, order and paging for one SELECT.
#[derive(Clone, Debug, Default)]
pub struct Select {
    /// Columns to project; `None` selects all. The primary key is always included.
    pub columns: Option<Vec<String>>,
    pub clauses: Vec<Clause>,
    pub sort: Vec<SortKey>,
    pub page: Option<Page>,
}

impl Select {
    pub fn filtered(clauses: Vec<Clause>) -> Self {
        Select {
            clauses,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_from_json() {
        assert!(matches!(Filter::from_json(json!(null)), Filter::IsNull));
        assert!(matches!(Filter::from_json(json!(["a", "b"])), Filter::In(v) if v.len() == 2));
        assert!(matches!(Filter::from_json(json!("a")), Filter::Eq(_)));
    }

    #[test]
    fn test_sort_parse() {
        let keys = SortKey::parse_list("-Name, UID,,+CreatedAt");
        assert_eq!(
            keys,
            vec![
                SortKey { column: "Name".into(), descending: true },
                SortKey { column: "UID".into(), descending: false },
                SortKey { column: "CreatedAt".into(), descending: false },
            ]
        );
    }

    #[test]
    fn test_page_bounds() {
        let p = Page::new(0, 5000);
        assert_eq!(p.number, 1);
        assert_eq!(p.limit(), MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);
        assert_eq!(Page::new(3, 20).offset(), 40);
    }
}

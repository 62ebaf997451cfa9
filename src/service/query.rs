//! Query-string parameters of list reads.

use crate::error::AppError;
use crate::sql::{Page, SortKey, DEFAULT_PAGE_SIZE};
use serde_json::{Map, Value};
use std::collections::HashMap;

const PAGE: &str = "page";
const PAGE_SIZE: &str = "pageSize";
const SORT: &str = "sort";
const FIELDS: &str = "fields";
const EMBED: &str = "embed";

#[derive(Clone, Debug, Default)]
pub struct ItemQuery {
    /// Every parameter that is not a paging or shape option. Comma lists become arrays, `null` is null.
    pub filters: Map<String, Value>,
    pub page: Option<Page>,
    pub sort: Vec<SortKey>,
    pub fields: Option<Vec<String>>,
    pub embed: Vec<String>,
}

/// Split "a, b,,c" into trimmed non-empty parts.
pub fn comma_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn filter_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if raw.contains(',') {
        return Value::Array(comma_list(raw).into_iter().map(Value::String).collect());
    }
    Value::String(raw.to_string())
}

fn parse_number(key: &str, raw: &str) -> Result<u32, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{} must be a positive integer", key)))
}

impl ItemQuery {
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, AppError> {
        let mut q = ItemQuery::default();
        let mut page = None;
        let mut size = None;
        for (k, v) in params {
            match k.as_str() {
                PAGE => page = Some(parse_number(PAGE, v)?),
                PAGE_SIZE => size = Some(parse_number(PAGE_SIZE, v)?),
                SORT => q.sort = SortKey::parse_list(v),
                FIELDS => q.fields = Some(comma_list(v)).filter(|f| !f.is_empty()),
                EMBED => q.embed = comma_list(v),
                _ => {
                    q.filters.insert(k.clone(), filter_value(v));
                }
            }
        }
        q.page = Some(Page::new(page.unwrap_or(1), size.unwrap_or(DEFAULT_PAGE_SIZE)));
        Ok(q)
    }

    /// Filter value by key, case-insensitively.
    pub fn filter(&self, key: &str) -> Option<&Value> {
        self.filters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }
}

/// A filter value as a list: arrays as-is, scalars as a one-element list, null as empty.
pub fn values_of(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// A filter or property value as strings (tag values, ids).
pub fn strings_of(v: &Value) -> Vec<String> {
    values_of(v)
        .into_iter()
        .filter_map(|x| match x {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::MAX_PAGE_SIZE;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_reserved_parameters() {
        let q = ItemQuery::from_params(&params(&[
            ("page", "2"),
            ("pageSize", "5000"),
            ("sort", "-Name"),
            ("fields", "Name, Description"),
            ("embed", "Projects,Tags"),
        ]))
        .unwrap();
        assert_eq!(q.page, Some(Page::new(2, MAX_PAGE_SIZE)));
        assert_eq!(q.sort.len(), 1);
        assert!(q.sort[0].descending);
        assert_eq!(q.fields, Some(vec!["Name".to_string(), "Description".to_string()]));
        assert_eq!(q.embed, vec!["Projects".to_string(), "Tags".to_string()]);
        assert!(q.filters.is_empty());
    }

    #[test]
    fn test_filters() {
        let q = ItemQuery::from_params(&params(&[("Name", "a,b"), ("ParentUID", "null"), ("tags", "flood")])).unwrap();
        assert_eq!(q.filters["Name"], json!(["a", "b"]));
        assert_eq!(q.filters["ParentUID"], Value::Null);
        assert_eq!(q.filter("Tags"), Some(&json!("flood")));
        assert_eq!(q.page, Some(Page::new(1, DEFAULT_PAGE_SIZE)));
    }

    #[test]
    fn test_bad_page() {
        assert!(ItemQuery::from_params(&params(&[("page", "x")])).is_err());
    }

    #[test]
    fn test_values_of() {
        assert_eq!(strings_of(&json!(["a", 1, null])), vec!["a".to_string(), "1".to_string()]);
        assert_eq!(values_of(&json!("p1")), vec![json!("p1")]);
        assert!(values_of(&Value::Null).is_empty());
    }
}

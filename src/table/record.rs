use super::Table;
use crate::error::AppError;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Key under which a per-row failure is published in bulk reads.
pub const ERROR_MARKER: &str = "_error";

/// One result row bound to its table. Properties are keyed by display name.
#[derive(Clone, Debug)]
pub struct Record {
    table: Arc<Table>,
    pub properties: Map<String, Value>,
    pub primary_key: Value,
    pub error: Option<String>,
}

impl Record {
    pub fn from_row(table: Arc<Table>, properties: Map<String, Value>) -> Self {
        let primary_key = table
            .primary_key()
            .ok()
            .and_then(|pk| properties.get(&pk.display_name).cloned())
            .unwrap_or(Value::Null);
        Record {
            table,
            properties,
            primary_key,
            error: None,
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn mark_error(&mut self, err: &AppError) {
        self.error = Some(err.to_string());
    }

    /// Keep only `fields` (matched case-insensitively) plus the primary key.
    pub fn retain_fields(&mut self, fields: &[String]) {
        let pk = self.table.primary_key().ok().map(|c| c.display_name.clone());
        self.properties.retain(|k, _| {
            pk.as_deref() == Some(k.as_str()) || fields.iter().any(|f| f.eq_ignore_ascii_case(k))
        });
    }

    /// Published shape: null properties are omitted; a row error is attached under [`ERROR_MARKER`].
    pub fn to_json(&self) -> Value {
        let mut out: Map<String, Value> = self
            .properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(err) = &self.error {
            out.insert(ERROR_MARKER.into(), Value::String(err.clone()));
        }
        Value::Object(out)
    }
}

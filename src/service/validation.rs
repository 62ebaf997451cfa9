//! Request validation derived from catalog column metadata.

use crate::error::AppError;
use crate::table::Table;
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Every column without a null, default or create expression must be supplied on create.
    pub fn validate_create(table: &Table, core: &Map<String, Value>) -> Result<(), AppError> {
        let supplied = table.resolve_properties(core);
        for col in &table.columns {
            if col.nullable || col.has_default || col.create_expression.is_some() {
                continue;
            }
            let present = supplied
                .iter()
                .any(|(c, v)| c.physical_name == col.physical_name && !v.is_null());
            if !present {
                return Err(AppError::Validation(format!("{} is required", col.display_name)));
            }
        }
        Self::validate_fields(table, core)
    }

    /// Type checks for the values present. Nulls are left to the database.
    pub fn validate_fields(table: &Table, properties: &Map<String, Value>) -> Result<(), AppError> {
        for (col, v) in table.resolve_properties(properties) {
            if v.is_null() {
                continue;
            }
            validate_type(&col.display_name, &col.udt_name, v)?;
        }
        Ok(())
    }

    /// An update or create must name at least one column or relation property.
    pub fn require_applicable<'a>(
        table: &Table,
        relation_properties: &[&str],
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), AppError> {
        let applicable = keys.into_iter().any(|k| {
            table.has_column(k) || relation_properties.iter().any(|r| r.eq_ignore_ascii_case(k))
        });
        if applicable {
            Ok(())
        } else {
            Err(AppError::Validation(format!("no applicable fields for {}", table.id)))
        }
    }
}

/// Geometry supplied as a GeoJSON object is written from its text form.
pub fn normalize_geometry(table: &Table, properties: &mut Map<String, Value>) {
    for (key, value) in properties.iter_mut() {
        let is_geo = table
            .column(key)
            .map(|c| matches!(c.udt_name.as_str(), "geometry" | "geography"))
            .unwrap_or(false);
        if is_geo && value.is_object() {
            *value = Value::String(value.to_string());
        }
    }
}

fn validate_type(name: &str, udt: &str, v: &Value) -> Result<(), AppError> {
    let ok = match udt {
        "uuid" => v.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false),
        "int2" | "int4" | "int8" => v.is_i64() || v.as_str().map(|s| s.parse::<i64>().is_ok()).unwrap_or(false),
        "float4" | "float8" | "numeric" => v.is_number() || v.as_str().map(|s| s.parse::<f64>().is_ok()).unwrap_or(false),
        "bool" => v.is_boolean(),
        "geometry" | "geography" => match v {
            Value::Object(m) => m.contains_key("type"),
            Value::String(s) => serde_json::from_str::<Value>(s)
                .map(|g| g.get("type").is_some())
                .unwrap_or(false),
            _ => false,
        },
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!("{} has an invalid value for type {}", name, udt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableId;
    use crate::table::fixture;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_columns_on_create() {
        let t = fixture(TableId::Project);
        let err = RequestValidator::validate_create(&t, &map(json!({"Description": "d"}))).unwrap_err();
        assert_eq!(err.to_string(), "validation: Name is required");
        assert!(RequestValidator::validate_create(&t, &map(json!({"name": "p"}))).is_ok());
        assert!(RequestValidator::validate_create(&t, &map(json!({"Name": null}))).is_err());
    }

    #[test]
    fn test_generated_columns_not_required() {
        let t = fixture(TableId::SpatialSource);
        assert!(RequestValidator::validate_create(&t, &map(json!({"Name": "s"}))).is_ok());
    }

    #[test]
    fn test_type_checks() {
        let t = fixture(TableId::SpatialSource);
        assert!(RequestValidator::validate_fields(&t, &map(json!({"ParentUID": "nope"}))).is_err());
        assert!(RequestValidator::validate_fields(&t, &map(json!({"Number": "x"}))).is_err());
        assert!(RequestValidator::validate_fields(&t, &map(json!({"Geometry": "{\"type\":\"Point\",\"coordinates\":[0,0]}"}))).is_ok());
        assert!(RequestValidator::validate_fields(&t, &map(json!({"Geometry": "not json"}))).is_err());
    }

    #[test]
    fn test_require_applicable() {
        let t = fixture(TableId::SpatialSource);
        assert!(RequestValidator::require_applicable(&t, &["Projects"], ["projects"]).is_ok());
        assert!(RequestValidator::require_applicable(&t, &["Projects"], ["Name"]).is_ok());
        let err = RequestValidator::require_applicable(&t, &["Projects"], ["Colour"]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_geometry_object_serialised() {
        let t = fixture(TableId::SpatialSource);
        let mut p = map(json!({"Geometry": {"type": "Point", "coordinates": [1, 2]}, "Name": "n"}));
        normalize_geometry(&t, &mut p);
        assert!(p["Geometry"].is_string());
        assert_eq!(p["Name"], json!("n"));
    }
}

//! Flat property records with one geometry column <-> GeoJSON Feature / FeatureCollection.

use crate::error::AppError;
use serde_json::{json, Map, Value};

pub const DEFAULT_GEOMETRY_KEY: &str = "Geometry";

/// WGS84 lon/lat, as declared on every collection we publish.
pub fn crs84() -> Value {
    json!({
        "type": "name",
        "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" }
    })
}

fn parse_geometry(v: Value) -> Value {
    match v {
        Value::String(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "stored geometry is not valid GeoJSON");
            Value::Null
        }),
        other => other,
    }
}

/// Move the geometry out of the property bag (parsing the stored GeoJSON text) into a Feature.
pub fn to_feature(mut properties: Map<String, Value>, geometry_key: &str) -> Value {
    let geometry = properties.remove(geometry_key).map(parse_geometry).unwrap_or(Value::Null);
    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": geometry,
    })
}

/// Non-object items are skipped.
pub fn to_feature_collection(items: Vec<Value>, geometry_key: &str, name: &str) -> Value {
    let features: Vec<Value> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(m) => Some(to_feature(m, geometry_key)),
            _ => None,
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "name": name,
        "crs": crs84(),
        "features": features,
    })
}

/// Flatten a Feature: its properties plus the geometry serialised as text under `geometry_key`.
pub fn from_feature(feature: &Value, geometry_key: &str) -> Result<Map<String, Value>, AppError> {
    if feature.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err(AppError::BadRequest("expected a GeoJSON Feature".into()));
    }
    let mut properties = match feature.get("properties") {
        Some(Value::Object(m)) => m.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err(AppError::BadRequest("feature properties must be an object".into())),
    };
    match feature.get("geometry") {
        None | Some(Value::Null) => {}
        Some(g @ Value::Object(_)) => {
            properties.insert(geometry_key.to_string(), Value::String(g.to_string()));
        }
        Some(_) => return Err(AppError::BadRequest("feature geometry must be an object".into())),
    }
    Ok(properties)
}

pub fn from_feature_collection(collection: &Value, geometry_key: &str) -> Result<Vec<Map<String, Value>>, AppError> {
    if collection.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return Err(AppError::BadRequest("expected a GeoJSON FeatureCollection".into()));
    }
    collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::BadRequest("FeatureCollection has no features array".into()))?
        .iter()
        .map(|f| from_feature(f, geometry_key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_feature_parses_stored_geometry() {
        let props = json!({"UID": "u1", "Name": "well", "Geometry": "{\"type\":\"Point\",\"coordinates\":[5.1,52.0]}"});
        let f = to_feature(props.as_object().cloned().unwrap(), DEFAULT_GEOMETRY_KEY);
        assert_eq!(
            f,
            json!({
                "type": "Feature",
                "properties": {"UID": "u1", "Name": "well"},
                "geometry": {"type": "Point", "coordinates": [5.1, 52.0]}
            })
        );
    }

    #[test]
    fn test_feature_without_geometry() {
        let f = to_feature(Map::new(), DEFAULT_GEOMETRY_KEY);
        assert_eq!(f["geometry"], Value::Null);
    }

    #[test]
    fn test_collection_is_named_with_crs() {
        let fc = to_feature_collection(vec![json!({"UID": "a"}), json!(3)], DEFAULT_GEOMETRY_KEY, "spatial_sources");
        assert_eq!(fc["name"], json!("spatial_sources"));
        assert_eq!(fc["crs"]["properties"]["name"], json!("urn:ogc:def:crs:OGC:1.3:CRS84"));
        assert_eq!(fc["features"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_from_feature_collection_serialises_geometry() {
        let fc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"Name": "a"}, "geometry": {"type": "Point", "coordinates": [1, 2]}},
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        });
        let rows = from_feature_collection(&fc, DEFAULT_GEOMETRY_KEY).unwrap();
        assert_eq!(rows.len(), 2);
        let geom: Value = serde_json::from_str(rows[0]["Geometry"].as_str().unwrap()).unwrap();
        assert_eq!(geom, json!({"type": "Point", "coordinates": [1, 2]}));
        assert!(rows[1].is_empty());
    }

    #[test]
    fn test_rejects_wrong_type() {
        assert!(from_feature(&json!({"type": "Point"}), DEFAULT_GEOMETRY_KEY).is_err());
        assert!(from_feature_collection(&json!({"type": "Feature"}), DEFAULT_GEOMETRY_KEY).is_err());
    }
}

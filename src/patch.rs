//! JSON-patch style updates over a flat property object, and the diff that keeps writes minimal.
//!
//! `replace` behaves like `add`; `remove` stores an explicit null.

use crate::error::AppError;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Body of an update: a patch document or a plain partial property object.
#[derive(Clone, Debug)]
pub enum UpdateDocument {
    Patch(Vec<PatchOp>),
    Properties(Map<String, Value>),
}

impl UpdateDocument {
    pub fn from_json(body: Value) -> Result<Self, AppError> {
        match body {
            Value::Array(_) => serde_json::from_value(body)
                .map(UpdateDocument::Patch)
                .map_err(|e| AppError::BadRequest(format!("invalid patch document: {}", e))),
            Value::Object(m) => Ok(UpdateDocument::Properties(m)),
            _ => Err(AppError::BadRequest("update body must be a patch array or an object".into())),
        }
    }

    /// Candidate state: the patch applied to `current`, or the supplied properties over it.
    pub fn apply_to(&self, current: &Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        match self {
            UpdateDocument::Patch(ops) => apply(current, ops),
            UpdateDocument::Properties(props) => {
                let mut out = current.clone();
                for (k, v) in props {
                    out.insert(k.clone(), v.clone());
                }
                Ok(out)
            }
        }
    }
}

/// Split a JSON pointer into unescaped tokens (`~1` → `/`, `~0` → `~`).
pub fn parse_pointer(path: &str) -> Result<Vec<String>, AppError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| AppError::BadRequest(format!("invalid patch path: '{}'", path)))?;
    Ok(rest.split('/').map(|t| t.replace("~1", "/").replace("~0", "~")).collect())
}

/// Apply `ops` in order to a copy of `base`.
pub fn apply(base: &Map<String, Value>, ops: &[PatchOp]) -> Result<Map<String, Value>, AppError> {
    let mut doc = Value::Object(base.clone());
    for op in ops {
        let tokens = parse_pointer(&op.path)?;
        let value = match op.op {
            PatchKind::Add | PatchKind::Replace => op.value.clone(),
            PatchKind::Remove => Value::Null,
        };
        set_path(&mut doc, &tokens, value, &op.path)?;
    }
    match doc {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("patch replaced the whole document".into())),
    }
}

fn set_path(target: &mut Value, tokens: &[String], value: Value, path: &str) -> Result<(), AppError> {
    let Some((head, rest)) = tokens.split_first() else {
        *target = value;
        return Ok(());
    };
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    match target {
        Value::Object(m) => {
            if rest.is_empty() {
                m.insert(head.clone(), value);
                Ok(())
            } else {
                set_path(m.entry(head.clone()).or_insert(Value::Null), rest, value, path)
            }
        }
        Value::Array(items) => {
            if head == "-" && rest.is_empty() {
                items.push(value);
                return Ok(());
            }
            let idx: usize = head
                .parse()
                .map_err(|_| AppError::BadRequest(format!("invalid array index in '{}'", path)))?;
            let len = items.len();
            match items.get_mut(idx) {
                Some(slot) => set_path(slot, rest, value, path),
                None if idx == len && rest.is_empty() => {
                    items.push(value);
                    Ok(())
                }
                None => Err(AppError::BadRequest(format!("array index out of range in '{}'", path))),
            }
        }
        _ => Err(AppError::BadRequest(format!("cannot descend into scalar at '{}'", path))),
    }
}

/// Equality that tolerates the stored representation: a GeoJSON string equals the object it
/// encodes, and numbers compare by value at any depth.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| values_equal(v, w)))
        }
        (Value::String(s), other @ (Value::Object(_) | Value::Array(_)))
        | (other @ (Value::Object(_) | Value::Array(_)), Value::String(s)) => parse_container(s)
            .map(|parsed| values_equal(&parsed, other))
            .unwrap_or(false),
        (Value::String(x), Value::String(y)) => {
            x == y
                || match (parse_container(x), parse_container(y)) {
                    (Some(p), Some(q)) => values_equal(&p, &q),
                    _ => false,
                }
        }
        _ => a == b,
    }
}

/// A string holding a JSON object or array, parsed.
fn parse_container(s: &str) -> Option<Value> {
    let t = s.trim_start();
    if !(t.starts_with('{') || t.starts_with('[')) {
        return None;
    }
    serde_json::from_str(t).ok()
}

/// Top-level keys of `candidate` whose value differs from `current` (absent counts as null).
pub fn changed_properties(current: &Map<String, Value>, candidate: &Map<String, Value>) -> Map<String, Value> {
    candidate
        .iter()
        .filter(|(k, v)| !values_equal(current.get(*k).unwrap_or(&Value::Null), v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn ops(v: Value) -> Vec<PatchOp> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_replace_add_and_remove() {
        let base = map(json!({"Name": "a", "Description": "d"}));
        let out = apply(
            &base,
            &ops(json!([
                {"op": "replace", "path": "/Name", "value": "b"},
                {"op": "add", "path": "/Tags", "value": ["x"]},
                {"op": "remove", "path": "/Description"}
            ])),
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"Name": "b", "Description": null, "Tags": ["x"]}));
    }

    #[test]
    fn test_pointer_unescaping_and_nesting() {
        assert_eq!(parse_pointer("/a~1b/c~0d").unwrap(), vec!["a/b".to_string(), "c~d".to_string()]);
        let out = apply(&Map::new(), &ops(json!([{"op": "add", "path": "/Meta/source", "value": 1}]))).unwrap();
        assert_eq!(Value::Object(out), json!({"Meta": {"source": 1}}));
        assert!(parse_pointer("Name").is_err());
    }

    #[test]
    fn test_array_index_and_append() {
        let base = map(json!({"Tags": ["a", "b"]}));
        let out = apply(
            &base,
            &ops(json!([
                {"op": "replace", "path": "/Tags/0", "value": "x"},
                {"op": "add", "path": "/Tags/-", "value": "c"},
                {"op": "add", "path": "/Tags/3", "value": "d"}
            ])),
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"Tags": ["x", "b", "c", "d"]}));
        let err = apply(&base, &ops(json!([{"op": "add", "path": "/Tags/5", "value": "z"}]))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_unsupported_op_rejected() {
        let err = UpdateDocument::from_json(json!([{"op": "move", "from": "/a", "path": "/b"}])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(UpdateDocument::from_json(json!("x")).is_err());
    }

    #[test]
    fn test_identical_patch_has_empty_diff() {
        let current = map(json!({"UID": "u", "Name": "same-name"}));
        let doc = UpdateDocument::from_json(json!([{"op": "replace", "path": "/Name", "value": "same-name"}])).unwrap();
        let candidate = doc.apply_to(&current).unwrap();
        assert!(changed_properties(&current, &candidate).is_empty());
    }

    #[test]
    fn test_diff_only_changed_keys() {
        let current = map(json!({"Name": "a", "Number": 3, "Description": null}));
        let candidate = map(json!({"Name": "a", "Number": 3.0, "Description": "new", "Extra": null}));
        let diff = changed_properties(&current, &candidate);
        assert_eq!(Value::Object(diff), json!({"Description": "new"}));
    }

    #[test]
    fn test_geometry_string_equals_object() {
        let stored = json!("{\"type\":\"Point\",\"coordinates\":[1,2]}");
        assert!(values_equal(&stored, &json!({"type": "Point", "coordinates": [1, 2]})));
        assert!(!values_equal(&stored, &json!({"type": "Point", "coordinates": [2, 1]})));
        assert!(values_equal(&stored, &json!("{ \"coordinates\": [1.0, 2.0], \"type\": \"Point\" }")));
        assert!(!values_equal(&json!("{not json"), &json!("{not json!")));
    }
}

//! HTTP handlers for one resource, generic over its hooks.

use crate::error::AppError;
use crate::extractors::ProcessId;
use crate::patch::UpdateDocument;
use crate::relation::EntityKind;
use crate::response::ItemResponse;
use crate::service::query::{comma_list, strings_of};
use crate::service::{Envelope, ItemQuery, ResourceHandler, ResourceHooks};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub type Shared<H> = State<Arc<ResourceHandler<H>>>;

#[derive(Debug, Default, Deserialize)]
pub struct ShapeParams {
    #[serde(default)]
    pub embed: Option<String>,
    /// `feature` when the create body is a GeoJSON Feature.
    #[serde(default)]
    pub envelope: Option<String>,
}

impl ShapeParams {
    fn embed(&self) -> Vec<String> {
        self.embed.as_deref().map(comma_list).unwrap_or_default()
    }

    fn envelope(&self) -> Result<Envelope, AppError> {
        match self.envelope.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("properties") => Ok(Envelope::Properties),
            Some("feature") => Ok(Envelope::Feature),
            Some(other) => Err(AppError::BadRequest(format!("unknown envelope '{}'", other))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetachParams {
    /// Also delete the related item.
    #[serde(default)]
    pub delete: bool,
}

/// Tag list from `["a", "b"]` or `{"Tags": ["a", "b"]}`.
fn tag_list(body: &Value) -> Result<Vec<String>, AppError> {
    let list = match body {
        Value::Object(m) => m
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("tags"))
            .map(|(_, v)| v)
            .ok_or_else(|| AppError::BadRequest("body must contain 'Tags'".into()))?,
        other => other,
    };
    let tags = strings_of(list);
    if tags.is_empty() {
        return Err(AppError::Validation("no tags given".into()));
    }
    Ok(tags)
}

fn changed(changed: bool) -> Json<Value> {
    Json(json!({ "changed": changed }))
}

pub async fn list<H: ResourceHooks>(
    State(handler): Shared<H>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let query = ItemQuery::from_params(&params)?;
    Ok(Json(handler.query_items(&query).await?))
}

pub async fn read<H: ResourceHooks>(
    State(handler): Shared<H>,
    Path(id): Path<String>,
    Query(shape): Query<ShapeParams>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(handler.query_item_by_uid(&id, &shape.embed()).await?))
}

pub async fn create<H: ResourceHooks>(
    State(handler): Shared<H>,
    process: ProcessId,
    Query(shape): Query<ShapeParams>,
    Json(body): Json<Value>,
) -> Result<ItemResponse, AppError> {
    handler
        .create_new_item_content(body, shape.envelope()?, &shape.embed(), process.as_deref(), None)
        .await
}

pub async fn import<H: ResourceHooks>(
    State(handler): Shared<H>,
    process: ProcessId,
    Query(shape): Query<ShapeParams>,
    Json(body): Json<Value>,
) -> Result<ItemResponse, AppError> {
    handler
        .import_feature_collection(body, &shape.embed(), process.as_deref(), None)
        .await
}

pub async fn update<H: ResourceHooks>(
    State(handler): Shared<H>,
    process: ProcessId,
    Path(id): Path<String>,
    Query(shape): Query<ShapeParams>,
    Json(body): Json<Value>,
) -> Result<ItemResponse, AppError> {
    let doc = UpdateDocument::from_json(body)?;
    handler
        .update_item(&id, doc, &shape.embed(), process.as_deref(), None)
        .await
}

pub async fn delete<H: ResourceHooks>(
    State(handler): Shared<H>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, AppError> {
    if handler.delete_item(&id, params.force, None).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("{} {}", handler.hooks().kind(), id)))
    }
}

pub async fn attach_tags<H: ResourceHooks>(
    State(handler): Shared<H>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tags = tag_list(&body)?;
    Ok(changed(handler.attach_tags(&id, &tags, None).await?))
}

pub async fn remove_tags<H: ResourceHooks>(
    State(handler): Shared<H>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tags = tag_list(&body)?;
    Ok(changed(handler.remove_tags(&id, &tags, None).await?))
}

pub async fn detach<H: ResourceHooks>(
    State(handler): Shared<H>,
    Path((id, kind, related_id)): Path<(String, String, String)>,
    Query(params): Query<DetachParams>,
) -> Result<Json<Value>, AppError> {
    let kind: EntityKind = kind.parse().map_err(AppError::BadRequest)?;
    Ok(changed(
        handler
            .detach_relation(&id, &related_id, kind, params.delete, None)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list_shapes() {
        assert_eq!(tag_list(&json!(["a", "b"])).unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(tag_list(&json!({"tags": "flood"})).unwrap(), vec!["flood".to_string()]);
        assert!(matches!(tag_list(&json!([])), Err(AppError::Validation(_))));
        assert!(matches!(tag_list(&json!({"x": 1})), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_envelope_param() {
        let shape = ShapeParams {
            embed: Some("Projects, Tags".into()),
            envelope: Some("Feature".into()),
        };
        assert_eq!(shape.envelope().unwrap(), Envelope::Feature);
        assert_eq!(shape.embed(), vec!["Projects".to_string(), "Tags".to_string()]);
        assert_eq!(ShapeParams::default().envelope().unwrap(), Envelope::Properties);
        let bad = ShapeParams {
            embed: None,
            envelope: Some("xml".into()),
        };
        assert!(bad.envelope().is_err());
    }
}

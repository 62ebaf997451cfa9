//! Lifecycle tests against a live PostGIS database. Skipped unless `DATABASE_URL` is set.

use async_trait::async_trait;
use geodata_sdk::patch::values_equal;
use geodata_sdk::relation::Link;
use geodata_sdk::table::{Record, ERROR_MARKER};
use geodata_sdk::{
    ensure_tables, AppError, AppState, EntityKind, Envelope, ItemQuery, JunctionProperty, QueryExecutor,
    ResourceHandler, ResourceHooks, TableId, TagProperty, UpdateDocument,
};
use serde_json::{json, Map, Value};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use tokio::sync::OnceCell;

const SCHEMA: &str = "geodata_test";
const REL: &str = "SpatialSourceProject";

static SETUP: OnceCell<()> = OnceCell::const_new();

const PROJECTS: JunctionProperty = JunctionProperty {
    property: "Projects",
    related: EntityKind::Project,
    relation_type: REL,
    reverse: false,
};
const TAGS: TagProperty = TagProperty { property: "Tags" };

async fn state() -> Option<AppState> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    let ddl_url = url.clone();
    SETUP
        .get_or_init(|| async move {
            let pool = PgPoolOptions::new().max_connections(1).connect(&ddl_url).await.unwrap();
            ensure_tables(&pool, SCHEMA).await.unwrap();
            pool.close().await;
        })
        .await;
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.unwrap();
    let state = AppState::new(pool.clone(), SCHEMA);
    state.catalog.initialize(&pool).await.unwrap();
    Some(state)
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

fn random_id() -> Value {
    Value::String(uuid::Uuid::new_v4().to_string())
}

fn props(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn id_str(v: &Value) -> String {
    v.as_str().unwrap().to_string()
}

struct Sources;

#[async_trait]
impl ResourceHooks for Sources {
    fn table_id(&self) -> TableId {
        TableId::SpatialSource
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SpatialSource
    }

    fn relation_properties(&self) -> &[&'static str] {
        &["Projects", "Tags"]
    }

    async fn prepare_item(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        record: &mut Record,
        embed: &[String],
    ) -> Result<(), AppError> {
        PROJECTS.embed(state, &mut *db, record, embed).await?;
        TAGS.embed(state, db, record, embed).await
    }

    async fn update_relations(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        id: &Value,
        properties: &Map<String, Value>,
        _is_new: bool,
    ) -> Result<bool, AppError> {
        let projects = PROJECTS.persist(state, &mut *db, self.kind(), id, properties).await?;
        let tags = TAGS.persist(state, db, self.kind(), id, properties).await?;
        Ok(projects || tags)
    }
}

/// Fails every relation write, after the core row was already updated.
struct FailingRelations;

#[async_trait]
impl ResourceHooks for FailingRelations {
    fn table_id(&self) -> TableId {
        TableId::SpatialSource
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SpatialSource
    }

    fn relation_properties(&self) -> &[&'static str] {
        &["Projects"]
    }

    async fn update_relations(
        &self,
        _state: &AppState,
        _db: &mut dyn QueryExecutor,
        _id: &Value,
        _properties: &Map<String, Value>,
        _is_new: bool,
    ) -> Result<bool, AppError> {
        Err(AppError::Validation("relation write refused".into()))
    }
}

/// Embedding fails for one item only.
struct FailsForOne {
    id: Value,
}

#[async_trait]
impl ResourceHooks for FailsForOne {
    fn table_id(&self) -> TableId {
        TableId::SpatialSource
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SpatialSource
    }

    async fn prepare_item(
        &self,
        _state: &AppState,
        _db: &mut dyn QueryExecutor,
        record: &mut Record,
        _embed: &[String],
    ) -> Result<(), AppError> {
        if record.primary_key == self.id {
            return Err(AppError::Validation("embedding failed".into()));
        }
        record.set("Checked", json!(true));
        Ok(())
    }
}

struct Projects;

#[async_trait]
impl ResourceHooks for Projects {
    fn table_id(&self) -> TableId {
        TableId::Project
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Project
    }
}

async fn new_project(state: &AppState) -> Value {
    let table = state.table(TableId::Project).await.unwrap();
    let mut db = state.pool.clone();
    table.insert(&mut db, &props(json!({"Name": unique("project")}))).await.unwrap()
}

async fn xmin(state: &AppState, id: &Value) -> String {
    let sql = format!("SELECT xmin::text FROM \"{}\".\"spatial_sources\" WHERE uid = $1::uuid", SCHEMA);
    let row: (String,) = sqlx::query_as(&sql).bind(id_str(id)).fetch_one(&state.pool).await.unwrap();
    row.0
}

#[tokio::test]
async fn test_insert_then_get_round_trips() {
    let Some(state) = state().await else { return };
    let mut db = state.pool.clone();

    let projects = state.table(TableId::Project).await.unwrap();
    let p = props(json!({"Name": unique("p1"), "Description": null}));
    let id = projects.insert(&mut db, &p).await.unwrap();
    let got = projects.require_by_id(&mut db, &id).await.unwrap().to_json();
    assert_eq!(got["Name"], p["Name"]);
    assert!(got.get("Description").is_none());
    assert_eq!(got["UID"], id);

    let sources = state.table(TableId::SpatialSource).await.unwrap();
    let geometry = json!({"type": "Point", "coordinates": [8.5, 47.4]});
    let p = props(json!({"Name": unique("s1"), "Geometry": geometry.to_string(), "ParentUID": null}));
    let id = sources.insert(&mut db, &p).await.unwrap();
    let got = sources.require_by_id(&mut db, &id).await.unwrap().to_json();
    assert_eq!(got["Name"], p["Name"]);
    assert!(values_equal(&got["Geometry"], &geometry));
    assert!(got.get("ParentUID").is_none());
    assert!(got["Number"].as_i64().unwrap() >= 1);
}

#[tokio::test]
async fn test_replace_links_leaves_no_residue() {
    let Some(state) = state().await else { return };
    let mut db = state.pool.clone();
    let x = random_id();
    let (a, b, c) = (random_id(), random_id(), random_id());

    let changed = state
        .relations
        .replace_links(&mut db, &x, EntityKind::SpatialSource, &[a.clone(), b, c], EntityKind::Project, REL, false)
        .await
        .unwrap();
    assert!(changed);
    state
        .relations
        .replace_links(&mut db, &x, EntityKind::SpatialSource, &[a.clone()], EntityKind::Project, REL, false)
        .await
        .unwrap();
    let ids = state
        .relations
        .query_related_ids(&mut db, &x, Some(EntityKind::Project), Some(REL), false)
        .await
        .unwrap();
    assert_eq!(ids, vec![a.clone()]);

    let unchanged = state
        .relations
        .replace_links(&mut db, &x, EntityKind::SpatialSource, &[a], EntityKind::Project, REL, false)
        .await
        .unwrap();
    assert!(!unchanged);
}

#[tokio::test]
async fn test_failed_relation_update_rolls_back_core_row() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let created = sources
        .create_new_item_content(json!({"Name": "before"}), Envelope::Properties, &[], None, None)
        .await
        .unwrap();
    let id = created.body["UID"].clone();

    let failing = ResourceHandler::new(state.clone(), FailingRelations);
    let project = new_project(&state).await;
    let doc = UpdateDocument::from_json(json!({"Name": "after", "Projects": [project]})).unwrap();
    let err = failing.update_item(&id_str(&id), doc, &[], None, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let current = sources.query_item_by_uid(&id_str(&id), &[]).await.unwrap();
    assert_eq!(current["Name"], json!("before"));
}

#[tokio::test]
async fn test_identical_patch_writes_nothing() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let created = sources
        .create_new_item_content(json!({"Name": "same-name"}), Envelope::Properties, &[], None, None)
        .await
        .unwrap();
    let id = created.body["UID"].clone();
    let before = xmin(&state, &id).await;

    let doc = UpdateDocument::from_json(json!([{"op": "replace", "path": "/Name", "value": "same-name"}])).unwrap();
    let res = sources.update_item(&id_str(&id), doc, &[], None, None).await.unwrap();
    assert_eq!(res.status, axum::http::StatusCode::OK);
    assert_eq!(res.body["Name"], json!("same-name"));
    assert_eq!(xmin(&state, &id).await, before);
}

#[tokio::test]
async fn test_link_direction_symmetry() {
    let Some(state) = state().await else { return };
    let mut db = state.pool.clone();
    let (a, b) = (random_id(), random_id());
    let link = Link::new(a.clone(), EntityKind::SpatialSource, b.clone(), EntityKind::Project, "rel");
    state.relations.create_link(&mut db, &link).await.unwrap();

    let forward = state
        .relations
        .query_related_ids(&mut db, &a, Some(EntityKind::Project), Some("rel"), false)
        .await
        .unwrap();
    assert_eq!(forward, vec![b.clone()]);
    let backward = state
        .relations
        .query_related_ids(&mut db, &b, Some(EntityKind::SpatialSource), Some("rel"), true)
        .await
        .unwrap();
    assert_eq!(backward, vec![a]);
}

#[tokio::test]
async fn test_create_embeds_projects() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let p1 = new_project(&state).await;
    let embed = vec!["Projects".to_string()];
    let created = sources
        .create_new_item_content(json!({"Name": unique("a"), "Projects": [p1.clone()]}), Envelope::Properties, &embed, None, None)
        .await
        .unwrap();
    assert_eq!(created.status, axum::http::StatusCode::CREATED);
    assert_eq!(created.body["Projects"], json!([{"UID": p1.clone()}]));

    let id = id_str(&created.body["UID"]);
    let read = sources.query_item_by_uid(&id, &embed).await.unwrap();
    assert_eq!(read["Projects"], json!([{"UID": p1}]));
}

#[tokio::test]
async fn test_delete_removes_links_first() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let project = new_project(&state).await;
    let embed = vec!["Tags".to_string()];
    let created = sources
        .create_new_item_content(
            json!({"Name": unique("c"), "Projects": [project], "Tags": ["Flood ", "flood", "river"]}),
            Envelope::Properties,
            &embed,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(created.body["Tags"], json!(["flood", "river"]));
    let id = created.body["UID"].clone();

    assert!(sources.delete_item(&id_str(&id), false, None).await.unwrap());
    let mut db = state.pool.clone();
    let outgoing = state.relations.query_related_ids(&mut db, &id, None, None, false).await.unwrap();
    let incoming = state.relations.query_related_ids(&mut db, &id, None, None, true).await.unwrap();
    assert!(outgoing.is_empty());
    assert!(incoming.is_empty());
    assert!(!sources.delete_item(&id_str(&id), false, None).await.unwrap());
}

#[tokio::test]
async fn test_linked_item_needs_force_delete() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let projects = ResourceHandler::new(state.clone(), Projects);
    let project = new_project(&state).await;
    sources
        .create_new_item_content(json!({"Name": unique("d"), "Projects": [project.clone()]}), Envelope::Properties, &[], None, None)
        .await
        .unwrap();

    let err = projects.delete_item(&id_str(&project), false, None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(projects.delete_item(&id_str(&project), true, None).await.unwrap());
}

#[tokio::test]
async fn test_caller_transaction_is_left_to_caller() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let mut ctx = state.tx.begin().await.unwrap();
    let created = sources
        .create_new_item_content(json!({"Name": unique("tx")}), Envelope::Properties, &[], None, Some(&mut ctx))
        .await
        .unwrap();
    let id = created.body["UID"].clone();
    assert!(ctx.state().accepts_commit());
    state.tx.rollback(&mut ctx).await;

    let err = sources.query_item_by_uid(&id_str(&id), &[]).await.unwrap_err();
    assert!(err.is_not_found());
}

/// Two `replace_links` calls on one item without a shared transaction interleave their
/// delete and insert statements, so the final set may hold ids from both calls.
#[tokio::test]
async fn test_concurrent_replace_links_race() {
    let Some(state) = state().await else { return };
    let x = random_id();
    let (a, b) = (random_id(), random_id());
    let mut db1 = state.pool.clone();
    let mut db2 = state.pool.clone();
    let first = state
        .relations
        .replace_links(&mut db1, &x, EntityKind::SpatialSource, std::slice::from_ref(&a), EntityKind::Project, REL, false);
    let second = state
        .relations
        .replace_links(&mut db2, &x, EntityKind::SpatialSource, std::slice::from_ref(&b), EntityKind::Project, REL, false);
    let (r1, r2) = tokio::join!(first, second);
    r1.unwrap();
    r2.unwrap();

    let mut db = state.pool.clone();
    let ids = state
        .relations
        .query_related_ids(&mut db, &x, Some(EntityKind::Project), Some(REL), false)
        .await
        .unwrap();
    assert!(!ids.is_empty());
    assert!(ids.iter().all(|id| *id == a || *id == b));

    state
        .relations
        .replace_links(&mut db, &x, EntityKind::SpatialSource, std::slice::from_ref(&a), EntityKind::Project, REL, false)
        .await
        .unwrap();
    let ids = state
        .relations
        .query_related_ids(&mut db, &x, Some(EntityKind::Project), Some(REL), false)
        .await
        .unwrap();
    assert_eq!(ids, vec![a]);
}

#[tokio::test]
async fn test_element_patch_appends_to_relations() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let (p1, p2) = (new_project(&state).await, new_project(&state).await);
    let (t1, t2) = (unique("a"), unique("b"));
    let created = sources
        .create_new_item_content(
            json!({"Name": unique("e"), "Projects": [p1.clone()], "Tags": [t1.clone()]}),
            Envelope::Properties,
            &[],
            None,
            None,
        )
        .await
        .unwrap();
    let id = id_str(&created.body["UID"]);

    let doc = UpdateDocument::from_json(json!([
        {"op": "add", "path": "/Projects/-", "value": p2.clone()},
        {"op": "add", "path": "/Tags/-", "value": t2.clone()}
    ]))
    .unwrap();
    let embed = vec!["Projects".to_string(), "Tags".to_string()];
    let res = sources.update_item(&id, doc, &embed, None, None).await.unwrap();
    assert_eq!(res.body["Projects"], json!([{"UID": p1.clone()}, {"UID": p2}]));
    assert_eq!(res.body["Tags"], json!([t1.clone(), t2]));

    let doc = UpdateDocument::from_json(json!([{"op": "remove", "path": "/Projects/1"}])).unwrap();
    let res = sources.update_item(&id, doc, &embed, None, None).await.unwrap();
    assert_eq!(res.body["Projects"], json!([{"UID": p1}]));
    assert_eq!(res.body["Tags"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_element_patch_without_embedded_relation_is_rejected() {
    let Some(state) = state().await else { return };
    let sources = ResourceHandler::new(state.clone(), Sources);
    let project = new_project(&state).await;
    let created = sources
        .create_new_item_content(json!({"Name": unique("f"), "Projects": [project.clone()]}), Envelope::Properties, &[], None, None)
        .await
        .unwrap();
    let id = id_str(&created.body["UID"]);

    let plain = ResourceHandler::new(state.clone(), FailingRelations);
    let doc = UpdateDocument::from_json(json!([{"op": "add", "path": "/Projects/-", "value": new_project(&state).await}])).unwrap();
    let err = plain.update_item(&id, doc, &[], None, None).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let embed = vec!["Projects".to_string()];
    let read = sources.query_item_by_uid(&id, &embed).await.unwrap();
    assert_eq!(read["Projects"], json!([{"UID": project}]));
}

#[tokio::test]
async fn test_list_marks_row_whose_embedding_failed() {
    let Some(state) = state().await else { return };
    let table = state.table(TableId::SpatialSource).await.unwrap();
    let mut db = state.pool.clone();
    let (n1, n2) = (unique("ok"), unique("bad"));
    table.insert(&mut db, &props(json!({"Name": n1.clone()}))).await.unwrap();
    let bad = table.insert(&mut db, &props(json!({"Name": n2.clone()}))).await.unwrap();

    let handler = ResourceHandler::new(state.clone(), FailsForOne { id: bad.clone() });
    let params: HashMap<String, String> = [("Name".to_string(), format!("{},{}", n1, n2))].into_iter().collect();
    let listed = handler.query_items(&ItemQuery::from_params(&params).unwrap()).await.unwrap();
    let rows = listed.as_array().unwrap();
    assert_eq!(rows.len(), 2);

    let failed = rows.iter().find(|r| r["UID"] == bad).unwrap();
    assert!(failed[ERROR_MARKER].as_str().unwrap().contains("embedding failed"));
    assert_eq!(failed["Name"], json!(n2));
    let ok = rows.iter().find(|r| r["UID"] != bad).unwrap();
    assert!(ok.get(ERROR_MARKER).is_none());
    assert_eq!(ok["Name"], json!(n1));
    assert_eq!(ok["Checked"], json!(true));
}

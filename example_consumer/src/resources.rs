//! Concrete resources: spatial sources (GeoJSON, projects, tags, child sources) and projects.

use async_trait::async_trait;
use geodata_sdk::geojson::{to_feature, to_feature_collection, DEFAULT_GEOMETRY_KEY};
use geodata_sdk::sql::Clause;
use geodata_sdk::table::Record;
use geodata_sdk::{AppError, AppState, EntityKind, JunctionProperty, Payload, QueryExecutor, ResourceHooks, TableId, TagProperty};
use serde_json::{Map, Value};

const SOURCE_PROJECT: &str = "SpatialSourceProject";

const SOURCE_PROJECTS: JunctionProperty = JunctionProperty {
    property: "Projects",
    related: EntityKind::Project,
    relation_type: SOURCE_PROJECT,
    reverse: false,
};

const PROJECT_SOURCES: JunctionProperty = JunctionProperty {
    property: "SpatialSources",
    related: EntityKind::SpatialSource,
    relation_type: SOURCE_PROJECT,
    reverse: true,
};

const TAGS: TagProperty = TagProperty { property: "Tags" };

const CHILDREN: &str = "Children";
const PARENT_COLUMN: &str = "parent_uid";

fn wants(embed: &[String], property: &str) -> bool {
    embed.iter().any(|e| e.eq_ignore_ascii_case(property))
}

/// One row in the activity log per committed write.
async fn log_activity(
    state: &AppState,
    kind: EntityKind,
    id: &Value,
    is_new: bool,
    process_id: Option<&str>,
) -> Result<(), AppError> {
    let log = state.table(TableId::ActivityLog).await?;
    let mut entry = Map::new();
    entry.insert("item_uid".into(), id.clone());
    entry.insert("item_type".into(), Value::String(kind.as_str().into()));
    entry.insert("action".into(), Value::String(if is_new { "created" } else { "updated" }.into()));
    entry.insert("process_id".into(), process_id.map_or(Value::Null, |p| Value::String(p.into())));
    let mut db = state.pool.clone();
    log.insert(&mut db, &entry).await?;
    Ok(())
}

pub struct SpatialSourceHooks;

#[async_trait]
impl ResourceHooks for SpatialSourceHooks {
    fn table_id(&self) -> TableId {
        TableId::SpatialSource
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SpatialSource
    }

    fn relation_properties(&self) -> &[&'static str] {
        &["Projects", "Tags"]
    }

    fn geometry_key(&self) -> Option<&'static str> {
        Some(DEFAULT_GEOMETRY_KEY)
    }

    fn prepare_query_clauses(
        &self,
        state: &AppState,
        filters: &Map<String, Value>,
        clauses: &mut Vec<Clause>,
    ) -> Result<(), AppError> {
        let kind = self.kind();
        clauses.extend(SOURCE_PROJECTS.clause(state, kind, filters)?);
        clauses.extend(TAGS.clause(state, kind, filters)?);
        Ok(())
    }

    async fn prepare_item(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        record: &mut Record,
        embed: &[String],
    ) -> Result<(), AppError> {
        SOURCE_PROJECTS.embed(state, &mut *db, record, embed).await?;
        TAGS.embed(state, &mut *db, record, embed).await?;
        if wants(embed, CHILDREN) {
            state
                .relations
                .set_direct_relations_as_property(db, record, TableId::SpatialSource, PARENT_COLUMN, CHILDREN)
                .await?;
        }
        Ok(())
    }

    async fn update_relations(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        id: &Value,
        properties: &Map<String, Value>,
        _is_new: bool,
    ) -> Result<bool, AppError> {
        let projects = SOURCE_PROJECTS.persist(state, &mut *db, self.kind(), id, properties).await?;
        let tags = TAGS.persist(state, db, self.kind(), id, properties).await?;
        Ok(projects || tags)
    }

    async fn post_processing(
        &self,
        state: &AppState,
        id: &Value,
        _properties: &Map<String, Value>,
        is_new: bool,
        process_id: Option<&str>,
    ) -> Result<(), AppError> {
        log_activity(state, self.kind(), id, is_new, process_id).await
    }

    fn publish_result(&self, payload: Payload) -> Value {
        match payload {
            Payload::One(Value::Object(m)) => to_feature(m, DEFAULT_GEOMETRY_KEY),
            Payload::One(other) => other,
            Payload::Many(items) => to_feature_collection(items, DEFAULT_GEOMETRY_KEY, "spatial_sources"),
        }
    }
}

pub struct ProjectHooks;

#[async_trait]
impl ResourceHooks for ProjectHooks {
    fn table_id(&self) -> TableId {
        TableId::Project
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Project
    }

    fn relation_properties(&self) -> &[&'static str] {
        &["SpatialSources", "Tags"]
    }

    fn prepare_query_clauses(
        &self,
        state: &AppState,
        filters: &Map<String, Value>,
        clauses: &mut Vec<Clause>,
    ) -> Result<(), AppError> {
        clauses.extend(PROJECT_SOURCES.clause(state, self.kind(), filters)?);
        clauses.extend(TAGS.clause(state, self.kind(), filters)?);
        Ok(())
    }

    async fn prepare_item(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        record: &mut Record,
        embed: &[String],
    ) -> Result<(), AppError> {
        PROJECT_SOURCES.embed(state, &mut *db, record, embed).await?;
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
        let sources = PROJECT_SOURCES.persist(state, &mut *db, self.kind(), id, properties).await?;
        let tags = TAGS.persist(state, db, self.kind(), id, properties).await?;
        Ok(sources || tags)
    }

    async fn post_processing(
        &self,
        state: &AppState,
        id: &Value,
        _properties: &Map<String, Value>,
        is_new: bool,
        process_id: Option<&str>,
    ) -> Result<(), AppError> {
        log_activity(state, self.kind(), id, is_new, process_id).await
    }
}

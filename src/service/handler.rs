//! Generic resource lifecycle: validate, persist, relate, commit, post-process, reload, publish.

use super::hooks::{Payload, ResourceHooks};
use super::query::ItemQuery;
use super::validation::{normalize_geometry, RequestValidator};
use crate::error::AppError;
use crate::geojson;
use crate::patch::{changed_properties, parse_pointer, UpdateDocument};
use crate::relation::EntityKind;
use crate::response::ItemResponse;
use crate::sql::{Clause, Filter, Select};
use crate::state::AppState;
use crate::table::{id_text, Record, Table};
use crate::tx::{QueryExecutor, TxContext, TxScope};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// How a create body is wrapped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Envelope {
    /// A flat property object.
    #[default]
    Properties,
    /// A GeoJSON Feature; its geometry lands in the resource's geometry column.
    Feature,
}

struct UpdateOutcome {
    written: bool,
    relations_changed: bool,
    properties: Map<String, Value>,
}

pub struct ResourceHandler<H: ResourceHooks> {
    state: AppState,
    hooks: H,
}

impl<H: ResourceHooks> ResourceHandler<H> {
    pub fn new(state: AppState, hooks: H) -> Self {
        ResourceHandler { state, hooks }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub async fn table(&self) -> Result<Arc<Table>, AppError> {
        self.state.table(self.hooks.table_id()).await
    }

    fn is_relation_property(&self, key: &str) -> bool {
        self.hooks
            .relation_properties()
            .iter()
            .any(|p| p.eq_ignore_ascii_case(key))
    }

    /// Split into core columns and relation properties; other keys are dropped.
    fn split(&self, table: &Table, properties: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
        let mut core = Map::new();
        let mut relations = Map::new();
        for (k, v) in properties {
            if self.is_relation_property(&k) {
                relations.insert(k, v);
            } else if let Some(col) = table.column(&k) {
                core.insert(col.display_name.clone(), v);
            }
        }
        normalize_geometry(table, &mut core);
        (core, relations)
    }

    fn flatten(&self, body: Value, envelope: Envelope) -> Result<Map<String, Value>, AppError> {
        match (envelope, body) {
            (Envelope::Properties, Value::Object(m)) => Ok(m),
            (Envelope::Properties, _) => Err(AppError::BadRequest("body must be a JSON object".into())),
            (Envelope::Feature, body) => {
                let key = self.geometry_key()?;
                geojson::from_feature(&body, key)
            }
        }
    }

    fn geometry_key(&self) -> Result<&'static str, AppError> {
        self.hooks
            .geometry_key()
            .ok_or_else(|| AppError::BadRequest(format!("{} has no geometry", self.hooks.kind())))
    }

    async fn insert_one(
        &self,
        ctx: &mut TxContext,
        table: &Table,
        core: &Map<String, Value>,
        relations: &Map<String, Value>,
    ) -> Result<Value, AppError> {
        let id = table.insert(&mut *ctx, core).await?;
        if id.is_null() {
            return Err(AppError::Validation(format!("{} has no single-column primary key", table.id)));
        }
        if !relations.is_empty() {
            self.hooks
                .update_relations(&self.state, &mut *ctx, &id, relations, true)
                .await?;
        }
        Ok(id)
    }

    async fn post_process(&self, id: &Value, properties: &Map<String, Value>, is_new: bool, process_id: Option<&str>) {
        if let Err(e) = self
            .hooks
            .post_processing(&self.state, id, properties, is_new, process_id)
            .await
        {
            tracing::warn!(kind = %self.hooks.kind(), id = %id_text(id), error = %e, "post-processing failed");
        }
    }

    async fn load_record(
        &self,
        db: &mut dyn QueryExecutor,
        table: &Arc<Table>,
        id: &Value,
        embed: &[String],
    ) -> Result<Record, AppError> {
        let mut record = table.require_by_id(&mut *db, id).await?;
        self.hooks
            .prepare_item(&self.state, &mut *db, &mut record, embed)
            .await?;
        Ok(record)
    }

    /// Reload after a write: through the caller's still-open context, else through the pool.
    async fn reload(
        &self,
        borrowed: Option<&mut TxContext>,
        table: &Arc<Table>,
        ids: &[Value],
        embed: &[String],
    ) -> Result<Vec<Value>, AppError> {
        let mut pool = self.state.pool.clone();
        let db: &mut dyn QueryExecutor = match borrowed {
            Some(ctx) => ctx,
            None => &mut pool,
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.load_record(&mut *db, table, id, embed).await?.to_json());
        }
        Ok(out)
    }

    /// Create one item. Relation properties are persisted in the same transaction as the row.
    pub async fn create_new_item_content(
        &self,
        body: Value,
        envelope: Envelope,
        embed: &[String],
        process_id: Option<&str>,
        tx: Option<&mut TxContext>,
    ) -> Result<ItemResponse, AppError> {
        let table = self.table().await?;
        let properties = self.flatten(body, envelope)?;
        let (core, relations) = self.split(&table, properties);
        RequestValidator::validate_create(&table, &core)?;

        let mut scope = TxScope::open(&self.state.tx, tx).await?;
        let inserted = self.insert_one(scope.ctx(), &table, &core, &relations).await;
        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                scope.abort(&self.state.tx).await;
                return Err(e);
            }
        };
        let borrowed = scope.finish(&self.state.tx).await?;
        tracing::info!(kind = %self.hooks.kind(), id = %id_text(&id), "item created");

        let mut written = core;
        written.extend(relations);
        self.post_process(&id, &written, true, process_id).await;
        let mut items = self.reload(borrowed, &table, std::slice::from_ref(&id), embed).await?;
        let item = items.pop().unwrap_or(Value::Null);
        Ok(ItemResponse::created(self.hooks.publish_result(Payload::One(item))))
    }

    /// Create every feature of a FeatureCollection in one transaction.
    pub async fn import_feature_collection(
        &self,
        body: Value,
        embed: &[String],
        process_id: Option<&str>,
        tx: Option<&mut TxContext>,
    ) -> Result<ItemResponse, AppError> {
        let key = self.geometry_key()?;
        let table = self.table().await?;
        let mut rows = Vec::new();
        for properties in geojson::from_feature_collection(&body, key)? {
            let (core, relations) = self.split(&table, properties);
            RequestValidator::validate_create(&table, &core)?;
            rows.push((core, relations));
        }

        let mut scope = TxScope::open(&self.state.tx, tx).await?;
        let inserted = async {
            let ctx = scope.ctx();
            let mut ids = Vec::with_capacity(rows.len());
            for (core, relations) in &rows {
                ids.push(self.insert_one(&mut *ctx, &table, core, relations).await?);
            }
            Ok::<_, AppError>(ids)
        }
        .await;
        let ids = match inserted {
            Ok(ids) => ids,
            Err(e) => {
                scope.abort(&self.state.tx).await;
                return Err(e);
            }
        };
        let borrowed = scope.finish(&self.state.tx).await?;
        tracing::info!(kind = %self.hooks.kind(), count = ids.len(), "features imported");

        for (id, (core, relations)) in ids.iter().zip(&rows) {
            let mut written = core.clone();
            written.extend(relations.clone());
            self.post_process(id, &written, true, process_id).await;
        }
        let items = self.reload(borrowed, &table, &ids, embed).await?;
        Ok(ItemResponse::created(self.hooks.publish_result(Payload::Many(items))))
    }

    /// List read. A row whose `prepare_item` fails is returned with an error marker.
    pub async fn query_items(&self, query: &ItemQuery) -> Result<Value, AppError> {
        let table = self.table().await?;
        let mut clauses = Vec::new();
        for (k, v) in &query.filters {
            if self.is_relation_property(k) {
                continue;
            }
            if let Some(col) = table.column(k) {
                clauses.push(Clause::new(col.physical_name.clone(), Filter::from_json(v.clone())));
            }
        }
        self.hooks
            .prepare_query_clauses(&self.state, &query.filters, &mut clauses)?;

        let columns = query
            .fields
            .as_ref()
            .map(|f| f.iter().filter(|n| table.has_column(n)).cloned().collect());
        let sel = Select {
            columns,
            clauses,
            sort: query.sort.clone(),
            page: query.page,
        };
        let mut db = self.state.pool.clone();
        let mut records = table.query(&mut db, &sel).await?;
        for record in records.iter_mut() {
            if let Err(e) = self
                .hooks
                .prepare_item(&self.state, &mut db, record, &query.embed)
                .await
            {
                tracing::warn!(kind = %self.hooks.kind(), id = %id_text(&record.primary_key), error = %e, "prepare item failed");
                record.mark_error(&e);
            }
            if let Some(fields) = &query.fields {
                let mut keep = fields.clone();
                keep.extend(query.embed.iter().cloned());
                record.retain_fields(&keep);
            }
        }
        let items = records.iter().map(Record::to_json).collect();
        Ok(self.hooks.publish_result(Payload::Many(items)))
    }

    pub async fn query_item_by_uid(&self, id: &str, embed: &[String]) -> Result<Value, AppError> {
        let table = self.table().await?;
        let id = table.parse_id(id)?;
        let mut db = self.state.pool.clone();
        let record = self.load_record(&mut db, &table, &id, embed).await?;
        Ok(self.hooks.publish_result(Payload::One(record.to_json())))
    }

    /// Patch or partial update. Only differing columns are written; an update that changes
    /// nothing issues no write and returns the current item.
    pub async fn update_item(
        &self,
        id: &str,
        doc: UpdateDocument,
        embed: &[String],
        process_id: Option<&str>,
        tx: Option<&mut TxContext>,
    ) -> Result<ItemResponse, AppError> {
        let table = self.table().await?;
        let id = table.parse_id(id)?;
        let touched = touched_keys(&doc);
        RequestValidator::require_applicable(&table, self.hooks.relation_properties(), touched.iter().map(String::as_str))?;

        let mut scope = TxScope::open(&self.state.tx, tx).await?;
        let applied = self.apply_update(scope.ctx(), &table, &id, &doc, &touched).await;
        let outcome = match applied {
            Ok(o) => o,
            Err(e) => {
                scope.abort(&self.state.tx).await;
                return Err(e);
            }
        };
        let borrowed = scope.finish(&self.state.tx).await?;

        if outcome.written || outcome.relations_changed {
            tracing::info!(kind = %self.hooks.kind(), id = %id_text(&id), "item updated");
            self.post_process(&id, &outcome.properties, false, process_id).await;
        } else {
            tracing::debug!(kind = %self.hooks.kind(), id = %id_text(&id), "update changed nothing");
        }
        let mut items = self.reload(borrowed, &table, std::slice::from_ref(&id), embed).await?;
        let item = items.pop().unwrap_or(Value::Null);
        Ok(ItemResponse::ok(self.hooks.publish_result(Payload::One(item))))
    }

    async fn apply_update(
        &self,
        ctx: &mut TxContext,
        table: &Arc<Table>,
        id: &Value,
        doc: &UpdateDocument,
        touched: &[String],
    ) -> Result<UpdateOutcome, AppError> {
        let mut current = table
            .get_by_id(&mut *ctx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.hooks.kind(), id_text(id))))?;
        self.load_relation_base(&mut *ctx, &mut current, doc).await?;
        let candidate = doc.apply_to(&current.properties)?;

        let mut core = Map::new();
        let mut relations = Map::new();
        for key in touched {
            let Some(v) = candidate.get(key) else { continue };
            if self.is_relation_property(key) {
                relations.insert(key.clone(), v.clone());
            } else if let Some(col) = table.column(key) {
                if !col.is_primary_key {
                    core.insert(col.display_name.clone(), v.clone());
                }
            }
        }
        normalize_geometry(table, &mut core);
        RequestValidator::validate_fields(table, &core)?;

        let changed = changed_properties(&current.properties, &core);
        let written = if changed.is_empty() {
            false
        } else {
            table.update(&mut *ctx, id, &changed).await?
        };
        let relations_changed = if relations.is_empty() {
            false
        } else {
            self.hooks
                .update_relations(&self.state, &mut *ctx, id, &relations, false)
                .await?
        };
        if !changed.is_empty() && !written && !relations_changed {
            return Err(AppError::NotFound(format!("{} {}", self.hooks.kind(), id_text(id))));
        }
        let mut properties = changed;
        properties.extend(relations);
        Ok(UpdateOutcome {
            written,
            relations_changed,
            properties,
        })
    }

    /// A patch that reaches into a relation property (`/Projects/-`, `/Tags/0`) edits the
    /// current list, so that list is embedded into the record first.
    async fn load_relation_base(
        &self,
        ctx: &mut TxContext,
        current: &mut Record,
        doc: &UpdateDocument,
    ) -> Result<(), AppError> {
        let nested: Vec<String> = nested_keys(doc)
            .into_iter()
            .filter(|k| self.is_relation_property(k))
            .collect();
        if nested.is_empty() {
            return Ok(());
        }
        let embed: Vec<String> = self.hooks.relation_properties().iter().map(|p| p.to_string()).collect();
        self.hooks
            .prepare_item(&self.state, &mut *ctx, current, &embed)
            .await?;
        for key in nested {
            let loaded = current
                .properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                .map(|(_, v)| v.clone());
            match loaded {
                Some(v) => current.set(key, v),
                None => {
                    return Err(AppError::BadRequest(format!(
                        "{} cannot be patched element-wise; replace the whole list",
                        key
                    )))
                }
            }
        }
        Ok(())
    }

    /// Delete links in both directions, then the row, in one transaction.
    /// Without `force`, an item other items link to (tags aside) is not deleted.
    pub async fn delete_item(&self, id: &str, force: bool, tx: Option<&mut TxContext>) -> Result<bool, AppError> {
        let table = self.table().await?;
        let id = table.parse_id(id)?;
        let mut scope = TxScope::open(&self.state.tx, tx).await?;
        let result = self.delete_in(scope.ctx(), &table, &id, force).await;
        match result {
            Ok(deleted) => {
                scope.finish(&self.state.tx).await?;
                if deleted {
                    tracing::info!(kind = %self.hooks.kind(), id = %id_text(&id), "item deleted");
                }
                Ok(deleted)
            }
            Err(e) => {
                scope.abort(&self.state.tx).await;
                Err(e)
            }
        }
    }

    async fn delete_in(&self, ctx: &mut TxContext, table: &Table, id: &Value, force: bool) -> Result<bool, AppError> {
        if !force {
            let incoming = self.state.relations.incoming_links(&mut *ctx, id).await?;
            if !incoming.is_empty() {
                return Err(AppError::Conflict(format!(
                    "{} {} is linked from {} item(s); delete with force",
                    self.hooks.kind(),
                    id_text(id),
                    incoming.len()
                )));
            }
        }
        let links = self.state.relations.delete_all_links(&mut *ctx, id).await?;
        let deleted = table.delete(&mut *ctx, id).await?;
        tracing::debug!(id = %id_text(id), links, deleted, "delete");
        Ok(deleted)
    }

    pub async fn attach_tags(&self, id: &str, tags: &[String], tx: Option<&mut TxContext>) -> Result<bool, AppError> {
        self.change_tags(id, tags, true, tx).await
    }

    pub async fn remove_tags(&self, id: &str, tags: &[String], tx: Option<&mut TxContext>) -> Result<bool, AppError> {
        self.change_tags(id, tags, false, tx).await
    }

    async fn change_tags(&self, id: &str, tags: &[String], attach: bool, tx: Option<&mut TxContext>) -> Result<bool, AppError> {
        let table = self.table().await?;
        let id = table.parse_id(id)?;
        let kind = self.hooks.kind();
        let mut scope = TxScope::open(&self.state.tx, tx).await?;
        let result = async {
            let ctx = scope.ctx();
            table.require_by_id(&mut *ctx, &id).await?;
            let changed = if attach {
                self.state.relations.attach_tags(&mut *ctx, &id, kind, tags).await?
            } else {
                self.state.relations.remove_tags(&mut *ctx, &id, kind, tags).await?
            };
            Ok::<_, AppError>(changed)
        }
        .await;
        match result {
            Ok(changed) => {
                scope.finish(&self.state.tx).await?;
                Ok(changed)
            }
            Err(e) => {
                scope.abort(&self.state.tx).await;
                Err(e)
            }
        }
    }

    /// Remove links between the item and one related item; `force_delete` also deletes the related item.
    pub async fn detach_relation(
        &self,
        id: &str,
        related_id: &str,
        related_kind: EntityKind,
        force_delete: bool,
        tx: Option<&mut TxContext>,
    ) -> Result<bool, AppError> {
        let table = self.table().await?;
        let id = table.parse_id(id)?;
        let related_table = self.state.table(related_kind.table_id()).await?;
        let related = related_table.parse_id(related_id)?;
        let mut scope = TxScope::open(&self.state.tx, tx).await?;
        let result = async {
            let ctx = scope.ctx();
            let removed = self.state.relations.unlink(&mut *ctx, &id, &related).await?;
            let mut deleted = false;
            if force_delete {
                self.state.relations.delete_all_links(&mut *ctx, &related).await?;
                deleted = related_table.delete(&mut *ctx, &related).await?;
            }
            Ok::<_, AppError>(removed > 0 || deleted)
        }
        .await;
        match result {
            Ok(changed) => {
                scope.finish(&self.state.tx).await?;
                Ok(changed)
            }
            Err(e) => {
                scope.abort(&self.state.tx).await;
                Err(e)
            }
        }
    }
}

/// Top-level keys an update document touches, in document order.
pub fn touched_keys(doc: &UpdateDocument) -> Vec<String> {
    let mut seen = HashSet::new();
    let keys: Vec<String> = match doc {
        UpdateDocument::Patch(ops) => ops
            .iter()
            .filter_map(|op| parse_pointer(&op.path).ok())
            .filter_map(|tokens| tokens.into_iter().next())
            .collect(),
        UpdateDocument::Properties(m) => m.keys().cloned().collect(),
    };
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// Top-level keys of patch operations whose path goes below the top level.
pub fn nested_keys(doc: &UpdateDocument) -> Vec<String> {
    let UpdateDocument::Patch(ops) = doc else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    ops.iter()
        .filter_map(|op| parse_pointer(&op.path).ok())
        .filter(|tokens| tokens.len() > 1)
        .filter_map(|tokens| tokens.into_iter().next())
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

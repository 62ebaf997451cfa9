//! Extension points a concrete resource plugs into [`ResourceHandler`](super::ResourceHandler).
//! Every hook has a default, so a resource overrides only what it needs.

use crate::config::TableId;
use crate::error::AppError;
use crate::relation::{embed_refs, EntityKind};
use crate::service::query::{strings_of, values_of};
use crate::sql::Clause;
use crate::state::AppState;
use crate::table::Record;
use crate::tx::QueryExecutor;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// What a read produced, before the final shape transform.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    One(Value),
    Many(Vec<Value>),
}

impl Payload {
    pub fn into_value(self) -> Value {
        match self {
            Payload::One(v) => v,
            Payload::Many(items) => Value::Array(items),
        }
    }
}

#[async_trait]
pub trait ResourceHooks: Send + Sync + 'static {
    fn table_id(&self) -> TableId;

    /// Type name of this resource in the junction table.
    fn kind(&self) -> EntityKind;

    /// Properties persisted by [`ResourceHooks::update_relations`] instead of the core table.
    fn relation_properties(&self) -> &[&'static str] {
        &[]
    }

    /// Column holding GeoJSON, for resources imported from or published as features.
    fn geometry_key(&self) -> Option<&'static str> {
        None
    }

    /// Add predicates for filters that are not plain columns (relation and tag filters).
    fn prepare_query_clauses(
        &self,
        _state: &AppState,
        _filters: &Map<String, Value>,
        _clauses: &mut Vec<Clause>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Attach embedded related data to a row after it was read.
    async fn prepare_item(
        &self,
        _state: &AppState,
        _db: &mut dyn QueryExecutor,
        _record: &mut Record,
        _embed: &[String],
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Persist relations implied by `properties` (only relation keys are passed) on `db`.
    /// Returns whether any link changed.
    async fn update_relations(
        &self,
        _state: &AppState,
        _db: &mut dyn QueryExecutor,
        _id: &Value,
        _properties: &Map<String, Value>,
        _is_new: bool,
    ) -> Result<bool, AppError> {
        Ok(false)
    }

    /// Side effects after a committed write.
    async fn post_processing(
        &self,
        _state: &AppState,
        _id: &Value,
        _properties: &Map<String, Value>,
        _is_new: bool,
        _process_id: Option<&str>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Final shape of a read or write result.
    fn publish_result(&self, payload: Payload) -> Value {
        payload.into_value()
    }
}

/// A junction relation exposed as a list property, e.g. `Projects` on a spatial source.
#[derive(Clone, Copy, Debug)]
pub struct JunctionProperty {
    pub property: &'static str,
    pub related: EntityKind,
    pub relation_type: &'static str,
    pub reverse: bool,
}

fn property_value<'a>(properties: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    properties
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn wants(embed: &[String], property: &str) -> bool {
    embed.iter().any(|e| e.eq_ignore_ascii_case(property))
}

/// Ids named by a relation property: plain ids or `{"UID": id}` references.
pub fn related_ids(v: &Value) -> Vec<Value> {
    values_of(v)
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(m) => m
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("uid") || k.eq_ignore_ascii_case("id"))
                .map(|(_, v)| v.clone()),
            Value::Null => None,
            other => Some(other),
        })
        .collect()
}

impl JunctionProperty {
    /// Replace links when the property is present. Absent property → unchanged.
    pub async fn persist(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        item_kind: EntityKind,
        id: &Value,
        properties: &Map<String, Value>,
    ) -> Result<bool, AppError> {
        let Some(v) = property_value(properties, self.property) else {
            return Ok(false);
        };
        state
            .relations
            .replace_links(db, id, item_kind, &related_ids(v), self.related, self.relation_type, self.reverse)
            .await
    }

    /// Embed `[{"UID": id}, …]` when asked for.
    pub async fn embed(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        record: &mut Record,
        embed: &[String],
    ) -> Result<(), AppError> {
        if !wants(embed, self.property) || record.primary_key.is_null() {
            return Ok(());
        }
        let id = record.primary_key.clone();
        let ids = state
            .relations
            .query_related_ids(db, &id, Some(self.related), Some(self.relation_type), self.reverse)
            .await?;
        let related = state.table(self.related.table_id()).await?;
        record.set(self.property, embed_refs(&related, &ids));
        Ok(())
    }

    /// Filter clause when the query names this property.
    pub fn clause(
        &self,
        state: &AppState,
        item_kind: EntityKind,
        filters: &Map<String, Value>,
    ) -> Result<Option<Clause>, AppError> {
        let Some(v) = property_value(filters, self.property) else {
            return Ok(None);
        };
        state
            .relations
            .relation_clause(item_kind, related_ids(v), self.related, Some(self.relation_type), self.reverse)
            .map(Some)
    }
}

/// The `Tags` property: full replace on write, string list on embed, any-of on filter.
#[derive(Clone, Copy, Debug)]
pub struct TagProperty {
    pub property: &'static str,
}

impl TagProperty {
    pub async fn persist(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        item_kind: EntityKind,
        id: &Value,
        properties: &Map<String, Value>,
    ) -> Result<bool, AppError> {
        let Some(v) = property_value(properties, self.property) else {
            return Ok(false);
        };
        state.relations.replace_tags(db, id, item_kind, &strings_of(v)).await
    }

    pub async fn embed(
        &self,
        state: &AppState,
        db: &mut dyn QueryExecutor,
        record: &mut Record,
        embed: &[String],
    ) -> Result<(), AppError> {
        if !wants(embed, self.property) || record.primary_key.is_null() {
            return Ok(());
        }
        let id = record.primary_key.clone();
        let values = state.relations.tag_values(db, &id).await?;
        record.set(self.property, Value::Array(values.into_iter().map(Value::String).collect()));
        Ok(())
    }

    pub fn clause(
        &self,
        state: &AppState,
        item_kind: EntityKind,
        filters: &Map<String, Value>,
    ) -> Result<Option<Clause>, AppError> {
        let Some(v) = property_value(filters, self.property) else {
            return Ok(None);
        };
        state.relations.tag_clause(item_kind, &strings_of(v)).map(Some)
    }
}

//! Tags: junction links to get-or-create rows of the tag table, keyed by normalised value.

use super::{EntityKind, Link, RelationManager, FROM_ID, FROM_TYPE, RELATION_TYPE, TAG_RELATION, TO_ID, TO_TYPE};
use crate::config::TableId;
use crate::error::AppError;
use crate::sql::{Clause, Filter, Select, SortKey, SubQuery};
use crate::table::id_text;
use crate::tx::QueryExecutor;
use serde_json::{Map, Value};
use std::collections::HashSet;

const TAG_VALUE: &str = "value";

/// Lower-case, trimmed, inner whitespace collapsed. Blank values are not tags.
pub fn normalize_tag(value: &str) -> Option<String> {
    let v = value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    (!v.is_empty()).then_some(v)
}

fn normalize_all(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter_map(|v| normalize_tag(v))
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

impl RelationManager {
    /// Uid of the tag with this value; created when missing and `create_if_missing`.
    pub async fn get_tag_uid(
        &self,
        db: &mut dyn QueryExecutor,
        value: &str,
        create_if_missing: bool,
    ) -> Result<Option<Value>, AppError> {
        let Some(normalized) = normalize_tag(value) else {
            return Ok(None);
        };
        let tags = self.table(TableId::Tag)?;
        let existing = tags
            .query(db, &Select::filtered(vec![Clause::eq(TAG_VALUE, normalized.clone())]))
            .await?;
        if let Some(r) = existing.into_iter().next() {
            return Ok(Some(r.primary_key));
        }
        if !create_if_missing {
            return Ok(None);
        }
        let mut props = Map::new();
        props.insert(TAG_VALUE.into(), Value::String(normalized.clone()));
        let uid = tags.insert(db, &props).await?;
        tracing::debug!(tag = %normalized, uid = %id_text(&uid), "tag created");
        Ok(Some(uid))
    }

    async fn tag_uids(&self, db: &mut dyn QueryExecutor, values: &[String], create: bool) -> Result<Vec<Value>, AppError> {
        let mut uids = Vec::new();
        for v in normalize_all(values) {
            if let Some(uid) = self.get_tag_uid(db, &v, create).await? {
                uids.push(uid);
            }
        }
        Ok(uids)
    }

    /// Full replace of the item's tag set.
    pub async fn replace_tags(
        &self,
        db: &mut dyn QueryExecutor,
        item_id: &Value,
        item_kind: EntityKind,
        values: &[String],
    ) -> Result<bool, AppError> {
        let uids = self.tag_uids(db, values, true).await?;
        self.replace_links(db, item_id, item_kind, &uids, EntityKind::Tag, TAG_RELATION, false)
            .await
    }

    /// Add tags the item does not carry yet. True when at least one link was created.
    pub async fn attach_tags(
        &self,
        db: &mut dyn QueryExecutor,
        item_id: &Value,
        item_kind: EntityKind,
        values: &[String],
    ) -> Result<bool, AppError> {
        let uids = self.tag_uids(db, values, true).await?;
        let current: HashSet<String> = self
            .query_related_ids(db, item_id, Some(EntityKind::Tag), Some(TAG_RELATION), false)
            .await?
            .iter()
            .map(id_text)
            .collect();
        let mut changed = false;
        for uid in uids.into_iter().filter(|u| !current.contains(&id_text(u))) {
            let link = Link::new(item_id.clone(), item_kind, uid, EntityKind::Tag, TAG_RELATION);
            self.create_link(db, &link).await?;
            changed = true;
        }
        Ok(changed)
    }

    /// Drop links to the given tags. Unknown values are ignored; tag rows are kept.
    pub async fn remove_tags(
        &self,
        db: &mut dyn QueryExecutor,
        item_id: &Value,
        item_kind: EntityKind,
        values: &[String],
    ) -> Result<bool, AppError> {
        let uids = self.tag_uids(db, values, false).await?;
        if uids.is_empty() {
            return Ok(false);
        }
        let removed = self
            .delete_links(
                db,
                &[
                    Clause::eq(FROM_ID, item_id.clone()),
                    Clause::eq(FROM_TYPE, item_kind.as_str()),
                    Clause::new(TO_ID, Filter::In(uids)),
                    Clause::eq(RELATION_TYPE, TAG_RELATION),
                ],
            )
            .await?;
        Ok(removed > 0)
    }

    /// The item's tag values, alphabetically.
    pub async fn tag_values(&self, db: &mut dyn QueryExecutor, item_id: &Value) -> Result<Vec<String>, AppError> {
        let tags = self.table(TableId::Tag)?;
        let pk = tags.primary_key()?.physical_name.clone();
        let linked = Clause::new(
            pk,
            Filter::Subquery(SubQuery {
                table: self.junction()?,
                select: TO_ID.into(),
                clauses: vec![
                    Clause::eq(FROM_ID, item_id.clone()),
                    Clause::eq(TO_TYPE, EntityKind::Tag.as_str()),
                    Clause::eq(RELATION_TYPE, TAG_RELATION),
                ],
            }),
        );
        let sel = Select {
            sort: vec![SortKey {
                column: TAG_VALUE.into(),
                descending: false,
            }],
            ..Select::filtered(vec![linked])
        };
        let key = tags
            .column(TAG_VALUE)
            .map(|c| c.display_name.clone())
            .unwrap_or_else(|| TAG_VALUE.to_string());
        let rows = tags.query(db, &sel).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(&key).and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Predicate keeping items of `item_kind` tagged with any of `values`.
    pub fn tag_clause(&self, item_kind: EntityKind, values: &[String]) -> Result<Clause, AppError> {
        let item_table = self.table(item_kind.table_id())?;
        let pk = item_table.primary_key()?.physical_name.clone();
        let tags = self.table(TableId::Tag)?;
        let tag_pk = tags.primary_key()?.physical_name.clone();
        let normalized: Vec<Value> = normalize_all(values).into_iter().map(Value::String).collect();
        let matching_tags = SubQuery {
            table: tags,
            select: tag_pk,
            clauses: vec![Clause::new(TAG_VALUE, Filter::In(normalized))],
        };
        Ok(Clause::new(
            pk,
            Filter::Subquery(SubQuery {
                table: self.junction()?,
                select: FROM_ID.into(),
                clauses: vec![
                    Clause::eq(FROM_TYPE, item_kind.as_str()),
                    Clause::eq(RELATION_TYPE, TAG_RELATION),
                    Clause::new(TO_ID, Filter::Subquery(matching_tags)),
                ],
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::test_manager;
    use crate::sql::{self, PgBindValue};

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  Flood   Zone\t"), Some("flood zone".into()));
        assert_eq!(normalize_tag(" \n "), None);
    }

    #[test]
    fn test_normalize_all_dedups_after_normalising() {
        let v = normalize_all(&["River".into(), "river ".into(), "".into(), "Lake".into()]);
        assert_eq!(v, vec!["river".to_string(), "lake".to_string()]);
    }

    #[test]
    fn test_tag_clause_nests_subqueries() {
        let rm = test_manager();
        let clause = rm.tag_clause(EntityKind::SpatialSource, &["Flood".into()]).unwrap();
        let table = rm.table(TableId::SpatialSource).unwrap();
        let q = sql::select(&table, &Select::filtered(vec![clause])).unwrap();
        assert!(q.sql.contains(
            "WHERE \"uid\" IN (SELECT \"from_id\" FROM \"gis\".\"relations\" WHERE \"from_type\" = $1::text \
             AND \"relation_type\" = $2::text AND \"to_id\" IN (SELECT \"uid\" FROM \"gis\".\"tags\" \
             WHERE \"value\" IN ($3::text)))"
        ));
        assert_eq!(q.params[2], PgBindValue::Text("flood".into()));
    }
}

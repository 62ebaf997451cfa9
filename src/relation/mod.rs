//! Typed links between records: one polymorphic junction table, direct foreign-key links, and tags.

mod direct;
mod kind;
mod tags;

pub use kind::EntityKind;
pub use tags::normalize_tag;

use crate::catalog::Catalog;
use crate::config::TableId;
use crate::error::AppError;
use crate::sql::{Clause, Filter, Select, SortKey, SubQuery};
use crate::table::{id_text, Record, Table};
use crate::tx::QueryExecutor;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Relation type of tag links.
pub const TAG_RELATION: &str = "Tag";

const FROM_ID: &str = "from_id";
const FROM_TYPE: &str = "from_type";
const TO_ID: &str = "to_id";
const TO_TYPE: &str = "to_type";
const RELATION_TYPE: &str = "relation_type";
const CREATED_AT: &str = "created_at";

/// One junction row. Directed `from → to`; identity is the whole tuple.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub from_id: Value,
    pub from_kind: EntityKind,
    pub to_id: Value,
    pub to_kind: EntityKind,
    pub relation_type: String,
}

impl Link {
    pub fn new(from_id: Value, from_kind: EntityKind, to_id: Value, to_kind: EntityKind, relation_type: impl Into<String>) -> Self {
        Link {
            from_id,
            from_kind,
            to_id,
            to_kind,
            relation_type: relation_type.into(),
        }
    }

    fn to_properties(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(FROM_ID.into(), self.from_id.clone());
        m.insert(FROM_TYPE.into(), Value::String(self.from_kind.as_str().into()));
        m.insert(TO_ID.into(), self.to_id.clone());
        m.insert(TO_TYPE.into(), Value::String(self.to_kind.as_str().into()));
        m.insert(RELATION_TYPE.into(), Value::String(self.relation_type.clone()));
        m
    }

    fn from_record(table: &Table, r: &Record) -> Result<Link, AppError> {
        let get = |name: &str| -> Value {
            table
                .column(name)
                .and_then(|c| r.get(&c.display_name))
                .cloned()
                .unwrap_or(Value::Null)
        };
        let kind = |name: &str| -> Result<EntityKind, AppError> {
            let v = get(name);
            v.as_str()
                .unwrap_or_default()
                .parse()
                .map_err(|_| AppError::Validation(format!("unknown entity kind {} in {}", v, name)))
        };
        Ok(Link {
            from_id: get(FROM_ID),
            from_kind: kind(FROM_TYPE)?,
            to_id: get(TO_ID),
            to_kind: kind(TO_TYPE)?,
            relation_type: get(RELATION_TYPE).as_str().unwrap_or_default().to_string(),
        })
    }
}

/// Which junction columns hold the item and which the related side.
/// `reverse` makes the item the link target.
struct Side {
    item_id: &'static str,
    item_type: &'static str,
    related_id: &'static str,
    related_type: &'static str,
}

fn side(reverse: bool) -> Side {
    if reverse {
        Side {
            item_id: TO_ID,
            item_type: TO_TYPE,
            related_id: FROM_ID,
            related_type: FROM_TYPE,
        }
    } else {
        Side {
            item_id: FROM_ID,
            item_type: FROM_TYPE,
            related_id: TO_ID,
            related_type: TO_TYPE,
        }
    }
}

/// `[{"UID": id}, …]`: the embedded reference shape for related items.
pub fn embed_refs(related: &Table, ids: &[Value]) -> Value {
    let key = related
        .primary_key()
        .map(|c| c.display_name.clone())
        .unwrap_or_else(|_| "UID".to_string());
    Value::Array(
        ids.iter()
            .map(|id| {
                let mut m = Map::new();
                m.insert(key.clone(), id.clone());
                Value::Object(m)
            })
            .collect(),
    )
}

fn dedup_ids(ids: &[Value]) -> Vec<Value> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|v| !v.is_null() && seen.insert(id_text(v)))
        .cloned()
        .collect()
}

#[derive(Clone)]
pub struct RelationManager {
    catalog: Arc<Catalog>,
}

impl RelationManager {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        RelationManager { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub(crate) fn table(&self, id: TableId) -> Result<Arc<Table>, AppError> {
        self.catalog
            .table(id)
            .ok_or_else(|| AppError::NotFound(format!("table {} is not available", id)))
    }

    fn junction(&self) -> Result<Arc<Table>, AppError> {
        self.table(TableId::Relation)
    }

    pub async fn create_link(&self, db: &mut dyn QueryExecutor, link: &Link) -> Result<(), AppError> {
        let junction = self.junction()?;
        junction.insert(db, &link.to_properties()).await?;
        tracing::debug!(from = %id_text(&link.from_id), to = %id_text(&link.to_id), relation = %link.relation_type, "link created");
        Ok(())
    }

    pub async fn delete_links(&self, db: &mut dyn QueryExecutor, matching: &[Clause]) -> Result<u64, AppError> {
        self.junction()?.delete_where(db, matching).await
    }

    pub async fn query_links(&self, db: &mut dyn QueryExecutor, matching: Vec<Clause>) -> Result<Vec<Link>, AppError> {
        let junction = self.junction()?;
        let rows = junction.query(db, &Select::filtered(matching)).await?;
        rows.iter().map(|r| Link::from_record(&junction, r)).collect()
    }

    /// Ids on the other side of the item's links, oldest link first.
    pub async fn query_related_ids(
        &self,
        db: &mut dyn QueryExecutor,
        item_id: &Value,
        related_kind: Option<EntityKind>,
        relation_type: Option<&str>,
        reverse: bool,
    ) -> Result<Vec<Value>, AppError> {
        let junction = self.junction()?;
        let s = side(reverse);
        let mut clauses = vec![Clause::eq(s.item_id, item_id.clone())];
        if let Some(kind) = related_kind {
            clauses.push(Clause::eq(s.related_type, kind.as_str()));
        }
        if let Some(rt) = relation_type {
            clauses.push(Clause::eq(RELATION_TYPE, rt));
        }
        let mut sort = Vec::new();
        if junction.has_column(CREATED_AT) {
            sort.push(SortKey {
                column: CREATED_AT.into(),
                descending: false,
            });
        }
        sort.push(SortKey {
            column: s.related_id.into(),
            descending: false,
        });
        let sel = Select {
            columns: Some(vec![s.related_id.to_string()]),
            clauses,
            sort,
            page: None,
        };
        let key = junction
            .column(s.related_id)
            .map(|c| c.display_name.clone())
            .unwrap_or_else(|| s.related_id.to_string());
        let rows = junction.query(db, &sel).await?;
        Ok(dedup_ids(
            &rows.iter().filter_map(|r| r.get(&key).cloned()).collect::<Vec<_>>(),
        ))
    }

    /// Related rows loaded in full from the related kind's table.
    pub async fn query_related_records(
        &self,
        db: &mut dyn QueryExecutor,
        item_id: &Value,
        related_kind: EntityKind,
        relation_type: Option<&str>,
        reverse: bool,
    ) -> Result<Vec<Record>, AppError> {
        let related = self.table(related_kind.table_id())?;
        let pk = related.primary_key()?.physical_name.clone();
        let s = side(reverse);
        let mut inner = vec![
            Clause::eq(s.item_id, item_id.clone()),
            Clause::eq(s.related_type, related_kind.as_str()),
        ];
        if let Some(rt) = relation_type {
            inner.push(Clause::eq(RELATION_TYPE, rt));
        }
        let clause = Clause::new(
            pk,
            Filter::Subquery(SubQuery {
                table: self.junction()?,
                select: s.related_id.into(),
                clauses: inner,
            }),
        );
        related.query(db, &Select::filtered(vec![clause])).await
    }

    /// Predicate for a primary query on `item_kind`: keep rows linked to any of `candidates`.
    /// `pk IN (SELECT from_id FROM junction WHERE to_id IN (…) AND to_type = … [AND relation_type = …])`,
    /// with from/to swapped when `reverse`.
    pub fn relation_clause(
        &self,
        item_kind: EntityKind,
        candidates: Vec<Value>,
        related_kind: EntityKind,
        relation_type: Option<&str>,
        reverse: bool,
    ) -> Result<Clause, AppError> {
        let item_table = self.table(item_kind.table_id())?;
        let pk = item_table.primary_key()?.physical_name.clone();
        let s = side(reverse);
        let mut inner = vec![
            Clause::new(s.related_id, Filter::In(candidates)),
            Clause::eq(s.item_type, item_kind.as_str()),
            Clause::eq(s.related_type, related_kind.as_str()),
        ];
        if let Some(rt) = relation_type {
            inner.push(Clause::eq(RELATION_TYPE, rt));
        }
        Ok(Clause::new(
            pk,
            Filter::Subquery(SubQuery {
                table: self.junction()?,
                select: s.item_id.into(),
                clauses: inner,
            }),
        ))
    }

    /// Make the item's links of one relation type exactly `related_ids`.
    /// Deletes every existing link of that type, then inserts each id, all on `db`.
    /// Returns false, without writing, when the set is already equal.
    #[allow(clippy::too_many_arguments)]
    pub async fn replace_links(
        &self,
        db: &mut dyn QueryExecutor,
        item_id: &Value,
        item_kind: EntityKind,
        related_ids: &[Value],
        related_kind: EntityKind,
        relation_type: &str,
        reverse: bool,
    ) -> Result<bool, AppError> {
        let wanted = dedup_ids(related_ids);
        let current = self
            .query_related_ids(db, item_id, Some(related_kind), Some(relation_type), reverse)
            .await?;
        let as_set = |ids: &[Value]| ids.iter().map(id_text).collect::<HashSet<_>>();
        if as_set(&current) == as_set(&wanted) {
            return Ok(false);
        }
        let s = side(reverse);
        let removed = self
            .delete_links(
                db,
                &[
                    Clause::eq(s.item_id, item_id.clone()),
                    Clause::eq(s.item_type, item_kind.as_str()),
                    Clause::eq(s.related_type, related_kind.as_str()),
                    Clause::eq(RELATION_TYPE, relation_type),
                ],
            )
            .await?;
        for related in &wanted {
            let link = if reverse {
                Link::new(related.clone(), related_kind, item_id.clone(), item_kind, relation_type)
            } else {
                Link::new(item_id.clone(), item_kind, related.clone(), related_kind, relation_type)
            };
            self.create_link(db, &link).await?;
        }
        tracing::debug!(
            item = %id_text(item_id),
            relation = relation_type,
            removed,
            inserted = wanted.len(),
            "links replaced"
        );
        Ok(true)
    }

    /// Remove every link touching `id`, in either direction.
    pub async fn delete_all_links(&self, db: &mut dyn QueryExecutor, id: &Value) -> Result<u64, AppError> {
        let outgoing = self.delete_links(db, &[Clause::eq(FROM_ID, id.clone())]).await?;
        let incoming = self.delete_links(db, &[Clause::eq(TO_ID, id.clone())]).await?;
        Ok(outgoing + incoming)
    }

    /// Remove links between `a` and `b` in either direction, whatever their relation type.
    pub async fn unlink(&self, db: &mut dyn QueryExecutor, a: &Value, b: &Value) -> Result<u64, AppError> {
        let forward = self
            .delete_links(db, &[Clause::eq(FROM_ID, a.clone()), Clause::eq(TO_ID, b.clone())])
            .await?;
        let backward = self
            .delete_links(db, &[Clause::eq(FROM_ID, b.clone()), Clause::eq(TO_ID, a.clone())])
            .await?;
        Ok(forward + backward)
    }

    /// Links pointing at `id` from other items, tags excluded.
    pub async fn incoming_links(&self, db: &mut dyn QueryExecutor, id: &Value) -> Result<Vec<Link>, AppError> {
        let links = self.query_links(db, vec![Clause::eq(TO_ID, id.clone())]).await?;
        Ok(links.into_iter().filter(|l| l.relation_type != TAG_RELATION).collect())
    }
}

#[cfg(test)]
pub(crate) fn test_manager() -> RelationManager {
    use crate::table::fixture;
    let catalog = Catalog::with_tables("gis", TableId::ALL.into_iter().map(fixture));
    RelationManager::new(Arc::new(catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql;
    use serde_json::json;

    #[test]
    fn test_relation_clause_forward() {
        let rm = test_manager();
        let clause = rm
            .relation_clause(EntityKind::SpatialSource, vec![json!("p1"), json!("p2")], EntityKind::Project, Some("Project"), false)
            .unwrap();
        let table = rm.table(TableId::SpatialSource).unwrap();
        let q = sql::select(&table, &Select::filtered(vec![clause])).unwrap();
        assert!(q.sql.contains(
            "WHERE \"uid\" IN (SELECT \"from_id\" FROM \"gis\".\"relations\" WHERE \"to_id\" IN ($1::uuid, $2::uuid) \
             AND \"from_type\" = $3::text AND \"to_type\" = $4::text AND \"relation_type\" = $5::text)"
        ));
        assert_eq!(q.params.len(), 5);
    }

    #[test]
    fn test_relation_clause_reverse_swaps_columns() {
        let rm = test_manager();
        let clause = rm
            .relation_clause(EntityKind::Project, vec![json!("s1")], EntityKind::SpatialSource, None, true)
            .unwrap();
        let table = rm.table(TableId::Project).unwrap();
        let q = sql::select(&table, &Select::filtered(vec![clause])).unwrap();
        assert!(q.sql.contains(
            "\"uid\" IN (SELECT \"to_id\" FROM \"gis\".\"relations\" WHERE \"from_id\" IN ($1::uuid) \
             AND \"to_type\" = $2::text AND \"from_type\" = $3::text)"
        ));
    }

    #[test]
    fn test_link_properties_use_kind_names() {
        let l = Link::new(json!("a"), EntityKind::SpatialSource, json!("b"), EntityKind::Tag, TAG_RELATION);
        let p = l.to_properties();
        assert_eq!(p["from_type"], json!("SpatialSource"));
        assert_eq!(p["to_type"], json!("Tag"));
        assert_eq!(p["relation_type"], json!("Tag"));
    }

    #[test]
    fn test_embed_refs_shape() {
        let project = crate::table::fixture(TableId::Project);
        assert_eq!(embed_refs(&project, &[json!("p1")]), json!([{"UID": "p1"}]));
    }

    #[test]
    fn test_dedup_drops_nulls_and_repeats() {
        let ids = dedup_ids(&[json!("a"), Value::Null, json!("b"), json!("a")]);
        assert_eq!(ids, vec![json!("a"), json!("b")]);
    }
}

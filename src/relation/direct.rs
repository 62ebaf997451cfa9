//! One-to-many links held in a foreign-key column on the child table.

use super::{embed_refs, RelationManager};
use crate::config::TableId;
use crate::error::AppError;
use crate::sql::{Clause, Select};
use crate::table::Record;
use crate::tx::QueryExecutor;
use serde_json::{Map, Value};

impl RelationManager {
    /// Point the child's foreign key at `parent_id`; null detaches it. False when the child is missing.
    pub async fn create_direct_link(
        &self,
        db: &mut dyn QueryExecutor,
        child: TableId,
        child_id: &Value,
        fk_column: &str,
        parent_id: Value,
    ) -> Result<bool, AppError> {
        let table = self.table(child)?;
        let col = table
            .column(fk_column)
            .ok_or_else(|| AppError::Validation(format!("unknown column '{}' on {}", fk_column, child)))?;
        let mut props = Map::new();
        props.insert(col.physical_name.clone(), parent_id);
        table.update(db, child_id, &props).await
    }

    pub async fn direct_child_ids(
        &self,
        db: &mut dyn QueryExecutor,
        child: TableId,
        fk_column: &str,
        parent_id: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let table = self.table(child)?;
        let pk = table.primary_key()?.display_name.clone();
        let sel = Select {
            columns: Some(vec![pk.clone()]),
            ..Select::filtered(vec![Clause::eq(fk_column, parent_id.clone())])
        };
        let rows = table.query(db, &sel).await?;
        Ok(rows.iter().filter_map(|r| r.get(&pk).cloned()).collect())
    }

    /// Embed the children referencing `record` under `property` as `[{"UID": id}, …]`.
    pub async fn set_direct_relations_as_property(
        &self,
        db: &mut dyn QueryExecutor,
        record: &mut Record,
        child: TableId,
        fk_column: &str,
        property: &str,
    ) -> Result<(), AppError> {
        if record.primary_key.is_null() {
            return Ok(());
        }
        let parent_id = record.primary_key.clone();
        let ids = self.direct_child_ids(db, child, fk_column, &parent_id).await?;
        let table = self.table(child)?;
        record.set(property, embed_refs(&table, &ids));
        Ok(())
    }
}

//! Fixed registry of the logical tables the catalog knows about.

use std::fmt;

/// Logical table id. The catalog only introspects tables listed here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableId {
    Project,
    SpatialSource,
    Tag,
    Relation,
    ActivityLog,
}

impl TableId {
    pub const ALL: [TableId; 5] = [
        TableId::Project,
        TableId::SpatialSource,
        TableId::Tag,
        TableId::Relation,
        TableId::ActivityLog,
    ];

    pub fn physical_name(self) -> &'static str {
        match self {
            TableId::Project => "projects",
            TableId::SpatialSource => "spatial_sources",
            TableId::Tag => "tags",
            TableId::Relation => "relations",
            TableId::ActivityLog => "activity_log",
        }
    }

    pub fn from_physical_name(name: &str) -> Option<TableId> {
        TableId::ALL.into_iter().find(|t| t.physical_name() == name)
    }

    /// Extra create expressions keyed by physical column name. `{table}` expands to the
    /// qualified table name. Uuid primary keys get `gen_random_uuid()` without listing them here.
    pub fn create_expressions(self) -> &'static [CreateExpression] {
        match self {
            TableId::SpatialSource => &[CreateExpression {
                column: "number",
                sql: "(SELECT COALESCE(MAX(\"number\"), 0) + 1 FROM {table})",
                accepts_supplied: false,
            }],
            _ => &[],
        }
    }
}

/// Expression an INSERT uses for a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateExpression {
    pub column: &'static str,
    pub sql: &'static str,
    /// When false the expression is applied even if the caller supplies a value.
    pub accepts_supplied: bool,
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.physical_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_names_round_trip() {
        for id in TableId::ALL {
            assert_eq!(TableId::from_physical_name(id.physical_name()), Some(id));
        }
        assert_eq!(TableId::from_physical_name("unknown"), None);
    }
}

use crate::config::TableId;
use std::fmt;
use std::str::FromStr;

/// Closed set of entity kinds that may appear on either side of a junction link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Project,
    SpatialSource,
    Tag,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Project, EntityKind::SpatialSource, EntityKind::Tag];

    /// Name stored in the junction's type columns.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::SpatialSource => "SpatialSource",
            EntityKind::Tag => "Tag",
        }
    }

    pub fn table_id(self) -> TableId {
        match self {
            EntityKind::Project => TableId::Project,
            EntityKind::SpatialSource => TableId::SpatialSource,
            EntityKind::Tag => TableId::Tag,
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Accepts the stored name or the physical table name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s) || k.table_id().physical_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("SpatialSource".parse::<EntityKind>(), Ok(EntityKind::SpatialSource));
        assert_eq!("spatial_sources".parse::<EntityKind>(), Ok(EntityKind::SpatialSource));
        assert_eq!("project".parse::<EntityKind>(), Ok(EntityKind::Project));
        assert!("layer".parse::<EntityKind>().is_err());
    }
}

//! Table identity and classification shared by the inventory, the run state
//! and the orchestrator.

use crate::constants::{CATALOG_SCHEMAS, FILE_ENGINE, TRANSACTIONAL_ENGINE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// (schema, table) pair. Ordering is by schema, then table name, which is the
/// order plans and state files are written in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub schema: String,
    pub name: String,
}

impl TableId {
    pub fn new<S: Into<String>, N: Into<String>>(schema: S, name: N) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Backtick-quoted `schema`.`table` for use in statements
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Quote an identifier with backticks, doubling embedded backticks
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Whether a table belongs to the server's own catalog or to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Catalog table, converted to the file-based engine and back
    Internal,
    /// Application table, detached through transportable tablespaces
    Application,
}

impl Classification {
    /// Classify a table by the schema it lives in
    pub fn of_schema(schema: &str) -> Self {
        if CATALOG_SCHEMAS.contains(&schema) {
            Classification::Internal
        } else {
            Classification::Application
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Internal => write!(f, "internal"),
            Classification::Application => write!(f, "application"),
        }
    }
}

/// Storage engines the shrinker converts between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Engine {
    InnoDB,
    MyISAM,
}

impl Engine {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Engine::InnoDB => TRANSACTIONAL_ENGINE,
            Engine::MyISAM => FILE_ENGINE,
        }
    }

    /// Match an engine name as reported by the server
    pub fn matches(&self, reported: Option<&str>) -> bool {
        reported.is_some_and(|name| name.eq_ignore_ascii_case(self.as_sql()))
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_schemas_are_internal() {
        assert_eq!(Classification::of_schema("mysql"), Classification::Internal);
        assert_eq!(Classification::of_schema("sys"), Classification::Internal);
        // Schema names are case sensitive on the server
        assert_eq!(Classification::of_schema("MySQL"), Classification::Application);
        assert_eq!(Classification::of_schema("SYS"), Classification::Application);
        assert_eq!(Classification::of_schema("shop"), Classification::Application);
        assert_eq!(Classification::of_schema("mysql_app"), Classification::Application);
    }

    #[test]
    fn test_ordering_by_schema_then_name() {
        let mut ids = vec![
            TableId::new("b", "a"),
            TableId::new("a", "z"),
            TableId::new("a", "b"),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered, vec!["a.b", "a.z", "b.a"]);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(TableId::new("shop", "order`s").quoted(), "`shop`.`order``s`");
    }

    #[test]
    fn test_engine_matching() {
        assert!(Engine::InnoDB.matches(Some("innodb")));
        assert!(!Engine::InnoDB.matches(Some("MyISAM")));
        assert!(!Engine::InnoDB.matches(None));
    }
}

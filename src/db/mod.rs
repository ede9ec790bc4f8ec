//! # Database command client
//!
//! The orchestrator never talks to the server directly. Everything it needs
//! goes through [`CommandClient`], which keeps the shrink logic testable with
//! the in-memory server in [`crate::testing`] and leaves connection handling
//! to [`MySqlClient`].

pub mod filename;
pub mod mysql_client;
pub mod statements;

use crate::constants::EXCLUDED_SCHEMAS;
use crate::table::{Engine, TableId};
use std::path::PathBuf;

pub use filename::{encode_filename, has_portable_filename, tablespace_paths};
pub use mysql_client::MySqlClient;

/// Errors returned by a [`CommandClient`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("Cannot connect to {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    /// The server rejected the statement
    #[error("{statement}: {message}")]
    Statement { statement: String, message: String },

    /// The statement ran but returned something unusable
    #[error("{statement}: unexpected result: {detail}")]
    UnexpectedResult { statement: String, detail: String },
}

impl DbError {
    pub fn statement<S: Into<String>, M: Into<String>>(statement: S, message: M) -> Self {
        Self::Statement {
            statement: statement.into(),
            message: message.into(),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Schemas to leave out of table enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFilter {
    pub excluded: Vec<String>,
}

impl Default for SchemaFilter {
    fn default() -> Self {
        Self {
            excluded: EXCLUDED_SCHEMAS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SchemaFilter {
    pub fn allows(&self, schema: &str) -> bool {
        !self
            .excluded
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(schema))
    }
}

/// One row of the table listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: TableId,
    /// Engine as reported by the server; `None` for views and broken tables
    pub engine: Option<String>,
}

impl TableInfo {
    pub fn new(schema: &str, name: &str, engine: Option<&str>) -> Self {
        Self {
            id: TableId::new(schema, name),
            engine: engine.map(str::to_string),
        }
    }
}

/// Where an InnoDB table keeps its pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablespaceLayout {
    /// Own `.ibd` file, transportable
    FilePerTable,
    /// System or general tablespace shared with other tables
    Shared { tablespace: String },
    /// One file per partition, not addressable as a single table
    Partitioned,
    /// The server reported no tablespace for the table
    Unknown,
}

impl TablespaceLayout {
    pub fn is_transportable(&self) -> bool {
        matches!(self, TablespaceLayout::FilePerTable)
    }

    /// Why the layout cannot be exported, for plan errors
    pub fn describe(&self) -> String {
        match self {
            TablespaceLayout::FilePerTable => "file-per-table".to_string(),
            TablespaceLayout::Shared { tablespace } => {
                format!("stored in shared tablespace '{}'", tablespace)
            }
            TablespaceLayout::Partitioned => "partitioned table".to_string(),
            TablespaceLayout::Unknown => "no tablespace reported by the server".to_string(),
        }
    }
}

/// Physical files of a file-per-table tablespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablespacePaths {
    /// Tablespace data file
    pub ibd: PathBuf,
    /// Export metadata written by `FLUSH TABLES ... FOR EXPORT`
    pub cfg: PathBuf,
}

/// Result of discarding a tablespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardOutcome {
    Discarded,
    /// The tablespace was already missing, typically because the system
    /// tablespace was rebuilt since the export
    AlreadyAbsent,
}

/// Administrative statements the shrinker issues.
///
/// Implementations run every call on one session; `flush_for_export` and
/// `unlock_tables` rely on that.
pub trait CommandClient {
    /// Server data directory
    fn datadir(&mut self) -> DbResult<PathBuf>;

    /// Whether `innodb_file_per_table` is enabled
    fn file_per_table_enabled(&mut self) -> DbResult<bool>;

    /// All tables in schemas allowed by `filter`
    fn list_tables(&mut self, filter: &SchemaFilter) -> DbResult<Vec<TableInfo>>;

    fn tablespace_layout(&mut self, table: &TableId) -> DbResult<TablespaceLayout>;

    /// Location of the table's tablespace files in the data directory
    fn physical_file_paths(&mut self, table: &TableId) -> DbResult<TablespacePaths>;

    fn show_create_table(&mut self, table: &TableId) -> DbResult<String>;

    fn execute_engine_conversion(&mut self, table: &TableId, target: Engine) -> DbResult<()>;

    /// Quiesce the table and write its `.cfg`; holds a read lock until
    /// [`CommandClient::unlock_tables`]
    fn flush_for_export(&mut self, table: &TableId) -> DbResult<()>;

    fn unlock_tables(&mut self) -> DbResult<()>;

    fn discard_tablespace(&mut self, table: &TableId) -> DbResult<DiscardOutcome>;

    fn import_tablespace(&mut self, table: &TableId) -> DbResult<()>;

    /// Whether the table currently has a usable tablespace, i.e. it is
    /// neither discarded nor missing its `.ibd`
    fn tablespace_attached(&mut self, table: &TableId) -> DbResult<bool>;

    /// Disable foreign key checks for the rest of the session
    fn disable_foreign_key_checks(&mut self) -> DbResult<()>;
}

impl<C: CommandClient + ?Sized> CommandClient for &mut C {
    fn datadir(&mut self) -> DbResult<PathBuf> {
        (**self).datadir()
    }
    fn file_per_table_enabled(&mut self) -> DbResult<bool> {
        (**self).file_per_table_enabled()
    }
    fn list_tables(&mut self, filter: &SchemaFilter) -> DbResult<Vec<TableInfo>> {
        (**self).list_tables(filter)
    }
    fn tablespace_layout(&mut self, table: &TableId) -> DbResult<TablespaceLayout> {
        (**self).tablespace_layout(table)
    }
    fn physical_file_paths(&mut self, table: &TableId) -> DbResult<TablespacePaths> {
        (**self).physical_file_paths(table)
    }
    fn show_create_table(&mut self, table: &TableId) -> DbResult<String> {
        (**self).show_create_table(table)
    }
    fn execute_engine_conversion(&mut self, table: &TableId, target: Engine) -> DbResult<()> {
        (**self).execute_engine_conversion(table, target)
    }
    fn flush_for_export(&mut self, table: &TableId) -> DbResult<()> {
        (**self).flush_for_export(table)
    }
    fn unlock_tables(&mut self) -> DbResult<()> {
        (**self).unlock_tables()
    }
    fn discard_tablespace(&mut self, table: &TableId) -> DbResult<DiscardOutcome> {
        (**self).discard_tablespace(table)
    }
    fn import_tablespace(&mut self, table: &TableId) -> DbResult<()> {
        (**self).import_tablespace(table)
    }
    fn tablespace_attached(&mut self, table: &TableId) -> DbResult<bool> {
        (**self).tablespace_attached(table)
    }
    fn disable_foreign_key_checks(&mut self) -> DbResult<()> {
        (**self).disable_foreign_key_checks()
    }
}

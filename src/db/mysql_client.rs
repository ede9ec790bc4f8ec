use super::filename::{encode_filename, tablespace_paths};
use super::statements;
use super::{
    CommandClient, DbError, DbResult, DiscardOutcome, SchemaFilter, TableInfo, TablespaceLayout,
    TablespacePaths,
};
use crate::config::Profile;
use crate::table::{Engine, TableId};
use log::{debug, info};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder};
use std::path::PathBuf;

/// Unknown table, raised by servers lacking an information_schema view
const ER_UNKNOWN_TABLE: u16 = 1109;
/// Tablespace is missing for the table
const ER_TABLESPACE_MISSING: u16 = 1812;
/// Tablespace has been discarded for the table
const ER_TABLESPACE_DISCARDED: u16 = 1814;

const PARTITION_COUNT: &str = "SELECT COUNT(*) FROM information_schema.PARTITIONS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND PARTITION_NAME IS NOT NULL";
const SPACE_LOOKUP: &str = "SELECT t.SPACE, s.NAME FROM information_schema.INNODB_TABLES t \
     LEFT JOIN information_schema.INNODB_TABLESPACES s ON s.SPACE = t.SPACE WHERE t.NAME = ?";
const SPACE_LOOKUP_LEGACY: &str = "SELECT t.SPACE, s.NAME FROM information_schema.INNODB_SYS_TABLES t \
     LEFT JOIN information_schema.INNODB_SYS_TABLESPACES s ON s.SPACE = t.SPACE WHERE t.NAME = ?";

/// [`CommandClient`] over a single session on the server's local socket
pub struct MySqlClient {
    conn: Conn,
    endpoint: String,
    datadir: Option<PathBuf>,
}

impl MySqlClient {
    /// Open a session using the profile's socket and credentials
    pub fn connect(profile: &Profile) -> DbResult<Self> {
        let endpoint = profile.db_socket.display().to_string();
        let mut opts = OptsBuilder::new()
            .ip_or_hostname(Some("localhost"))
            .socket(Some(endpoint.clone()));
        if !profile.db_user.is_empty() {
            opts = opts.user(Some(profile.db_user.clone()));
        }
        if !profile.db_password.is_empty() {
            opts = opts.pass(Some(profile.db_password.clone()));
        }

        let conn = Conn::new(opts).map_err(|e| DbError::Connection {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;
        info!("Connected to database via {}", endpoint);

        Ok(Self {
            conn,
            endpoint,
            datadir: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn run(&mut self, sql: &str) -> DbResult<()> {
        debug!("Executing: {}", sql);
        self.conn
            .query_drop(sql)
            .map_err(|e| DbError::statement(sql, e.to_string()))
    }

    fn global_variable(&mut self, sql: &str) -> DbResult<String> {
        let row: Option<(String, String)> = self
            .conn
            .query_first(sql)
            .map_err(|e| DbError::statement(sql, e.to_string()))?;
        row.map(|(_, value)| value)
            .ok_or_else(|| DbError::UnexpectedResult {
                statement: sql.to_string(),
                detail: "variable not reported".to_string(),
            })
    }

    fn space_of(&mut self, inner_name: &str) -> DbResult<Option<(u64, Option<String>)>> {
        match self
            .conn
            .exec_first::<(u64, Option<String>), _, _>(SPACE_LOOKUP, (inner_name,))
        {
            Ok(row) => Ok(row),
            Err(e) if server_code(&e) == Some(ER_UNKNOWN_TABLE) => {
                debug!("INNODB_TABLES not available, using legacy dictionary views");
                self.conn
                    .exec_first::<(u64, Option<String>), _, _>(SPACE_LOOKUP_LEGACY, (inner_name,))
                    .map_err(|e| DbError::statement(SPACE_LOOKUP_LEGACY, e.to_string()))
            }
            Err(e) => Err(DbError::statement(SPACE_LOOKUP, e.to_string())),
        }
    }
}

fn server_code(error: &mysql::Error) -> Option<u16> {
    match error {
        mysql::Error::MySqlError(e) => Some(e.code),
        _ => None,
    }
}

impl CommandClient for MySqlClient {
    fn datadir(&mut self) -> DbResult<PathBuf> {
        if let Some(datadir) = &self.datadir {
            return Ok(datadir.clone());
        }
        let datadir = PathBuf::from(self.global_variable(statements::SHOW_DATADIR)?);
        self.datadir = Some(datadir.clone());
        Ok(datadir)
    }

    fn file_per_table_enabled(&mut self) -> DbResult<bool> {
        let value = self.global_variable(statements::SHOW_FILE_PER_TABLE)?;
        Ok(matches!(value.to_ascii_uppercase().as_str(), "ON" | "1"))
    }

    fn list_tables(&mut self, filter: &SchemaFilter) -> DbResult<Vec<TableInfo>> {
        let sql = statements::list_tables(&filter.excluded);
        debug!("Executing: {}", sql);
        let rows = self
            .conn
            .query_map(&sql, |(schema, name, engine): (String, String, Option<String>)| {
                TableInfo::new(&schema, &name, engine.as_deref())
            })
            .map_err(|e| DbError::statement(sql.as_str(), e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter(|info| filter.allows(&info.id.schema))
            .collect())
    }

    fn tablespace_layout(&mut self, table: &TableId) -> DbResult<TablespaceLayout> {
        let partitions: Option<u64> = self
            .conn
            .exec_first(PARTITION_COUNT, (table.schema.as_str(), table.name.as_str()))
            .map_err(|e| DbError::statement(PARTITION_COUNT, e.to_string()))?;
        if partitions.unwrap_or(0) > 0 {
            return Ok(TablespaceLayout::Partitioned);
        }

        let inner_name = format!(
            "{}/{}",
            encode_filename(&table.schema),
            encode_filename(&table.name)
        );
        let layout = match self.space_of(&inner_name)? {
            None => TablespaceLayout::Unknown,
            Some((0, _)) => TablespaceLayout::Shared {
                tablespace: "innodb_system".to_string(),
            },
            Some((_, Some(space_name))) if space_name != inner_name => {
                TablespaceLayout::Shared {
                    tablespace: space_name,
                }
            }
            Some(_) => TablespaceLayout::FilePerTable,
        };
        Ok(layout)
    }

    fn physical_file_paths(&mut self, table: &TableId) -> DbResult<TablespacePaths> {
        let datadir = self.datadir()?;
        Ok(tablespace_paths(&datadir, table))
    }

    fn show_create_table(&mut self, table: &TableId) -> DbResult<String> {
        let sql = statements::show_create_table(table);
        let row: Option<(String, String)> = self
            .conn
            .query_first(&sql)
            .map_err(|e| DbError::statement(sql.as_str(), e.to_string()))?;
        row.map(|(_, definition)| definition)
            .ok_or_else(|| DbError::UnexpectedResult {
                statement: sql,
                detail: "no table definition returned".to_string(),
            })
    }

    fn execute_engine_conversion(&mut self, table: &TableId, target: Engine) -> DbResult<()> {
        self.run(&statements::engine_conversion(table, target))
    }

    fn flush_for_export(&mut self, table: &TableId) -> DbResult<()> {
        self.run(&statements::flush_for_export(table))
    }

    fn unlock_tables(&mut self) -> DbResult<()> {
        self.run(statements::UNLOCK_TABLES)
    }

    fn discard_tablespace(&mut self, table: &TableId) -> DbResult<DiscardOutcome> {
        let sql = statements::discard_tablespace(table);
        debug!("Executing: {}", sql);
        match self.conn.query_drop(&sql) {
            Ok(()) => Ok(DiscardOutcome::Discarded),
            Err(e)
                if matches!(
                    server_code(&e),
                    Some(ER_TABLESPACE_MISSING) | Some(ER_TABLESPACE_DISCARDED)
                ) =>
            {
                info!("Tablespace of {} already absent: {}", table, e);
                Ok(DiscardOutcome::AlreadyAbsent)
            }
            Err(e) => Err(DbError::statement(sql, e.to_string())),
        }
    }

    fn import_tablespace(&mut self, table: &TableId) -> DbResult<()> {
        self.run(&statements::import_tablespace(table))
    }

    fn tablespace_attached(&mut self, table: &TableId) -> DbResult<bool> {
        let sql = statements::probe_tablespace(table);
        debug!("Executing: {}", sql);
        match self.conn.query_drop(&sql) {
            Ok(()) => Ok(true),
            Err(e)
                if matches!(
                    server_code(&e),
                    Some(ER_TABLESPACE_MISSING) | Some(ER_TABLESPACE_DISCARDED)
                ) =>
            {
                debug!("{} has no usable tablespace: {}", table, e);
                Ok(false)
            }
            Err(e) => Err(DbError::statement(sql, e.to_string())),
        }
    }

    fn disable_foreign_key_checks(&mut self) -> DbResult<()> {
        self.run(statements::DISABLE_FOREIGN_KEY_CHECKS)
    }
}

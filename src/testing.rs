//! Test doubles for running the shrinker without a database server.
//!
//! [`FakeServer`] keeps a table catalog in memory and mirrors the data
//! directory effects of each statement on a real directory, so transfers and
//! checksums run against actual files.

use crate::config::Profile;
use crate::db::statements;
use crate::db::{
    tablespace_paths, CommandClient, DbError, DbResult, DiscardOutcome, SchemaFilter, TableInfo,
    TablespaceLayout, TablespacePaths,
};
use crate::table::{Engine, TableId};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Profile pointing at `workdir`, with a socket path that is never opened
pub fn test_profile(workdir: &Path, use_hardlink: bool) -> Profile {
    Profile {
        name: "default".to_string(),
        workdir: workdir.to_path_buf(),
        db_socket: workdir.join("mysqld.sock"),
        db_user: "root".to_string(),
        db_password: String::new(),
        use_hardlink,
    }
}

#[derive(Debug, Clone)]
struct FakeTable {
    engine: String,
    layout: TablespaceLayout,
    /// Tablespace discarded and not yet imported
    discarded: bool,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    pattern: String,
    message: String,
    /// `None` fails every matching statement
    remaining: Option<usize>,
}

/// In-memory server with a real data directory
#[derive(Debug)]
pub struct FakeServer {
    datadir: PathBuf,
    file_per_table: bool,
    tables: BTreeMap<TableId, FakeTable>,
    statements: Vec<String>,
    failures: Vec<InjectedFailure>,
    /// Tables whose `.ibd` vanishes when flushed for export
    lose_on_flush: HashSet<TableId>,
    /// `.cfg` files written by the current export lock
    exported_cfgs: Vec<PathBuf>,
    /// Append to the `.ibd` on import, as the server rewrites page headers
    stamp_on_import: bool,
}

impl FakeServer {
    pub fn new<P: Into<PathBuf>>(datadir: P) -> Self {
        let datadir = datadir.into();
        let _ = fs::create_dir_all(&datadir);
        Self {
            datadir,
            file_per_table: true,
            tables: BTreeMap::new(),
            statements: Vec::new(),
            failures: Vec::new(),
            lose_on_flush: HashSet::new(),
            exported_cfgs: Vec::new(),
            stamp_on_import: false,
        }
    }

    pub fn datadir_path(&self) -> &Path {
        &self.datadir
    }

    /// Create a table. InnoDB tables get an `.ibd` holding `pages`.
    pub fn add_table(&mut self, schema: &str, name: &str, engine: &str, pages: &[u8]) {
        let id = TableId::new(schema, name);
        if Engine::InnoDB.matches(Some(engine)) {
            self.write_ibd(&id, pages);
        }
        self.tables.insert(
            id,
            FakeTable {
                engine: engine.to_string(),
                layout: TablespaceLayout::FilePerTable,
                discarded: false,
            },
        );
    }

    pub fn drop_table(&mut self, table: &TableId) {
        self.tables.remove(table);
        let _ = fs::remove_file(self.paths(table).ibd);
    }

    pub fn rename_table(&mut self, from: &TableId, to: &TableId) {
        if let Some(entry) = self.tables.remove(from) {
            let (old, new) = (self.paths(from), self.paths(to));
            if let Some(parent) = new.ibd.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::rename(old.ibd, new.ibd);
            self.tables.insert(to.clone(), entry);
        }
    }

    pub fn set_layout(&mut self, table: &TableId, layout: TablespaceLayout) {
        if let Some(entry) = self.tables.get_mut(table) {
            entry.layout = layout;
        }
    }

    pub fn set_file_per_table(&mut self, enabled: bool) {
        self.file_per_table = enabled;
    }

    /// Engine the catalog currently reports for `table`
    pub fn engine_of(&self, table: &TableId) -> Option<&str> {
        self.tables.get(table).map(|t| t.engine.as_str())
    }

    pub fn is_discarded(&self, table: &TableId) -> bool {
        self.tables.get(table).is_some_and(|t| t.discarded)
    }

    /// Make every statement containing `pattern` fail
    pub fn fail_statement(&mut self, pattern: &str, message: &str) {
        self.failures.push(InjectedFailure {
            pattern: pattern.to_string(),
            message: message.to_string(),
            remaining: None,
        });
    }

    /// Make the next statement containing `pattern` fail, once
    pub fn fail_statement_once(&mut self, pattern: &str, message: &str) {
        self.failures.push(InjectedFailure {
            pattern: pattern.to_string(),
            message: message.to_string(),
            remaining: Some(1),
        });
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Delete the table's `.ibd` as soon as it is flushed for export
    pub fn lose_tablespace_on_flush(&mut self, table: &TableId) {
        self.lose_on_flush.insert(table.clone());
    }

    /// Make every successful import rewrite the tablespace file in place
    pub fn stamp_pages_on_import(&mut self) {
        self.stamp_on_import = true;
    }

    /// Simulate the manual step between the stages: the server is stopped,
    /// the system tablespace deleted and the server started again. The
    /// catalog survives; export locks do not.
    pub fn restart(&mut self) {
        self.exported_cfgs.clear();
        self.statements.push("-- restart".to_string());
    }

    /// Every statement received, in order
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn mutating_statements(&self) -> Vec<&String> {
        self.statements
            .iter()
            .filter(|s| !s.starts_with("--") && statements::is_mutating(s))
            .collect()
    }

    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }

    fn paths(&self, table: &TableId) -> TablespacePaths {
        tablespace_paths(&self.datadir, table)
    }

    fn write_ibd(&self, table: &TableId, pages: &[u8]) {
        let ibd = self.paths(table).ibd;
        if let Some(parent) = ibd.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::write(ibd, pages);
    }

    /// Record `sql` and apply any injected failure
    fn receive(&mut self, sql: String) -> DbResult<()> {
        self.statements.push(sql.clone());
        let hit = self
            .failures
            .iter_mut()
            .position(|f| sql.contains(&f.pattern) && f.remaining != Some(0));
        if let Some(index) = hit {
            let failure = &mut self.failures[index];
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(DbError::statement(sql, failure.message.clone()));
        }
        Ok(())
    }

    fn existing(&self, table: &TableId, sql: &str) -> DbResult<FakeTable> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::statement(sql, format!("Table '{}' doesn't exist", table)))
    }
}

impl CommandClient for FakeServer {
    fn datadir(&mut self) -> DbResult<PathBuf> {
        self.receive(statements::SHOW_DATADIR.to_string())?;
        Ok(self.datadir.clone())
    }

    fn file_per_table_enabled(&mut self) -> DbResult<bool> {
        self.receive(statements::SHOW_FILE_PER_TABLE.to_string())?;
        Ok(self.file_per_table)
    }

    fn list_tables(&mut self, filter: &SchemaFilter) -> DbResult<Vec<TableInfo>> {
        self.receive(statements::list_tables(&filter.excluded))?;
        Ok(self
            .tables
            .iter()
            .filter(|(id, _)| filter.allows(&id.schema))
            .map(|(id, t)| TableInfo::new(&id.schema, &id.name, Some(&t.engine)))
            .collect())
    }

    fn tablespace_layout(&mut self, table: &TableId) -> DbResult<TablespaceLayout> {
        let sql = format!(
            "SELECT SPACE FROM information_schema.INNODB_TABLES WHERE NAME = {}",
            statements::quote_literal(&format!("{}/{}", table.schema, table.name))
        );
        self.receive(sql.clone())?;
        Ok(self.existing(table, &sql)?.layout)
    }

    fn physical_file_paths(&mut self, table: &TableId) -> DbResult<TablespacePaths> {
        Ok(self.paths(table))
    }

    fn show_create_table(&mut self, table: &TableId) -> DbResult<String> {
        let sql = statements::show_create_table(table);
        self.receive(sql.clone())?;
        let entry = self.existing(table, &sql)?;
        Ok(format!(
            "CREATE TABLE `{}` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE={}",
            table.name, entry.engine
        ))
    }

    fn execute_engine_conversion(&mut self, table: &TableId, target: Engine) -> DbResult<()> {
        let sql = statements::engine_conversion(table, target);
        self.receive(sql.clone())?;
        self.existing(table, &sql)?;
        match target {
            Engine::MyISAM => {
                let _ = fs::remove_file(self.paths(table).ibd);
            }
            Engine::InnoDB => self.write_ibd(table, b""),
        }
        if let Some(entry) = self.tables.get_mut(table) {
            entry.engine = target.as_sql().to_string();
        }
        Ok(())
    }

    fn flush_for_export(&mut self, table: &TableId) -> DbResult<()> {
        let sql = statements::flush_for_export(table);
        self.receive(sql.clone())?;
        let entry = self.existing(table, &sql)?;
        if !Engine::InnoDB.matches(Some(entry.engine.as_str())) {
            return Err(DbError::statement(sql, "Table storage engine doesn't support FOR EXPORT"));
        }
        let paths = self.paths(table);
        let _ = fs::write(&paths.cfg, format!("cfg {}", table));
        self.exported_cfgs.push(paths.cfg);
        if self.lose_on_flush.contains(table) {
            let _ = fs::remove_file(paths.ibd);
        }
        Ok(())
    }

    fn unlock_tables(&mut self) -> DbResult<()> {
        self.receive(statements::UNLOCK_TABLES.to_string())?;
        for cfg in self.exported_cfgs.drain(..) {
            let _ = fs::remove_file(cfg);
        }
        Ok(())
    }

    fn discard_tablespace(&mut self, table: &TableId) -> DbResult<DiscardOutcome> {
        let sql = statements::discard_tablespace(table);
        self.receive(sql.clone())?;
        let entry = self.existing(table, &sql)?;
        if entry.discarded {
            return Ok(DiscardOutcome::AlreadyAbsent);
        }
        let ibd = self.paths(table).ibd;
        let outcome = if ibd.exists() {
            fs::remove_file(&ibd).map_err(|e| DbError::statement(sql.as_str(), e.to_string()))?;
            DiscardOutcome::Discarded
        } else {
            DiscardOutcome::AlreadyAbsent
        };
        if let Some(entry) = self.tables.get_mut(table) {
            entry.discarded = true;
        }
        Ok(outcome)
    }

    fn import_tablespace(&mut self, table: &TableId) -> DbResult<()> {
        let sql = statements::import_tablespace(table);
        self.receive(sql.clone())?;
        let entry = self.existing(table, &sql)?;
        if !entry.discarded {
            return Err(DbError::statement(sql, "Tablespace exists."));
        }
        let ibd = self.paths(table).ibd;
        if !ibd.exists() {
            return Err(DbError::statement(sql, "Tablespace is missing for table"));
        }
        if self.stamp_on_import {
            let mut file = fs::OpenOptions::new()
                .append(true)
                .open(&ibd)
                .map_err(|e| DbError::statement(sql.as_str(), e.to_string()))?;
            file.write_all(b" imported")
                .map_err(|e| DbError::statement(sql.as_str(), e.to_string()))?;
        }
        if let Some(entry) = self.tables.get_mut(table) {
            entry.discarded = false;
        }
        Ok(())
    }

    fn tablespace_attached(&mut self, table: &TableId) -> DbResult<bool> {
        let sql = statements::probe_tablespace(table);
        self.receive(sql.clone())?;
        let entry = self.existing(table, &sql)?;
        Ok(!entry.discarded && self.paths(table).ibd.exists())
    }

    fn disable_foreign_key_checks(&mut self) -> DbResult<()> {
        self.receive(statements::DISABLE_FOREIGN_KEY_CHECKS.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_lock_writes_and_removes_cfg() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path());
        server.add_table("shop", "orders", "InnoDB", b"pages");
        let id = TableId::new("shop", "orders");
        let paths = server.physical_file_paths(&id).unwrap();

        server.flush_for_export(&id).unwrap();
        assert!(paths.cfg.exists());
        server.unlock_tables().unwrap();
        assert!(!paths.cfg.exists());
        assert!(paths.ibd.exists());
    }

    #[test]
    fn test_discard_twice_reports_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path());
        server.add_table("shop", "orders", "InnoDB", b"pages");
        let id = TableId::new("shop", "orders");
        assert_eq!(server.discard_tablespace(&id).unwrap(), DiscardOutcome::Discarded);
        assert_eq!(
            server.discard_tablespace(&id).unwrap(),
            DiscardOutcome::AlreadyAbsent
        );
        assert!(server.import_tablespace(&id).is_err());
    }

    #[test]
    fn test_attached_follows_discard_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path());
        server.add_table("shop", "orders", "InnoDB", b"pages");
        let id = TableId::new("shop", "orders");
        assert!(server.tablespace_attached(&id).unwrap());

        server.discard_tablespace(&id).unwrap();
        assert!(!server.tablespace_attached(&id).unwrap());

        server.stamp_pages_on_import();
        fs::write(server.physical_file_paths(&id).unwrap().ibd, b"pages").unwrap();
        server.import_tablespace(&id).unwrap();
        assert!(server.tablespace_attached(&id).unwrap());
        assert_eq!(
            fs::read(server.physical_file_paths(&id).unwrap().ibd).unwrap(),
            b"pages imported"
        );
    }

    #[test]
    fn test_injected_failure_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path());
        server.add_table("mysql", "user", "InnoDB", b"");
        let id = TableId::new("mysql", "user");
        server.fail_statement_once("ENGINE=MyISAM", "lock wait timeout");
        let err = server
            .execute_engine_conversion(&id, Engine::MyISAM)
            .unwrap_err();
        assert!(err.to_string().contains("lock wait timeout"));
        server.execute_engine_conversion(&id, Engine::MyISAM).unwrap();
        assert_eq!(server.engine_of(&id), Some("MyISAM"));
    }
}

//! # Table inventory
//!
//! Read-only discovery of what a run will touch. The builder enumerates all
//! tables, sorts them into internal (catalog) tables to convert, application
//! tables to export and unmanaged tables that stay where they are, and
//! refuses the whole plan if any application table cannot be exported.

use crate::config::Profile;
use crate::db::{has_portable_filename, CommandClient, SchemaFilter, TableInfo};
use crate::error::{ShrinkError, ShrinkResult};
use crate::state::{RunPhase, RunState, TableRecord, UnmanagedTable};
use crate::table::{Classification, Engine, TableId};
use crate::transfer::{ensure_same_device, TransferMode};
use colored::Colorize;
use log::{debug, info};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// A managed table in the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTable {
    pub id: TableId,
    pub classification: Classification,
    pub engine: String,
}

/// Everything stage 1 will do, in execution order
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub datadir: PathBuf,
    pub workdir: PathBuf,
    pub transfer_mode: TransferMode,
    /// Internal tables first, then application tables, each sorted by
    /// schema and name
    pub tables: Vec<PlannedTable>,
    /// Non-InnoDB tables, kept for drift detection only
    pub unmanaged: Vec<TableInfo>,
}

impl ExecutionPlan {
    pub fn of_class(&self, classification: Classification) -> impl Iterator<Item = &PlannedTable> {
        self.tables
            .iter()
            .filter(move |t| t.classification == classification)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Operator-facing summary shown before confirmation
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\n{}",
            "The following tables will be converted from InnoDB to MyISAM:".yellow()
        );
        for table in self.of_class(Classification::Internal) {
            let _ = writeln!(out, "{}", table.id);
        }
        let _ = writeln!(
            out,
            "\n{}",
            "The following tables will be exported from database:".yellow()
        );
        for table in self.of_class(Classification::Application) {
            let _ = writeln!(out, "{}", table.id);
        }
        if !self.unmanaged.is_empty() {
            let _ = writeln!(
                out,
                "\n{} non-InnoDB tables are left in place",
                self.unmanaged.len()
            );
        }
        let _ = writeln!(out, "\nData directory: {}", self.datadir.display());
        let _ = writeln!(out, "Working directory: {}", self.workdir.display());
        let _ = writeln!(out, "Transfer mode: {}", self.transfer_mode);
        out
    }

    /// Fresh run state for this plan, in phase `PLANNED`
    pub fn to_state(&self, profile: &str) -> ShrinkResult<RunState> {
        let mut state = RunState::new(
            profile,
            self.workdir.clone(),
            self.datadir.clone(),
            self.transfer_mode,
        );
        state.tables = self
            .tables
            .iter()
            .map(|t| TableRecord::new(&t.id, t.classification, &t.engine))
            .collect();
        state.unmanaged = self
            .unmanaged
            .iter()
            .map(|info| UnmanagedTable {
                schema: info.id.schema.clone(),
                table: info.id.name.clone(),
                engine: info.engine.clone(),
            })
            .collect();
        state.transition(RunPhase::Planned)?;
        Ok(state)
    }
}

/// Builds an [`ExecutionPlan`] without changing anything on the server
pub struct InventoryBuilder<'a, C: CommandClient> {
    client: &'a mut C,
    filter: SchemaFilter,
}

impl<'a, C: CommandClient> InventoryBuilder<'a, C> {
    pub fn new(client: &'a mut C) -> Self {
        Self {
            client,
            filter: SchemaFilter::default(),
        }
    }

    /// Check server settings and return the data directory.
    ///
    /// With hard links the working directory must share a filesystem with
    /// the data directory; this is checked here so a mismatch surfaces
    /// before any table is touched.
    pub fn preflight(&mut self, workdir: &Path, mode: TransferMode) -> ShrinkResult<PathBuf> {
        if !self.client.file_per_table_enabled()? {
            return Err(ShrinkError::unsupported(
                "innodb_file_per_table is disabled; tables cannot be exported",
            ));
        }
        let datadir = self.client.datadir()?;
        debug!("Server data directory is {}", datadir.display());
        if mode == TransferMode::Hardlink {
            ensure_same_device(&datadir, workdir)?;
        }
        Ok(datadir)
    }

    /// Current tables, sorted by schema and name
    pub fn snapshot(&mut self) -> ShrinkResult<Vec<TableInfo>> {
        let mut tables = self.client.list_tables(&self.filter)?;
        tables.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tables)
    }

    pub fn build_plan(&mut self, profile: &Profile) -> ShrinkResult<ExecutionPlan> {
        let datadir = self.preflight(&profile.workdir, profile.transfer_mode())?;

        // The snapshot is sorted by schema then name; tables keep that order
        let mut tables = Vec::new();
        let mut unmanaged = Vec::new();
        for info in self.snapshot()? {
            if !Engine::InnoDB.matches(info.engine.as_deref()) {
                unmanaged.push(info);
                continue;
            }
            tables.push(PlannedTable {
                classification: Classification::of_schema(&info.id.schema),
                id: info.id,
                engine: info.engine.unwrap_or_default(),
            });
        }

        let application: Vec<PlannedTable> = tables
            .iter()
            .filter(|t| t.classification == Classification::Application)
            .cloned()
            .collect();
        self.check_exportable(&application)?;
        info!(
            "Planned {} conversions and {} exports ({} tables unmanaged)",
            tables.len() - application.len(),
            application.len(),
            unmanaged.len()
        );

        Ok(ExecutionPlan {
            datadir,
            workdir: profile.workdir.clone(),
            transfer_mode: profile.transfer_mode(),
            tables,
            unmanaged,
        })
    }

    fn check_exportable(&mut self, tables: &[PlannedTable]) -> ShrinkResult<()> {
        let mut refused = Vec::new();
        for table in tables {
            if !has_portable_filename(&table.id.schema) || !has_portable_filename(&table.id.name)
            {
                refused.push(format!("{} (non-ASCII name)", table.id));
                continue;
            }
            let layout = self.client.tablespace_layout(&table.id)?;
            if !layout.is_transportable() {
                refused.push(format!("{} ({})", table.id, layout.describe()));
            }
        }
        if refused.is_empty() {
            Ok(())
        } else {
            Err(ShrinkError::unsupported(format!(
                "tables cannot be exported as transportable tablespaces: {}",
                refused.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TablespaceLayout;
    use crate::testing::{test_profile, FakeServer};

    fn profile(workdir: &std::path::Path) -> Profile {
        test_profile(workdir, false)
    }

    #[test]
    fn test_classification_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path().join("data"));
        server.add_table("shop", "orders", "InnoDB", b"o");
        server.add_table("mysql", "user", "InnoDB", b"");
        server.add_table("analytics", "events", "InnoDB", b"e");
        server.add_table("shop", "legacy", "MyISAM", b"");
        server.add_table("sys", "sys_config", "InnoDB", b"");

        let plan = InventoryBuilder::new(&mut server)
            .build_plan(&profile(dir.path()))
            .unwrap();
        let order: Vec<String> = plan.tables.iter().map(|t| t.id.to_string()).collect();
        assert_eq!(
            order,
            vec!["analytics.events", "mysql.user", "shop.orders", "sys.sys_config"]
        );
        assert_eq!(plan.unmanaged.len(), 1);
        assert_eq!(plan.unmanaged[0].id.to_string(), "shop.legacy");
        assert!(plan.render().contains("analytics.events"));
    }

    #[test]
    fn test_planning_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path().join("data"));
        server.add_table("shop", "orders", "InnoDB", b"o");
        InventoryBuilder::new(&mut server)
            .build_plan(&profile(dir.path()))
            .unwrap();
        assert!(server.mutating_statements().is_empty());
    }

    #[test]
    fn test_shared_tablespace_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path().join("data"));
        server.add_table("shop", "orders", "InnoDB", b"o");
        server.add_table("shop", "archive", "InnoDB", b"a");
        server.set_layout(
            &TableId::new("shop", "archive"),
            TablespaceLayout::Shared {
                tablespace: "innodb_system".into(),
            },
        );
        let err = InventoryBuilder::new(&mut server)
            .build_plan(&profile(dir.path()))
            .unwrap_err();
        assert!(matches!(err, ShrinkError::Unsupported(_)));
        assert!(err.to_string().contains("shop.archive"));
        assert!(!err.to_string().contains("shop.orders"));
    }

    #[test]
    fn test_file_per_table_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path().join("data"));
        server.set_file_per_table(false);
        let err = InventoryBuilder::new(&mut server)
            .build_plan(&profile(dir.path()))
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_non_ascii_name_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::new(dir.path().join("data"));
        server.add_table("shop", "bestellungen_ü", "InnoDB", b"x");
        let err = InventoryBuilder::new(&mut server)
            .build_plan(&profile(dir.path()))
            .unwrap_err();
        assert!(err.to_string().contains("non-ASCII"));
    }
}

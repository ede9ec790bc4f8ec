//! Shared fixture for the stage scenarios: a fake server whose data
//! directory and the run's working directory live in one temp dir.

#![allow(dead_code)]

use ibdata_shrinker::orchestrator::{AutoConfirm, Orchestrator};
use ibdata_shrinker::state::{RunState, RunStateStore};
use ibdata_shrinker::table::TableId;
use ibdata_shrinker::testing::{test_profile, FakeServer};
use ibdata_shrinker::Profile;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ORDERS_PAGES: &[u8] = b"orders tablespace pages";

pub struct Fixture {
    pub server: FakeServer,
    pub profile: Profile,
    pub _dir: TempDir,
}

impl Fixture {
    pub fn new(use_hardlink: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("work");
        std::fs::create_dir_all(&workdir).unwrap();
        let server = FakeServer::new(dir.path().join("mysql"));
        Self {
            server,
            profile: test_profile(&workdir, use_hardlink),
            _dir: dir,
        }
    }

    /// Five catalog tables, three application tables and one MyISAM table
    pub fn populated(use_hardlink: bool) -> Self {
        let mut fixture = Self::new(use_hardlink);
        let server = &mut fixture.server;
        for name in ["db", "user", "proxies_priv", "time_zone"] {
            server.add_table("mysql", name, "InnoDB", b"");
        }
        server.add_table("sys", "sys_config", "InnoDB", b"");
        server.add_table("shop", "orders", "InnoDB", ORDERS_PAGES);
        server.add_table("shop", "customers", "InnoDB", b"customer pages");
        server.add_table("analytics", "events", "InnoDB", b"event pages");
        server.add_table("shop", "legacy_log", "MyISAM", b"");
        fixture
    }

    pub fn workdir(&self) -> &Path {
        &self.profile.workdir
    }

    pub fn datadir(&self) -> PathBuf {
        self.server.datadir_path().to_path_buf()
    }

    /// Orchestrator that confirms every plan
    pub fn orchestrator(&mut self) -> Orchestrator<&mut FakeServer> {
        self.orchestrator_with(AutoConfirm::yes())
    }

    pub fn orchestrator_with(&mut self, confirm: AutoConfirm) -> Orchestrator<&mut FakeServer> {
        Orchestrator::new(&mut self.server, self.profile.clone())
            .with_confirmation(Box::new(confirm))
    }

    pub fn store(&self) -> RunStateStore {
        RunStateStore::new(self.workdir())
    }

    pub fn state(&self) -> RunState {
        self.store()
            .load(&self.profile.name)
            .unwrap()
            .expect("run state should exist")
    }

    /// Statements containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.server
            .statements()
            .iter()
            .filter(|s| s.contains(pattern))
            .count()
    }
}

pub fn id(schema: &str, name: &str) -> TableId {
    TableId::new(schema, name)
}

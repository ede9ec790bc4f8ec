//! # ibdata shrinker
//!
//! Shrinks the InnoDB system tablespace (`ibdata1`) of a MySQL server that
//! runs with `innodb_file_per_table`. Catalog tables are converted to MyISAM
//! and application tablespaces are exported, so that the operator can delete
//! `ibdata1` and let the server recreate it small. A second stage puts
//! everything back.
//!
//! ## Core Components
//!
//! * `config` - INI profiles
//! * `db` - The command client trait and its MySQL implementation
//! * `inventory` - Table discovery, classification and planning
//! * `orchestrator` - The resumable two-stage state machine
//! * `state` - Persisted run state, checkpoints and the run lock
//! * `transfer` - Verified copy and hard-link transfer of tablespace files
//! * `testing` - An in-memory server for tests

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod state;
pub mod table;
pub mod testing;
pub mod transfer;

// Re-export main types for convenience
pub use config::{load_profile, ConfigError, Profile};
pub use db::{CommandClient, DbError, MySqlClient};
pub use error::{ShrinkError, ShrinkResult};
pub use inventory::{ExecutionPlan, InventoryBuilder};
pub use orchestrator::{
    AutoConfirm, CancelFlag, Confirmation, Console, Orchestrator, StageOutcome,
    TerminalConfirmation,
};
pub use state::{RunPhase, RunState, RunStateStore, TableRecord, TableStatus};
pub use table::{Classification, Engine, TableId};
pub use transfer::{TransferError, TransferMode, TransferUnit};

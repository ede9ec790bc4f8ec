//! # Run state
//!
//! The durable record of a shrink run. A [`RunState`] is created when the
//! stage-1 plan is confirmed and is rewritten after every table, so that a
//! crashed or interrupted run resumes exactly where it stopped. It outlives
//! the server restart between the stages; stage 2 starts from nothing else.

pub mod lock;
pub mod record;
pub mod store;

use crate::constants::STATE_SCHEMA_VERSION;
use crate::error::{ShrinkError, ShrinkResult};
use crate::table::TableId;
use crate::transfer::TransferMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub use lock::RunLock;
pub use record::{stage_steps, FailureRecord, FileRecord, StageSteps, TableRecord, TableStatus};
pub use store::RunStateStore;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Init,
    Planned,
    Stage1Running,
    Stage1Done,
    Stage2Running,
    Stage2Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Init => "INIT",
            RunPhase::Planned => "PLANNED",
            RunPhase::Stage1Running => "STAGE1_RUNNING",
            RunPhase::Stage1Done => "STAGE1_DONE",
            RunPhase::Stage2Running => "STAGE2_RUNNING",
            RunPhase::Stage2Done => "STAGE2_DONE",
            RunPhase::Failed => "FAILED",
        }
    }

    fn is_running(&self) -> bool {
        matches!(self, RunPhase::Stage1Running | RunPhase::Stage2Running)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table seen at planning time that the run does not touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmanagedTable {
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub engine: Option<String>,
}

impl UnmanagedTable {
    pub fn id(&self) -> TableId {
        TableId::new(self.schema.clone(), self.table.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub profile: String,
    /// Stage the phase belongs to
    pub stage: u8,
    pub phase: RunPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workdir: PathBuf,
    pub datadir: PathBuf,
    pub transfer_mode: TransferMode,
    pub tables: Vec<TableRecord>,
    #[serde(default)]
    pub unmanaged: Vec<UnmanagedTable>,
}

impl RunState {
    /// A fresh run in phase `INIT`
    pub fn new(
        profile: &str,
        workdir: PathBuf,
        datadir: PathBuf,
        transfer_mode: TransferMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            run_id: Uuid::new_v4(),
            profile: profile.to_string(),
            stage: 1,
            phase: RunPhase::Init,
            created_at: now,
            updated_at: now,
            workdir,
            datadir,
            transfer_mode,
            tables: Vec::new(),
            unmanaged: Vec::new(),
        }
    }

    /// Move to `next` if the phase machine allows it
    pub fn transition(&mut self, next: RunPhase) -> ShrinkResult<()> {
        use RunPhase::*;
        let legal = match (self.phase, next) {
            (Init, Planned) => true,
            (Planned, Stage1Running) => true,
            (Stage1Running, Stage1Done) => true,
            (Stage1Done, Stage2Running) => true,
            (Stage2Running, Stage2Done) => true,
            (from, Failed) => from.is_running(),
            (Failed, Stage1Running) => self.stage == 1,
            (Failed, Stage2Running) => self.stage == 2,
            // A process that died mid-stage resumes the same stage
            (Stage1Running, Stage1Running) | (Stage2Running, Stage2Running) => true,
            _ => false,
        };
        if !legal {
            return Err(ShrinkError::InvalidTransition(format!(
                "run {} {} -> {}",
                self.run_id, self.phase, next
            )));
        }
        if matches!(next, Stage2Running) {
            self.stage = 2;
        }
        self.phase = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record(&self, table: &TableId) -> Option<&TableRecord> {
        self.tables
            .iter()
            .find(|r| r.schema == table.schema && r.table == table.name)
    }

    pub fn record_mut(&mut self, table: &TableId) -> Option<&mut TableRecord> {
        self.tables
            .iter_mut()
            .find(|r| r.schema == table.schema && r.table == table.name)
    }

    /// Managed and unmanaged tables known to this run
    pub fn known_tables(&self) -> Vec<TableId> {
        let mut all: Vec<TableId> = self
            .tables
            .iter()
            .map(TableRecord::id)
            .chain(self.unmanaged.iter().map(UnmanagedTable::id))
            .collect();
        all.sort();
        all
    }

    /// Whether every record reached the success status of `stage`
    pub fn stage_complete(&self, stage: u8) -> bool {
        self.tables.iter().all(|r| !r.needs_work(stage))
    }

    /// Structural checks applied to every loaded state
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version != STATE_SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version {} (expected {})",
                self.schema_version, STATE_SCHEMA_VERSION
            ));
        }
        if self.profile.trim().is_empty() {
            return Err("profile name is empty".to_string());
        }
        if !matches!(self.stage, 1 | 2) {
            return Err(format!("invalid stage {}", self.stage));
        }
        if matches!(self.phase, RunPhase::Stage2Running | RunPhase::Stage2Done) && self.stage != 2
        {
            return Err(format!("phase {} recorded with stage {}", self.phase, self.stage));
        }

        let mut seen = HashSet::new();
        for record in &self.tables {
            if !seen.insert((record.schema.as_str(), record.table.as_str())) {
                return Err(format!(
                    "table {}.{} recorded twice",
                    record.schema, record.table
                ));
            }
            if !record.status.valid_for(record.classification) {
                return Err(format!(
                    "{} table {}.{} has status {}",
                    record.classification, record.schema, record.table, record.status
                ));
            }
            if matches!(
                record.status,
                TableStatus::Exported | TableStatus::Importing | TableStatus::Imported
            ) && record.tablespace_file().is_none()
            {
                return Err(format!(
                    "table {}.{} is {} without export checksums",
                    record.schema, record.table, record.status
                ));
            }
        }
        if self.phase == RunPhase::Stage1Done && !self.stage_complete(1) {
            return Err("phase STAGE1_DONE with unfinished tables".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Classification;

    fn state() -> RunState {
        RunState::new(
            "default",
            PathBuf::from("/work"),
            PathBuf::from("/var/lib/mysql"),
            TransferMode::Copy,
        )
    }

    #[test]
    fn test_phase_sequence() {
        let mut s = state();
        s.transition(RunPhase::Planned).unwrap();
        s.transition(RunPhase::Stage1Running).unwrap();
        s.transition(RunPhase::Stage1Done).unwrap();
        assert_eq!(s.stage, 1);
        s.transition(RunPhase::Stage2Running).unwrap();
        assert_eq!(s.stage, 2);
        s.transition(RunPhase::Stage2Done).unwrap();
    }

    #[test]
    fn test_illegal_phase_transitions() {
        let mut s = state();
        assert!(s.transition(RunPhase::Stage2Running).is_err());
        assert!(s.transition(RunPhase::Failed).is_err());
        s.transition(RunPhase::Planned).unwrap();
        s.transition(RunPhase::Stage1Running).unwrap();
        s.transition(RunPhase::Failed).unwrap();
        assert!(s.transition(RunPhase::Stage2Running).is_err());
        s.transition(RunPhase::Stage1Running).unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut s = state();
        let id = TableId::new("shop", "orders");
        s.tables
            .push(TableRecord::new(&id, Classification::Application, "InnoDB"));
        s.tables
            .push(TableRecord::new(&id, Classification::Application, "InnoDB"));
        assert!(s.validate().unwrap_err().contains("twice"));
    }

    #[test]
    fn test_validate_rejects_exported_without_files() {
        let mut s = state();
        let mut record = TableRecord::new(
            &TableId::new("shop", "orders"),
            Classification::Application,
            "InnoDB",
        );
        record.status = TableStatus::Exported;
        s.tables.push(record);
        assert!(s.validate().unwrap_err().contains("checksums"));
    }

    #[test]
    fn test_validate_rejects_class_mismatch() {
        let mut s = state();
        let mut record = TableRecord::new(
            &TableId::new("mysql", "user"),
            Classification::Internal,
            "InnoDB",
        );
        record.status = TableStatus::Imported;
        s.tables.push(record);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_phase_serializes_screaming_case() {
        let json = serde_json::to_string(&RunPhase::Stage1Done).unwrap();
        assert_eq!(json, "\"STAGE1_DONE\"");
    }
}

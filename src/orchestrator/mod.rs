//! # Stage orchestrator
//!
//! Drives a run through its two stages:
//!
//! * **Stage 1** plans the run, waits for confirmation, then converts every
//!   catalog table to MyISAM and exports every application tablespace into
//!   the working directory.
//! * Between the stages the operator stops the server, deletes `ibdata1`
//!   and the redo logs, and starts it again. Nothing here automates that.
//! * **Stage 2** reloads the run, checks that the schema did not drift,
//!   converts the catalog tables back and re-imports every tablespace.
//!
//! The run state is saved before and after every table, so any failure or
//! interruption leaves a checkpoint the same stage can resume from.

pub mod confirm;
pub mod console;
pub mod revalidate;
mod stage1;
mod stage2;

use crate::config::Profile;
use crate::db::{encode_filename, CommandClient};
use crate::error::{ShrinkError, ShrinkResult};
use crate::inventory::InventoryBuilder;
use crate::state::{stage_steps, RunLock, RunPhase, RunState, RunStateStore, TableRecord};
use crate::table::{Classification, Engine, TableId};
use crate::transfer::TransferMode;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub use confirm::{AutoConfirm, Confirmation, TerminalConfirmation};
pub use console::Console;
pub use revalidate::Drift;

/// Set to stop a run before the next table
pub type CancelFlag = Arc<AtomicBool>;

const STAGE1_GUIDANCE: &str = "All the export steps have been executed.
You might want to double check that no real InnoDB tables are left in your database.
Once this has been confirmed, stop your database and delete the ibdata1 and ib_logfile* files.
Restart your database and ibdata1 will be re-created.
Last, run this tool again with --stage 2 to re-import the tablespaces.
Do NOT delete or alter the content of your workdir (or re-run --stage 1) until the
re-import has been done or data will be lost!";

const STAGE2_GUIDANCE: &str = "All the import steps have been executed!
You might want to check that your InnoDB tables are back in place along with their data.";

/// How an invocation ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran to completion
    Completed { run_id: Uuid, processed: usize },
    /// Stage 2 was requested for a run that already finished it
    AlreadyComplete { run_id: Uuid },
    /// The operator refused the plan; nothing was changed
    Declined,
}

/// A failed protocol step and its cause
struct StepFailure {
    step: &'static str,
    error: ShrinkError,
}

trait AtStep<T> {
    fn at_step(self, step: &'static str) -> Result<T, StepFailure>;
}

impl<T, E: Into<ShrinkError>> AtStep<T> for Result<T, E> {
    fn at_step(self, step: &'static str) -> Result<T, StepFailure> {
        self.map_err(|e| StepFailure {
            step,
            error: e.into(),
        })
    }
}

pub struct Orchestrator<C: CommandClient> {
    client: C,
    profile: Profile,
    store: RunStateStore,
    confirmation: Box<dyn Confirmation + Send>,
    cancel: CancelFlag,
    console: Console,
}

impl<C: CommandClient> Orchestrator<C> {
    /// Orchestrator that declines every plan and prints nothing until
    /// configured otherwise
    pub fn new(client: C, profile: Profile) -> Self {
        let store = RunStateStore::new(&profile.workdir);
        Self {
            client,
            profile,
            store,
            confirmation: Box::new(AutoConfirm::no()),
            cancel: Arc::new(AtomicBool::new(false)),
            console: Console::silent(),
        }
    }

    pub fn with_confirmation(mut self, confirmation: Box<dyn Confirmation + Send>) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Run stage 1 or 2 under the working directory lock
    pub fn run_stage(&mut self, stage: u8) -> ShrinkResult<StageOutcome> {
        let lock = RunLock::acquire(&self.profile.workdir)?;
        info!(
            "Running stage {} for profile '{}' (lock {})",
            stage,
            self.profile.name,
            lock.path().display()
        );
        match stage {
            1 => self.run_stage1(),
            2 => self.run_stage2(),
            other => Err(ShrinkError::InvalidTransition(format!(
                "unknown stage {}",
                other
            ))),
        }
    }

    /// Check that the server still matches `state`: same data directory,
    /// transfers still possible and no tables added, removed or renamed
    fn check_environment(&mut self, state: &RunState) -> ShrinkResult<()> {
        if self.profile.transfer_mode() != state.transfer_mode {
            warn!(
                "Profile now selects {} transfers; run {} keeps using {}",
                self.profile.transfer_mode(),
                state.run_id,
                state.transfer_mode
            );
        }
        let mut inventory = InventoryBuilder::new(&mut self.client);
        let datadir = inventory.preflight(&self.profile.workdir, state.transfer_mode)?;
        if datadir != state.datadir {
            return Err(ShrinkError::conflict(format!(
                "server data directory is {} but run {} recorded {}",
                datadir.display(),
                state.run_id,
                state.datadir.display()
            )));
        }
        let live = inventory.snapshot()?;
        let drift = Drift::between(&state.known_tables(), &live);
        if !drift.is_empty() {
            return Err(drift.into_conflict());
        }
        Ok(())
    }

    /// Run every record that still needs `stage`, checkpointing before and
    /// after each table. Stops at the first failure.
    fn process_tables(&mut self, state: &mut RunState, stage: u8) -> ShrinkResult<usize> {
        let mode = state.transfer_mode;
        let mut processed = 0;
        for index in 0..state.tables.len() {
            if !state.tables[index].needs_work(stage) {
                continue;
            }
            let id = state.tables[index].id();
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Cancellation requested, stopping before {}", id);
                self.mark_failed(state)?;
                return Err(ShrinkError::Cancelled);
            }

            let steps = stage_steps(state.tables[index].classification, stage);
            state.tables[index].advance(stage, steps.in_progress)?;
            state.touch();
            self.store.save(state)?;

            let mut working = state.tables[index].clone();
            self.console.begin(&action_label(&working, stage, mode));
            let result = self.execute(stage, mode, state, index, &mut working);
            state.tables[index] = working;

            match result {
                Ok(()) => {
                    state.tables[index].advance(stage, steps.done)?;
                    state.touch();
                    self.store.save(state)?;
                    self.console.ok();
                    processed += 1;
                }
                Err(StepFailure { step, error: cause }) => {
                    self.console.failed();
                    error!("Table {} failed while {}: {}", id, step, cause);
                    state.tables[index].fail(stage, step, &cause.to_string())?;
                    self.mark_failed(state)?;
                    return Err(cause.in_table(&id, step));
                }
            }
        }
        Ok(processed)
    }

    fn execute(
        &mut self,
        stage: u8,
        mode: TransferMode,
        state: &mut RunState,
        index: usize,
        record: &mut TableRecord,
    ) -> Result<(), StepFailure> {
        match (record.classification, stage) {
            (Classification::Internal, 1) => self.convert(record, Engine::MyISAM),
            (Classification::Application, 1) => self.export(record, mode),
            (Classification::Internal, _) => self.convert(record, Engine::InnoDB),
            (Classification::Application, _) => self.import(state, index, record, mode),
        }
    }

    /// Save `record`'s progress within its current status
    fn checkpoint(
        &mut self,
        state: &mut RunState,
        index: usize,
        record: &TableRecord,
    ) -> ShrinkResult<()> {
        state.tables[index] = record.clone();
        state.touch();
        self.store.save(state)
    }

    fn convert(&mut self, record: &TableRecord, target: Engine) -> Result<(), StepFailure> {
        self.client
            .execute_engine_conversion(&record.id(), target)
            .at_step("converting")
    }

    /// Move a running state to `FAILED` and persist it
    fn mark_failed(&mut self, state: &mut RunState) -> ShrinkResult<()> {
        state.transition(RunPhase::Failed)?;
        self.store.save(state)
    }

    /// `<workdir>/<schema>`, holding a table's exported files
    fn export_dir(&self, table: &TableId) -> PathBuf {
        self.profile.workdir.join(encode_filename(&table.schema))
    }
}

fn action_label(record: &TableRecord, stage: u8, mode: TransferMode) -> String {
    let id = record.id();
    match (record.classification, stage) {
        (Classification::Internal, 1) => format!("Converting table {} to MyISAM", id),
        (Classification::Application, 1) => format!("Exporting table {} ({})", id, mode),
        (Classification::Internal, _) => format!("Converting back table {} to InnoDB", id),
        (Classification::Application, _) => format!("Importing table {} ({})", id, mode),
    }
}

/// Remaining work of a resumed run, for re-confirmation
fn render_remaining(state: &RunState, stage: u8) -> String {
    let mut out = format!(
        "\nResuming run {} (started {}), phase {}\nRemaining tables:\n",
        state.run_id,
        state.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        state.phase
    );
    for record in state.tables.iter().filter(|r| r.needs_work(stage)) {
        out.push_str(&format!(
            "{} ({}, {})\n",
            record.id(),
            record.classification,
            record.status
        ));
    }
    out
}

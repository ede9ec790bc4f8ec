use super::{AtStep, Orchestrator, StageOutcome, StepFailure, STAGE2_GUIDANCE};
use crate::constants::METADATA_EXTENSION;
use crate::db::{CommandClient, DiscardOutcome};
use crate::error::{ShrinkError, ShrinkResult};
use crate::state::{RunPhase, RunState, TableRecord};
use crate::transfer::{file_checksum, FilePair, TransferError, TransferMode, TransferUnit};
use log::{debug, info};

impl<C: CommandClient> Orchestrator<C> {
    pub(super) fn run_stage2(&mut self) -> ShrinkResult<StageOutcome> {
        let mut state = self.store.load(&self.profile.name)?.ok_or_else(|| {
            ShrinkError::MissingState(format!(
                "no run state found in {}",
                self.profile.workdir.display()
            ))
        })?;

        match (state.phase, state.stage) {
            (RunPhase::Stage2Done, _) => {
                info!("Stage 2 of run {} already completed", state.run_id);
                self.console
                    .line(&format!("Run {} is already complete", state.run_id));
                return Ok(StageOutcome::AlreadyComplete {
                    run_id: state.run_id,
                });
            }
            (RunPhase::Stage1Done | RunPhase::Stage2Running, _) | (RunPhase::Failed, 2) => {}
            (phase, _) => {
                return Err(ShrinkError::MissingState(format!(
                    "stage 1 of run {} has not completed (phase {})",
                    state.run_id, phase
                )))
            }
        }

        // Any drift aborts here, before the first statement that changes data
        self.check_environment(&state)?;

        state.transition(RunPhase::Stage2Running)?;
        self.store.save(&state)?;
        info!("Stage 2 of run {} started", state.run_id);

        self.console.begin("Disable foreign key checks for this session");
        if let Err(e) = self.client.disable_foreign_key_checks() {
            self.console.failed();
            self.mark_failed(&mut state)?;
            return Err(e.into());
        }
        self.console.ok();

        let processed = self.process_tables(&mut state, 2)?;

        state.transition(RunPhase::Stage2Done)?;
        self.store.save(&state)?;
        info!("Stage 2 of run {} done", state.run_id);
        self.console.warn(STAGE2_GUIDANCE);
        self.console.line(&format!(
            "Once this has been confirmed, your workdir {} can be removed from the system.",
            self.profile.workdir.display()
        ));
        Ok(StageOutcome::Completed {
            run_id: state.run_id,
            processed,
        })
    }

    /// Discard the tablespace the server holds now, put the exported files
    /// back, check them against the export checksum and import them.
    ///
    /// The exported `.ibd` is verified before anything is discarded. The
    /// restored checksum is checkpointed before the import is issued, so a
    /// retry after a lost checkpoint can tell an already imported table
    /// from one that still waits for its files.
    pub(super) fn import(
        &mut self,
        state: &mut RunState,
        index: usize,
        record: &mut TableRecord,
        mode: TransferMode,
    ) -> Result<(), StepFailure> {
        let id = record.id();
        let exported = record
            .tablespace_file()
            .cloned()
            .ok_or_else(|| {
                ShrinkError::InvalidTransition(format!("{} has no exported tablespace", id))
            })
            .at_step("checking exported files")?;

        if record.import_checksum.is_some()
            && self
                .client
                .tablespace_attached(&id)
                .at_step("checking tablespace")?
        {
            info!("{} was imported before the last checkpoint, skipping", id);
            return Ok(());
        }

        let paths = self
            .client
            .physical_file_paths(&id)
            .at_step("locating tablespace")?;
        let source_dir = self.export_dir(&id);
        let pairs: Vec<FilePair> = record
            .files
            .iter()
            .map(|file| {
                let destination = if file.name.ends_with(&format!(".{}", METADATA_EXTENSION)) {
                    paths.cfg.clone()
                } else {
                    paths.ibd.clone()
                };
                FilePair::required(source_dir.join(&file.name), destination)
            })
            .collect();
        if let Some(missing) = pairs.iter().find(|pair| !pair.source.exists()) {
            return Err(TransferError::Missing(missing.source.clone()))
                .at_step("checking exported files");
        }

        let source = source_dir.join(&exported.name);
        let (current, _) = file_checksum(&source)
            .map_err(|e| TransferError::io(&source, e))
            .at_step("verifying checksum")?;
        if current != exported.checksum {
            return Err(TransferError::Mismatch {
                path: source,
                detail: format!(
                    "checksum {} differs from export checksum {}",
                    current, exported.checksum
                ),
            })
            .at_step("verifying checksum");
        }

        match self
            .client
            .discard_tablespace(&id)
            .at_step("discarding tablespace")?
        {
            DiscardOutcome::Discarded => debug!("Discarded current tablespace of {}", id),
            DiscardOutcome::AlreadyAbsent => info!("{} has no tablespace to discard", id),
        }

        let files = TransferUnit::new(mode)
            .transfer_set(&pairs)
            .at_step("transferring back")?;
        let restored = files
            .iter()
            .find(|file| file.destination == paths.ibd)
            .ok_or_else(|| TransferError::Missing(paths.ibd.clone()))
            .at_step("verifying checksum")?;
        if restored.checksum != exported.checksum {
            return Err(TransferError::Mismatch {
                path: restored.destination.clone(),
                detail: format!(
                    "checksum {} differs from export checksum {}",
                    restored.checksum, exported.checksum
                ),
            })
            .at_step("verifying checksum");
        }
        record.import_checksum = Some(restored.checksum.clone());
        self.checkpoint(state, index, record)
            .at_step("recording import")?;

        self.client
            .import_tablespace(&id)
            .at_step("importing tablespace")
    }
}

use super::{render_remaining, AtStep, Orchestrator, StageOutcome, StepFailure, STAGE1_GUIDANCE};
use crate::constants::DEFINITION_SUFFIX;
use crate::db::{encode_filename, CommandClient};
use crate::error::{ShrinkError, ShrinkResult};
use crate::inventory::InventoryBuilder;
use crate::state::{FileRecord, RunPhase, RunState, TableRecord};
use crate::transfer::{FilePair, TransferMode, TransferUnit};
use log::{debug, info};
use std::fs;
use std::path::Path;

impl<C: CommandClient> Orchestrator<C> {
    pub(super) fn run_stage1(&mut self) -> ShrinkResult<StageOutcome> {
        let existing = self.store.load(&self.profile.name)?;
        let prepared = match existing {
            None => {
                self.ensure_fresh_workdir()?;
                self.plan_new()?
            }
            Some(state) => match (state.phase, state.stage) {
                (RunPhase::Stage2Done, _) => {
                    self.store.archive(&state)?;
                    self.plan_new()?
                }
                (RunPhase::Init, _) => self.plan_new()?,
                (RunPhase::Planned | RunPhase::Stage1Running, _) | (RunPhase::Failed, 1) => {
                    self.prepare_resume(state)?
                }
                (phase, _) => {
                    return Err(ShrinkError::conflict(format!(
                        "run {} is in phase {}; finish stage 2 before starting a new stage 1",
                        state.run_id, phase
                    )))
                }
            },
        };
        let mut state = match prepared {
            Some(state) => state,
            None => {
                info!("Plan declined by operator, nothing changed");
                return Ok(StageOutcome::Declined);
            }
        };

        state.transition(RunPhase::Stage1Running)?;
        self.store.save(&state)?;
        info!(
            "Stage 1 of run {} started with {} tables",
            state.run_id,
            state.tables.len()
        );

        let processed = self.process_tables(&mut state, 1)?;

        state.transition(RunPhase::Stage1Done)?;
        self.store.save(&state)?;
        info!("Stage 1 of run {} done", state.run_id);
        self.console.warn(STAGE1_GUIDANCE);
        Ok(StageOutcome::Completed {
            run_id: state.run_id,
            processed,
        })
    }

    /// Without a run state, anything in the workdir may be the only copy of
    /// an earlier export
    fn ensure_fresh_workdir(&self) -> ShrinkResult<()> {
        let leftovers = self.store.leftovers()?;
        if let Some(first) = leftovers.first() {
            return Err(ShrinkError::conflict(format!(
                "workdir {} is not empty (found {}), delete content if you want to run stage 1 again",
                self.profile.workdir.display(),
                first.display()
            )));
        }
        Ok(())
    }

    /// Build and confirm a fresh plan; `None` when declined
    fn plan_new(&mut self) -> ShrinkResult<Option<RunState>> {
        let plan = InventoryBuilder::new(&mut self.client).build_plan(&self.profile)?;
        if !self.confirmation.confirm(&plan.render())? {
            return Ok(None);
        }
        Ok(Some(plan.to_state(&self.profile.name)?))
    }

    /// Revalidate an interrupted stage 1 and confirm what is left of it
    fn prepare_resume(&mut self, state: RunState) -> ShrinkResult<Option<RunState>> {
        info!(
            "Found unfinished run {} in phase {}, resuming",
            state.run_id, state.phase
        );
        self.check_environment(&state)?;
        if !self.confirmation.confirm(&render_remaining(&state, 1))? {
            return Ok(None);
        }
        Ok(Some(state))
    }

    /// Save the definition, lock the table for export, copy its files out
    /// and release the lock again. The lock is released even when the
    /// transfer fails.
    pub(super) fn export(
        &mut self,
        record: &mut TableRecord,
        mode: TransferMode,
    ) -> Result<(), StepFailure> {
        let id = record.id();
        let target_dir = self.export_dir(&id);
        fs::create_dir_all(&target_dir).at_step("saving definition")?;

        let definition = self
            .client
            .show_create_table(&id)
            .at_step("saving definition")?;
        let definition_path = target_dir.join(format!(
            "{}.{}",
            encode_filename(&id.name),
            DEFINITION_SUFFIX
        ));
        fs::write(&definition_path, format!("{};\n", definition)).at_step("saving definition")?;
        record.definition = Some(definition_path);

        let paths = self
            .client
            .physical_file_paths(&id)
            .at_step("locating tablespace")?;
        let pairs = vec![
            FilePair::required(&paths.ibd, destination_in(&target_dir, &paths.ibd)),
            FilePair::optional(&paths.cfg, destination_in(&target_dir, &paths.cfg)),
        ];

        self.client
            .flush_for_export(&id)
            .at_step("flushing for export")?;
        let transferred = TransferUnit::new(mode).transfer_set(&pairs);
        let unlocked = self.client.unlock_tables();
        let files = transferred.at_step("transferring")?;
        unlocked.at_step("unlocking tables")?;

        record.files = files
            .iter()
            .map(|file| FileRecord {
                name: file_name(&file.destination),
                size: file.size,
                checksum: file.checksum.clone(),
            })
            .collect();
        debug!("Exported {} files of {}", record.files.len(), id);
        Ok(())
    }
}

fn destination_in(dir: &Path, source: &Path) -> std::path::PathBuf {
    dir.join(source.file_name().unwrap_or_default())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

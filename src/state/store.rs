use super::RunState;
use crate::constants::{LOCK_FILE_NAME, STATE_FILE_NAME};
use crate::error::{ShrinkError, ShrinkResult};
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Reads and atomically replaces the run state file of a working directory
#[derive(Debug, Clone)]
pub struct RunStateStore {
    path: PathBuf,
}

impl RunStateStore {
    pub fn new(workdir: &Path) -> Self {
        Self {
            path: workdir.join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the state, if any.
    ///
    /// A state written for another profile is a conflict: one working
    /// directory serves one run at a time.
    pub fn load(&self, profile: &str) -> ShrinkResult<Option<RunState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| ShrinkError::corrupt_state(&self.path, e.to_string()))?;
        let state: RunState = serde_json::from_str(&content)
            .map_err(|e| ShrinkError::corrupt_state(&self.path, e.to_string()))?;
        state
            .validate()
            .map_err(|reason| ShrinkError::corrupt_state(&self.path, reason))?;

        if state.profile != profile {
            return Err(ShrinkError::conflict(format!(
                "{} belongs to profile '{}', not '{}'",
                self.path.display(),
                state.profile,
                profile
            )));
        }
        debug!(
            "Loaded run {} in phase {} from {}",
            state.run_id,
            state.phase,
            self.path.display()
        );
        Ok(Some(state))
    }

    /// Replace the state file: write a sibling, fsync it, rename over the
    /// old file, then fsync the directory
    pub fn save(&self, state: &RunState) -> ShrinkResult<()> {
        let content = serde_json::to_vec_pretty(state).map_err(|e| {
            ShrinkError::corrupt_state(&self.path, format!("cannot serialize: {}", e))
        })?;
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            File::open(dir)?.sync_all()?;
        }
        debug!("Checkpointed run {} ({})", state.run_id, state.phase);
        Ok(())
    }

    /// Entries of the working directory that no run bookkeeping accounts
    /// for: anything but the lock, the state file and archived states
    pub fn leftovers(&self) -> ShrinkResult<Vec<PathBuf>> {
        let workdir = match self.path.parent() {
            Some(dir) => dir,
            None => return Ok(Vec::new()),
        };
        let stem = state_stem();
        let mut found = Vec::new();
        for entry in fs::read_dir(workdir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let archived = name
                .strip_prefix(stem)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| rest.ends_with(".json"));
            if name == LOCK_FILE_NAME || name == STATE_FILE_NAME || archived {
                continue;
            }
            found.push(entry.path());
        }
        found.sort();
        Ok(found)
    }

    /// Move a finished state aside as `ibshrink-state.<run_id>.json`
    pub fn archive(&self, state: &RunState) -> ShrinkResult<PathBuf> {
        let stem = state_stem();
        let target = self
            .path
            .with_file_name(format!("{}.{}.json", stem, state.run_id));
        fs::rename(&self.path, &target)?;
        info!("Archived finished run state to {}", target.display());
        Ok(target)
    }
}

fn state_stem() -> &'static str {
    STATE_FILE_NAME
        .strip_suffix(".json")
        .unwrap_or(STATE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RunPhase, TableRecord};
    use crate::table::{Classification, TableId};
    use crate::transfer::TransferMode;

    fn sample(workdir: &Path) -> RunState {
        let mut state = RunState::new(
            "default",
            workdir.to_path_buf(),
            PathBuf::from("/var/lib/mysql"),
            TransferMode::Hardlink,
        );
        state.tables.push(TableRecord::new(
            &TableId::new("mysql", "user"),
            Classification::Internal,
            "InnoDB",
        ));
        state.transition(RunPhase::Planned).unwrap();
        state
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        assert!(store.load("default").unwrap().is_none());

        let state = sample(dir.path());
        store.save(&state).unwrap();
        let loaded = store.load("default").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!dir.path().join("ibshrink-state.json.tmp").exists());
    }

    #[test]
    fn test_other_profile_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        store.save(&sample(dir.path())).unwrap();
        let err = store.load("staging").unwrap_err();
        assert!(matches!(err, ShrinkError::Conflict(_)));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        fs::write(store.path(), "{ not json").unwrap();
        let err = store.load("default").unwrap_err();
        assert!(matches!(err, ShrinkError::CorruptState { .. }));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_unreadable_bytes_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        fs::write(store.path(), [0xff, 0xfe, 0x7b, 0x00, 0xc3]).unwrap();
        let err = store.load("default").unwrap_err();
        assert!(matches!(err, ShrinkError::CorruptState { .. }));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_leftovers_ignore_run_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        let state = sample(dir.path());
        store.save(&state).unwrap();
        store.archive(&state).unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), b"").unwrap();
        assert!(store.leftovers().unwrap().is_empty());

        fs::create_dir_all(dir.path().join("shop")).unwrap();
        fs::write(dir.path().join("shop/orders.ibd"), b"pages").unwrap();
        assert_eq!(store.leftovers().unwrap(), vec![dir.path().join("shop")]);
    }

    #[test]
    fn test_wrong_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        let mut state = sample(dir.path());
        state.schema_version = 99;
        store.save(&state).unwrap();
        let err = store.load("default").unwrap_err();
        assert!(err.to_string().contains("schema version 99"));
    }

    #[test]
    fn test_archive_uses_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        let state = sample(dir.path());
        store.save(&state).unwrap();
        let archived = store.archive(&state).unwrap();
        assert_eq!(
            archived.file_name().unwrap().to_string_lossy(),
            format!("ibshrink-state.{}.json", state.run_id)
        );
        assert!(!store.exists());
    }
}

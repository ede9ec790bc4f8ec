use crate::constants::TABLESPACE_EXTENSION;
use crate::error::{ShrinkError, ShrinkResult};
use crate::table::{Classification, TableId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Progress of one table through the two stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Converting,
    Converted,
    Exporting,
    Exported,
    Importing,
    Imported,
    Completed,
    Failed,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Pending => "pending",
            TableStatus::Converting => "converting",
            TableStatus::Converted => "converted",
            TableStatus::Exporting => "exporting",
            TableStatus::Exported => "exported",
            TableStatus::Importing => "importing",
            TableStatus::Imported => "imported",
            TableStatus::Completed => "completed",
            TableStatus::Failed => "failed",
        }
    }

    /// Statuses a record of this class may ever hold
    pub fn valid_for(&self, classification: Classification) -> bool {
        match classification {
            Classification::Internal => matches!(
                self,
                TableStatus::Pending
                    | TableStatus::Converting
                    | TableStatus::Converted
                    | TableStatus::Completed
                    | TableStatus::Failed
            ),
            Classification::Application => matches!(
                self,
                TableStatus::Pending
                    | TableStatus::Exporting
                    | TableStatus::Exported
                    | TableStatus::Importing
                    | TableStatus::Imported
                    | TableStatus::Failed
            ),
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three statuses a record passes through within one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSteps {
    pub start: TableStatus,
    pub in_progress: TableStatus,
    pub done: TableStatus,
}

/// Legal sequence for a class of table in a stage
pub fn stage_steps(classification: Classification, stage: u8) -> StageSteps {
    use TableStatus::*;
    match (classification, stage) {
        (Classification::Internal, 1) => StageSteps {
            start: Pending,
            in_progress: Converting,
            done: Converted,
        },
        (Classification::Internal, _) => StageSteps {
            start: Converted,
            in_progress: Converting,
            done: Completed,
        },
        (Classification::Application, 1) => StageSteps {
            start: Pending,
            in_progress: Exporting,
            done: Exported,
        },
        (Classification::Application, _) => StageSteps {
            start: Exported,
            in_progress: Importing,
            done: Imported,
        },
    }
}

/// A tablespace file captured at export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name inside `<workdir>/<schema>/`
    pub name: String,
    pub size: u64,
    /// SHA-256 recorded when the file was exported
    pub checksum: String,
}

/// Step and cause of the most recent failure of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: u8,
    pub step: String,
    pub cause: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub schema: String,
    pub table: String,
    pub classification: Classification,
    /// Engine reported at planning time
    pub engine: String,
    pub status: TableStatus,
    /// Tablespace files recorded at export (application tables only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRecord>,
    /// `.ibd` checksum verified before import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_checksum: Option<String>,
    /// Saved `SHOW CREATE TABLE` output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureRecord>,
}

impl TableRecord {
    pub fn new(id: &TableId, classification: Classification, engine: &str) -> Self {
        Self {
            schema: id.schema.clone(),
            table: id.name.clone(),
            classification,
            engine: engine.to_string(),
            status: TableStatus::Pending,
            files: Vec::new(),
            import_checksum: None,
            definition: None,
            last_failure: None,
        }
    }

    pub fn id(&self) -> TableId {
        TableId::new(self.schema.clone(), self.table.clone())
    }

    /// Whether this record still has work to do in `stage`
    pub fn needs_work(&self, stage: u8) -> bool {
        self.status != stage_steps(self.classification, stage).done
    }

    /// Whether `stage` may pick up this record.
    ///
    /// Besides the stage's start status, an in-progress or failed record is
    /// retried. For stage 2 a failed record only qualifies when its stage-1
    /// work finished.
    pub fn can_start(&self, stage: u8) -> bool {
        let steps = stage_steps(self.classification, stage);
        match self.status {
            s if s == steps.start || s == steps.in_progress => true,
            TableStatus::Failed => match self.last_failure.as_ref().map(|f| f.stage) {
                Some(failed_stage) => failed_stage == stage,
                None => stage == 1,
            },
            _ => false,
        }
    }

    /// Move to `next`, enforcing the forward-only sequence of `stage`
    pub fn advance(&mut self, stage: u8, next: TableStatus) -> ShrinkResult<()> {
        let steps = stage_steps(self.classification, stage);
        let legal = if next == steps.in_progress {
            self.can_start(stage)
        } else if next == steps.done || next == TableStatus::Failed {
            self.status == steps.in_progress
        } else {
            false
        };
        if !legal {
            return Err(ShrinkError::InvalidTransition(format!(
                "{} {} -> {} in stage {}",
                self.id(),
                self.status,
                next,
                stage
            )));
        }
        if next != TableStatus::Failed {
            self.last_failure = None;
        }
        self.status = next;
        Ok(())
    }

    /// Mark the record failed with the step and cause
    pub fn fail(&mut self, stage: u8, step: &str, cause: &str) -> ShrinkResult<()> {
        self.advance(stage, TableStatus::Failed)?;
        self.last_failure = Some(FailureRecord {
            stage,
            step: step.to_string(),
            cause: cause.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Export record of the tablespace data file
    pub fn tablespace_file(&self) -> Option<&FileRecord> {
        self.files.iter().find(|f| {
            f.name
                .rsplit_once('.')
                .is_some_and(|(_, ext)| ext == TABLESPACE_EXTENSION)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> TableRecord {
        TableRecord::new(&TableId::new("shop", "orders"), Classification::Application, "InnoDB")
    }

    fn internal() -> TableRecord {
        TableRecord::new(&TableId::new("mysql", "user"), Classification::Internal, "InnoDB")
    }

    #[test]
    fn test_application_happy_path() {
        let mut record = app();
        record.advance(1, TableStatus::Exporting).unwrap();
        record.advance(1, TableStatus::Exported).unwrap();
        assert!(!record.needs_work(1));
        record.advance(2, TableStatus::Importing).unwrap();
        record.advance(2, TableStatus::Imported).unwrap();
        assert!(!record.needs_work(2));
    }

    #[test]
    fn test_internal_happy_path() {
        let mut record = internal();
        record.advance(1, TableStatus::Converting).unwrap();
        record.advance(1, TableStatus::Converted).unwrap();
        record.advance(2, TableStatus::Converting).unwrap();
        record.advance(2, TableStatus::Completed).unwrap();
    }

    #[test]
    fn test_cannot_skip_or_go_backwards() {
        let mut record = app();
        assert!(record.advance(1, TableStatus::Exported).is_err());
        assert!(record.advance(2, TableStatus::Importing).is_err());
        record.advance(1, TableStatus::Exporting).unwrap();
        record.advance(1, TableStatus::Exported).unwrap();
        assert!(record.advance(1, TableStatus::Exporting).is_err());
    }

    #[test]
    fn test_failed_is_retried_by_same_stage_only() {
        let mut record = app();
        record.advance(1, TableStatus::Exporting).unwrap();
        record.fail(1, "transferring", "disk full").unwrap();
        assert!(!record.can_start(2));
        assert!(record.can_start(1));
        record.advance(1, TableStatus::Exporting).unwrap();
        assert!(record.last_failure.is_none());
        record.advance(1, TableStatus::Exported).unwrap();

        record.advance(2, TableStatus::Importing).unwrap();
        record.fail(2, "importing", "corrupt page").unwrap();
        assert!(record.can_start(2));
        assert!(!record.can_start(1));
    }

    #[test]
    fn test_interrupted_in_progress_is_resumable() {
        let mut record = internal();
        record.advance(1, TableStatus::Converting).unwrap();
        assert!(record.can_start(1));
        record.advance(1, TableStatus::Converting).unwrap();
    }

    #[test]
    fn test_status_class_consistency() {
        assert!(TableStatus::Exported.valid_for(Classification::Application));
        assert!(!TableStatus::Exported.valid_for(Classification::Internal));
        assert!(!TableStatus::Completed.valid_for(Classification::Application));
    }
}

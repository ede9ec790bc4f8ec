use crate::db::TableInfo;
use crate::error::ShrinkError;
use crate::table::TableId;
use std::collections::BTreeSet;

/// Difference between the tables a run recorded and the live server.
///
/// A rename shows up as one missing and one added table.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drift {
    pub added: Vec<TableId>,
    pub missing: Vec<TableId>,
}

impl Drift {
    pub fn between(recorded: &[TableId], live: &[TableInfo]) -> Self {
        let recorded: BTreeSet<&TableId> = recorded.iter().collect();
        let live: BTreeSet<&TableId> = live.iter().map(|info| &info.id).collect();
        Self {
            added: live.difference(&recorded).map(|id| (*id).clone()).collect(),
            missing: recorded.difference(&live).map(|id| (*id).clone()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.missing.is_empty()
    }

    pub fn into_conflict(self) -> ShrinkError {
        let join = |ids: &[TableId]| {
            ids.iter()
                .map(TableId::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("new tables {}", join(&self.added)));
        }
        if !self.missing.is_empty() {
            parts.push(format!("missing tables {}", join(&self.missing)));
        }
        ShrinkError::conflict(format!("schema drift detected: {}", parts.join("; ")))
    }
}

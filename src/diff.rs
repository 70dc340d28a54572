//! Merged-view differ: change-status classification for pre-merge review.
//!
//! Read-only. Compares a branch's current row against main's per logical id
//! and reports what merging would do. Bookkeeping columns (versions, ids,
//! timestamps) are excluded from the comparison; only payloads count.

use crate::types::{LogicalId, Row, Versioned};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a branch changed relative to main for one logical id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Branch row exists, no main row.
    Created,
    /// Both exist and payloads differ.
    Updated,
    /// Branch row is deleted and a main row exists.
    Deleted,
    /// Main-only, or branch payload equals main payload.
    Unchanged,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeStatus::Created => "created",
            ChangeStatus::Updated => "updated",
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Unchanged => "unchanged",
        };
        write!(f, "{}", s)
    }
}

/// One logical id in the merged view, with both sides for review UIs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffEntry {
    pub logical_id: LogicalId,
    pub change: ChangeStatus,
    pub branch_row: Option<Row>,
    pub main_row: Option<Row>,
}

/// Classify one logical id from its current branch and main rows.
/// `None` when neither side has a visible row.
pub fn classify<R: Versioned>(
    branch_row: Option<&R>,
    main_row: Option<&R>,
) -> Option<ChangeStatus> {
    match (branch_row, main_row) {
        (None, None) => None,
        (Some(_), None) => Some(ChangeStatus::Created),
        (None, Some(_)) => Some(ChangeStatus::Unchanged),
        (Some(branch), Some(main)) => {
            if branch.status().is_deleted() {
                Some(ChangeStatus::Deleted)
            } else if branch.payload() != main.payload() {
                Some(ChangeStatus::Updated)
            } else {
                Some(ChangeStatus::Unchanged)
            }
        }
    }
}

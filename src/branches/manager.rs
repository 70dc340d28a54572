//! Branch lifecycle manager.
//!
//! Branches are flat: one level off main, one branch per change request.
//! Creating a branch is a pure naming operation; rows only appear once the
//! first lifecycle write materializes a lineage under the name.

use crate::error::Result;
use crate::lifecycle::operations;
use crate::store::Transaction;
use crate::types::{BranchName, EntityKind, RowStatus, Versioned};
use crate::versions::{resolve_current, ResolveOptions};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Lifecycle state of a named branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchState {
    Open,
    Merged,
    Discarded,
}

/// Metadata for one named branch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: BranchName,
    pub change_request_id: String,
    pub created: DateTime<Utc>,
    pub state: BranchState,
}

/// Result of merging one branch into main.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Logical ids whose current branch row was copied into main.
    pub records_merged: usize,
    /// Logical ids skipped because their lineage was already merged.
    pub records_skipped: usize,
}

/// Registry of branch names generated for change requests.
pub struct BranchManager {
    index: RwLock<HashMap<BranchName, BranchInfo>>,
}

impl BranchManager {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a short collision-resistant name `co-{shortid}` and register
    /// it for the change request. Names are assigned once and immutable.
    pub fn create_branch(&self, change_request_id: &str) -> Result<BranchName> {
        let mut index = self.index.write();

        loop {
            let shortid = Uuid::new_v4().simple().to_string();
            let name = BranchName::new(format!("co-{}", &shortid[..8]));
            if index.contains_key(&name) {
                continue;
            }

            let info = BranchInfo {
                name: name.clone(),
                change_request_id: change_request_id.to_string(),
                created: Utc::now(),
                state: BranchState::Open,
            };
            index.insert(name.clone(), info);

            info!(branch = %name, change_request_id, "created branch");
            return Ok(name);
        }
    }

    pub fn get(&self, name: &BranchName) -> Option<BranchInfo> {
        self.index.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<BranchInfo> {
        self.index.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.index.read().len()
    }

    pub(crate) fn mark_merged(&self, name: &BranchName) {
        if let Some(info) = self.index.write().get_mut(name) {
            info.state = BranchState::Merged;
        }
    }

    pub(crate) fn mark_discarded(&self, name: &BranchName) {
        if let Some(info) = self.index.write().get_mut(name) {
            info.state = BranchState::Discarded;
        }
    }
}

impl Default for BranchManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge every lineage of `branch` into main inside the given transaction.
///
/// Per logical id with branch rows: resolve the branch-only current row,
/// copy its status and payload verbatim into main as the next main version
/// (last-write-wins, no comparison against concurrent main edits), then flip
/// the branch row to merged. Lineages whose current row is already merged
/// are skipped, so re-merging is a no-op. Any failure unwinds the whole
/// transaction, leaving no row marked merged.
pub(crate) fn merge_branch_rows(
    txn: &mut Transaction<'_>,
    kinds: &[EntityKind],
    branch: &BranchName,
) -> Result<MergeSummary> {
    let main = BranchName::main();
    let mut summary = MergeSummary::default();

    for kind in kinds {
        let unique_field = txn.unique_field(kind)?;

        for logical_id in txn.logical_ids_on(kind, branch)? {
            let branch_rows = txn.lineage(kind, logical_id, branch)?;
            let current = match resolve_current(&branch_rows, &ResolveOptions::default()) {
                Some(row) => row.clone(),
                None => {
                    summary.records_skipped += 1;
                    continue;
                }
            };

            // merge reactivates the record in main: re-validate the business key
            if current.status.is_active() {
                if let Some(field) = &unique_field {
                    if let Some(value) = current.payload.get(field) {
                        operations::assert_unique_key(txn, kind, &main, field, value, logical_id)?;
                    }
                }
            }

            let version = txn.next_version(kind, logical_id, &main)?;
            let main_row = current.with_new_version(
                txn.allocate_physical(),
                main.clone(),
                version,
                current.status,
                current.payload.clone(),
                Utc::now(),
            );
            txn.insert_row(kind, main_row)?;
            txn.set_status(kind, current.physical_id, RowStatus::Merged)?;

            summary.records_merged += 1;
        }
    }

    info!(
        branch = %branch,
        merged = summary.records_merged,
        skipped = summary.records_skipped,
        "merged branch into main"
    );
    Ok(summary)
}

/// Discard a branch: flip every still-active row of the branch to deleted,
/// across all entity kinds. Merged rows keep their terminal status; already
/// deleted rows stay deleted, so repeated discards are no-ops.
pub(crate) fn discard_branch_rows(
    txn: &mut Transaction<'_>,
    kinds: &[EntityKind],
    branch: &BranchName,
) -> Result<usize> {
    let mut discarded = 0;

    for kind in kinds {
        for logical_id in txn.logical_ids_on(kind, branch)? {
            for row in txn.lineage(kind, logical_id, branch)? {
                if row.status.is_active() {
                    txn.set_status(kind, row.physical_id, RowStatus::Deleted)?;
                    discarded += 1;
                }
            }
        }
    }

    info!(branch = %branch, discarded, "discarded branch");
    Ok(discarded)
}

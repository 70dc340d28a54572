//! Lifecycle operations over a transaction.
//!
//! Every mutation appends a new version row; prior rows are never modified.
//! The first write under a named branch lazily materializes branch version 1
//! as a copy of main's current row, so deleting a record in an untouched
//! branch creates two rows: the materialized copy and the deleted version.

use crate::error::{EngineError, Result};
use crate::store::Transaction;
use crate::types::{BranchName, EntityKind, LogicalId, Payload, Row, RowStatus, Version, Versioned};
use crate::versions::{Resolution, ResolveOptions};
use chrono::Utc;
use tracing::debug;

/// Overlay `patch` onto `base`: patch keys replace base keys, everything
/// else carries over.
pub fn overlay(mut base: Payload, patch: Payload) -> Payload {
    for (key, value) in patch {
        base.insert(key, value);
    }
    base
}

/// Create a new record: fresh logical id, version 1, active.
pub fn create(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    branch: &BranchName,
    payload: Payload,
) -> Result<Row> {
    // fail early on unregistered kinds, before allocating ids
    txn.unique_field(kind)?;

    let row = Row {
        logical_id: txn.allocate_logical(),
        physical_id: txn.allocate_physical(),
        branch: branch.clone(),
        version: Version::FIRST,
        status: RowStatus::Active,
        created_at: Utc::now(),
        payload,
    };
    txn.insert_row(kind, row.clone())?;

    debug!(kind = %kind, logical_id = %row.logical_id, branch = %branch, "created record");
    Ok(row)
}

/// Append a new active version with `patch` overlaid on the prior payload.
pub fn update(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    logical_id: LogicalId,
    branch: &BranchName,
    patch: Payload,
) -> Result<Row> {
    let base = materialized_base(txn, kind, logical_id, branch)?;
    let payload = overlay(base.payload.clone(), patch);
    append_version(txn, kind, &base, branch, RowStatus::Active, payload)
}

/// Append a deleted version carrying the prior payload.
pub fn soft_delete(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    logical_id: LogicalId,
    branch: &BranchName,
) -> Result<Row> {
    let base = materialized_base(txn, kind, logical_id, branch)?;
    let payload = base.payload.clone();
    append_version(txn, kind, &base, branch, RowStatus::Deleted, payload)
}

/// Bring a soft-deleted record back: append an active version carrying the
/// deleted payload. Fails with `InvalidState` when the current row is not
/// deleted and with `UniquenessConflict` when the constrained business key
/// would collide with another active record.
pub fn restore(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    logical_id: LogicalId,
    branch: &BranchName,
) -> Result<Row> {
    let current = txn
        .resolve(kind, logical_id, branch, &ResolveOptions::default())?
        .into_option()
        .ok_or_else(|| not_found(kind, logical_id, branch))?;

    if !current.status.is_deleted() {
        return Err(EngineError::InvalidState {
            kind: kind.clone(),
            logical_id,
            reason: format!("restore requires a deleted record, found {}", current.status),
        });
    }

    if let Some(field) = txn.unique_field(kind)? {
        if let Some(value) = current.payload.get(&field) {
            assert_unique_key(txn, kind, branch, &field, value, logical_id)?;
        }
    }

    let base = materialized_base(txn, kind, logical_id, branch)?;
    let payload = base.payload.clone();
    append_version(txn, kind, &base, branch, RowStatus::Active, payload)
}

/// Physically remove every row of the (logical id, branch) lineage.
/// Permitted only when the lineage's latest version is deleted.
pub fn hard_delete(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    logical_id: LogicalId,
    branch: &BranchName,
) -> Result<usize> {
    let rows = txn.lineage(kind, logical_id, branch)?;
    let latest = rows.last().ok_or_else(|| not_found(kind, logical_id, branch))?;

    if !latest.status.is_deleted() {
        return Err(EngineError::InvalidState {
            kind: kind.clone(),
            logical_id,
            reason: format!(
                "hard delete requires a deleted record, found {}",
                latest.status
            ),
        });
    }

    let removed = txn.remove_lineage(kind, logical_id, branch)?;
    debug!(kind = %kind, logical_id = %logical_id, branch = %branch, removed, "hard-deleted lineage");
    Ok(removed)
}

/// Fail with `UniquenessConflict` when any other logical id's current active
/// row (resolved under the same branch visibility) carries `value` in the
/// constrained `field`.
pub(crate) fn assert_unique_key(
    txn: &Transaction<'_>,
    kind: &EntityKind,
    branch: &BranchName,
    field: &str,
    value: &serde_json::Value,
    exclude: LogicalId,
) -> Result<()> {
    let mut ids = txn.logical_ids_on(kind, branch)?;
    ids.extend(txn.logical_ids_on(kind, &BranchName::main())?);

    for logical_id in ids {
        if logical_id == exclude {
            continue;
        }
        let resolved = txn.resolve(kind, logical_id, branch, &ResolveOptions::active_only())?;
        if let Some(row) = resolved.into_option() {
            if row.payload.get(field) == Some(value) {
                return Err(EngineError::UniquenessConflict {
                    field: field.to_string(),
                    value: value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string()),
                });
            }
        }
    }
    Ok(())
}

/// Resolve the row a mutation builds on, materializing branch version 1 from
/// main's current row when the branch has no lineage yet.
fn materialized_base(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    logical_id: LogicalId,
    branch: &BranchName,
) -> Result<Row> {
    match txn.resolve(kind, logical_id, branch, &ResolveOptions::default())? {
        Resolution::FoundInBranch(row) => Ok(row),
        Resolution::FoundInMain(row) if branch.is_main() => Ok(row),
        Resolution::FoundInMain(row) => {
            // usually version 1; later when the branch lineage exists but is
            // spent by a merge, the copy continues its numbering instead
            let version = txn.next_version(kind, logical_id, branch)?;
            let copy = row.with_new_version(
                txn.allocate_physical(),
                branch.clone(),
                version,
                row.status,
                row.payload.clone(),
                Utc::now(),
            );
            txn.insert_row(kind, copy.clone())?;
            debug!(kind = %kind, logical_id = %logical_id, branch = %branch, "materialized branch lineage");
            Ok(copy)
        }
        Resolution::NotFound => Err(not_found(kind, logical_id, branch)),
    }
}

fn append_version(
    txn: &mut Transaction<'_>,
    kind: &EntityKind,
    base: &Row,
    branch: &BranchName,
    status: RowStatus,
    payload: Payload,
) -> Result<Row> {
    let version = txn.next_version(kind, base.logical_id, branch)?;
    let row = base.with_new_version(
        txn.allocate_physical(),
        branch.clone(),
        version,
        status,
        payload,
        Utc::now(),
    );
    txn.insert_row(kind, row.clone())?;

    debug!(
        kind = %kind,
        logical_id = %row.logical_id,
        branch = %branch,
        version = %row.version,
        status = %row.status,
        "appended version"
    );
    Ok(row)
}

fn not_found(kind: &EntityKind, logical_id: LogicalId, branch: &BranchName) -> EngineError {
    EngineError::NotFound {
        kind: kind.clone(),
        logical_id,
        branch: branch.clone(),
    }
}

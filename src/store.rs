//! Main Store struct tying all components together.
//!
//! Storage is an embedded, transactional table set: one table per registered
//! entity kind, rows keyed by physical id, plus a lineage index supporting
//! the "max version per (logical id, branch)" lookup every operation needs.
//!
//! A [`Transaction`] holds the table-set lock for its whole lifetime, so
//! concurrent writers serialize and the version allocator's read-then-insert
//! cannot race. Mutations apply immediately (operations read their own
//! writes) and record an undo journal; dropping a transaction without
//! committing rolls every mutation back.

use crate::branches::{manager, BranchInfo, BranchManager, MergeSummary};
use crate::diff::{self, DiffEntry};
use crate::error::{EngineError, Result};
use crate::lifecycle::operations as ops;
use crate::timemachine::ControlDate;
use crate::types::{
    BranchName, EntityKind, EntityRegistration, LogicalId, Payload, PhysicalId, Row, RowStatus,
    StoreStats, Version,
};
use crate::versions::{next_version, resolve, resolve_current, Resolution, ResolveOptions};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, HashMap};

/// One versioned table.
struct Table {
    /// Constrained business-key field, if the kind declared one.
    unique_field: Option<String>,

    /// All version rows by storage key.
    rows: HashMap<PhysicalId, Row>,

    /// Lineage index: (logical id, branch) -> physical ids ordered by version.
    lineages: HashMap<(LogicalId, BranchName), Vec<PhysicalId>>,
}

impl Table {
    fn new(unique_field: Option<String>) -> Self {
        Self {
            unique_field,
            rows: HashMap::new(),
            lineages: HashMap::new(),
        }
    }

    fn lineage_rows(&self, logical_id: LogicalId, branch: &BranchName) -> Vec<Row> {
        self.lineages
            .get(&(logical_id, branch.clone()))
            .map(|pids| pids.iter().map(|pid| self.rows[pid].clone()).collect())
            .unwrap_or_default()
    }

    fn logical_ids_on(&self, branch: &BranchName) -> BTreeSet<LogicalId> {
        self.lineages
            .keys()
            .filter(|(_, b)| b == branch)
            .map(|(id, _)| *id)
            .collect()
    }

    fn insert(&mut self, row: Row) {
        let key = (row.logical_id, row.branch.clone());
        let pid = row.physical_id;
        let version = row.version;
        self.rows.insert(pid, row);

        let lineage = self.lineages.entry(key).or_default();
        let pos = lineage
            .iter()
            .position(|p| self.rows[p].version > version)
            .unwrap_or(lineage.len());
        lineage.insert(pos, pid);
    }

    fn remove_row(&mut self, physical_id: PhysicalId) {
        if let Some(row) = self.rows.remove(&physical_id) {
            let key = (row.logical_id, row.branch);
            if let Some(lineage) = self.lineages.get_mut(&key) {
                lineage.retain(|p| *p != physical_id);
                if lineage.is_empty() {
                    self.lineages.remove(&key);
                }
            }
        }
    }

    fn remove_lineage(&mut self, logical_id: LogicalId, branch: &BranchName) -> Vec<Row> {
        let key = (logical_id, branch.clone());
        let pids = self.lineages.remove(&key).unwrap_or_default();
        pids.iter()
            .filter_map(|pid| self.rows.remove(pid))
            .collect()
    }
}

/// All tables plus the id counters.
pub(crate) struct TableSet {
    tables: HashMap<EntityKind, Table>,
    kinds: Vec<EntityKind>,
    next_physical: u64,
    next_logical: u64,
}

impl TableSet {
    fn new() -> Self {
        Self {
            tables: HashMap::new(),
            kinds: Vec::new(),
            next_physical: 1,
            next_logical: 1,
        }
    }

    fn table(&self, kind: &EntityKind) -> Result<&Table> {
        self.tables
            .get(kind)
            .ok_or_else(|| EngineError::UnknownEntity(kind.to_string()))
    }

    fn table_mut(&mut self, kind: &EntityKind) -> Result<&mut Table> {
        self.tables
            .get_mut(kind)
            .ok_or_else(|| EngineError::UnknownEntity(kind.to_string()))
    }

    fn lineage(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<Vec<Row>> {
        Ok(self.table(kind)?.lineage_rows(logical_id, branch))
    }

    fn resolve(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
        opts: &ResolveOptions,
    ) -> Result<Resolution<Row>> {
        let table = self.table(kind)?;
        let main_rows = table.lineage_rows(logical_id, &BranchName::main());

        // Resolving main itself: no shadowing lineage, branch-only is moot.
        if branch.is_main() {
            let main_opts = ResolveOptions {
                branch_only: false,
                ..*opts
            };
            return Ok(resolve(&[], &main_rows, &main_opts).map(Clone::clone));
        }

        let branch_rows = table.lineage_rows(logical_id, branch);
        Ok(resolve(&branch_rows, &main_rows, opts).map(Clone::clone))
    }

    fn list(
        &self,
        kind: &EntityKind,
        branch: &BranchName,
        opts: &ResolveOptions,
    ) -> Result<Vec<Row>> {
        let table = self.table(kind)?;

        let mut ids = table.logical_ids_on(branch);
        if !opts.branch_only {
            ids.extend(table.logical_ids_on(&BranchName::main()));
        }

        let mut out = Vec::new();
        for logical_id in ids {
            if let Some(row) = self.resolve(kind, logical_id, branch, opts)?.into_option() {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn merged_view(
        &self,
        kind: &EntityKind,
        branch: &BranchName,
        as_of: Option<ControlDate>,
    ) -> Result<Vec<DiffEntry>> {
        let table = self.table(kind)?;
        let opts = ResolveOptions {
            as_of,
            ..ResolveOptions::default()
        };

        let mut ids = table.logical_ids_on(branch);
        ids.extend(table.logical_ids_on(&BranchName::main()));

        let mut entries = Vec::new();
        for logical_id in ids {
            let branch_rows = table.lineage_rows(logical_id, branch);
            let main_rows = table.lineage_rows(logical_id, &BranchName::main());

            let branch_cur = resolve_current(&branch_rows, &opts);
            let main_cur = resolve_current(&main_rows, &opts);

            if let Some(change) = diff::classify(branch_cur, main_cur) {
                entries.push(DiffEntry {
                    logical_id,
                    change,
                    branch_row: branch_cur.cloned(),
                    main_row: main_cur.cloned(),
                });
            }
        }
        Ok(entries)
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            entity_kinds: self.tables.len() as u64,
            row_count: self.tables.values().map(|t| t.rows.len() as u64).sum(),
            lineage_count: self.tables.values().map(|t| t.lineages.len() as u64).sum(),
            branch_count: 0,
        }
    }
}

/// Journal entry for rolling a mutation back.
enum Undo {
    Inserted {
        kind: EntityKind,
        physical_id: PhysicalId,
    },
    StatusSet {
        kind: EntityKind,
        physical_id: PhysicalId,
        prior: RowStatus,
    },
    LineageRemoved {
        kind: EntityKind,
        rows: Vec<Row>,
    },
}

/// One atomic unit of work against the store.
///
/// Holds the table-set lock until commit or drop. All reads see the
/// transaction's own writes. Dropping without [`Transaction::commit`]
/// rolls back every mutation in reverse order.
pub struct Transaction<'a> {
    tables: MutexGuard<'a, TableSet>,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> Transaction<'a> {
    fn new(tables: MutexGuard<'a, TableSet>) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            committed: false,
        }
    }

    // --- Reads ---

    pub fn resolve(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
        opts: &ResolveOptions,
    ) -> Result<Resolution<Row>> {
        self.tables.resolve(kind, logical_id, branch, opts)
    }

    /// Every version row of one (logical id, branch) lineage, oldest first.
    pub fn lineage(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<Vec<Row>> {
        self.tables.lineage(kind, logical_id, branch)
    }

    /// Logical ids with at least one row on the given branch, any status.
    pub fn logical_ids_on(
        &self,
        kind: &EntityKind,
        branch: &BranchName,
    ) -> Result<BTreeSet<LogicalId>> {
        Ok(self.tables.table(kind)?.logical_ids_on(branch))
    }

    pub fn unique_field(&self, kind: &EntityKind) -> Result<Option<String>> {
        Ok(self.tables.table(kind)?.unique_field.clone())
    }

    /// Next version for a lineage, read inside this transaction.
    pub fn next_version(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<Version> {
        let rows = self.lineage(kind, logical_id, branch)?;
        Ok(next_version(&rows))
    }

    // --- Writes ---

    pub(crate) fn allocate_physical(&mut self) -> PhysicalId {
        let id = PhysicalId(self.tables.next_physical);
        self.tables.next_physical += 1;
        id
    }

    pub(crate) fn allocate_logical(&mut self) -> LogicalId {
        let id = LogicalId(self.tables.next_logical);
        self.tables.next_logical += 1;
        id
    }

    pub fn insert_row(&mut self, kind: &EntityKind, row: Row) -> Result<()> {
        let physical_id = row.physical_id;
        self.tables.table_mut(kind)?.insert(row);
        self.undo.push(Undo::Inserted {
            kind: kind.clone(),
            physical_id,
        });
        Ok(())
    }

    /// Flip the status of one existing row in place. Used only by merge
    /// (flip to merged) and branch discard; lifecycle writes always append.
    pub fn set_status(
        &mut self,
        kind: &EntityKind,
        physical_id: PhysicalId,
        status: RowStatus,
    ) -> Result<()> {
        let table = self.tables.table_mut(kind)?;
        let row = table.rows.get_mut(&physical_id).ok_or_else(|| {
            EngineError::Validation(format!("no row with physical id {}", physical_id))
        })?;
        let prior = row.status;
        row.status = status;
        self.undo.push(Undo::StatusSet {
            kind: kind.clone(),
            physical_id,
            prior,
        });
        Ok(())
    }

    /// Physically remove every row of one lineage. Returns the row count.
    pub fn remove_lineage(
        &mut self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<usize> {
        let rows = self
            .tables
            .table_mut(kind)?
            .remove_lineage(logical_id, branch);
        let count = rows.len();
        self.undo.push(Undo::LineageRemoved {
            kind: kind.clone(),
            rows,
        });
        Ok(count)
    }

    /// Make every mutation permanent.
    pub fn commit(mut self) {
        self.undo.clear();
        self.committed = true;
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Inserted { kind, physical_id } => {
                    if let Some(table) = self.tables.tables.get_mut(&kind) {
                        table.remove_row(physical_id);
                    }
                }
                Undo::StatusSet {
                    kind,
                    physical_id,
                    prior,
                } => {
                    if let Some(table) = self.tables.tables.get_mut(&kind) {
                        if let Some(row) = table.rows.get_mut(&physical_id) {
                            row.status = prior;
                        }
                    }
                }
                Undo::LineageRemoved { kind, rows } => {
                    if let Some(table) = self.tables.tables.get_mut(&kind) {
                        for row in rows {
                            table.insert(row);
                        }
                    }
                }
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            tracing::debug!(mutations = self.undo.len(), "rolling back transaction");
            self.rollback();
        }
    }
}

/// The versioning engine's store.
///
/// Provides a unified interface for:
/// - Registering versioned entity kinds
/// - Lifecycle writes (create, update, soft delete, restore, hard delete)
/// - Branch-aware reads, optionally as of a control date
/// - Branch lifecycle (create, merge, discard)
/// - Merged-view diffing for pre-merge review
pub struct Store {
    tables: Mutex<TableSet>,
    branches: BranchManager,
}

impl Store {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(TableSet::new()),
            branches: BranchManager::new(),
        }
    }

    /// Register a versioned entity kind.
    pub fn register_entity(&self, registration: EntityRegistration) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.tables.contains_key(&registration.kind) {
            return Err(EngineError::EntityExists(registration.kind.to_string()));
        }
        tables.kinds.push(registration.kind.clone());
        tables
            .tables
            .insert(registration.kind, Table::new(registration.unique_field));
        Ok(())
    }

    /// Open a transaction. It commits explicitly and rolls back on drop.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self.tables.lock())
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// Callers couple a lifecycle write with dependent-aggregate writes here;
    /// both commit or roll back together.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut txn = self.begin();
        let out = f(&mut txn)?;
        txn.commit();
        Ok(out)
    }

    // --- Lifecycle Operations ---

    /// Create a new record: fresh logical id, version 1, active.
    pub fn create(
        &self,
        kind: &EntityKind,
        branch: &BranchName,
        payload: Payload,
    ) -> Result<Row> {
        self.transaction(|txn| ops::create(txn, kind, branch, payload))
    }

    /// Append a new version with the patch overlaid on the prior payload.
    pub fn update(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
        patch: Payload,
    ) -> Result<Row> {
        self.transaction(|txn| ops::update(txn, kind, logical_id, branch, patch))
    }

    /// Append a deleted version; the record stays restorable.
    pub fn soft_delete(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<Row> {
        self.transaction(|txn| ops::soft_delete(txn, kind, logical_id, branch))
    }

    /// Bring a soft-deleted record back as a new active version.
    pub fn restore(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<Row> {
        self.transaction(|txn| ops::restore(txn, kind, logical_id, branch))
    }

    /// Physically remove a soft-deleted lineage. Irreversible.
    pub fn hard_delete(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<usize> {
        self.transaction(|txn| ops::hard_delete(txn, kind, logical_id, branch))
    }

    // --- Reads ---

    /// Resolve the current visible row, tagged with where it was found.
    pub fn resolve(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
        opts: &ResolveOptions,
    ) -> Result<Resolution<Row>> {
        self.tables.lock().resolve(kind, logical_id, branch, opts)
    }

    /// Like [`Store::resolve`] but a miss is an error.
    pub fn get(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
        opts: &ResolveOptions,
    ) -> Result<Row> {
        self.resolve(kind, logical_id, branch, opts)?
            .into_option()
            .ok_or_else(|| EngineError::NotFound {
                kind: kind.clone(),
                logical_id,
                branch: branch.clone(),
            })
    }

    /// Current visible rows across branch ∪ main, one per logical id,
    /// branch rows shadowing main rows.
    pub fn list(
        &self,
        kind: &EntityKind,
        branch: &BranchName,
        opts: &ResolveOptions,
    ) -> Result<Vec<Row>> {
        self.tables.lock().list(kind, branch, opts)
    }

    /// Full version history of one lineage, oldest first, merged rows
    /// included. Audit access; visibility rules do not apply.
    pub fn history(
        &self,
        kind: &EntityKind,
        logical_id: LogicalId,
        branch: &BranchName,
    ) -> Result<Vec<Row>> {
        self.tables.lock().lineage(kind, logical_id, branch)
    }

    /// Change-status classification of a branch against main, for
    /// pre-merge review. Read-only.
    pub fn merged_view(
        &self,
        kind: &EntityKind,
        branch: &BranchName,
        as_of: Option<ControlDate>,
    ) -> Result<Vec<DiffEntry>> {
        self.tables.lock().merged_view(kind, branch, as_of)
    }

    // --- Branch Operations ---

    /// Generate and register a branch name for a change request. Pure
    /// naming; no rows are created until the first branch write.
    pub fn create_branch(&self, change_request_id: &str) -> Result<BranchName> {
        self.branches.create_branch(change_request_id)
    }

    /// Merge a branch into main atomically. Last-write-wins: each logical
    /// id's current branch row lands in main verbatim as a new version and
    /// the branch row flips to merged. Re-merging a merged branch is a no-op.
    pub fn merge_branch(&self, branch: &BranchName) -> Result<MergeSummary> {
        if branch.is_main() {
            return Err(EngineError::ProtectedBranch(branch.to_string()));
        }
        let kinds = self.kinds();
        let summary = self.transaction(|txn| manager::merge_branch_rows(txn, &kinds, branch))?;
        self.branches.mark_merged(branch);
        Ok(summary)
    }

    /// Discard a branch: soft-delete every non-merged row it holds.
    /// Rejects main; idempotent.
    pub fn delete_branch(&self, branch: &BranchName) -> Result<usize> {
        if branch.is_main() {
            return Err(EngineError::ProtectedBranch(branch.to_string()));
        }
        let kinds = self.kinds();
        let discarded =
            self.transaction(|txn| manager::discard_branch_rows(txn, &kinds, branch))?;
        self.branches.mark_discarded(branch);
        Ok(discarded)
    }

    /// Metadata for branches created through this store.
    pub fn list_branches(&self) -> Vec<BranchInfo> {
        self.branches.list()
    }

    pub fn branch_info(&self, branch: &BranchName) -> Option<BranchInfo> {
        self.branches.get(branch)
    }

    // --- Store Operations ---

    pub fn stats(&self) -> StoreStats {
        let mut stats = self.tables.lock().stats();
        stats.branch_count = self.branches.count() as u64;
        stats
    }

    fn kinds(&self) -> Vec<EntityKind> {
        self.tables.lock().kinds.clone()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn test_store() -> Store {
        let store = Store::new();
        store
            .register_entity(EntityRegistration::new("cost_item"))
            .unwrap();
        store
    }

    #[test]
    fn test_register_entity_twice_fails() {
        let store = test_store();
        let result = store.register_entity(EntityRegistration::new("cost_item"));
        assert!(matches!(result, Err(EngineError::EntityExists(_))));
    }

    #[test]
    fn test_unknown_entity_kind() {
        let store = test_store();
        let result = store.create(&"budget".into(), &BranchName::main(), Payload::new());
        assert!(matches!(result, Err(EngineError::UnknownEntity(_))));
    }

    #[test]
    fn test_create_and_get() {
        let store = test_store();
        let kind = EntityKind::new("cost_item");

        let row = store
            .create(&kind, &BranchName::main(), payload(&[("amount", json!(100))]))
            .unwrap();
        assert_eq!(row.version, Version::FIRST);
        assert_eq!(row.status, RowStatus::Active);

        let fetched = store
            .get(
                &kind,
                row.logical_id,
                &BranchName::main(),
                &ResolveOptions::default(),
            )
            .unwrap();
        assert_eq!(fetched.physical_id, row.physical_id);
    }

    #[test]
    fn test_transaction_rollback_on_error() {
        let store = test_store();
        let kind = EntityKind::new("cost_item");

        let result: Result<()> = store.transaction(|txn| {
            ops::create(txn, &kind, &BranchName::main(), Payload::new())?;
            Err(EngineError::Validation("dependent aggregate failed".into()))
        });
        assert!(result.is_err());

        // the create rolled back with the failed aggregate write
        assert_eq!(
            store
                .list(&kind, &BranchName::main(), &ResolveOptions::default())
                .unwrap()
                .len(),
            0
        );
        assert_eq!(store.stats().row_count, 0);
    }

    #[test]
    fn test_transaction_reads_own_writes() {
        let store = test_store();
        let kind = EntityKind::new("cost_item");

        store
            .transaction(|txn| {
                let row = ops::create(txn, &kind, &BranchName::main(), Payload::new())?;
                let seen = txn.resolve(
                    &kind,
                    row.logical_id,
                    &BranchName::main(),
                    &ResolveOptions::default(),
                )?;
                assert!(seen.is_found());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_rollback_restores_removed_lineage() {
        let store = test_store();
        let kind = EntityKind::new("cost_item");

        let row = store
            .create(&kind, &BranchName::main(), payload(&[("amount", json!(5))]))
            .unwrap();
        store
            .soft_delete(&kind, row.logical_id, &BranchName::main())
            .unwrap();

        let result: Result<()> = store.transaction(|txn| {
            ops::hard_delete(txn, &kind, row.logical_id, &BranchName::main())?;
            Err(EngineError::Validation("abort".into()))
        });
        assert!(result.is_err());

        // both versions back in place
        let history = store
            .history(&kind, row.logical_id, &BranchName::main())
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_stats() {
        let store = test_store();
        let kind = EntityKind::new("cost_item");

        store
            .create(&kind, &BranchName::main(), Payload::new())
            .unwrap();
        store
            .create(&kind, &BranchName::main(), Payload::new())
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.entity_kinds, 1);
        assert_eq!(stats.row_count, 2);
        assert_eq!(stats.lineage_count, 2);
    }
}

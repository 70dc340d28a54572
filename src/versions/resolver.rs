//! Branch visibility resolver.
//!
//! Branch rows shadow main rows sharing a logical id. Resolution works on
//! the two lineages of one logical id: the requested branch's rows and
//! main's rows. The control date filters candidates before the highest
//! version is picked; the merged check and the active-only gate then decide
//! whether the picked current row is reported at all.

use crate::timemachine::ControlDate;
use crate::types::Versioned;

/// Where the resolver found the current row.
///
/// An explicit tagged result instead of a bare option, so callers (notably
/// the merged-view differ) can tell a branch hit from a main fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution<R> {
    /// The requested branch has a live row for this logical id.
    FoundInBranch(R),
    /// No live branch row; main's current row applies.
    FoundInMain(R),
    /// No visible row in either lineage.
    NotFound,
}

impl<R> Resolution<R> {
    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }

    pub fn record(&self) -> Option<&R> {
        match self {
            Resolution::FoundInBranch(r) | Resolution::FoundInMain(r) => Some(r),
            Resolution::NotFound => None,
        }
    }

    pub fn into_option(self) -> Option<R> {
        match self {
            Resolution::FoundInBranch(r) | Resolution::FoundInMain(r) => Some(r),
            Resolution::NotFound => None,
        }
    }

    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Resolution<T> {
        match self {
            Resolution::FoundInBranch(r) => Resolution::FoundInBranch(f(r)),
            Resolution::FoundInMain(r) => Resolution::FoundInMain(f(r)),
            Resolution::NotFound => Resolution::NotFound,
        }
    }
}

/// Visibility options applied during resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolveOptions {
    /// Skip the fallback to main entirely.
    pub branch_only: bool,

    /// Report nothing when the current row is soft-deleted. A deleted
    /// current row never falls back to an older active version.
    pub active_only: bool,

    /// Hide rows created after this date before picking the current version.
    pub as_of: Option<ControlDate>,
}

impl ResolveOptions {
    pub fn branch_only() -> Self {
        Self {
            branch_only: true,
            ..Self::default()
        }
    }

    pub fn active_only() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn as_of(date: ControlDate) -> Self {
        Self {
            as_of: Some(date),
            ..Self::default()
        }
    }
}

/// Pick the current row of one lineage: the highest version among candidates
/// not past the control date. Returns `None` when the lineage has no eligible
/// candidate, when the current row is merged (the lineage is spent; earlier
/// versions never resurface), or when the current row is deleted and
/// `active_only` is set.
pub fn resolve_current<'a, R: Versioned>(
    lineage: &'a [R],
    opts: &ResolveOptions,
) -> Option<&'a R> {
    let current = lineage
        .iter()
        .filter(|r| opts.as_of.map_or(true, |date| date.admits_record(*r)))
        .max_by_key(|r| r.version())?;

    if current.status().is_merged() {
        return None;
    }
    if opts.active_only && !current.status().is_active() {
        return None;
    }
    Some(current)
}

/// Resolve the current visible row for one logical id.
///
/// `branch_rows` is the requested branch's lineage, `main_rows` is main's.
/// When the requested branch *is* main, pass its lineage as `main_rows` and
/// leave `branch_rows` empty; the result is then tagged `FoundInMain`.
pub fn resolve<'a, R: Versioned>(
    branch_rows: &'a [R],
    main_rows: &'a [R],
    opts: &ResolveOptions,
) -> Resolution<&'a R> {
    if let Some(current) = resolve_current(branch_rows, opts) {
        return Resolution::FoundInBranch(current);
    }

    // A live branch current that failed only the active-only gate still
    // shadows main: the record reads as deleted, not as main's older state.
    let shadow = ResolveOptions {
        active_only: false,
        ..*opts
    };
    if resolve_current(branch_rows, &shadow).is_some() {
        return Resolution::NotFound;
    }

    if opts.branch_only {
        return Resolution::NotFound;
    }

    match resolve_current(main_rows, opts) {
        Some(current) => Resolution::FoundInMain(current),
        None => Resolution::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchName, LogicalId, Payload, PhysicalId, Row, RowStatus, Version};
    use chrono::{TimeZone, Utc};

    fn row(branch: &str, version: u64, status: RowStatus, day: u32) -> Row {
        Row {
            logical_id: LogicalId(1),
            physical_id: PhysicalId(version * 100 + day as u64),
            branch: BranchName::new(branch),
            version: Version(version),
            status,
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            payload: Payload::new(),
        }
    }

    #[test]
    fn test_branch_shadows_main() {
        let branch = vec![row("co-aa", 1, RowStatus::Active, 2)];
        let main = vec![row("main", 1, RowStatus::Active, 1)];

        let res = resolve(&branch, &main, &ResolveOptions::default());
        match res {
            Resolution::FoundInBranch(r) => assert_eq!(r.branch.as_str(), "co-aa"),
            other => panic!("expected branch hit, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_to_main() {
        let branch: Vec<Row> = Vec::new();
        let main = vec![row("main", 1, RowStatus::Active, 1)];

        assert!(matches!(
            resolve(&branch, &main, &ResolveOptions::default()),
            Resolution::FoundInMain(_)
        ));
    }

    #[test]
    fn test_branch_only_skips_main() {
        let branch: Vec<Row> = Vec::new();
        let main = vec![row("main", 1, RowStatus::Active, 1)];

        assert_eq!(
            resolve(&branch, &main, &ResolveOptions::branch_only()),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_merged_rows_invisible() {
        let branch = vec![row("co-aa", 1, RowStatus::Merged, 2)];
        let main = vec![row("main", 2, RowStatus::Active, 3)];

        // all branch rows merged: lineage is spent, main applies
        let res = resolve(&branch, &main, &ResolveOptions::default());
        match res {
            Resolution::FoundInMain(r) => assert_eq!(r.version, Version(2)),
            other => panic!("expected main fallback, got {:?}", other),
        }

        assert_eq!(
            resolve(&branch, &main, &ResolveOptions::branch_only()),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_merged_current_spends_the_lineage() {
        // the materialized copy stays active under the merged revision,
        // but it never resurfaces once the lineage is spent
        let branch = vec![
            row("co-aa", 1, RowStatus::Active, 2),
            row("co-aa", 2, RowStatus::Merged, 3),
        ];
        let main = vec![row("main", 2, RowStatus::Active, 4)];

        assert!(matches!(
            resolve(&branch, &main, &ResolveOptions::default()),
            Resolution::FoundInMain(_)
        ));
        assert_eq!(
            resolve(&branch, &main, &ResolveOptions::branch_only()),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_deleted_current_shadows_main_under_active_only() {
        let branch = vec![
            row("co-aa", 1, RowStatus::Active, 2),
            row("co-aa", 2, RowStatus::Deleted, 3),
        ];
        let main = vec![row("main", 1, RowStatus::Active, 1)];

        // default: deleted current row is returned
        let res = resolve(&branch, &main, &ResolveOptions::default());
        assert_eq!(res.record().unwrap().status, RowStatus::Deleted);

        // active-only: record reads as gone, main does not resurface it
        assert_eq!(
            resolve(&branch, &main, &ResolveOptions::active_only()),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_highest_version_wins() {
        let main = vec![
            row("main", 1, RowStatus::Active, 1),
            row("main", 3, RowStatus::Active, 3),
            row("main", 2, RowStatus::Active, 2),
        ];
        let res = resolve(&[], &main, &ResolveOptions::default());
        assert_eq!(res.record().unwrap().version, Version(3));
    }

    #[test]
    fn test_as_of_falls_back_to_earlier_version() {
        let main = vec![
            row("main", 1, RowStatus::Active, 5),
            row("main", 2, RowStatus::Active, 20),
        ];

        let early = ControlDate::from_ymd(2024, 1, 10).unwrap();
        let res = resolve::<Row>(&[], &main, &ResolveOptions::as_of(early));
        assert_eq!(res.record().unwrap().version, Version(1));

        let late = ControlDate::from_ymd(2024, 1, 31).unwrap();
        let res = resolve::<Row>(&[], &main, &ResolveOptions::as_of(late));
        assert_eq!(res.record().unwrap().version, Version(2));
    }

    #[test]
    fn test_as_of_before_creation_is_not_found() {
        let main = vec![row("main", 1, RowStatus::Active, 15)];
        let before = ControlDate::from_ymd(2024, 1, 1).unwrap();

        assert_eq!(
            resolve::<Row>(&[], &main, &ResolveOptions::as_of(before)),
            Resolution::NotFound
        );
    }

    #[test]
    fn test_as_of_unmaterialized_branch_falls_back_to_main() {
        // branch materialized on day 20; as of day 10 only main existed
        let branch = vec![row("co-aa", 1, RowStatus::Active, 20)];
        let main = vec![row("main", 1, RowStatus::Active, 5)];

        let early = ControlDate::from_ymd(2024, 1, 10).unwrap();
        let res = resolve::<Row>(&branch, &main, &ResolveOptions::as_of(early));
        assert!(matches!(res, Resolution::FoundInMain(_)));
    }
}

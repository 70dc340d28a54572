//! Version allocator.

use crate::types::{Version, Versioned};

/// Next version for a (entity kind, logical id, branch) lineage: one greater
/// than the maximum existing version, or 1 if the lineage is empty.
///
/// Merged and deleted rows count; a lineage never reuses a version number.
/// Deterministic and side-effect-free; the caller must run it inside the
/// same storage transaction as the row it numbers, or two writers could
/// allocate the same version.
pub fn next_version<'a, R, I>(lineage: I) -> Version
where
    R: Versioned + 'a,
    I: IntoIterator<Item = &'a R>,
{
    lineage
        .into_iter()
        .map(|record| record.version())
        .max()
        .map(Version::next)
        .unwrap_or(Version::FIRST)
}

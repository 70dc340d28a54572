//! Core types for the versioning engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the main branch.
pub const MAIN_BRANCH: &str = "main";

/// Stable identity shared by every version of one conceptual record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalId(pub u64);

impl fmt::Debug for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalId({})", self.0)
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique storage key of one specific version row.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalId(pub u64);

impl fmt::Debug for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalId({})", self.0)
    }
}

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic version number within one (logical id, branch) lineage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// First version of any lineage.
    pub const FIRST: Version = Version(1);

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A named line of changes. Either `main` or a generated change-request branch.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: impl Into<String>) -> Self {
        BranchName(name.into())
    }

    /// The main branch.
    pub fn main() -> Self {
        BranchName(MAIN_BRANCH.to_string())
    }

    pub fn is_main(&self) -> bool {
        self.0 == MAIN_BRANCH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchName({})", self.0)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        BranchName::new(s)
    }
}

/// Lifecycle status of one version row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// Visible, current business data.
    Active,
    /// Soft-deleted; kept for restore and audit.
    Deleted,
    /// Copied into main by a merge; terminal for the branch lineage.
    Merged,
}

impl RowStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RowStatus::Active)
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, RowStatus::Deleted)
    }

    pub fn is_merged(self) -> bool {
        matches!(self, RowStatus::Merged)
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowStatus::Active => "active",
            RowStatus::Deleted => "deleted",
            RowStatus::Merged => "merged",
        };
        write!(f, "{}", s)
    }
}

/// A versioned entity type (e.g. "cost_item", "work_package").
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKind(String);

impl EntityKind {
    pub fn new(kind: impl Into<String>) -> Self {
        EntityKind(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKind({})", self.0)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityKind {
    fn from(s: &str) -> Self {
        EntityKind::new(s)
    }
}

/// Type-specific business fields of one version row.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Registration for a versioned entity kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRegistration {
    pub kind: EntityKind,

    /// Business-key field whose value must be unique across active records
    /// (e.g. a reference number). Re-validated before restore and merge.
    #[serde(default)]
    pub unique_field: Option<String>,
}

impl EntityRegistration {
    pub fn new(kind: impl Into<EntityKind>) -> Self {
        Self {
            kind: kind.into(),
            unique_field: None,
        }
    }

    pub fn with_unique_field(mut self, field: impl Into<String>) -> Self {
        self.unique_field = Some(field.into());
        self
    }
}

/// Capability interface every versioned record implements.
///
/// The allocator, resolver, and differ dispatch through this trait
/// statically; nothing in the engine inspects payloads reflectively.
pub trait Versioned: Clone {
    fn logical_id(&self) -> LogicalId;
    fn physical_id(&self) -> PhysicalId;
    fn branch(&self) -> &BranchName;
    fn version(&self) -> Version;
    fn status(&self) -> RowStatus;
    fn created_at(&self) -> DateTime<Utc>;
    fn payload(&self) -> &Payload;

    /// Build the next version row of the same logical record: same logical
    /// identity, fresh storage key, supplied version, status, and payload.
    fn with_new_version(
        &self,
        physical_id: PhysicalId,
        branch: BranchName,
        version: Version,
        status: RowStatus,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self;
}

/// One version row of a business record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub logical_id: LogicalId,
    pub physical_id: PhysicalId,
    pub branch: BranchName,
    pub version: Version,
    pub status: RowStatus,
    pub created_at: DateTime<Utc>,
    pub payload: Payload,
}

impl Versioned for Row {
    fn logical_id(&self) -> LogicalId {
        self.logical_id
    }

    fn physical_id(&self) -> PhysicalId {
        self.physical_id
    }

    fn branch(&self) -> &BranchName {
        &self.branch
    }

    fn version(&self) -> Version {
        self.version
    }

    fn status(&self) -> RowStatus {
        self.status
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn with_new_version(
        &self,
        physical_id: PhysicalId,
        branch: BranchName,
        version: Version,
        status: RowStatus,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Row {
            logical_id: self.logical_id,
            physical_id,
            branch,
            version,
            status,
            created_at,
            payload,
        }
    }
}

/// Statistics over the whole store.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub entity_kinds: u64,
    pub row_count: u64,
    pub lineage_count: u64,
    pub branch_count: u64,
}

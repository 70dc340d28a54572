//! # Costline
//!
//! A row-level branch-and-merge version control engine for project cost
//! records, layered over a transactional table store.
//!
//! ## Core Concepts
//!
//! - **Versions**: Every mutation appends a new row; lineages are
//!   append-only with a strictly increasing per-(logical id, branch) counter
//! - **Branches**: Flat named branches off main, one per change request;
//!   branch rows shadow main rows until merged or discarded
//! - **Merge**: Last-write-wins copy of a branch's current state into main,
//!   atomic across every affected record
//! - **Time machine**: "As of" control dates hide rows created later,
//!   falling back to earlier eligible versions
//!
//! ## Example
//!
//! ```ignore
//! use costline::{BranchName, EntityRegistration, ResolveOptions, Store};
//!
//! let store = Store::new();
//! store.register_entity(EntityRegistration::new("cost_item").with_unique_field("reference"))?;
//!
//! let kind = "cost_item".into();
//! let row = store.create(&kind, &BranchName::main(), payload)?;
//!
//! // mutate inside a change-request branch, main stays untouched
//! let branch = store.create_branch("CR-17")?;
//! store.update(&kind, row.logical_id, &branch, patch)?;
//!
//! // review, then land the change request
//! let review = store.merged_view(&kind, &branch, None)?;
//! store.merge_branch(&branch)?;
//! ```

pub mod branches;
pub mod diff;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod timemachine;
pub mod types;
pub mod versions;

// Re-exports
pub use branches::{BranchInfo, BranchManager, BranchState, MergeSummary};
pub use diff::{classify, ChangeStatus, DiffEntry};
pub use error::{EngineError, Result};
pub use lifecycle::{overlay, operations};
pub use store::{Store, Transaction};
pub use timemachine::ControlDate;
pub use types::*;
pub use versions::{next_version, resolve, resolve_current, Resolution, ResolveOptions};

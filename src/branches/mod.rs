//! Branch lifecycle: naming, merging, and discarding.

pub mod manager;

pub use manager::{BranchInfo, BranchManager, BranchState, MergeSummary};

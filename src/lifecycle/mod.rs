//! Entity lifecycle: append-only create, update, soft delete, restore,
//! and hard delete.

pub mod operations;

pub use operations::{create, hard_delete, overlay, restore, soft_delete, update};

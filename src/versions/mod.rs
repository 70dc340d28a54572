//! Version allocation and branch visibility resolution.

pub mod allocator;
pub mod resolver;

pub use allocator::next_version;
pub use resolver::{resolve, resolve_current, ResolveOptions, Resolution};

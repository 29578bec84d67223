//! Collaboration layer
//!
//! One individual stack per user plus permissioned shared (team) stacks, the
//! handoff workflow that moves frames between them, and the merge resolver that
//! reconciles overlapping frame sets.

pub mod context;
pub mod dual;
pub mod handoff;
pub mod merge;
pub mod permissions;
pub mod sync;

pub use context::{StackContext, StackKind};
pub use dual::{DualStackManager, DualStackOptions, SharedDualStack};
pub use handoff::HandoffManager;
pub use merge::StackMergeResolver;
pub use permissions::{Action, GrantPermissionChecker, PermissionChecker, StackPermissions};
pub use sync::{ConflictResolution, SyncFailure, SyncOptions, SyncResult};

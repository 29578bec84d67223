//! Stack Registry
//!
//! Durable records shared by every stack of a workspace: stack contexts,
//! explicit permission grants, handoff requests and user notifications. Frames
//! themselves live in per-stack [`FrameStore`](crate::frame::FrameStore)s.

pub mod persistence;

pub use persistence::SledStackRegistry;

use crate::collab::context::StackContext;
use crate::collab::handoff::{HandoffRequest, Notification};
use crate::collab::permissions::StackPermissions;
use crate::error::StorageError;

/// Registry interface
pub trait StackRegistry: Send + Sync {
    fn put_stack(&self, context: &StackContext) -> Result<(), StorageError>;
    fn get_stack(&self, stack_id: &str) -> Result<Option<StackContext>, StorageError>;
    /// All stacks of a project, oldest first
    fn list_stacks(&self, project_id: &str) -> Result<Vec<StackContext>, StorageError>;

    /// Record an explicit grant on a resource (a stack id or `team:{id}`)
    fn put_grant(
        &self,
        resource: &str,
        user_id: &str,
        permissions: &StackPermissions,
    ) -> Result<(), StorageError>;
    fn get_grant(&self, resource: &str, user_id: &str)
        -> Result<Option<StackPermissions>, StorageError>;
    fn list_grants(&self, resource: &str) -> Result<Vec<(String, StackPermissions)>, StorageError>;

    fn put_handoff(&self, request: &HandoffRequest) -> Result<(), StorageError>;
    fn get_handoff(&self, request_id: &str) -> Result<Option<HandoffRequest>, StorageError>;
    fn list_handoffs(&self) -> Result<Vec<HandoffRequest>, StorageError>;

    fn put_notification(&self, notification: &Notification) -> Result<(), StorageError>;
    fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>, StorageError>;
    /// Returns `false` if nothing was removed
    fn delete_notification(&self, user_id: &str, notification_id: &str)
        -> Result<bool, StorageError>;
}

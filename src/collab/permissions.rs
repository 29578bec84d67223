//! Capability checks
//!
//! Every enforcement point asks one question: may `actor` perform `action` on
//! `resource`? Resources are stack ids, or `team:{team_id}` for team-level
//! administration. The checker is injected, so callers can substitute their own.

use crate::collab::context::{individual_stack_id, StackKind};
use crate::error::StackError;
use crate::store::StackRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const TEAM_RESOURCE_PREFIX: &str = "team:";

pub fn team_resource(team_id: &str) -> String {
    format!("{TEAM_RESOURCE_PREFIX}{team_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Handoff,
    Merge,
    Administer,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Handoff => "handoff",
            Action::Merge => "merge",
            Action::Administer => "administer",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackPermissions {
    pub can_read: bool,
    pub can_write: bool,
    pub can_handoff: bool,
    pub can_merge: bool,
    pub can_administer: bool,
}

impl StackPermissions {
    pub fn full() -> Self {
        Self {
            can_read: true,
            can_write: true,
            can_handoff: true,
            can_merge: true,
            can_administer: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            can_read: true,
            ..Self::default()
        }
    }

    /// Read, write and handoff; no merge or administration
    pub fn contributor() -> Self {
        Self {
            can_read: true,
            can_write: true,
            can_handoff: true,
            ..Self::default()
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.can_read,
            Action::Write => self.can_write,
            Action::Handoff => self.can_handoff,
            Action::Merge => self.can_merge,
            Action::Administer => self.can_administer,
        }
    }
}

pub trait PermissionChecker: Send + Sync {
    fn check(&self, actor: &str, action: Action, resource: &str) -> Result<(), StackError>;

    fn allows(&self, actor: &str, action: Action, resource: &str) -> bool {
        self.check(actor, action, resource).is_ok()
    }
}

fn denied(actor: &str, action: Action, resource: &str) -> StackError {
    StackError::PermissionDenied {
        actor: actor.to_string(),
        action: action.as_str().to_string(),
        resource: resource.to_string(),
    }
}

/// Registry-backed checker.
///
/// - An explicit grant for (resource, actor) decides first.
/// - A user's own individual stack allows everything; other individual stacks
///   allow nothing.
/// - Shared stacks fall back to the stack's default permissions.
/// - `team:{id}` allows administration when the actor holds an administer grant,
///   or while the team has no administrator at all.
pub struct GrantPermissionChecker {
    registry: Arc<dyn StackRegistry>,
}

impl GrantPermissionChecker {
    pub fn new(registry: Arc<dyn StackRegistry>) -> Self {
        Self { registry }
    }

    fn check_team(&self, actor: &str, action: Action, resource: &str) -> Result<(), StackError> {
        if let Some(grant) = self.registry.get_grant(resource, actor)? {
            return if grant.allows(action) {
                Ok(())
            } else {
                Err(denied(actor, action, resource))
            };
        }
        let has_admin = self
            .registry
            .list_grants(resource)?
            .iter()
            .any(|(_, grant)| grant.can_administer);
        if has_admin {
            Err(denied(actor, action, resource))
        } else {
            debug!(actor, resource, "Team has no administrator yet; allowing bootstrap");
            Ok(())
        }
    }
}

impl PermissionChecker for GrantPermissionChecker {
    fn check(&self, actor: &str, action: Action, resource: &str) -> Result<(), StackError> {
        if resource.starts_with(TEAM_RESOURCE_PREFIX) {
            return self.check_team(actor, action, resource);
        }

        if let Some(grant) = self.registry.get_grant(resource, actor)? {
            return if grant.allows(action) {
                Ok(())
            } else {
                Err(denied(actor, action, resource))
            };
        }

        if resource == individual_stack_id(actor) {
            return Ok(());
        }

        let context = self
            .registry
            .get_stack(resource)?
            .ok_or_else(|| StackError::StackNotFound(resource.to_string()))?;

        let allowed = match context.kind {
            StackKind::Individual => context.owner_id.as_deref() == Some(actor),
            StackKind::Shared => context.permissions.allows(action),
        };
        if allowed {
            Ok(())
        } else {
            Err(denied(actor, action, resource))
        }
    }
}

//! Stack contexts: the persisted description of one individual or shared stack.

use crate::collab::permissions::StackPermissions;
use crate::frame::ValueMap;
use serde::{Deserialize, Serialize};

pub const INDIVIDUAL_PREFIX: &str = "individual-";
pub const SHARED_PREFIX: &str = "shared-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    Individual,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackContext {
    pub stack_id: String,
    pub kind: StackKind,
    pub project_id: String,
    pub name: String,
    /// Owner of an individual stack, creator of a shared one
    pub owner_id: Option<String>,
    /// Set for shared stacks only
    pub team_id: Option<String>,
    /// Baseline permissions for actors without an explicit grant
    pub permissions: StackPermissions,
    #[serde(default)]
    pub metadata: ValueMap,
    pub created_at: u64,
    pub last_active: u64,
}

impl StackContext {
    pub fn individual(user_id: &str, project_id: &str, now_ms: u64) -> Self {
        Self {
            stack_id: individual_stack_id(user_id),
            kind: StackKind::Individual,
            project_id: project_id.to_string(),
            name: format!("{} (personal)", user_id),
            owner_id: Some(user_id.to_string()),
            team_id: None,
            permissions: StackPermissions::full(),
            metadata: ValueMap::new(),
            created_at: now_ms,
            last_active: now_ms,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.kind == StackKind::Shared
    }
}

pub fn individual_stack_id(user_id: &str) -> String {
    format!("{INDIVIDUAL_PREFIX}{user_id}")
}

/// `shared-{team}-{created_at}`, with the team id reduced to `[a-z0-9-]`
pub fn shared_stack_id(team_id: &str, created_at: u64) -> String {
    let team: String = team_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{SHARED_PREFIX}{}-{}", team.trim_matches('-'), created_at)
}

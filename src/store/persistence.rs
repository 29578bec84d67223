//! Sled-backed stack registry

use crate::collab::context::StackContext;
use crate::collab::handoff::{HandoffRequest, Notification};
use crate::collab::permissions::StackPermissions;
use crate::error::StorageError;
use crate::store::StackRegistry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

const TREE_STACKS: &str = "stacks";
const TREE_GRANTS: &str = "grants";
const TREE_HANDOFFS: &str = "handoffs";
const TREE_NOTIFICATIONS: &str = "notifications";

/// Separates the two halves of composite keys; never valid inside an id
const KEY_SEP: char = '\u{0}';

#[derive(Clone)]
pub struct SledStackRegistry {
    db: Db,
    stacks: Tree,
    grants: Tree,
    handoffs: Tree,
    notifications: Tree,
}

impl SledStackRegistry {
    /// Open (or create) the registry database at the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path.as_ref())?;
        Self::from_db(sled::open(path)?)
    }

    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            stacks: db.open_tree(TREE_STACKS)?,
            grants: db.open_tree(TREE_GRANTS)?,
            handoffs: db.open_tree(TREE_HANDOFFS)?,
            notifications: db.open_tree(TREE_NOTIFICATIONS)?,
            db,
        })
    }

    /// Get the underlying sled database
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn composite_key(first: &str, second: &str) -> String {
    format!("{first}{KEY_SEP}{second}")
}

fn composite_prefix(first: &str) -> String {
    format!("{first}{KEY_SEP}")
}

fn put<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<(), StorageError> {
    tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
    Ok(())
}

fn get<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, StorageError> {
    match tree.get(key.as_bytes())? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

fn scan<T: DeserializeOwned>(tree: &Tree, prefix: &str) -> Result<Vec<T>, StorageError> {
    let mut out = Vec::new();
    for item in tree.scan_prefix(prefix.as_bytes()) {
        let (_, value) = item?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

impl StackRegistry for SledStackRegistry {
    fn put_stack(&self, context: &StackContext) -> Result<(), StorageError> {
        put(&self.stacks, &context.stack_id, context)
    }

    fn get_stack(&self, stack_id: &str) -> Result<Option<StackContext>, StorageError> {
        get(&self.stacks, stack_id)
    }

    fn list_stacks(&self, project_id: &str) -> Result<Vec<StackContext>, StorageError> {
        let mut stacks: Vec<StackContext> = scan::<StackContext>(&self.stacks, "")?
            .into_iter()
            .filter(|s| s.project_id == project_id)
            .collect();
        stacks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.stack_id.cmp(&b.stack_id))
        });
        Ok(stacks)
    }

    fn put_grant(
        &self,
        resource: &str,
        user_id: &str,
        permissions: &StackPermissions,
    ) -> Result<(), StorageError> {
        put(&self.grants, &composite_key(resource, user_id), &(user_id, permissions))
    }

    fn get_grant(
        &self,
        resource: &str,
        user_id: &str,
    ) -> Result<Option<StackPermissions>, StorageError> {
        Ok(get::<(String, StackPermissions)>(&self.grants, &composite_key(resource, user_id))?
            .map(|(_, permissions)| permissions))
    }

    fn list_grants(&self, resource: &str) -> Result<Vec<(String, StackPermissions)>, StorageError> {
        scan(&self.grants, &composite_prefix(resource))
    }

    fn put_handoff(&self, request: &HandoffRequest) -> Result<(), StorageError> {
        put(&self.handoffs, &request.request_id, request)
    }

    fn get_handoff(&self, request_id: &str) -> Result<Option<HandoffRequest>, StorageError> {
        get(&self.handoffs, request_id)
    }

    fn list_handoffs(&self) -> Result<Vec<HandoffRequest>, StorageError> {
        let mut requests: Vec<HandoffRequest> = scan(&self.handoffs, "")?;
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    fn put_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        put(
            &self.notifications,
            &composite_key(&notification.user_id, &notification.notification_id),
            notification,
        )
    }

    fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>, StorageError> {
        scan(&self.notifications, &composite_prefix(user_id))
    }

    fn delete_notification(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<bool, StorageError> {
        Ok(self
            .notifications
            .remove(composite_key(user_id, notification_id).as_bytes())?
            .is_some())
    }
}

//! Handoff notifications and scheduled reminders.

use crate::error::StackError;
use crate::frame::id;
use crate::store::StackRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The recipient is asked to review a request
    HandoffRequest,
    HandoffReminder,
    /// Status change reported back to the requester
    HandoffUpdate,
    /// Informational copy for a stakeholder
    StakeholderUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub request_id: String,
    pub title: String,
    pub message: String,
    pub actionable: bool,
    pub read: bool,
    pub created_at: u64,
    pub expires_at: u64,
}

impl Notification {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// A reminder due at `due_at` if the request is still awaiting review then
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub request_id: String,
    pub recipient: String,
    pub due_at: u64,
}

pub(crate) struct NotificationCenter {
    registry: Arc<dyn StackRegistry>,
    ttl_ms: u64,
}

impl NotificationCenter {
    pub(crate) fn new(registry: Arc<dyn StackRegistry>, ttl_ms: u64) -> Self {
        Self { registry, ttl_ms }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        request_id: &str,
        title: &str,
        message: String,
        actionable: bool,
        now_ms: u64,
    ) -> Result<Notification, StackError> {
        let notification = Notification {
            notification_id: id::notification_id(user_id),
            user_id: user_id.to_string(),
            kind,
            request_id: request_id.to_string(),
            title: title.to_string(),
            message,
            actionable,
            read: false,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(self.ttl_ms),
        };
        self.registry.put_notification(&notification)?;
        debug!(user_id, request_id, ?kind, "Notification sent");
        Ok(notification)
    }

    /// Unexpired notifications, newest first
    pub(crate) fn list(&self, user_id: &str, now_ms: u64) -> Result<Vec<Notification>, StackError> {
        let mut notifications: Vec<Notification> = self
            .registry
            .list_notifications(user_id)?
            .into_iter()
            .filter(|n| !n.is_expired(now_ms))
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub(crate) fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<bool, StackError> {
        let Some(mut notification) = self
            .registry
            .list_notifications(user_id)?
            .into_iter()
            .find(|n| n.notification_id == notification_id)
        else {
            return Ok(false);
        };
        notification.read = true;
        self.registry.put_notification(&notification)?;
        Ok(true)
    }

    /// Remove only expired entries; returns how many went
    pub(crate) fn cleanup_expired(&self, user_id: &str, now_ms: u64) -> Result<usize, StackError> {
        let mut removed = 0;
        for notification in self.registry.list_notifications(user_id)? {
            if notification.is_expired(now_ms)
                && self
                    .registry
                    .delete_notification(user_id, &notification.notification_id)?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

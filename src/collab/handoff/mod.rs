//! Handoff Workflow
//!
//! A user asks for frames of their active stack to be moved into another stack.
//! The request waits for review; approval moves the frames, a change request
//! sends it back to the requester, and rejection or expiry fails it.
//!
//! ```text
//! pending_review --approve--> approved --> in_transfer --> completed
//!        |                                      \--------> failed
//!        +--needs_changes--> pending_review (suggestions attached)
//!        +--reject / cancel / expire--> failed
//! ```

pub mod metrics;
pub mod notifications;
pub mod types;

pub use metrics::{compute_metrics, HandoffMetrics};
pub use notifications::{Notification, NotificationKind, ScheduledReminder};
pub use types::{
    ApprovalDecision, BulkAction, BulkFailure, BulkHandoffOperation, BulkHandoffResult,
    BusinessContext, FrameSummary, HandoffApproval, HandoffMetadata, HandoffPriority,
    HandoffProgress, HandoffRequest, HandoffStatus, InitiateHandoffOptions, SuggestedChange,
};

use crate::collab::dual::SharedDualStack;
use crate::collab::permissions::Action;
use crate::config::HandoffConfig;
use crate::error::StackError;
use crate::frame::{id, now_millis};
use crate::store::StackRegistry;
use notifications::NotificationCenter;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct HandoffManager {
    dual: SharedDualStack,
    registry: Arc<dyn StackRegistry>,
    config: HandoffConfig,
    notifications: NotificationCenter,
    reminders: Vec<ScheduledReminder>,
}

impl HandoffManager {
    pub fn new(dual: SharedDualStack, config: HandoffConfig) -> Self {
        let registry = dual.read().registry().clone();
        let notifications = NotificationCenter::new(registry.clone(), config.notification_ttl_ms);
        Self {
            dual,
            registry,
            config,
            notifications,
            reminders: Vec::new(),
        }
    }

    /// Open a request to move frames from the active stack into
    /// `options.target_stack_id`. Returns the request id.
    pub fn initiate_handoff(
        &mut self,
        options: InitiateHandoffOptions,
    ) -> Result<String, StackError> {
        if options.frame_ids.is_empty() {
            return Err(StackError::Validation(
                "a handoff needs at least one frame".to_string(),
            ));
        }

        let (source_stack_id, requester_id, summary) = {
            let mut dual = self.dual.write();
            let source_stack_id = dual.active_stack_id().to_string();
            let requester_id = dual.user_id().to_string();
            if source_stack_id == options.target_stack_id {
                return Err(StackError::Validation(
                    "source and target stacks must differ".to_string(),
                ));
            }
            dual.permissions()
                .check(&requester_id, Action::Handoff, &source_stack_id)?;
            dual.get_stack_context(&options.target_stack_id)?;

            let store = dual.stack_store(&source_stack_id)?;
            let mut summary = FrameSummary::default();
            for frame_id in &options.frame_ids {
                let frame = store
                    .get_frame(frame_id)?
                    .ok_or_else(|| StackError::FrameNotFound(frame_id.clone()))?;
                summary.total_frames += 1;
                if frame.is_active() {
                    summary.active_frames += 1;
                }
                if !summary.frame_types.contains(&frame.frame_type) {
                    summary.frame_types.push(frame.frame_type);
                }
                summary.total_events += store.list_events(frame_id)?.len();
            }
            (source_stack_id, requester_id, summary)
        };

        let now = now_millis();
        let request = HandoffRequest {
            request_id: id::handoff_request_id(&source_stack_id, &options.target_stack_id),
            source_stack_id,
            target_stack_id: options.target_stack_id,
            frame_ids: options.frame_ids,
            requester_id,
            target_user_id: options.target_user_id,
            message: options.message,
            metadata: options.metadata,
            frame_summary: summary,
            status: HandoffStatus::PendingReview,
            created_at: now,
            expires_at: now.saturating_add(self.config.request_ttl_ms),
            updated_at: now,
            completed_at: None,
            reviewer_id: None,
            feedback: None,
            transferred_frames: 0,
            current_step: "Awaiting review".to_string(),
            errors: Vec::new(),
            suggestions: Vec::new(),
        };
        self.registry.put_handoff(&request)?;

        self.announce(&request, now);
        if let Some(target_user) = &request.target_user_id {
            if request.metadata.priority.wants_reminder() {
                self.reminders.push(ScheduledReminder {
                    request_id: request.request_id.clone(),
                    recipient: target_user.clone(),
                    due_at: now.saturating_add(self.config.reminder_delay_ms),
                });
            }
        }

        info!(
            request_id = %request.request_id,
            source = %request.source_stack_id,
            target = %request.target_stack_id,
            frames = request.frame_ids.len(),
            priority = ?request.metadata.priority,
            "Handoff requested"
        );
        Ok(request.request_id)
    }

    /// Apply a reviewer's decision.
    ///
    /// Approving an already completed request is a no-op that reports its
    /// final progress.
    pub fn submit_handoff_approval(
        &mut self,
        approval: HandoffApproval,
    ) -> Result<HandoffProgress, StackError> {
        let mut request = self.load_request(&approval.request_id)?;

        if request.status == HandoffStatus::Completed
            && approval.decision == ApprovalDecision::Approved
        {
            return Ok(request.progress());
        }
        if request.status.is_terminal() || request.status == HandoffStatus::InTransfer {
            return Err(StackError::HandoffInvalidState {
                request_id: request.request_id,
                reason: format!("request is {}", request.status.as_str()),
            });
        }

        request.reviewer_id = Some(approval.reviewer_id.clone());
        if approval.feedback.is_some() {
            request.feedback = approval.feedback.clone();
        }

        match approval.decision {
            ApprovalDecision::Approved => self.transfer(&mut request, &approval.reviewer_id)?,
            ApprovalDecision::NeedsChanges => {
                request.status = HandoffStatus::PendingReview;
                request.current_step = "Changes requested".to_string();
                request.suggestions = approval.suggested_changes;
                request.updated_at = now_millis();
                self.registry.put_handoff(&request)?;
            }
            ApprovalDecision::Rejected => {
                let reason = approval
                    .feedback
                    .unwrap_or_else(|| "Rejected by reviewer".to_string());
                self.fail(&mut request, "Rejected", reason)?;
            }
        }

        self.report_to_requester(&request);
        info!(
            request_id = %request.request_id,
            reviewer = %approval.reviewer_id,
            decision = ?approval.decision,
            status = request.status.as_str(),
            "Handoff reviewed"
        );
        Ok(request.progress())
    }

    /// Withdraw a request that has not started transferring
    pub fn cancel_handoff(
        &mut self,
        request_id: &str,
        reason: Option<&str>,
    ) -> Result<HandoffProgress, StackError> {
        let mut request = self.load_request(request_id)?;
        if request.status.is_terminal() || request.status == HandoffStatus::InTransfer {
            return Err(StackError::HandoffInvalidState {
                request_id: request.request_id,
                reason: format!("cannot cancel a request that is {}", request.status.as_str()),
            });
        }
        let reason = reason.unwrap_or("Cancelled by requester").to_string();
        self.fail(&mut request, "Cancelled", reason)?;
        self.reminders.retain(|r| r.request_id != request.request_id);

        if let Some(target_user) = request.target_user_id.clone() {
            self.send(
                &target_user,
                NotificationKind::HandoffUpdate,
                &request,
                "Handoff cancelled",
                format!("{} withdrew handoff {}", request.requester_id, request.request_id),
                false,
                now_millis(),
            );
        }
        info!(request_id, "Handoff cancelled");
        Ok(request.progress())
    }

    /// Approve or reject several requests; each one succeeds or fails on its own
    pub fn bulk_handoff_operation(&mut self, operation: BulkHandoffOperation) -> BulkHandoffResult {
        let decision = match operation.action {
            BulkAction::Approve => ApprovalDecision::Approved,
            BulkAction::Reject => ApprovalDecision::Rejected,
        };
        let mut result = BulkHandoffResult::default();

        for request_id in &operation.request_ids {
            let mut approval = HandoffApproval::new(request_id, &operation.reviewer_id, decision);
            approval.feedback = operation.feedback.clone();
            match self.submit_handoff_approval(approval) {
                Ok(progress) if progress.status != HandoffStatus::Failed
                    || decision == ApprovalDecision::Rejected =>
                {
                    result.successful.push(request_id.clone());
                }
                Ok(progress) => result.failed.push(BulkFailure {
                    request_id: request_id.clone(),
                    reason: progress.errors.join("; "),
                }),
                Err(err) => result.failed.push(BulkFailure {
                    request_id: request_id.clone(),
                    reason: err.to_string(),
                }),
            }
        }

        info!(
            action = ?operation.action,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "Bulk handoff operation finished"
        );
        result
    }

    pub fn get_handoff_progress(&self, request_id: &str) -> Result<HandoffProgress, StackError> {
        Ok(self.load_request(request_id)?.progress())
    }

    /// Requests that are neither completed nor failed
    pub fn get_active_handoffs(&self) -> Result<Vec<HandoffProgress>, StackError> {
        let mut active = Vec::new();
        for request in self.registry.list_handoffs()? {
            let request = self.expire_if_due(request, now_millis());
            if !request.status.is_terminal() {
                active.push(request.progress());
            }
        }
        Ok(active)
    }

    pub fn get_handoff_metrics(&self) -> Result<HandoffMetrics, StackError> {
        let now = now_millis();
        let requests: Vec<HandoffRequest> = self
            .registry
            .list_handoffs()?
            .into_iter()
            .map(|r| self.expire_if_due(r, now))
            .collect();
        Ok(compute_metrics(&requests, self.config.bulk_transfer_threshold))
    }

    pub fn get_user_notifications(&self, user_id: &str) -> Result<Vec<Notification>, StackError> {
        self.notifications.list(user_id, now_millis())
    }

    pub fn mark_notification_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<bool, StackError> {
        self.notifications.mark_read(user_id, notification_id)
    }

    pub fn cleanup_expired_notifications(&self, user_id: &str) -> Result<usize, StackError> {
        self.cleanup_expired_notifications_at(user_id, now_millis())
    }

    pub fn cleanup_expired_notifications_at(
        &self,
        user_id: &str,
        now_ms: u64,
    ) -> Result<usize, StackError> {
        let removed = self.notifications.cleanup_expired(user_id, now_ms)?;
        if removed > 0 {
            debug!(user_id, removed, "Expired notifications removed");
        }
        Ok(removed)
    }

    pub fn pending_reminders(&self) -> &[ScheduledReminder] {
        &self.reminders
    }

    /// Send the reminders due at `now_ms` for requests still awaiting review.
    /// Returns how many were sent.
    pub fn process_due_reminders(&mut self, now_ms: u64) -> Result<usize, StackError> {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.reminders)
            .into_iter()
            .partition(|r| r.due_at <= now_ms);
        self.reminders = later;

        let mut sent = 0;
        for reminder in due {
            let Some(request) = self.registry.get_handoff(&reminder.request_id)? else {
                continue;
            };
            let request = self.expire_if_due(request, now_ms);
            if !request.status.awaits_review() {
                continue;
            }
            self.notifications.notify(
                &reminder.recipient,
                NotificationKind::HandoffReminder,
                &request.request_id,
                "Handoff awaiting review",
                format!(
                    "{} is still waiting on review of {} frame(s)",
                    request.requester_id,
                    request.frame_ids.len()
                ),
                true,
                now_ms,
            )?;
            sent += 1;
        }
        Ok(sent)
    }

    fn transfer(
        &mut self,
        request: &mut HandoffRequest,
        reviewer_id: &str,
    ) -> Result<(), StackError> {
        request.status = HandoffStatus::Approved;
        request.current_step = "Approved".to_string();
        request.updated_at = now_millis();
        self.registry.put_handoff(request)?;

        request.status = HandoffStatus::InTransfer;
        request.current_step = "Transferring frames".to_string();
        request.updated_at = now_millis();
        self.registry.put_handoff(request)?;
        self.reminders.retain(|r| r.request_id != request.request_id);

        let outcome = self.dual.write().relocate_frames(
            &request.requester_id,
            reviewer_id,
            &request.source_stack_id,
            &request.target_stack_id,
            &request.frame_ids,
        );
        let now = now_millis();
        match outcome {
            Ok(result) if result.success => {
                request.status = HandoffStatus::Completed;
                request.current_step = "Transfer complete".to_string();
                request.transferred_frames = result.merged_frames.len();
                request.completed_at = Some(now);
            }
            Ok(result) => {
                request.status = HandoffStatus::Failed;
                request.current_step = "Transfer failed".to_string();
                request.transferred_frames = result.merged_frames.len();
                request.errors.extend(
                    result
                        .errors
                        .into_iter()
                        .map(|e| format!("{}: {}", e.frame_id, e.reason)),
                );
                request.completed_at = Some(now);
            }
            Err(err) => {
                warn!(request_id = %request.request_id, error = %err, "Handoff transfer failed");
                request.status = HandoffStatus::Failed;
                request.current_step = "Transfer failed".to_string();
                request.errors.push(err.to_string());
                request.completed_at = Some(now);
            }
        }
        request.updated_at = now;
        self.registry.put_handoff(request)?;
        Ok(())
    }

    fn fail(
        &self,
        request: &mut HandoffRequest,
        step: &str,
        reason: String,
    ) -> Result<(), StackError> {
        let now = now_millis();
        request.status = HandoffStatus::Failed;
        request.current_step = step.to_string();
        request.errors.push(reason);
        request.completed_at = Some(now);
        request.updated_at = now;
        self.registry.put_handoff(request)?;
        Ok(())
    }

    fn load_request(&self, request_id: &str) -> Result<HandoffRequest, StackError> {
        let request = self
            .registry
            .get_handoff(request_id)?
            .ok_or_else(|| StackError::HandoffNotFound(request_id.to_string()))?;
        Ok(self.expire_if_due(request, now_millis()))
    }

    /// Fail a request whose review window has passed
    fn expire_if_due(&self, mut request: HandoffRequest, now_ms: u64) -> HandoffRequest {
        if !request.status.awaits_review() || now_ms <= request.expires_at {
            return request;
        }
        request.status = HandoffStatus::Failed;
        request.current_step = "Expired".to_string();
        request.errors.push("Request expired before review".to_string());
        request.completed_at = Some(now_ms);
        request.updated_at = now_ms;
        if let Err(err) = self.registry.put_handoff(&request) {
            warn!(request_id = %request.request_id, error = %err, "Failed to persist expiry");
        }
        debug!(request_id = %request.request_id, "Handoff expired");
        request
    }

    /// Notify the target user and any stakeholders of a new request
    fn announce(&self, request: &HandoffRequest, now_ms: u64) {
        let frames = request.frame_ids.len();
        if let Some(target_user) = &request.target_user_id {
            let message = match &request.message {
                Some(note) => format!(
                    "{} wants to hand off {frames} frame(s): {note}",
                    request.requester_id
                ),
                None => format!("{} wants to hand off {frames} frame(s)", request.requester_id),
            };
            self.send(
                target_user,
                NotificationKind::HandoffRequest,
                request,
                "Handoff review requested",
                message,
                true,
                now_ms,
            );
        }

        let Some(context) = &request.metadata.business_context else {
            return;
        };
        let stakeholders: BTreeSet<&String> = context
            .stakeholders
            .iter()
            .filter(|s| {
                **s != request.requester_id && Some(*s) != request.target_user_id.as_ref()
            })
            .collect();
        for stakeholder in stakeholders {
            let message = match &context.milestone {
                Some(milestone) => format!(
                    "{} started a handoff of {frames} frame(s) for {milestone}",
                    request.requester_id
                ),
                None => format!("{} started a handoff of {frames} frame(s)", request.requester_id),
            };
            self.send(
                stakeholder,
                NotificationKind::StakeholderUpdate,
                request,
                "Handoff started",
                message,
                false,
                now_ms,
            );
        }
    }

    fn report_to_requester(&self, request: &HandoffRequest) {
        let message = match request.status {
            HandoffStatus::Completed => format!(
                "{} frame(s) moved to {}",
                request.transferred_frames, request.target_stack_id
            ),
            HandoffStatus::PendingReview => format!(
                "Reviewer asked for {} change(s)",
                request.suggestions.len()
            ),
            _ => request
                .errors
                .last()
                .cloned()
                .unwrap_or_else(|| request.current_step.clone()),
        };
        self.send(
            &request.requester_id,
            NotificationKind::HandoffUpdate,
            request,
            &format!("Handoff {}", request.status.as_str()),
            message,
            request.status == HandoffStatus::PendingReview,
            now_millis(),
        );
    }

    /// Notifications are best effort; a failed write never fails the workflow
    #[allow(clippy::too_many_arguments)]
    fn send(
        &self,
        user_id: &str,
        kind: NotificationKind,
        request: &HandoffRequest,
        title: &str,
        message: String,
        actionable: bool,
        now_ms: u64,
    ) {
        if let Err(err) = self.notifications.notify(
            user_id,
            kind,
            &request.request_id,
            title,
            message,
            actionable,
            now_ms,
        ) {
            warn!(user_id, request_id = %request.request_id, error = %err, "Notification failed");
        }
    }
}

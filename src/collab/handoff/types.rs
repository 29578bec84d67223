//! Handoff request records and the values exchanged with reviewers.

use crate::frame::FrameType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    PendingReview,
    Approved,
    InTransfer,
    NeedsChanges,
    Completed,
    Failed,
}

impl HandoffStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffStatus::PendingReview => "pending_review",
            HandoffStatus::Approved => "approved",
            HandoffStatus::InTransfer => "in_transfer",
            HandoffStatus::NeedsChanges => "needs_changes",
            HandoffStatus::Completed => "completed",
            HandoffStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandoffStatus::Completed | HandoffStatus::Failed)
    }

    /// Still waiting on a reviewer
    pub fn awaits_review(self) -> bool {
        matches!(self, HandoffStatus::PendingReview | HandoffStatus::NeedsChanges)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl HandoffPriority {
    /// Unactioned requests at this priority get a reminder
    pub fn wants_reminder(self) -> bool {
        self >= HandoffPriority::High
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContext {
    pub milestone: Option<String>,
    /// Users kept informed about the request
    #[serde(default)]
    pub stakeholders: Vec<String>,
    pub deadline: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffMetadata {
    #[serde(default)]
    pub priority: HandoffPriority,
    pub business_context: Option<BusinessContext>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Snapshot of the frames named by a request, taken when it is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub total_frames: usize,
    pub frame_types: Vec<FrameType>,
    pub active_frames: usize,
    pub total_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedChange {
    pub frame_id: String,
    pub suggestion: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub request_id: String,
    pub source_stack_id: String,
    pub target_stack_id: String,
    pub frame_ids: Vec<String>,
    pub requester_id: String,
    pub target_user_id: Option<String>,
    pub message: Option<String>,
    pub metadata: HandoffMetadata,
    pub frame_summary: FrameSummary,
    pub status: HandoffStatus,
    pub created_at: u64,
    pub expires_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
    pub reviewer_id: Option<String>,
    /// Latest reviewer feedback
    pub feedback: Option<String>,
    pub transferred_frames: usize,
    pub current_step: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<SuggestedChange>,
}

impl HandoffRequest {
    pub fn progress(&self) -> HandoffProgress {
        HandoffProgress {
            request_id: self.request_id.clone(),
            status: self.status,
            transferred_frames: self.transferred_frames,
            total_frames: self.frame_ids.len(),
            current_step: self.current_step.clone(),
            estimated_completion: if self.status.is_terminal() {
                self.completed_at
            } else {
                Some(self.expires_at)
            },
            errors: self.errors.clone(),
            suggestions: self.suggestions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateHandoffOptions {
    pub target_stack_id: String,
    pub frame_ids: Vec<String>,
    pub metadata: HandoffMetadata,
    /// Receives the actionable review notification
    pub target_user_id: Option<String>,
    pub message: Option<String>,
}

impl InitiateHandoffOptions {
    pub fn new(target_stack_id: impl Into<String>, frame_ids: Vec<String>) -> Self {
        Self {
            target_stack_id: target_stack_id.into(),
            frame_ids,
            metadata: HandoffMetadata::default(),
            target_user_id: None,
            message: None,
        }
    }

    pub fn with_target_user(mut self, user_id: impl Into<String>) -> Self {
        self.target_user_id = Some(user_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HandoffMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffProgress {
    pub request_id: String,
    pub status: HandoffStatus,
    pub transferred_frames: usize,
    pub total_frames: usize,
    pub current_step: String,
    pub estimated_completion: Option<u64>,
    pub errors: Vec<String>,
    pub suggestions: Vec<SuggestedChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    NeedsChanges,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffApproval {
    pub request_id: String,
    pub reviewer_id: String,
    pub decision: ApprovalDecision,
    pub feedback: Option<String>,
    #[serde(default)]
    pub suggested_changes: Vec<SuggestedChange>,
}

impl HandoffApproval {
    pub fn new(
        request_id: impl Into<String>,
        reviewer_id: impl Into<String>,
        decision: ApprovalDecision,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            reviewer_id: reviewer_id.into(),
            decision,
            feedback: None,
            suggested_changes: Vec::new(),
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_suggestion(mut self, change: SuggestedChange) -> Self {
        self.suggested_changes.push(change);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkHandoffOperation {
    pub action: BulkAction,
    pub request_ids: Vec<String>,
    pub reviewer_id: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub request_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkHandoffResult {
    pub successful: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

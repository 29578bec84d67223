//! Integration tests for the handoff workflow

use super::test_utils::shared_dual;
use framestack::collab::handoff::{
    ApprovalDecision, BulkAction, BulkHandoffOperation, BusinessContext, HandoffApproval,
    HandoffMetadata, HandoffPriority, HandoffStatus, InitiateHandoffOptions, NotificationKind,
};
use framestack::collab::{HandoffManager, SharedDualStack, StackPermissions};
use framestack::config::HandoffConfig;
use framestack::frame::{CreateFrameOptions, FrameType};
use framestack::ErrorCode;

struct Setup {
    dual: SharedDualStack,
    handoffs: HandoffManager,
    shared: String,
}

fn setup() -> Setup {
    let dual = shared_dual("alice");
    let shared = {
        let mut guard = dual.write();
        let shared = guard
            .create_shared_stack("core", "Core", "alice", None)
            .unwrap();
        guard
            .grant_permission(&shared, "bob", StackPermissions::contributor())
            .unwrap();
        shared
    };
    let handoffs = HandoffManager::new(dual.clone(), HandoffConfig::default());
    Setup {
        dual,
        handoffs,
        shared,
    }
}

fn create_frames(dual: &SharedDualStack, names: &[&str]) -> Vec<String> {
    let mut guard = dual.write();
    let manager = guard.get_active_frame_manager().unwrap();
    names
        .iter()
        .map(|name| {
            manager
                .create_frame(CreateFrameOptions::new(FrameType::Task, *name))
                .unwrap()
        })
        .collect()
}

#[test]
fn test_handoff_to_unknown_stack_fails() {
    let mut s = setup();
    let frames = create_frames(&s.dual, &["A"]);
    let err = s
        .handoffs
        .initiate_handoff(InitiateHandoffOptions::new("shared-ghost-1", frames))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StackNotFound);
}

#[test]
fn test_approved_handoff_moves_frames_once() {
    let mut s = setup();
    let frames = create_frames(&s.dual, &["A", "B"]);
    let request_id = s
        .handoffs
        .initiate_handoff(
            InitiateHandoffOptions::new(s.shared.clone(), frames.clone()).with_target_user("bob"),
        )
        .unwrap();

    let approve = || HandoffApproval::new(&request_id, "bob", ApprovalDecision::Approved);
    let first = s.handoffs.submit_handoff_approval(approve()).unwrap();
    assert_eq!(first.status, HandoffStatus::Completed);
    assert_eq!(first.transferred_frames, 2);
    assert!(first.errors.is_empty());

    // Safe double-accept
    let second = s.handoffs.submit_handoff_approval(approve()).unwrap();
    assert_eq!(second, first);

    let mut dual = s.dual.write();
    assert_eq!(dual.frame_manager("individual-alice").unwrap().get_stack_depth(), 0);
    let target = dual.frame_manager(&s.shared).unwrap();
    for id in &frames {
        assert!(target.get_frame(id).unwrap().is_some());
    }
    drop(dual);

    assert!(s.handoffs.get_active_handoffs().unwrap().is_empty());
    let metrics = s.handoffs.get_handoff_metrics().unwrap();
    assert_eq!(metrics.completed_requests, 1);
    assert_eq!(metrics.frames_transferred, 2);
    assert_eq!(metrics.patterns.get("complete_transfer"), Some(&1));
}

#[test]
fn test_reviewer_without_write_access_fails_transfer() {
    let mut s = setup();
    let frames = create_frames(&s.dual, &["A"]);
    let request_id = s
        .handoffs
        .initiate_handoff(InitiateHandoffOptions::new(s.shared.clone(), frames.clone()))
        .unwrap();

    let progress = s
        .handoffs
        .submit_handoff_approval(HandoffApproval::new(
            &request_id,
            "carol",
            ApprovalDecision::Approved,
        ))
        .unwrap();
    assert_eq!(progress.status, HandoffStatus::Failed);
    assert!(!progress.errors.is_empty());

    // Nothing left the source
    let mut dual = s.dual.write();
    let source = dual.frame_manager("individual-alice").unwrap();
    assert!(source.get_frame(&frames[0]).unwrap().is_some());
}

#[test]
fn test_stakeholders_are_informed() {
    let mut s = setup();
    let frames = create_frames(&s.dual, &["A"]);
    let metadata = HandoffMetadata {
        priority: HandoffPriority::High,
        business_context: Some(BusinessContext {
            milestone: Some("v1.0".to_string()),
            stakeholders: vec!["dana".to_string(), "bob".to_string(), "alice".to_string()],
            deadline: None,
        }),
        tags: vec![],
    };
    let request_id = s
        .handoffs
        .initiate_handoff(
            InitiateHandoffOptions::new(s.shared.clone(), frames)
                .with_target_user("bob")
                .with_metadata(metadata),
        )
        .unwrap();

    let dana = s.handoffs.get_user_notifications("dana").unwrap();
    assert_eq!(dana.len(), 1);
    assert_eq!(dana[0].kind, NotificationKind::StakeholderUpdate);
    assert!(!dana[0].actionable);
    assert!(dana[0].message.contains("v1.0"));

    // The target user gets the actionable request only
    let bob = s.handoffs.get_user_notifications("bob").unwrap();
    assert_eq!(bob.len(), 1);
    assert!(s.handoffs.get_user_notifications("alice").unwrap().is_empty());

    assert!(s
        .handoffs
        .mark_notification_read("bob", &bob[0].notification_id)
        .unwrap());
    assert!(s.handoffs.get_user_notifications("bob").unwrap()[0].read);

    // High priority schedules a reminder for bob
    let reminders = s.handoffs.pending_reminders().to_vec();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].request_id, request_id);
    assert_eq!(
        s.handoffs.process_due_reminders(reminders[0].due_at).unwrap(),
        1
    );
    let kinds: Vec<NotificationKind> = s
        .handoffs
        .get_user_notifications("bob")
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert!(kinds.contains(&NotificationKind::HandoffReminder));
}

#[test]
fn test_cancelled_handoff_gets_no_reminder() {
    let mut s = setup();
    let frames = create_frames(&s.dual, &["A"]);
    let metadata = HandoffMetadata {
        priority: HandoffPriority::Critical,
        ..HandoffMetadata::default()
    };
    let request_id = s
        .handoffs
        .initiate_handoff(
            InitiateHandoffOptions::new(s.shared.clone(), frames)
                .with_target_user("bob")
                .with_metadata(metadata),
        )
        .unwrap();

    let progress = s
        .handoffs
        .cancel_handoff(&request_id, Some("wrong stack"))
        .unwrap();
    assert_eq!(progress.status, HandoffStatus::Failed);
    assert_eq!(progress.errors, vec!["wrong stack".to_string()]);
    assert!(s.handoffs.pending_reminders().is_empty());
    assert_eq!(s.handoffs.process_due_reminders(u64::MAX).unwrap(), 0);
}

#[test]
fn test_bulk_approval_reports_each_request() {
    let mut s = setup();
    let first = create_frames(&s.dual, &["A"]);
    let second = create_frames(&s.dual, &["B"]);
    let mut ids = Vec::new();
    for frames in [first, second] {
        ids.push(
            s.handoffs
                .initiate_handoff(InitiateHandoffOptions::new(s.shared.clone(), frames))
                .unwrap(),
        );
    }
    ids.push("handoff-unknown".to_string());

    let result = s.handoffs.bulk_handoff_operation(BulkHandoffOperation {
        action: BulkAction::Approve,
        request_ids: ids.clone(),
        reviewer_id: "bob".to_string(),
        feedback: None,
    });
    assert_eq!(result.successful, ids[..2].to_vec());
    assert_eq!(result.failed.len(), 1);
    assert!(result.failed[0].reason.contains("handoff-unknown"));
}

//! Integration tests for merge sessions between two stacks

use super::test_utils::shared_dual;
use framestack::collab::merge::{
    ConditionExpr, ConflictSeverity, ConflictType, MergePolicy, MergeStatus, PolicyAction,
    ResolutionStrategy, ResolveConflictOptions,
};
use framestack::collab::{
    ConflictResolution, SharedDualStack, StackMergeResolver, SyncOptions,
};
use framestack::frame::{CreateFrameOptions, EventOptions, FrameType};
use framestack::ErrorCode;
use serde_json::json;

/// Frames A and B exist in alice's stack and, copied, in a shared stack
fn setup() -> (SharedDualStack, StackMergeResolver, String, Vec<String>) {
    let dual = shared_dual("alice");
    let (shared, frames) = {
        let mut guard = dual.write();
        let shared = guard
            .create_shared_stack("core", "Core", "alice", None)
            .unwrap();
        let manager = guard.get_active_frame_manager().unwrap();
        let a = manager
            .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
            .unwrap();
        manager
            .add_event(EventOptions::new("note", json!({ "text": "from alice" })))
            .unwrap();
        let b = manager
            .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
            .unwrap();
        guard
            .sync_stacks(
                "individual-alice",
                &shared,
                SyncOptions::new(ConflictResolution::Merge),
            )
            .unwrap();
        (shared, vec![a, b])
    };
    let resolver = StackMergeResolver::new(dual.clone());
    (dual, resolver, shared, frames)
}

fn rename(dual: &SharedDualStack, stack_id: &str, frame_id: &str, name: &str) {
    let mut guard = dual.write();
    let manager = guard.frame_manager(stack_id).unwrap();
    let mut frame = manager.get_frame(frame_id).unwrap().unwrap();
    frame.name = name.to_string();
    manager.store().put_frame(&frame).unwrap();
}

#[test]
fn test_name_and_state_conflicts() {
    let (dual, mut resolver, shared, frames) = setup();
    rename(&dual, &shared, &frames[0], "A (renamed)");
    dual.write()
        .get_active_frame_manager()
        .unwrap()
        .close_frame(Some(&frames[1]))
        .unwrap();

    let session = resolver
        .start_merge_session("individual-alice", &shared, &frames, None)
        .unwrap();
    assert_eq!(session.metadata.total_frames, 2);
    assert_eq!(session.metadata.conflict_frames, 2);

    let content = session
        .conflicts
        .iter()
        .find(|c| c.frame_id == frames[0])
        .unwrap();
    assert_eq!(content.conflict_type, ConflictType::Content);
    assert_eq!(content.conflict_details.len(), 1);
    assert_eq!(content.conflict_details[0].field, "name");
    assert!(content.resolution.is_none());

    let metadata = session
        .conflicts
        .iter()
        .find(|c| c.frame_id == frames[1])
        .unwrap();
    assert_eq!(metadata.conflict_type, ConflictType::Metadata);
    assert!(metadata.auto_resolvable);
    assert!(metadata.resolution.is_some());

    assert_eq!(session.metadata.auto_resolved_conflicts, 1);
    assert_eq!(session.status, MergeStatus::ManualReview);
}

#[test]
fn test_merge_both_appends_source_events() {
    let (dual, mut resolver, shared, frames) = setup();
    rename(&dual, &shared, &frames[0], "A (team)");

    let session = resolver
        .start_merge_session("individual-alice", &shared, &frames[..1], None)
        .unwrap();
    resolver
        .resolve_conflict(
            &session.session_id,
            &frames[0],
            ResolveConflictOptions::new(ResolutionStrategy::MergeBoth, "alice")
                .with_notes("keep both histories"),
        )
        .unwrap();

    let execution = resolver.execute_merge(&session.session_id).unwrap();
    assert!(execution.success);
    assert_eq!(execution.results.len(), 1);

    let mut guard = dual.write();
    let target = guard.frame_manager(&shared).unwrap();
    let frame = target.get_frame(&frames[0]).unwrap().unwrap();
    assert_eq!(frame.name, "A (team)");
    let events = target.get_frame_events(&frames[0], None).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].payload["_merged"]["from_stack"], "individual-alice");
}

#[test]
fn test_target_wins_leaves_target_untouched() {
    let (dual, mut resolver, shared, frames) = setup();
    rename(&dual, &shared, &frames[0], "A (team)");

    let session = resolver
        .start_merge_session("individual-alice", &shared, &frames, None)
        .unwrap();
    assert_eq!(session.status, MergeStatus::ManualReview);
    let session = resolver
        .resolve_conflict(
            &session.session_id,
            &frames[0],
            ResolveConflictOptions::new(ResolutionStrategy::TargetWins, "alice"),
        )
        .unwrap();
    assert_eq!(session.status, MergeStatus::Completed);

    let execution = resolver.execute_merge(&session.session_id).unwrap();
    assert!(execution.success);

    let mut guard = dual.write();
    let target = guard.frame_manager(&shared).unwrap();
    assert_eq!(target.get_frame(&frames[0]).unwrap().unwrap().name, "A (team)");
}

#[test]
fn test_missing_frames_are_skipped() {
    let (_dual, mut resolver, shared, frames) = setup();
    let requested = vec![frames[0].clone(), "not-in-source".to_string()];
    let session = resolver
        .start_merge_session("individual-alice", &shared, &requested, None)
        .unwrap();
    assert!(session.conflicts.is_empty());
    assert_eq!(session.skipped_frames, vec!["not-in-source".to_string()]);
    assert_eq!(session.status, MergeStatus::Completed);

    let execution = resolver.execute_merge(&session.session_id).unwrap();
    assert!(execution.success);
    assert_eq!(execution.results.len(), 1);
}

#[test]
fn test_custom_policy_auto_resolves_content() {
    let (dual, mut resolver, shared, frames) = setup();
    rename(&dual, &shared, &frames[0], "A (team)");

    resolver
        .create_merge_policy(
            MergePolicy::new("team-first", ConflictSeverity::Medium).with_rule(
                ConditionExpr::ConflictType(ConflictType::Content),
                PolicyAction::TargetWins,
                10,
            ),
        )
        .unwrap();
    let session = resolver
        .start_merge_session("individual-alice", &shared, &frames[..1], Some("team-first"))
        .unwrap();
    assert_eq!(session.status, MergeStatus::Completed);
    assert_eq!(session.metadata.auto_resolved_conflicts, 1);

    let fetched = resolver.get_merge_session(&session.session_id).unwrap();
    assert_eq!(fetched.policy, "team-first");

    let err = resolver
        .start_merge_session("individual-alice", &shared, &frames[..1], Some("nope"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MergePolicyNotFound);
}

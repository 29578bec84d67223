//! Integration tests for individual and shared stacks across users

use super::test_utils::{dual_for, memory_registry};
use framestack::collab::{
    ConflictResolution, DualStackManager, DualStackOptions, GrantPermissionChecker, StackKind,
    StackPermissions, SyncOptions,
};
use framestack::config::RecoveryConfig;
use framestack::frame::{CreateFrameOptions, FrameState, FrameType, LifecycleHooks};
use framestack::ErrorCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_shared_stack_requires_all_fields() {
    let mut alice = dual_for("alice", memory_registry());
    let cases = [
        ("", "Core", "alice"),
        ("core", "", "alice"),
        ("core", "Core", " "),
    ];
    for (team, name, owner) in cases {
        let err = alice
            .create_shared_stack(team, name, owner, None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }
    assert_eq!(alice.get_available_stacks().unwrap().len(), 1);
}

#[test]
fn test_team_members_see_shared_stack_read_only() {
    let registry = memory_registry();
    let mut alice = dual_for("alice", registry.clone());
    let shared = alice
        .create_shared_stack("core", "Core", "alice", None)
        .unwrap();

    let mut bob = dual_for("bob", registry);
    let visible: Vec<String> = bob
        .get_available_stacks()
        .unwrap()
        .into_iter()
        .map(|c| c.stack_id)
        .collect();
    assert_eq!(visible, vec!["individual-bob".to_string(), shared.clone()]);

    bob.switch_to_stack(&shared).unwrap();
    assert_eq!(bob.get_current_context().unwrap().kind, StackKind::Shared);
    bob.switch_to_stack("individual-bob").unwrap();

    let err = bob
        .sync_stacks("individual-bob", &shared, SyncOptions::new(ConflictResolution::Merge))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    alice
        .grant_permission(&shared, "bob", StackPermissions::contributor())
        .unwrap();
    let result = bob
        .sync_stacks("individual-bob", &shared, SyncOptions::new(ConflictResolution::Merge))
        .unwrap();
    assert!(result.success);
}

#[test]
fn test_individual_stacks_are_private() {
    let registry = memory_registry();
    let _alice = dual_for("alice", registry.clone());
    let mut bob = dual_for("bob", registry);

    let err = bob.switch_to_stack("individual-alice").unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    assert_eq!(bob.active_stack_id(), "individual-bob");
}

#[test]
fn test_team_administration() {
    let registry = memory_registry();
    let mut alice = dual_for("alice", registry.clone());
    let shared = alice
        .create_shared_stack("core", "Core", "alice", None)
        .unwrap();

    let mut bob = dual_for("bob", registry);
    let err = bob
        .create_shared_stack("core", "Bob's", "bob", None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    let err = bob
        .grant_permission(&shared, "bob", StackPermissions::full())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    // A fresh team has no administrator yet
    bob.create_shared_stack("ops", "Ops", "bob", None).unwrap();
}

#[test]
fn test_sync_policies() {
    let mut alice = dual_for("alice", memory_registry());
    let shared = alice
        .create_shared_stack("core", "Core", "alice", None)
        .unwrap();
    let a = alice
        .get_active_frame_manager()
        .unwrap()
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();

    let preview = alice
        .sync_stacks(
            "individual-alice",
            &shared,
            SyncOptions::new(ConflictResolution::Merge).dry_run(),
        )
        .unwrap();
    assert_eq!(preview.merged_frames, vec![a.clone()]);
    assert!(alice.frame_manager(&shared).unwrap().get_frame(&a).unwrap().is_none());

    alice
        .sync_stacks("individual-alice", &shared, SyncOptions::new(ConflictResolution::Merge))
        .unwrap();
    let skipped = alice
        .sync_stacks("individual-alice", &shared, SyncOptions::new(ConflictResolution::Skip))
        .unwrap();
    assert_eq!(skipped.conflict_frames, vec![a.clone()]);
    assert!(skipped.merged_frames.is_empty());

    let overwritten = alice
        .sync_stacks(
            "individual-alice",
            &shared,
            SyncOptions::new(ConflictResolution::Overwrite),
        )
        .unwrap();
    assert_eq!(overwritten.merged_frames, vec![a]);
}

#[test]
fn test_moved_frames_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let registry = memory_registry();
    let open = || {
        DualStackManager::open(
            DualStackOptions::new("alice", "proj", "run-1").with_data_dir(dir.path()),
            registry.clone(),
            Arc::new(GrantPermissionChecker::new(registry.clone())),
            LifecycleHooks::new(),
        )
        .unwrap()
    };

    let (shared, a) = {
        let mut alice = open();
        let shared = alice
            .create_shared_stack("core", "Core", "alice", None)
            .unwrap();
        let a = alice
            .get_active_frame_manager()
            .unwrap()
            .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
            .unwrap();
        let result = alice
            .move_frames_between_stacks("individual-alice", &shared, &[a.clone()])
            .unwrap();
        assert!(result.success);
        (shared, a)
    };

    let mut alice = open();
    assert!(alice
        .frame_manager("individual-alice")
        .unwrap()
        .get_frame(&a)
        .unwrap()
        .is_none());
    let moved = alice.frame_manager(&shared).unwrap().get_frame(&a).unwrap();
    assert!(moved.is_some());
    assert!(dir.path().join("stacks").join(&shared).exists());
}

#[test]
fn test_opening_a_stack_recovers_orphans_from_other_runs() {
    let dir = TempDir::new().unwrap();
    let registry = memory_registry();
    let open = |run_id: &str, run_on_startup: bool| {
        let recovery = RecoveryConfig {
            stale_threshold_ms: 0,
            run_on_startup,
        };
        DualStackManager::open(
            DualStackOptions::new("alice", "proj", run_id)
                .with_data_dir(dir.path())
                .with_recovery(recovery),
            registry.clone(),
            Arc::new(GrantPermissionChecker::new(registry.clone())),
            LifecycleHooks::new(),
        )
        .unwrap()
    };

    let abandoned = {
        let mut crashed = open("run-1", true);
        crashed
            .get_active_frame_manager()
            .unwrap()
            .create_frame(CreateFrameOptions::new(FrameType::Task, "Abandoned"))
            .unwrap()
    };
    thread::sleep(Duration::from_millis(5));

    {
        let mut skipped = open("run-2", false);
        let frame = skipped
            .get_active_frame_manager()
            .unwrap()
            .get_frame(&abandoned)
            .unwrap()
            .unwrap();
        assert_eq!(frame.state, FrameState::Active);
    }

    let mut next = open("run-3", true);
    let frame = next
        .get_active_frame_manager()
        .unwrap()
        .get_frame(&abandoned)
        .unwrap()
        .unwrap();
    assert_eq!(frame.state, FrameState::Closed);
    assert_eq!(frame.outputs["recovery"]["abandoned_run_id"], "run-1");
}

//! Integration tests for startup recovery

use framestack::config::RecoveryConfig;
use framestack::frame::{
    now_millis, CreateFrameOptions, FrameManager, FrameManagerOptions, FrameState, FrameStore,
    FrameType, LifecycleHooks, RecoveryService,
};

const HOUR_MS: u64 = 3_600_000;

fn manager_for_run(store: &FrameStore, run_id: &str) -> FrameManager {
    FrameManager::open(
        store.clone(),
        FrameManagerOptions::new("proj", run_id),
        LifecycleHooks::new(),
    )
    .unwrap()
}

#[test]
fn test_stale_frames_of_crashed_run_are_closed() {
    let store = FrameStore::temporary().unwrap();
    let mut crashed = manager_for_run(&store, "run-crashed");
    let a = crashed
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    let b = crashed
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();
    drop(crashed);

    let mut current = manager_for_run(&store, "run-current");
    let mine = current
        .create_frame(CreateFrameOptions::new(FrameType::Task, "Mine"))
        .unwrap();

    let service = RecoveryService::new(store.clone(), "run-current", RecoveryConfig::default());
    let report = service.recover_at(now_millis() + 2 * HOUR_MS);

    assert!(report.recovered);
    assert!(report.integrity_check.passed);
    assert_eq!(report.orphaned_frames.detected, 2);
    assert_eq!(report.orphaned_frames.closed, 2);
    for id in [&a, &b] {
        let frame = store.get_frame(id).unwrap().unwrap();
        assert_eq!(frame.state, FrameState::Closed);
        assert_eq!(frame.outputs["recovery"]["abandoned_run_id"], "run-crashed");
    }
    assert_eq!(
        store.get_frame(&mine).unwrap().unwrap().state,
        FrameState::Active
    );

    // A second pass has nothing left to do
    let again = service.recover_at(now_millis() + 2 * HOUR_MS);
    assert_eq!(again.orphaned_frames.detected, 0);
}

#[test]
fn test_recent_frames_of_other_runs_are_left_alone() {
    let store = FrameStore::temporary().unwrap();
    let mut other = manager_for_run(&store, "run-other");
    let a = other
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();

    let service = RecoveryService::new(store.clone(), "run-current", RecoveryConfig::default());
    let report = service.recover_on_startup();
    assert_eq!(report.orphaned_frames.detected, 0);
    assert!(store.get_frame(&a).unwrap().unwrap().is_active());

    let stats = service.get_recovery_stats().unwrap();
    assert_eq!(stats.active_frames, 1);
    assert_eq!(stats.foreign_active_frames, 1);
}

#[test]
fn test_dangling_parent_fails_integrity() {
    let store = FrameStore::temporary().unwrap();
    let mut manager = manager_for_run(&store, "run-1");
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    let b = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();

    let mut child = store.get_frame(&b).unwrap().unwrap();
    child.parent_frame_id = Some("ghost".to_string());
    store.put_frame(&child).unwrap();

    let service = RecoveryService::new(store.clone(), "run-1", RecoveryConfig::default());
    let report = service.recover_on_startup();
    assert!(!report.integrity_check.passed);
    assert_eq!(report.integrity_check.violations.len(), 1);
    assert_eq!(report.integrity_check.violations[0].missing_frame_id, "ghost");

    let project = service.validate_project_integrity("proj").unwrap();
    assert!(!project.passed);
}

#[test]
fn test_checkpoint_resets_pending_writes() {
    let store = FrameStore::temporary().unwrap();
    let mut manager = manager_for_run(&store, "run-1");
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();

    let service = RecoveryService::new(store, "run-1", RecoveryConfig::default());
    assert!(service.check_wal_status().unwrap().pending_writes > 0);
    let status = service.checkpoint().unwrap();
    assert_eq!(status.pending_writes, 0);
}

//! Integration tests for frame lifecycle and hierarchy rules

use super::test_utils::memory_manager;
use framestack::frame::{
    AnchorOptions, AnchorType, CreateFrameOptions, EventOptions, FrameManager,
    FrameManagerOptions, FrameState, FrameStore, FrameType, LifecycleHooks,
};
use framestack::ErrorCode;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn options() -> FrameManagerOptions {
    FrameManagerOptions::new("proj", "run-1")
}

#[test]
fn test_child_frame_nests_under_current() {
    let mut manager = memory_manager(options());
    let a = manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    let b = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();

    let child = manager.get_frame(&b).unwrap().unwrap();
    assert_eq!(child.parent_frame_id.as_deref(), Some(a.as_str()));
    assert_eq!(child.depth, 1);
    assert_eq!(manager.get_stack_depth(), 2);
    assert_eq!(manager.get_current_frame_id(), Some(b.as_str()));

    let path: Vec<String> = manager
        .get_active_frame_path()
        .unwrap()
        .into_iter()
        .map(|f| f.frame_id)
        .collect();
    assert_eq!(path, vec![a, b]);
}

#[test]
fn test_reparent_into_own_descendant_is_a_cycle() {
    let mut manager = memory_manager(options());
    let a = manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    let _b = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();
    let c = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "C"))
        .unwrap();

    let err = manager.update_parent_frame(&a, Some(&c)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameCycleDetected);

    // Nothing was written
    let root = manager.get_frame(&a).unwrap().unwrap();
    assert_eq!(root.parent_frame_id, None);
    assert_eq!(root.depth, 0);
    assert!(manager.validate_frame_hierarchy().unwrap().is_valid);
}

#[test]
fn test_reparent_rewrites_subtree_depths() {
    let mut manager = memory_manager(options());
    let a = manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    let b = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();
    let c = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "C"))
        .unwrap();

    manager.update_parent_frame(&b, None).unwrap();
    assert_eq!(manager.get_frame(&b).unwrap().unwrap().depth, 0);
    assert_eq!(manager.get_frame(&c).unwrap().unwrap().depth, 1);

    manager.update_parent_frame(&b, Some(&a)).unwrap();
    assert_eq!(manager.get_frame(&c).unwrap().unwrap().depth, 2);
}

#[test]
fn test_live_stack_limit() {
    let mut manager = memory_manager(options().with_max_stack_depth(2));
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();

    let err = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "C"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameStackOverflow);
    assert_eq!(manager.get_stack_depth(), 2);
}

#[test]
fn test_hierarchy_depth_limit() {
    let mut manager = memory_manager(options().with_max_frame_depth(1));
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();

    let err = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "C"))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameStackOverflow);
}

#[test]
fn test_closing_middle_frame_unwinds_stack() {
    let mut manager = memory_manager(options());
    let a = manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    let b = manager
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
        .unwrap();
    let c = manager
        .create_frame(CreateFrameOptions::new(FrameType::ToolScope, "C"))
        .unwrap();

    manager.close_frame(Some(&b)).unwrap();

    assert_eq!(manager.get_stack_depth(), 1);
    assert_eq!(manager.get_current_frame_id(), Some(a.as_str()));
    for id in [&b, &c] {
        let frame = manager.get_frame(id).unwrap().unwrap();
        assert_eq!(frame.state, FrameState::Closed);
        assert!(frame.closed_at.is_some());
        assert!(frame.digest_text.is_some());
    }

    // Closing again is a no-op
    manager.close_frame(Some(&b)).unwrap();
    assert_eq!(manager.get_stack_depth(), 1);
}

#[test]
fn test_close_without_frames_is_invalid_state() {
    let mut manager = memory_manager(options());
    let err = manager.close_frame(None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameInvalidState);

    let err = manager.close_frame(Some("missing")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameNotFound);
}

#[test]
fn test_digest_reflects_events_and_anchors() {
    let mut manager = memory_manager(options());
    let a = manager
        .create_frame(CreateFrameOptions::new(FrameType::Debug, "Flaky test"))
        .unwrap();
    manager
        .add_event(EventOptions::new("tool_call", json!({ "tool": "cargo" })))
        .unwrap();
    manager
        .add_anchor(AnchorOptions::new(
            AnchorType::Decision,
            "Pin the runtime version",
            9,
        ))
        .unwrap();

    manager.close_frame(None).unwrap();
    let closed = manager.get_frame(&a).unwrap().unwrap();
    let digest = closed.digest_json.unwrap();
    assert!(digest.to_string().contains("Pin the runtime version"));

    let err = manager
        .add_event(EventOptions::new("note", json!({})).for_frame(&a))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameInvalidState);
}

#[test]
fn test_hot_context_orders_anchors_by_priority() {
    let mut manager = memory_manager(options());
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    for i in 0..5 {
        manager
            .add_event(EventOptions::new("step", json!({ "i": i })))
            .unwrap();
    }
    manager
        .add_anchor(AnchorOptions::new(AnchorType::Fact, "low", 1))
        .unwrap();
    manager
        .add_anchor(AnchorOptions::new(AnchorType::Risk, "high", 8))
        .unwrap();

    let hot = manager.get_hot_stack_context(2).unwrap();
    assert_eq!(hot.len(), 1);
    assert_eq!(hot[0].recent_events.len(), 2);
    assert_eq!(hot[0].recent_events[1].payload, json!({ "i": 4 }));
    assert_eq!(hot[0].anchors[0].text, "high");
}

#[test]
fn test_lifecycle_hooks_run_and_failures_are_swallowed() {
    let hooks = LifecycleHooks::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    hooks.on_frame_closed(
        "record",
        move |event| {
            let _ = tx.lock().send(event.frame.name.clone());
            Ok(())
        },
        10,
    );
    hooks.on_frame_closed("broken", |_| anyhow::bail!("hook exploded"), 0);

    let store = FrameStore::temporary().unwrap();
    let mut manager = FrameManager::open(store, options(), hooks).unwrap();
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();
    manager.close_frame(None).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "A");
}

#[test]
fn test_panicking_close_hook_leaves_stack_consistent() {
    let hooks = LifecycleHooks::new();
    hooks.on_frame_closed("explodes", |_| panic!("handler bug"), 0);

    let store = FrameStore::temporary().unwrap();
    let mut manager = FrameManager::open(store, options(), hooks).unwrap();
    let a = manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();

    manager.close_frame(Some(&a)).unwrap();

    assert_eq!(manager.get_stack_depth(), 0);
    assert_eq!(
        manager.get_frame(&a).unwrap().unwrap().state,
        FrameState::Closed
    );
    assert!(manager.validate_stack().unwrap().is_valid);
}

#[test]
fn test_close_does_not_wait_for_hooks() {
    let hooks = LifecycleHooks::new();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();
    let release_rx = Mutex::new(release_rx);
    let done_tx = Mutex::new(done_tx);
    hooks.on_frame_closed(
        "slow",
        move |_| {
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
            let _ = done_tx.lock().send(thread::current().id());
            Ok(())
        },
        0,
    );

    let store = FrameStore::temporary().unwrap();
    let mut manager = FrameManager::open(store, options(), hooks).unwrap();
    manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
        .unwrap();

    // Returns while the handler is still blocked
    manager.close_frame(None).unwrap();
    assert!(done_rx.try_recv().is_err());

    release_tx.send(()).unwrap();
    let hook_thread = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(hook_thread, thread::current().id());
}

#[test]
fn test_close_cascades_to_children_off_the_live_stack() {
    let store = FrameStore::temporary().unwrap();
    let mut manager = FrameManager::open(store.clone(), options(), LifecycleHooks::new()).unwrap();
    let parent = manager
        .create_frame(CreateFrameOptions::new(FrameType::Task, "Parent"))
        .unwrap();

    // Another run links work under the parent without touching this stack
    let mut other = FrameManager::open(
        store,
        FrameManagerOptions::new("proj", "run-2"),
        LifecycleHooks::new(),
    )
    .unwrap();
    let child = other
        .create_frame(CreateFrameOptions::new(FrameType::Subtask, "Child").with_parent(&parent))
        .unwrap();
    let grandchild = other
        .create_frame(CreateFrameOptions::new(FrameType::ToolScope, "Grandchild"))
        .unwrap();
    assert_eq!(manager.get_stack_depth(), 1);

    manager.close_frame(Some(&parent)).unwrap();

    assert_eq!(manager.get_stack_depth(), 0);
    for id in [&parent, &child, &grandchild] {
        let frame = manager.get_frame(id).unwrap().unwrap();
        assert_eq!(frame.state, FrameState::Closed, "{} left open", frame.name);
        assert!(frame.digest_text.is_some());
    }
}

#[test]
fn test_reopen_resumes_live_stack() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frames");

    let (a, b) = {
        let store = FrameStore::open(&path).unwrap();
        let mut manager = FrameManager::open(store, options(), LifecycleHooks::new()).unwrap();
        let a = manager
            .create_frame(CreateFrameOptions::new(FrameType::Task, "A"))
            .unwrap();
        let b = manager
            .create_frame(CreateFrameOptions::new(FrameType::Subtask, "B"))
            .unwrap();
        manager.store().flush().unwrap();
        (a, b)
    };

    let store = FrameStore::open(&path).unwrap();
    let manager = FrameManager::open(store, options(), LifecycleHooks::new()).unwrap();
    assert_eq!(manager.get_stack_depth(), 2);
    assert_eq!(manager.get_current_frame_id(), Some(b.as_str()));
    assert!(manager.validate_stack().unwrap().is_valid);

    // A different run starts with an empty stack
    drop(manager);
    let store = FrameStore::open(&path).unwrap();
    let other = FrameManager::open(
        store,
        FrameManagerOptions::new("proj", "run-2"),
        LifecycleHooks::new(),
    )
    .unwrap();
    assert_eq!(other.get_stack_depth(), 0);
    assert!(other.get_frame(&a).unwrap().is_some());
}

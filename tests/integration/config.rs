//! Integration tests wiring loaded configuration into the stack managers

use super::test_utils::memory_registry;
use framestack::collab::{DualStackManager, DualStackOptions, GrantPermissionChecker};
use framestack::config::ConfigLoader;
use framestack::frame::{CreateFrameOptions, FrameType, LifecycleHooks, RecoveryService};
use framestack::ErrorCode;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_file_limits_reach_frame_manager() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let config_path = dir.path().join("framestack.toml");
    fs::write(
        &config_path,
        format!(
            "[storage]\ndata_dir = {:?}\n\n[frames]\nmax_stack_depth = 2\n",
            data_dir.display().to_string()
        ),
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_path).unwrap();
    config.ensure_valid().unwrap();
    assert_eq!(config.frames.max_stack_depth, 2);
    assert_eq!(config.frames.max_frame_depth, 100);

    let registry = memory_registry();
    let mut dual = DualStackManager::open(
        DualStackOptions::new("alice", "proj", "run-1")
            .with_data_dir(config.storage.resolve_data_dir().unwrap())
            .with_limits(config.frames),
        registry.clone(),
        Arc::new(GrantPermissionChecker::new(registry)),
        LifecycleHooks::new(),
    )
    .unwrap();

    let manager = dual.get_active_frame_manager().unwrap();
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

    let store = manager.store().clone();
    let service = RecoveryService::new(store, "run-1", config.recovery)
        .with_checkpoint_threshold(config.storage.checkpoint_threshold_bytes);
    assert!(!service.check_wal_status().unwrap().checkpoint_needed);
    assert!(data_dir.join("stacks").join("individual-alice").exists());
}

#[test]
fn test_zero_limits_are_rejected() {
    let config: framestack::config::FramestackConfig =
        "[frames]\nmax_stack_depth = 0\n".parse().unwrap();
    let err = config.ensure_valid().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigError);
}
